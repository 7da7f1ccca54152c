//! Sinks the minidump writer emits through.
//!
//! The writer only ever needs three things from its output: complete writes,
//! gathered writes, and seeking (to query the current offset and to patch the
//! header signature at the very end). [`FileWriterInterface`] captures exactly
//! that, [`FileWriter`] maps it onto a real file, and [`BufferWriter`] keeps
//! everything in memory for tests.

use std::fs::File;
use std::io::{Cursor, IoSlice, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileWriterError {
    #[error("failed to open '{}'", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, FileWriterError>;

/// Byte sink with POSIX file semantics.
///
/// Both write methods only return `Ok` once every byte has been written;
/// short writes and interruptions are retried internally. Failures never
/// report partial success.
pub trait FileWriterInterface {
    /// Writes the entire buffer.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Writes the buffers back to back, as if concatenated.
    ///
    /// The slices are consumed by the call and are left in an unspecified
    /// state afterwards.
    fn write_iovec(&mut self, iovecs: &mut [IoSlice<'_>]) -> Result<()>;

    /// Repositions the sink, returning the new absolute offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// The current absolute offset.
    fn current_offset(&mut self) -> Result<u64> {
        self.seek(SeekFrom::Current(0))
    }
}

/// Writes to a file on disk.
///
/// The file is created (or truncated) on open, so a dump path never ends up
/// holding a stale dump alongside a fresh one.
#[derive(Debug)]
pub struct FileWriter {
    file: File,
}

impl FileWriter {
    /// Opens `path` for writing, creating it with `mode` (on Unix) or
    /// truncating whatever is already there.
    pub fn open(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref();

        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);

        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::fs::OpenOptionsExt;
                opts.mode(mode);
            } else {
                let _ = mode;
            }
        }

        let file = opts.open(path).map_err(|source| FileWriterError::Open {
            path: path.to_owned(),
            source,
        })?;

        Ok(Self { file })
    }

    /// Flushes and closes the file, reporting any deferred I/O error.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl FileWriterInterface for FileWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        // write_all already retries short writes and EINTR
        self.file.write_all(data)?;
        Ok(())
    }

    fn write_iovec(&mut self, iovecs: &mut [IoSlice<'_>]) -> Result<()> {
        write_iovec_retrying(&mut self.file, iovecs)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }
}

/// An in-memory sink over a growable buffer.
///
/// Seeking past the end and then writing zero-extends the gap, matching what
/// a sparse file would contain when read back.
#[derive(Debug, Default)]
pub struct BufferWriter {
    inner: Cursor<Vec<u8>>,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl FileWriterInterface for BufferWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        failspot::failspot!(<crate::FailSpotName>::FileWrite
            bail(std::io::Error::other("injected file write failure")));

        self.inner.write_all(data)?;
        Ok(())
    }

    fn write_iovec(&mut self, iovecs: &mut [IoSlice<'_>]) -> Result<()> {
        failspot::failspot!(<crate::FailSpotName>::FileWrite
            bail(std::io::Error::other("injected file write failure")));

        write_iovec_retrying(&mut self.inner, iovecs)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.inner.seek(pos)?)
    }
}

/// Drives `write_vectored` to completion, advancing the slices across short
/// writes the way `write_all` does for a single buffer.
fn write_iovec_retrying<W: Write>(writer: &mut W, iovecs: &mut [IoSlice<'_>]) -> Result<()> {
    let mut iovecs = iovecs;
    let mut remaining: usize = iovecs.iter().map(|iov| iov.len()).sum();

    while remaining > 0 {
        match writer.write_vectored(iovecs) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole iovec",
                )
                .into());
            }
            Ok(written) => {
                remaining -= written;
                IoSlice::advance_slices(&mut iovecs, written);
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn buffer_writer_appends() {
        let mut writer = BufferWriter::new();
        writer.write(&[1, 2, 3]).unwrap();
        writer.write(&[4]).unwrap();
        assert_eq!(writer.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(writer.current_offset().unwrap(), 4);
    }

    #[test]
    fn buffer_writer_zero_extends_after_seek_past_end() {
        let mut writer = BufferWriter::new();
        writer.write(&[0xab]).unwrap();
        assert_eq!(writer.seek(SeekFrom::Start(4)).unwrap(), 4);
        writer.write(&[0xcd]).unwrap();
        assert_eq!(writer.as_bytes(), &[0xab, 0, 0, 0, 0xcd]);
    }

    #[test]
    fn buffer_writer_overwrites_in_place() {
        let mut writer = BufferWriter::new();
        writer.write(&[0; 8]).unwrap();
        writer.seek(SeekFrom::Start(2)).unwrap();
        writer.write(&[0xff, 0xee]).unwrap();
        assert_eq!(writer.as_bytes(), &[0, 0, 0xff, 0xee, 0, 0, 0, 0]);
        // The cursor stays where the overwrite left it
        assert_eq!(writer.current_offset().unwrap(), 4);
    }

    #[test]
    fn write_iovec_gathers() {
        let mut writer = BufferWriter::new();
        let one = [1u8, 2];
        let two = [3u8];
        let three = [4u8, 5, 6];
        let mut iovecs = [
            IoSlice::new(&one),
            IoSlice::new(&two),
            IoSlice::new(&three),
        ];
        writer.write_iovec(&mut iovecs).unwrap();
        assert_eq!(writer.as_bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    /// Delivers bytes one at a time and fails with `Interrupted` between
    /// writes, the worst case the retry loops must absorb.
    struct OneByteWriter {
        bytes: Vec<u8>,
        interrupt_next: bool,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.interrupt_next {
                self.interrupt_next = false;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "interrupted",
                ));
            }
            self.interrupt_next = true;
            self.bytes.extend_from_slice(&buf[..1]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn vectored_writes_survive_short_writes_and_interruptions() {
        let mut writer = OneByteWriter {
            bytes: Vec::new(),
            interrupt_next: false,
        };

        let one = [1u8, 2, 3];
        let two = [4u8, 5];
        let mut iovecs = [IoSlice::new(&one), IoSlice::new(&two)];
        write_iovec_retrying(&mut writer, &mut iovecs).unwrap();

        assert_eq!(writer.bytes, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn file_writer_roundtrip() {
        let tmpfile = tempfile::Builder::new()
            .prefix("file_writer")
            .tempfile()
            .unwrap();

        let mut writer = FileWriter::open(tmpfile.path(), 0o600).unwrap();
        writer.write(b"head").unwrap();
        writer.seek(SeekFrom::Start(0)).unwrap();
        writer.write(b"H").unwrap();
        writer.seek(SeekFrom::End(0)).unwrap();
        writer.write(b"tail").unwrap();
        writer.close().unwrap();

        assert_eq!(std::fs::read(tmpfile.path()).unwrap(), b"Headtail");
    }

    #[test]
    fn file_writer_truncates_existing_contents() {
        let tmpfile = tempfile::Builder::new()
            .prefix("file_writer_trunc")
            .tempfile()
            .unwrap();
        std::fs::write(tmpfile.path(), b"previous contents").unwrap();

        let mut writer = FileWriter::open(tmpfile.path(), 0o600).unwrap();
        writer.write(b"new").unwrap();
        writer.close().unwrap();

        assert_eq!(std::fs::read(tmpfile.path()).unwrap(), b"new");
    }
}
