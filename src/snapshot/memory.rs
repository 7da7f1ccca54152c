//! Captured memory ranges and the reader they pull bytes through.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryReadError {
    #[error("memory at {address:#x}..{:#x} is unreadable", .address + .len)]
    Unreadable { address: u64, len: u64 },
    #[error("read at {address:#x} returned {returned} bytes, wanted {wanted}")]
    ShortRead {
        address: u64,
        wanted: u64,
        returned: u64,
    },
    #[error("string at {address:#x} is not terminated within {limit} bytes")]
    UnterminatedString { address: u64, limit: u64 },
}

/// Reads memory from a captured target.
///
/// Implementations must stay valid for as long as any [`MemorySnapshot`]
/// holds them; in particular a reader backing a resumed process must have
/// copied or pinned the pages it serves.
pub trait MemoryReader: Send + Sync {
    /// Reads exactly `len` bytes at `address`.
    fn read(&self, address: u64, len: u64) -> Result<Vec<u8>, MemoryReadError>;

    /// Reads a NUL-terminated string at `address`, without the terminator.
    fn read_cstring(&self, address: u64) -> Result<String, MemoryReadError> {
        // Pull chunks until a NUL shows up, within a sanity bound
        const CHUNK: u64 = 256;
        const LIMIT: u64 = 64 * 1024;

        let mut collected = Vec::new();
        let mut offset = 0;
        while offset < LIMIT {
            let chunk = self.read(address + offset, CHUNK)?;
            if let Some(nul) = chunk.iter().position(|&byte| byte == 0) {
                collected.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&collected).into_owned());
            }
            collected.extend_from_slice(&chunk);
            offset += CHUNK;
        }

        Err(MemoryReadError::UnterminatedString {
            address,
            limit: LIMIT,
        })
    }
}

/// A reader over bytes already captured into this process.
pub struct BufferMemoryReader {
    base_address: u64,
    bytes: Vec<u8>,
}

impl BufferMemoryReader {
    pub fn new(base_address: u64, bytes: Vec<u8>) -> Self {
        Self {
            base_address,
            bytes,
        }
    }
}

impl MemoryReader for BufferMemoryReader {
    fn read(&self, address: u64, len: u64) -> Result<Vec<u8>, MemoryReadError> {
        let end = address
            .checked_add(len)
            .ok_or(MemoryReadError::Unreadable { address, len })?;
        let buffer_end = self.base_address + self.bytes.len() as u64;

        if address < self.base_address || end > buffer_end {
            return Err(MemoryReadError::Unreadable { address, len });
        }

        let start = (address - self.base_address) as usize;
        Ok(self.bytes[start..start + len as usize].to_vec())
    }
}

/// A contiguous range of the target's address space.
///
/// Holds `(base, size)` and a reader rather than bytes; the writer invokes
/// the reader while serializing, in bounded chunks.
#[derive(Clone)]
pub struct MemorySnapshot {
    pub base_address: u64,
    pub size: u64,
    reader: Arc<dyn MemoryReader>,
}

impl MemorySnapshot {
    pub fn new(base_address: u64, size: u64, reader: Arc<dyn MemoryReader>) -> Self {
        Self {
            base_address,
            size,
            reader,
        }
    }

    /// A range whose contents were captured eagerly.
    pub fn from_bytes(base_address: u64, bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self::new(
            base_address,
            size,
            Arc::new(BufferMemoryReader::new(base_address, bytes)),
        )
    }

    /// Reads `len` bytes starting `offset` bytes into the range.
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>, MemoryReadError> {
        debug_assert!(offset + len <= self.size);
        let bytes = self.reader.read(self.base_address + offset, len)?;
        if bytes.len() as u64 != len {
            return Err(MemoryReadError::ShortRead {
                address: self.base_address + offset,
                wanted: len,
                returned: bytes.len() as u64,
            });
        }
        Ok(bytes)
    }
}

impl fmt::Debug for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySnapshot")
            .field("base_address", &self.base_address)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
