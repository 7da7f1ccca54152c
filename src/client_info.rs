//! The per-process info block a client publishes for its crash handler.
//!
//! A client process places one of these at a known address and hands that
//! address to the handler during registration. The handler later pulls the
//! block back through a [`MemoryReader`] while building the snapshot; the
//! addresses inside point at the client's annotation structures.
//!
//! The block is deliberately a fixed, versioned, signed layout: the handler
//! reads it from a process in an arbitrary state and must be able to reject
//! garbage.

use scroll::Pread;
use thiserror::Error;

use crate::snapshot::{MemoryReadError, MemoryReader};

/// First field of a published info block, 'CPad' read little-endian.
pub const CLIENT_INFO_SIGNATURE: u32 = 0x43506164;
/// Layout version this crate reads and writes.
pub const CLIENT_INFO_VERSION: u32 = 1;

/// On-disk/in-memory size of the block.
pub const CLIENT_INFO_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum ClientInfoError {
    #[error(transparent)]
    MemoryRead(#[from] MemoryReadError),
    #[error("bad info-block signature {0:#x}")]
    BadSignature(u32),
    #[error("unsupported info-block version {0}")]
    UnsupportedVersion(u32),
    #[error("info block declares size {0}, expected at least {CLIENT_INFO_SIZE}")]
    BadSize(u32),
    #[error("failed to decode the info block")]
    Decode(#[from] scroll::Error),
}

/// The info block itself.
///
/// `size` lets newer clients append fields without breaking older handlers;
/// a handler reads the declared size and ignores what it does not know.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientInfo {
    pub signature: u32,
    pub size: u32,
    pub version: u32,
    /// Padding keeps the addresses below 8-byte aligned in the client.
    pub reserved: u32,
    /// Address of the client's simple annotation dictionary, 0 if none.
    pub simple_annotations_address: u64,
    /// Address of the client's typed annotation list, 0 if none.
    pub annotation_objects_address: u64,
}

impl ClientInfo {
    pub fn new(simple_annotations_address: u64, annotation_objects_address: u64) -> Self {
        Self {
            signature: CLIENT_INFO_SIGNATURE,
            size: CLIENT_INFO_SIZE as u32,
            version: CLIENT_INFO_VERSION,
            reserved: 0,
            simple_annotations_address,
            annotation_objects_address,
        }
    }

    /// Serializes the block the way a client publishes it.
    pub fn to_bytes(&self) -> [u8; CLIENT_INFO_SIZE] {
        let mut buf = [0u8; CLIENT_INFO_SIZE];
        buf[0..4].copy_from_slice(&self.signature.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        buf[16..24].copy_from_slice(&self.simple_annotations_address.to_le_bytes());
        buf[24..32].copy_from_slice(&self.annotation_objects_address.to_le_bytes());
        buf
    }

    /// Reads and validates a block from a captured process.
    pub fn read_from(
        reader: &dyn MemoryReader,
        address: u64,
    ) -> Result<Self, ClientInfoError> {
        let bytes = reader.read(address, CLIENT_INFO_SIZE as u64)?;

        let mut offset = 0;
        let signature: u32 = bytes.as_slice().gread_with(&mut offset, scroll::LE)?;
        if signature != CLIENT_INFO_SIGNATURE {
            return Err(ClientInfoError::BadSignature(signature));
        }

        let size: u32 = bytes.as_slice().gread_with(&mut offset, scroll::LE)?;
        if (size as usize) < CLIENT_INFO_SIZE {
            return Err(ClientInfoError::BadSize(size));
        }

        let version: u32 = bytes.as_slice().gread_with(&mut offset, scroll::LE)?;
        if version != CLIENT_INFO_VERSION {
            return Err(ClientInfoError::UnsupportedVersion(version));
        }

        let reserved: u32 = bytes.as_slice().gread_with(&mut offset, scroll::LE)?;
        let simple_annotations_address: u64 =
            bytes.as_slice().gread_with(&mut offset, scroll::LE)?;
        let annotation_objects_address: u64 =
            bytes.as_slice().gread_with(&mut offset, scroll::LE)?;

        Ok(Self {
            signature,
            size,
            version,
            reserved,
            simple_annotations_address,
            annotation_objects_address,
        })
    }
}

/// Storage sizes of the published annotation dictionary. Key and value
/// sizes count bytes including the NUL terminator.
pub const DICTIONARY_KEY_SIZE: usize = 256;
pub const DICTIONARY_VALUE_SIZE: usize = 256;
pub const DICTIONARY_NUM_ENTRIES: usize = 64;

/// One slot of the dictionary. A zero-length key marks the slot free.
#[derive(Clone, Copy)]
struct DictionaryEntry {
    key: [u8; DICTIONARY_KEY_SIZE],
    value: [u8; DICTIONARY_VALUE_SIZE],
}

impl DictionaryEntry {
    const EMPTY: Self = Self {
        key: [0; DICTIONARY_KEY_SIZE],
        value: [0; DICTIONARY_VALUE_SIZE],
    };

    fn is_active(&self) -> bool {
        self.key[0] != 0
    }
}

/// A key→value map in a fixed block of storage.
///
/// Performs no allocation after construction, so it remains usable from
/// signal handlers and exception filters, and the handler can lift the whole
/// table out of the crashed process with a single read. Keys and values
/// longer than their slot are truncated at a character boundary, keeping
/// room for the NUL.
pub struct SimpleStringDictionary {
    entries: Box<[DictionaryEntry; DICTIONARY_NUM_ENTRIES]>,
}

impl Default for SimpleStringDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleStringDictionary {
    /// Total size of the backing storage, as the handler reads it.
    pub const SERIALIZED_SIZE: usize =
        DICTIONARY_NUM_ENTRIES * (DICTIONARY_KEY_SIZE + DICTIONARY_VALUE_SIZE);

    pub fn new() -> Self {
        Self {
            entries: Box::new([DictionaryEntry::EMPTY; DICTIONARY_NUM_ENTRIES]),
        }
    }

    /// Sets `key` to `value`, replacing any existing value. A full table
    /// drops the entry with a log line rather than failing.
    pub fn set(&mut self, key: &str, value: &str) {
        if key.is_empty() {
            log::error!("cannot set an empty annotation key");
            return;
        }

        let slot = match self.position(key).or_else(|| self.free_slot()) {
            Some(slot) => slot,
            None => {
                log::error!("annotation table is full, dropping '{key}'");
                return;
            }
        };

        let entry = &mut self.entries[slot];
        entry.key = [0; DICTIONARY_KEY_SIZE];
        entry.value = [0; DICTIONARY_VALUE_SIZE];
        copy_truncated(key, &mut entry.key);
        copy_truncated(value, &mut entry.value);
    }

    /// Removes `key` if present.
    pub fn remove(&mut self, key: &str) {
        if let Some(slot) = self.position(key) {
            self.entries[slot] = DictionaryEntry::EMPTY;
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key)
            .map(|slot| nul_terminated(&self.entries[slot].value))
    }

    /// Number of active entries, at most [`DICTIONARY_NUM_ENTRIES`].
    pub fn count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_active()).count()
    }

    /// Active `(key, value)` pairs, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter(|entry| entry.is_active()).map(|entry| {
            (nul_terminated(&entry.key), nul_terminated(&entry.value))
        })
    }

    /// The backing storage, for publishing at a known address.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SERIALIZED_SIZE);
        for entry in self.entries.iter() {
            bytes.extend_from_slice(&entry.key);
            bytes.extend_from_slice(&entry.value);
        }
        bytes
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.is_active() && nul_terminated(&entry.key) == key)
    }

    fn free_slot(&self) -> Option<usize> {
        self.entries.iter().position(|entry| !entry.is_active())
    }
}

/// Copies `source` into `dest`, truncating at a character boundary so the
/// stored text stays valid UTF-8, and leaving the final NUL in place.
fn copy_truncated(source: &str, dest: &mut [u8]) {
    let mut len = source.len().min(dest.len() - 1);
    while !source.is_char_boundary(len) {
        len -= 1;
    }
    dest[..len].copy_from_slice(&source.as_bytes()[..len]);
}

fn nul_terminated(bytes: &[u8]) -> &str {
    let len = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..len]).unwrap_or("")
}

/// Handler side: lifts a published dictionary out of the client process and
/// collapses it into the map form the snapshot model carries. Later slots
/// win on duplicate keys.
pub fn read_simple_annotations(
    reader: &dyn MemoryReader,
    address: u64,
) -> Result<std::collections::BTreeMap<String, String>, MemoryReadError> {
    let bytes = reader.read(address, SimpleStringDictionary::SERIALIZED_SIZE as u64)?;

    let mut annotations = std::collections::BTreeMap::new();
    for entry in bytes.chunks_exact(DICTIONARY_KEY_SIZE + DICTIONARY_VALUE_SIZE) {
        let key = nul_terminated(&entry[..DICTIONARY_KEY_SIZE]);
        if key.is_empty() {
            continue;
        }
        let value = nul_terminated(&entry[DICTIONARY_KEY_SIZE..]);
        annotations.insert(key.to_owned(), value.to_owned());
    }
    Ok(annotations)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::snapshot::BufferMemoryReader;

    #[test]
    fn roundtrips_through_a_memory_reader() {
        let info = ClientInfo::new(0x7fff_0000_1000, 0x7fff_0000_2000);
        let reader = BufferMemoryReader::new(0x5000, info.to_bytes().to_vec());

        let read_back = ClientInfo::read_from(&reader, 0x5000).unwrap();
        assert_eq!(read_back, info);
    }

    #[test]
    fn rejects_a_bad_signature() {
        let mut bytes = ClientInfo::new(0, 0).to_bytes();
        bytes[0] ^= 0xff;
        let reader = BufferMemoryReader::new(0, bytes.to_vec());

        assert!(matches!(
            ClientInfo::read_from(&reader, 0),
            Err(ClientInfoError::BadSignature(_))
        ));
    }

    #[test]
    fn rejects_an_unknown_version() {
        let mut info = ClientInfo::new(0, 0);
        info.version = 99;
        let reader = BufferMemoryReader::new(0, info.to_bytes().to_vec());

        assert!(matches!(
            ClientInfo::read_from(&reader, 0),
            Err(ClientInfoError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn dictionary_set_get_remove() {
        let mut dictionary = SimpleStringDictionary::new();
        assert_eq!(dictionary.count(), 0);
        assert_eq!(dictionary.get("missing"), None);

        dictionary.set("channel", "beta");
        dictionary.set("user", "u-123");
        assert_eq!(dictionary.count(), 2);
        assert_eq!(dictionary.get("channel"), Some("beta"));

        // Replacing reuses the slot
        dictionary.set("channel", "stable");
        assert_eq!(dictionary.count(), 2);
        assert_eq!(dictionary.get("channel"), Some("stable"));

        dictionary.remove("channel");
        assert_eq!(dictionary.count(), 1);
        assert_eq!(dictionary.get("channel"), None);
    }

    #[test]
    fn dictionary_truncates_on_a_character_boundary() {
        let mut dictionary = SimpleStringDictionary::new();
        // 'ü' is two bytes; position it so a byte-wise cut would split it
        let long_value = "a".repeat(DICTIONARY_VALUE_SIZE - 2) + "ü";
        dictionary.set("k", &long_value);

        let stored = dictionary.get("k").unwrap();
        assert_eq!(stored.len(), DICTIONARY_VALUE_SIZE - 2);
        assert!(stored.chars().all(|c| c == 'a'));
    }

    #[test]
    fn dictionary_drops_sets_beyond_capacity() {
        let mut dictionary = SimpleStringDictionary::new();
        for index in 0..DICTIONARY_NUM_ENTRIES {
            dictionary.set(&format!("key-{index}"), "v");
        }
        assert_eq!(dictionary.count(), DICTIONARY_NUM_ENTRIES);

        dictionary.set("one-too-many", "v");
        assert_eq!(dictionary.count(), DICTIONARY_NUM_ENTRIES);
        assert_eq!(dictionary.get("one-too-many"), None);

        // Removal opens a slot back up
        dictionary.remove("key-0");
        dictionary.set("one-too-many", "v");
        assert_eq!(dictionary.get("one-too-many"), Some("v"));
    }

    #[test]
    fn handler_reads_published_annotations_back() {
        let mut dictionary = SimpleStringDictionary::new();
        dictionary.set("channel", "nightly");
        dictionary.set("version", "2.0.1");

        let reader = BufferMemoryReader::new(0x7000, dictionary.as_bytes());
        let annotations = read_simple_annotations(&reader, 0x7000).unwrap();

        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations["channel"], "nightly");
        assert_eq!(annotations["version"], "2.0.1");
    }
}
