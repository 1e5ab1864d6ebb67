//! Writing packs for push and local repacking of received objects.
//!
//! Entries are stored whole (no delta search); receivers accept such
//! packs unconditionally and deltification is a transfer-size
//! optimisation this engine does not perform.

use gitport_hash::hasher::Hasher;
use gitport_hash::{zlib, Oid};
use gitport_object::ObjectType;

use crate::entry::encode_entry_header;
use crate::index::IndexEntry;
use crate::{PackEntryType, PackError, PACK_SIGNATURE, PACK_VERSION};

/// Builds a pack byte stream from full objects.
pub struct PackWriter {
    entries: Vec<(ObjectType, Vec<u8>)>,
    compression_level: u32,
}

/// A finished pack: the byte stream, its trailer checksum, and the
/// index entries describing it.
pub struct FinishedPack {
    pub bytes: Vec<u8>,
    pub checksum: Oid,
    pub index_entries: Vec<IndexEntry>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            compression_level: 6,
        }
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Queue an object for the pack.
    pub fn push(&mut self, obj_type: ObjectType, data: Vec<u8>) {
        self.entries.push((obj_type, data));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the pack: header, entries, trailing SHA-1.
    pub fn finish(self) -> Result<FinishedPack, PackError> {
        let mut out = Vec::new();
        out.extend_from_slice(PACK_SIGNATURE);
        out.extend_from_slice(&PACK_VERSION.to_be_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        let mut index_entries = Vec::with_capacity(self.entries.len());
        for (obj_type, data) in &self.entries {
            let offset = out.len() as u64;
            let type_num = PackEntryType::from_object_type(*obj_type).type_number();
            out.extend_from_slice(&encode_entry_header(type_num, data.len() as u64));
            out.extend_from_slice(&zlib::deflate(data, self.compression_level));

            let mut crc = crc32fast::Hasher::new();
            crc.update(&out[offset as usize..]);
            index_entries.push(IndexEntry {
                oid: Hasher::hash_object(obj_type.as_str(), data),
                crc32: crc.finalize(),
                offset,
            });
        }

        let checksum = Hasher::digest(&out);
        out.extend_from_slice(checksum.as_bytes());

        Ok(FinishedPack {
            bytes: out,
            checksum,
            index_entries,
        })
    }
}

impl Default for PackWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pack_has_header_and_trailer() {
        let pack = PackWriter::new().finish().unwrap();
        assert_eq!(pack.bytes.len(), 12 + 20);
        assert_eq!(&pack.bytes[0..4], b"PACK");
        assert_eq!(
            Hasher::digest(&pack.bytes[..12]),
            pack.checksum
        );
    }

    #[test]
    fn entries_carry_known_oids() {
        let mut writer = PackWriter::new();
        writer.push(ObjectType::Blob, b"hello world\n".to_vec());
        let pack = writer.finish().unwrap();
        assert_eq!(pack.index_entries.len(), 1);
        assert_eq!(
            pack.index_entries[0].oid.to_hex(),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
        assert_eq!(pack.index_entries[0].offset, 12);
    }
}
