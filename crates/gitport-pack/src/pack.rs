//! Reading `.pack` files: entry lookup via the index and iterative
//! delta-chain resolution with a bounded base cache.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use gitport_hash::{zlib, Oid};
use gitport_object::ObjectType;
use lru::LruCache;
use memmap2::Mmap;

use crate::delta::apply_delta;
use crate::entry::parse_entry_header;
use crate::index::PackIndex;
use crate::{
    PackEntryType, PackError, PackedObject, MAX_DELTA_CHAIN_DEPTH, PACK_HEADER_SIZE,
    PACK_SIGNATURE, PACK_VERSION,
};

/// Default byte budget for the per-pack delta-base cache.
const DEFAULT_CACHE_BUDGET: usize = 16 * 1024 * 1024;

/// Resolved bases kept around for subsequent delta applications,
/// bounded by a total byte budget.
struct BaseCache {
    entries: LruCache<u64, (ObjectType, Vec<u8>)>,
    bytes: usize,
    budget: usize,
}

impl BaseCache {
    fn new(budget: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            budget,
        }
    }

    fn get(&mut self, offset: u64) -> Option<(ObjectType, Vec<u8>)> {
        self.entries.get(&offset).cloned()
    }

    fn insert(&mut self, offset: u64, obj_type: ObjectType, data: Vec<u8>) {
        if data.len() > self.budget {
            return;
        }
        if let Some(old) = self.entries.put(offset, (obj_type, data)) {
            self.bytes -= old.1.len();
        }
        self.bytes += self.entries.peek(&offset).map(|e| e.1.len()).unwrap_or(0);
        while self.bytes > self.budget {
            match self.entries.pop_lru() {
                Some((_, (_, evicted))) => self.bytes -= evicted.len(),
                None => break,
            }
        }
    }
}

/// A memory-mapped packfile together with its index.
pub struct PackFile {
    data: Mmap,
    index: PackIndex,
    pack_path: PathBuf,
    num_objects: u32,
    cache: Mutex<BaseCache>,
}

impl PackFile {
    /// Open `<name>.pack` and its sibling `<name>.idx`.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let idx_path = pack_path.with_extension("idx");
        let index = PackIndex::open(&idx_path)?;
        Self::open_with_index(pack_path, index)
    }

    /// Open a pack with an already-parsed index.
    pub fn open_with_index(
        pack_path: impl AsRef<Path>,
        index: PackIndex,
    ) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&pack_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() < PACK_HEADER_SIZE + Oid::RAW_LEN {
            return Err(PackError::InvalidHeader("file too small".into()));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(PackError::InvalidHeader("bad PACK signature".into()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let num_objects = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        if index.num_objects() != num_objects {
            return Err(PackError::InvalidHeader(format!(
                "pack has {} objects but index has {}",
                num_objects,
                index.num_objects()
            )));
        }

        Ok(Self {
            data,
            index,
            pack_path,
            num_objects,
            cache: Mutex::new(BaseCache::new(DEFAULT_CACHE_BUDGET)),
        })
    }

    /// Replace the delta-base cache budget (bytes).
    pub fn with_cache_budget(self, budget: usize) -> Self {
        Self {
            cache: Mutex::new(BaseCache::new(budget)),
            ..self
        }
    }

    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// The trailer checksum of this pack.
    pub fn checksum(&self) -> Oid {
        let start = self.data.len() - Oid::RAW_LEN;
        Oid::from_bytes(&self.data[start..]).expect("fixed width")
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.index.contains(oid)
    }

    /// Read an object by OID. `None` if it is not in this pack.
    pub fn read(&self, oid: &Oid) -> Result<Option<PackedObject>, PackError> {
        self.read_with_resolver(oid, |_| None)
    }

    /// Read with an external resolver for REF_DELTA bases that live
    /// outside this pack (thin packs, cross-pack deltas).
    pub fn read_with_resolver(
        &self,
        oid: &Oid,
        resolver: impl Fn(&Oid) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<Option<PackedObject>, PackError> {
        match self.index.lookup(oid) {
            Some(offset) => self.read_at_offset_with_resolver(offset, resolver).map(Some),
            None => Ok(None),
        }
    }

    /// Read the object stored at a known entry offset.
    pub fn read_at_offset(&self, offset: u64) -> Result<PackedObject, PackError> {
        self.read_at_offset_with_resolver(offset, |_| None)
    }

    /// Core read path: walk the delta chain iteratively (bounded by
    /// [`MAX_DELTA_CHAIN_DEPTH`]), then apply deltas outward from the base.
    pub fn read_at_offset_with_resolver(
        &self,
        offset: u64,
        resolver: impl Fn(&Oid) -> Option<(ObjectType, Vec<u8>)>,
    ) -> Result<PackedObject, PackError> {
        // Deltas collected outermost-first while walking to the base.
        let mut chain: Vec<Vec<u8>> = Vec::new();
        let mut current_offset = offset;

        let (base_type, base_data) = loop {
            if chain.len() > MAX_DELTA_CHAIN_DEPTH {
                return Err(PackError::DeltaChainTooDeep {
                    offset,
                    max_depth: MAX_DELTA_CHAIN_DEPTH,
                });
            }

            if let Some((ty, data)) = self.cache.lock().unwrap().get(current_offset) {
                break (ty, data);
            }

            let entry = self.parse_entry_at(current_offset)?;
            let payload = self.inflate_entry(&entry, current_offset)?;

            match entry.entry_type {
                PackEntryType::OfsDelta { base_offset } => {
                    chain.push(payload);
                    current_offset = base_offset;
                }
                PackEntryType::RefDelta { base_oid } => {
                    chain.push(payload);
                    if let Some(base_offset) = self.index.lookup(&base_oid) {
                        current_offset = base_offset;
                    } else {
                        let (ty, data) =
                            resolver(&base_oid).ok_or(PackError::MissingBase(base_oid))?;
                        break (ty, data);
                    }
                }
                other => {
                    let ty = other.to_object_type().expect("non-delta entry");
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(current_offset, ty, payload.clone());
                    break (ty, payload);
                }
            }
        };

        // Apply deltas from the base outward.
        let mut data = base_data;
        for delta in chain.iter().rev() {
            data = apply_delta(&data, delta)?;
        }

        if !chain.is_empty() {
            self.cache
                .lock()
                .unwrap()
                .insert(offset, base_type, data.clone());
        }

        Ok(PackedObject {
            obj_type: base_type,
            data,
            offset,
        })
    }

    /// Iterate all entries in index order, fully resolved.
    pub fn iter_entries(
        &self,
    ) -> impl Iterator<Item = Result<(Oid, PackedObject), PackError>> + '_ {
        self.index
            .iter()
            .map(move |(oid, offset)| self.read_at_offset(offset).map(|obj| (oid, obj)))
    }

    fn parse_entry_at(&self, offset: u64) -> Result<crate::entry::PackEntry, PackError> {
        let start = offset as usize;
        let end = self.data.len() - Oid::RAW_LEN;
        if start >= end {
            return Err(PackError::CorruptEntry(offset));
        }
        parse_entry_header(&self.data[start..end], offset)
    }

    fn inflate_entry(
        &self,
        entry: &crate::entry::PackEntry,
        offset: u64,
    ) -> Result<Vec<u8>, PackError> {
        let start = entry.data_offset as usize;
        let end = self.data.len() - Oid::RAW_LEN;
        if start > end {
            return Err(PackError::CorruptEntry(offset));
        }
        let (data, _consumed) = zlib::inflate_with_consumed(
            &self.data[start..end],
            entry.uncompressed_size,
        )
        .map_err(|e| PackError::InvalidDelta {
            offset,
            reason: e.to_string(),
        })?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_cache_respects_byte_budget() {
        let mut cache = BaseCache::new(100);
        cache.insert(0, ObjectType::Blob, vec![0u8; 60]);
        cache.insert(1, ObjectType::Blob, vec![0u8; 60]);
        // First entry must have been evicted to stay under 100 bytes.
        assert!(cache.get(0).is_none());
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn oversized_entries_are_not_cached() {
        let mut cache = BaseCache::new(10);
        cache.insert(0, ObjectType::Blob, vec![0u8; 64]);
        assert!(cache.get(0).is_none());
        assert_eq!(cache.bytes, 0);
    }
}
