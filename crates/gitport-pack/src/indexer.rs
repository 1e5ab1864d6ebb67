//! Receive-side pack ingestion: stream-parse every entry, defer delta
//! resolution until all offsets are known, then compute OIDs, verify
//! the trailer, and install `.pack` + `.idx` atomically.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use gitport_hash::hasher::Hasher;
use gitport_hash::{zlib, Oid};
use gitport_object::ObjectType;

use crate::delta::apply_delta;
use crate::entry::parse_entry_header;
use crate::index::{write_index, IndexEntry};
use crate::{
    PackEntryType, PackError, MAX_DELTA_CHAIN_DEPTH, PACK_HEADER_SIZE, PACK_SIGNATURE,
    PACK_VERSION,
};

/// One entry as first seen during the streaming parse.
struct RawEntry {
    offset: u64,
    entry_type: PackEntryType,
    data: Vec<u8>,
    crc32: u32,
}

/// The outcome of indexing a pack byte stream.
#[derive(Debug)]
pub struct IndexedPack {
    /// Index entries (oid, crc, offset) for every object.
    pub entries: Vec<IndexEntry>,
    /// Trailer checksum of the pack.
    pub checksum: Oid,
    /// Objects resolved during ingestion, keyed by OID. Thin-pack bases
    /// fetched from the resolver are not included.
    pub objects: HashMap<Oid, (ObjectType, Vec<u8>)>,
}

/// Index a complete pack byte stream.
///
/// `resolver` supplies REF_DELTA bases that are not part of the stream
/// (thin packs); it is consulted only after in-pack resolution fails.
pub fn index_pack(
    bytes: &[u8],
    resolver: impl Fn(&Oid) -> Option<(ObjectType, Vec<u8>)>,
) -> Result<IndexedPack, PackError> {
    if bytes.len() < PACK_HEADER_SIZE + Oid::RAW_LEN {
        return Err(PackError::InvalidHeader("pack too small".into()));
    }
    if &bytes[0..4] != PACK_SIGNATURE {
        return Err(PackError::InvalidHeader("bad PACK signature".into()));
    }
    let version = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != PACK_VERSION {
        return Err(PackError::UnsupportedVersion(version));
    }
    let num_objects = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;

    // Trailer first: a checksum mismatch means nothing else is trustworthy.
    let content_end = bytes.len() - Oid::RAW_LEN;
    let expected = Oid::from_bytes(&bytes[content_end..]).expect("fixed width");
    let actual = Hasher::digest(&bytes[..content_end]);
    if actual != expected {
        return Err(PackError::ChecksumMismatch { expected, actual });
    }

    // Streaming parse: record every entry with its compressed span CRC.
    let mut raw_entries = Vec::with_capacity(num_objects);
    let mut pos = PACK_HEADER_SIZE as u64;
    for _ in 0..num_objects {
        let start = pos as usize;
        if start >= content_end {
            return Err(PackError::Truncated {
                offset: pos,
                needed: 1,
            });
        }
        let entry = parse_entry_header(&bytes[start..content_end], pos)?;
        let data_start = entry.data_offset as usize;
        let (data, consumed) =
            zlib::inflate_with_consumed(&bytes[data_start..content_end], entry.uncompressed_size)
                .map_err(|e| PackError::InvalidDelta {
                    offset: pos,
                    reason: e.to_string(),
                })?;
        let end = data_start + consumed;

        let mut crc = crc32fast::Hasher::new();
        crc.update(&bytes[start..end]);

        raw_entries.push(RawEntry {
            offset: pos,
            entry_type: entry.entry_type,
            data,
            crc32: crc.finalize(),
        });
        pos = end as u64;
    }

    if pos as usize != content_end {
        return Err(PackError::InvalidHeader(format!(
            "trailing garbage: {} bytes after last entry",
            content_end - pos as usize
        )));
    }

    // Resolve deltas now that every offset is known. Bases always occur
    // at smaller offsets (OFS) or earlier in OID space (REF within the
    // pack), so repeated passes converge; anything left is external.
    let mut resolved: HashMap<u64, (ObjectType, Vec<u8>)> = HashMap::new();
    let mut oid_by_offset: HashMap<u64, Oid> = HashMap::new();
    let mut offset_by_oid: HashMap<Oid, u64> = HashMap::new();

    for entry in &raw_entries {
        if let Some(ty) = entry.entry_type.to_object_type() {
            let oid = Hasher::hash_object(ty.as_str(), &entry.data);
            resolved.insert(entry.offset, (ty, entry.data.clone()));
            oid_by_offset.insert(entry.offset, oid);
            offset_by_oid.insert(oid, entry.offset);
        }
    }

    let mut remaining: Vec<&RawEntry> = raw_entries
        .iter()
        .filter(|e| e.entry_type.to_object_type().is_none())
        .collect();

    let mut depth_guard = 0;
    while !remaining.is_empty() {
        depth_guard += 1;
        if depth_guard > MAX_DELTA_CHAIN_DEPTH + 1 {
            return Err(PackError::DeltaChainTooDeep {
                offset: remaining[0].offset,
                max_depth: MAX_DELTA_CHAIN_DEPTH,
            });
        }

        let mut progressed = false;
        let mut still_pending = Vec::new();

        for entry in remaining {
            let base = match entry.entry_type {
                PackEntryType::OfsDelta { base_offset } => {
                    resolved.get(&base_offset).cloned()
                }
                PackEntryType::RefDelta { base_oid } => match offset_by_oid.get(&base_oid) {
                    Some(off) => resolved.get(off).cloned(),
                    None => resolver(&base_oid),
                },
                _ => unreachable!("non-delta entries resolved above"),
            };

            match base {
                Some((base_type, base_data)) => {
                    let data = apply_delta(&base_data, &entry.data)?;
                    let oid = Hasher::hash_object(base_type.as_str(), &data);
                    resolved.insert(entry.offset, (base_type, data));
                    oid_by_offset.insert(entry.offset, oid);
                    offset_by_oid.insert(oid, entry.offset);
                    progressed = true;
                }
                None => still_pending.push(entry),
            }
        }

        if !progressed {
            let offset = still_pending[0].offset;
            return match still_pending[0].entry_type {
                PackEntryType::RefDelta { base_oid } => Err(PackError::MissingBase(base_oid)),
                _ => Err(PackError::CorruptEntry(offset)),
            };
        }
        remaining = still_pending;
    }

    let entries = raw_entries
        .iter()
        .map(|e| IndexEntry {
            oid: oid_by_offset[&e.offset],
            crc32: e.crc32,
            offset: e.offset,
        })
        .collect();

    let objects = resolved
        .into_iter()
        .map(|(offset, obj)| (oid_by_offset[&offset], obj))
        .collect();

    Ok(IndexedPack {
        entries,
        checksum: expected,
        objects,
    })
}

/// Install a verified pack into `pack_dir` as
/// `pack-<checksum>.pack`/`.idx`, all-or-nothing via temp files.
pub fn install_pack(
    pack_dir: &Path,
    pack_bytes: &[u8],
    indexed: &IndexedPack,
) -> Result<(PathBuf, PathBuf), PackError> {
    fs::create_dir_all(pack_dir)?;

    let stem = format!("pack-{}", indexed.checksum.to_hex());
    let pack_path = pack_dir.join(format!("{stem}.pack"));
    let idx_path = pack_dir.join(format!("{stem}.idx"));

    let idx_bytes = write_index(&indexed.entries, &indexed.checksum);

    let tmp_pack = pack_dir.join(format!("tmp_{stem}.pack"));
    let tmp_idx = pack_dir.join(format!("tmp_{stem}.idx"));
    fs::write(&tmp_pack, pack_bytes)?;
    fs::write(&tmp_idx, &idx_bytes)?;

    // Pack first, then idx: readers only discover the pack through the idx.
    fs::rename(&tmp_pack, &pack_path)?;
    fs::rename(&tmp_idx, &idx_path)?;

    Ok((pack_path, idx_path))
}
