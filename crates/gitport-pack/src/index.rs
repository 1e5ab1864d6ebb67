//! Pack index reading (v1 and v2) and idx v2 writing.
//!
//! v2 layout:
//! ```text
//! Header:  \xff tOc | version (=2)
//! Fanout:  256 × u32 cumulative counts
//! OIDs:    N × 20 bytes, sorted
//! CRC32:   N × u32
//! Offsets: N × u32 (MSB set ⇒ index into the 8-byte offset table)
//! 64-bit:  M × u64 offsets
//! Trailer: pack checksum | index checksum
//! ```
//!
//! v1 has no header: 256 × u32 fanout, then N × (u32 offset, 20-byte
//! OID), then the two checksums.

use std::ops::Deref;
use std::path::Path;

use gitport_hash::hasher::Hasher;
use gitport_hash::Oid;
use memmap2::Mmap;

use crate::{PackError, IDX_SIGNATURE, IDX_VERSION};

const FANOUT_SIZE: usize = 256 * 4;

enum IndexData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for IndexData {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            IndexData::Mapped(m) => m,
            IndexData::Owned(v) => v,
        }
    }
}

/// A parsed pack index providing OID → offset lookup.
pub struct PackIndex {
    data: IndexData,
    version: u32,
    num_objects: u32,
    fanout_start: usize,
    oid_start: usize,
    crc_start: usize,
    offset32_start: usize,
    offset64_start: usize,
    /// v1 entry stride: 4-byte offset + 20-byte OID.
    v1_entries_start: usize,
}

impl PackIndex {
    /// Open an index file (v1 or v2) via mmap.
    pub fn open(idx_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let file = std::fs::File::open(idx_path.as_ref())?;
        let data = unsafe { Mmap::map(&file)? };
        Self::from_data(IndexData::Mapped(data))
    }

    /// Parse an index from bytes already in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PackError> {
        Self::from_data(IndexData::Owned(bytes))
    }

    fn from_data(data: IndexData) -> Result<Self, PackError> {
        let bytes: &[u8] = &data;
        if bytes.len() < FANOUT_SIZE + 2 * Oid::RAW_LEN {
            return Err(PackError::InvalidIndex("file too small".into()));
        }

        let is_v2 = bytes[0..4] == IDX_SIGNATURE;
        if is_v2 {
            let version = read_u32(bytes, 4);
            if version != IDX_VERSION {
                return Err(PackError::InvalidIndex(format!(
                    "unsupported idx version {version}"
                )));
            }

            let fanout_start = 8;
            let num_objects = read_u32(bytes, fanout_start + 255 * 4);
            let n = num_objects as usize;
            let oid_start = fanout_start + FANOUT_SIZE;
            let crc_start = oid_start + n * Oid::RAW_LEN;
            let offset32_start = crc_start + n * 4;
            let offset64_start = offset32_start + n * 4;

            if bytes.len() < offset64_start + 2 * Oid::RAW_LEN {
                return Err(PackError::InvalidIndex(format!(
                    "file too small: {} < {}",
                    bytes.len(),
                    offset64_start + 2 * Oid::RAW_LEN
                )));
            }

            Ok(Self {
                data,
                version: 2,
                num_objects,
                fanout_start,
                oid_start,
                crc_start,
                offset32_start,
                offset64_start,
                v1_entries_start: 0,
            })
        } else {
            // v1: fanout at the very start.
            let num_objects = read_u32(bytes, 255 * 4);
            let n = num_objects as usize;
            let entries_start = FANOUT_SIZE;
            let expected = entries_start + n * (4 + Oid::RAW_LEN) + 2 * Oid::RAW_LEN;
            if bytes.len() < expected {
                return Err(PackError::InvalidIndex(format!(
                    "v1 file too small: {} < {expected}",
                    bytes.len()
                )));
            }
            Ok(Self {
                data,
                version: 1,
                num_objects,
                fanout_start: 0,
                oid_start: 0,
                crc_start: 0,
                offset32_start: 0,
                offset64_start: 0,
                v1_entries_start: entries_start,
            })
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// The pack checksum recorded in the trailer.
    pub fn pack_checksum(&self) -> Oid {
        let bytes: &[u8] = &self.data;
        let start = bytes.len() - 2 * Oid::RAW_LEN;
        Oid::from_bytes(&bytes[start..start + Oid::RAW_LEN]).expect("fixed width")
    }

    /// Fan-out slice `[lo, hi)` of positions whose OIDs start with `first_byte`.
    pub fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let bytes: &[u8] = &self.data;
        let lo = if first_byte == 0 {
            0
        } else {
            read_u32(bytes, self.fanout_start + (first_byte as usize - 1) * 4) as usize
        };
        let hi = read_u32(bytes, self.fanout_start + first_byte as usize * 4) as usize;
        (lo, hi)
    }

    /// The OID at sorted position `i`.
    pub fn oid_at(&self, i: usize) -> Oid {
        let bytes: &[u8] = &self.data;
        let start = match self.version {
            2 => self.oid_start + i * Oid::RAW_LEN,
            _ => self.v1_entries_start + i * (4 + Oid::RAW_LEN) + 4,
        };
        Oid::from_bytes(&bytes[start..start + Oid::RAW_LEN]).expect("fixed width")
    }

    /// The pack offset of the entry at sorted position `i`.
    pub fn offset_at(&self, i: usize) -> u64 {
        let bytes: &[u8] = &self.data;
        match self.version {
            2 => {
                let raw = read_u32(bytes, self.offset32_start + i * 4);
                if raw & 0x8000_0000 != 0 {
                    let large_idx = (raw & 0x7fff_ffff) as usize;
                    read_u64(bytes, self.offset64_start + large_idx * 8)
                } else {
                    raw as u64
                }
            }
            _ => read_u32(bytes, self.v1_entries_start + i * (4 + Oid::RAW_LEN)) as u64,
        }
    }

    /// The CRC32 of the entry at sorted position `i` (v2 only).
    pub fn crc_at(&self, i: usize) -> Option<u32> {
        match self.version {
            2 => Some(read_u32(&self.data, self.crc_start + i * 4)),
            _ => None,
        }
    }

    /// Look up an OID, returning its pack offset.
    pub fn lookup(&self, oid: &Oid) -> Option<u64> {
        self.position_of(oid).map(|i| self.offset_at(i))
    }

    /// Binary-search the fan-out slice for an OID's sorted position.
    pub fn position_of(&self, oid: &Oid) -> Option<usize> {
        let (mut lo, mut hi) = self.fanout_range(oid.first_byte());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_at(mid).cmp(oid) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.position_of(oid).is_some()
    }

    /// All OIDs whose hex form starts with `prefix`, with their offsets.
    pub fn lookup_prefix(&self, prefix: &str) -> Vec<(Oid, u64)> {
        let mut matches = Vec::new();
        if prefix.is_empty() {
            return matches;
        }
        // The first two hex digits select the fan-out slice; a 1-digit
        // prefix spans 16 slices.
        let slices: Vec<u8> = if prefix.len() >= 2 {
            match u8::from_str_radix(&prefix[..2], 16) {
                Ok(b) => vec![b],
                Err(_) => return matches,
            }
        } else {
            match u8::from_str_radix(&prefix[..1], 16) {
                Ok(hi) => (0..16).map(|lo| (hi << 4) | lo).collect(),
                Err(_) => return matches,
            }
        };

        for first in slices {
            let (lo, hi) = self.fanout_range(first);
            for i in lo..hi {
                let oid = self.oid_at(i);
                if oid.starts_with_hex(prefix) {
                    matches.push((oid, self.offset_at(i)));
                }
            }
        }
        matches
    }

    /// Iterate all `(oid, offset)` pairs in sorted OID order.
    pub fn iter(&self) -> impl Iterator<Item = (Oid, u64)> + '_ {
        (0..self.num_objects as usize).map(|i| (self.oid_at(i), self.offset_at(i)))
    }
}

/// One entry destined for an idx file.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub oid: Oid,
    pub crc32: u32,
    pub offset: u64,
}

/// Serialize an idx v2 file for the given entries and pack checksum.
///
/// Entries are sorted by OID internally; offsets above 2^31-1 spill
/// into the 64-bit table.
pub fn write_index(entries: &[IndexEntry], pack_checksum: &Oid) -> Vec<u8> {
    let mut sorted: Vec<&IndexEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.oid.cmp(&b.oid));

    let mut out = Vec::with_capacity(
        8 + FANOUT_SIZE + sorted.len() * (Oid::RAW_LEN + 8) + 2 * Oid::RAW_LEN,
    );
    out.extend_from_slice(&IDX_SIGNATURE);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());

    // Fan-out: cumulative counts per first byte.
    let mut counts = [0u32; 256];
    for e in &sorted {
        counts[e.oid.first_byte() as usize] += 1;
    }
    let mut cumulative = 0u32;
    for count in counts {
        cumulative += count;
        out.extend_from_slice(&cumulative.to_be_bytes());
    }

    for e in &sorted {
        out.extend_from_slice(e.oid.as_bytes());
    }
    for e in &sorted {
        out.extend_from_slice(&e.crc32.to_be_bytes());
    }

    let mut large_offsets: Vec<u64> = Vec::new();
    for e in &sorted {
        if e.offset <= 0x7fff_ffff {
            out.extend_from_slice(&(e.offset as u32).to_be_bytes());
        } else {
            let idx = large_offsets.len() as u32;
            large_offsets.push(e.offset);
            out.extend_from_slice(&(idx | 0x8000_0000).to_be_bytes());
        }
    }
    for offset in large_offsets {
        out.extend_from_slice(&offset.to_be_bytes());
    }

    out.extend_from_slice(pack_checksum.as_bytes());
    let idx_checksum = Hasher::digest(&out);
    out.extend_from_slice(idx_checksum.as_bytes());
    out
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn read_u64(data: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[pos..pos + 8]);
    u64::from_be_bytes(buf)
}
