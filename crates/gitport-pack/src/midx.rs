//! Multi-pack-index: one lookup structure spanning several packs.
//!
//! Chunk-based layout:
//! ```text
//! Header: MIDX | version (1) | OID version (1) | num_chunks | base files | num_packs (u32)
//! Chunk table: (chunk_id u32, offset u64) × num_chunks, then a zero sentinel
//! PNAM: NUL-terminated pack names
//! OIDF: 256 × u32 fanout
//! OIDL: N × 20-byte sorted OIDs
//! OOFF: N × (pack_id u32, offset u32; MSB ⇒ index into LOFF)
//! LOFF: M × u64 large offsets
//! Trailer: index checksum
//! ```

use std::ops::Deref;
use std::path::Path;

use gitport_hash::hasher::Hasher;
use gitport_hash::Oid;
use memmap2::Mmap;

use crate::PackError;

const MIDX_SIGNATURE: &[u8; 4] = b"MIDX";
const MIDX_VERSION: u8 = 1;
const OID_VERSION_SHA1: u8 = 1;

const CHUNK_PACK_NAMES: u32 = 0x504e_414d; // "PNAM"
const CHUNK_OID_FANOUT: u32 = 0x4f49_4446; // "OIDF"
const CHUNK_OID_LOOKUP: u32 = 0x4f49_444c; // "OIDL"
const CHUNK_OBJECT_OFFSETS: u32 = 0x4f4f_4646; // "OOFF"
const CHUNK_LARGE_OFFSETS: u32 = 0x4c4f_4646; // "LOFF"

enum MidxData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for MidxData {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            MidxData::Mapped(m) => m,
            MidxData::Owned(v) => v,
        }
    }
}

/// A parsed multi-pack-index.
pub struct MultiPackIndex {
    data: MidxData,
    num_objects: u32,
    pack_names: Vec<String>,
    fanout_start: usize,
    oid_start: usize,
    offsets_start: usize,
    large_offsets_start: Option<usize>,
}

impl MultiPackIndex {
    /// Open `objects/pack/multi-pack-index` via mmap.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PackError> {
        let file = std::fs::File::open(path.as_ref())?;
        let data = unsafe { Mmap::map(&file)? };
        Self::from_data(MidxData::Mapped(data))
    }

    /// Parse a multi-pack-index from bytes in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PackError> {
        Self::from_data(MidxData::Owned(bytes))
    }

    fn from_data(data: MidxData) -> Result<Self, PackError> {
        let bytes: &[u8] = &data;
        if bytes.len() < 12 {
            return Err(PackError::InvalidIndex("MIDX too small".into()));
        }
        if &bytes[0..4] != MIDX_SIGNATURE {
            return Err(PackError::InvalidIndex("bad MIDX signature".into()));
        }
        if bytes[4] != MIDX_VERSION {
            return Err(PackError::InvalidIndex(format!(
                "unsupported MIDX version {}",
                bytes[4]
            )));
        }
        if bytes[5] != OID_VERSION_SHA1 {
            return Err(PackError::InvalidIndex(format!(
                "unsupported MIDX OID version {}",
                bytes[5]
            )));
        }
        let num_chunks = bytes[6] as usize;
        let num_packs = read_u32(bytes, 8) as usize;

        // Chunk lookup table, terminated by a zero-id sentinel row.
        let mut chunk_table = Vec::with_capacity(num_chunks);
        let table_start = 12;
        for i in 0..=num_chunks {
            let row = table_start + i * 12;
            if row + 12 > bytes.len() {
                return Err(PackError::InvalidIndex("truncated chunk table".into()));
            }
            let id = read_u32(bytes, row);
            let offset = read_u64(bytes, row + 4) as usize;
            chunk_table.push((id, offset));
        }

        let find_chunk = |id: u32| -> Option<(usize, usize)> {
            chunk_table.iter().enumerate().find_map(|(i, &(cid, off))| {
                (cid == id).then(|| {
                    let end = chunk_table
                        .get(i + 1)
                        .map(|&(_, o)| o)
                        .unwrap_or(bytes.len() - Oid::RAW_LEN);
                    (off, end)
                })
            })
        };

        let (names_start, names_end) = find_chunk(CHUNK_PACK_NAMES)
            .ok_or_else(|| PackError::InvalidIndex("missing PNAM chunk".into()))?;
        let (fanout_start, _) = find_chunk(CHUNK_OID_FANOUT)
            .ok_or_else(|| PackError::InvalidIndex("missing OIDF chunk".into()))?;
        let (oid_start, _) = find_chunk(CHUNK_OID_LOOKUP)
            .ok_or_else(|| PackError::InvalidIndex("missing OIDL chunk".into()))?;
        let (offsets_start, _) = find_chunk(CHUNK_OBJECT_OFFSETS)
            .ok_or_else(|| PackError::InvalidIndex("missing OOFF chunk".into()))?;
        let large_offsets_start = find_chunk(CHUNK_LARGE_OFFSETS).map(|(s, _)| s);

        let mut pack_names = Vec::with_capacity(num_packs);
        let mut cursor = names_start;
        while cursor < names_end && pack_names.len() < num_packs {
            let nul = bytes[cursor..names_end]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| PackError::InvalidIndex("unterminated pack name".into()))?;
            let name = std::str::from_utf8(&bytes[cursor..cursor + nul])
                .map_err(|_| PackError::InvalidIndex("non-UTF8 pack name".into()))?;
            pack_names.push(name.to_string());
            cursor += nul + 1;
        }
        if pack_names.len() != num_packs {
            return Err(PackError::InvalidIndex(format!(
                "PNAM names {} packs, header says {num_packs}",
                pack_names.len()
            )));
        }

        let num_objects = read_u32(bytes, fanout_start + 255 * 4);

        Ok(Self {
            data,
            num_objects,
            pack_names,
            fanout_start,
            oid_start,
            offsets_start,
            large_offsets_start,
        })
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    pub fn num_packs(&self) -> usize {
        self.pack_names.len()
    }

    /// Pack file names (without directory), in MIDX order.
    pub fn pack_names(&self) -> &[String] {
        &self.pack_names
    }

    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let bytes: &[u8] = &self.data;
        let lo = if first_byte == 0 {
            0
        } else {
            read_u32(bytes, self.fanout_start + (first_byte as usize - 1) * 4) as usize
        };
        let hi = read_u32(bytes, self.fanout_start + first_byte as usize * 4) as usize;
        (lo, hi)
    }

    fn oid_at(&self, i: usize) -> Oid {
        let bytes: &[u8] = &self.data;
        let start = self.oid_start + i * Oid::RAW_LEN;
        Oid::from_bytes(&bytes[start..start + Oid::RAW_LEN]).expect("fixed width")
    }

    fn location_at(&self, i: usize) -> (u32, u64) {
        let bytes: &[u8] = &self.data;
        let row = self.offsets_start + i * 8;
        let pack_id = read_u32(bytes, row);
        let raw = read_u32(bytes, row + 4);
        let offset = if raw & 0x8000_0000 != 0 {
            let large_idx = (raw & 0x7fff_ffff) as usize;
            let start = self
                .large_offsets_start
                .expect("MSB offset without LOFF chunk");
            read_u64(bytes, start + large_idx * 8)
        } else {
            raw as u64
        };
        (pack_id, offset)
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.lookup(oid).is_some()
    }

    /// Look up an OID: `(pack_id, offset)` within that pack.
    pub fn lookup(&self, oid: &Oid) -> Option<(u32, u64)> {
        let (mut lo, mut hi) = self.fanout_range(oid.first_byte());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_at(mid).cmp(oid) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(self.location_at(mid)),
            }
        }
        None
    }

    /// All OIDs whose hex form starts with `prefix`.
    pub fn lookup_prefix(&self, prefix: &str) -> Vec<Oid> {
        let mut matches = Vec::new();
        let Ok(first) = u8::from_str_radix(&prefix[..2.min(prefix.len())], 16) else {
            return matches;
        };
        let slices: Vec<u8> = if prefix.len() >= 2 {
            vec![first]
        } else {
            (0..16).map(|lo| (first << 4) | lo).collect()
        };
        for b in slices {
            let (lo, hi) = self.fanout_range(b);
            for i in lo..hi {
                let oid = self.oid_at(i);
                if oid.starts_with_hex(prefix) {
                    matches.push(oid);
                }
            }
        }
        matches
    }

    /// Iterate all `(oid, pack_id, offset)` rows in sorted OID order.
    pub fn iter(&self) -> impl Iterator<Item = (Oid, u32, u64)> + '_ {
        (0..self.num_objects as usize).map(|i| {
            let (pack_id, offset) = self.location_at(i);
            (self.oid_at(i), pack_id, offset)
        })
    }
}

/// Serialize a multi-pack-index over `(pack_name, entries)` pairs where
/// each entry is `(oid, offset)` within that pack.
pub fn write_midx(packs: &[(String, Vec<(Oid, u64)>)]) -> Vec<u8> {
    let mut rows: Vec<(Oid, u32, u64)> = Vec::new();
    for (pack_id, (_, entries)) in packs.iter().enumerate() {
        for &(oid, offset) in entries {
            rows.push((oid, pack_id as u32, offset));
        }
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let mut names_chunk = Vec::new();
    for (name, _) in packs {
        names_chunk.extend_from_slice(name.as_bytes());
        names_chunk.push(0);
    }

    let mut fanout_chunk = Vec::with_capacity(1024);
    let mut counts = [0u32; 256];
    for (oid, _, _) in &rows {
        counts[oid.first_byte() as usize] += 1;
    }
    let mut cumulative = 0u32;
    for count in counts {
        cumulative += count;
        fanout_chunk.extend_from_slice(&cumulative.to_be_bytes());
    }

    let mut oid_chunk = Vec::with_capacity(rows.len() * Oid::RAW_LEN);
    for (oid, _, _) in &rows {
        oid_chunk.extend_from_slice(oid.as_bytes());
    }

    let mut offsets_chunk = Vec::with_capacity(rows.len() * 8);
    let mut large_chunk = Vec::new();
    for &(_, pack_id, offset) in &rows {
        offsets_chunk.extend_from_slice(&pack_id.to_be_bytes());
        if offset <= 0x7fff_ffff {
            offsets_chunk.extend_from_slice(&(offset as u32).to_be_bytes());
        } else {
            let idx = (large_chunk.len() / 8) as u32;
            offsets_chunk.extend_from_slice(&(idx | 0x8000_0000).to_be_bytes());
            large_chunk.extend_from_slice(&offset.to_be_bytes());
        }
    }

    let mut chunks: Vec<(u32, &[u8])> = vec![
        (CHUNK_PACK_NAMES, &names_chunk),
        (CHUNK_OID_FANOUT, &fanout_chunk),
        (CHUNK_OID_LOOKUP, &oid_chunk),
        (CHUNK_OBJECT_OFFSETS, &offsets_chunk),
    ];
    if !large_chunk.is_empty() {
        chunks.push((CHUNK_LARGE_OFFSETS, &large_chunk));
    }

    let mut out = Vec::new();
    out.extend_from_slice(MIDX_SIGNATURE);
    out.push(MIDX_VERSION);
    out.push(OID_VERSION_SHA1);
    out.push(chunks.len() as u8);
    out.push(0); // base MIDX files
    out.extend_from_slice(&(packs.len() as u32).to_be_bytes());

    let table_len = (chunks.len() + 1) * 12;
    let mut chunk_offset = out.len() + table_len;
    for (id, body) in &chunks {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&(chunk_offset as u64).to_be_bytes());
        chunk_offset += body.len();
    }
    // Sentinel row marks the end of the final chunk.
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&(chunk_offset as u64).to_be_bytes());

    for (_, body) in &chunks {
        out.extend_from_slice(body);
    }

    let checksum = Hasher::digest(&out);
    out.extend_from_slice(checksum.as_bytes());
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
