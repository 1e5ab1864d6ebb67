//! Index file reading (`DIRC` v2).

use bstr::BString;
use gitport_hash::hasher::Hasher;
use gitport_hash::Oid;
use gitport_object::FileMode;

use crate::entry::{IndexEntry, Stage, StatData};
use crate::extensions::{CacheTree, RawExtension, ResolveUndo};
use crate::{Index, IndexError};

pub(crate) const INDEX_SIGNATURE: &[u8; 4] = b"DIRC";
pub(crate) const INDEX_VERSION: u32 = 2;

/// Flag bits in the 16-bit entry flags word.
const FLAG_ASSUME_VALID: u16 = 0x8000;
const FLAG_EXTENDED: u16 = 0x4000;
const STAGE_SHIFT: u16 = 12;
const NAME_LEN_MASK: u16 = 0x0fff;

/// Parse an index file, verifying the trailing checksum.
pub fn parse_index(data: &[u8]) -> Result<Index, IndexError> {
    if data.len() < 12 + Oid::RAW_LEN {
        return Err(IndexError::InvalidHeader("file too short".into()));
    }

    let content_end = data.len() - Oid::RAW_LEN;
    let recorded = Oid::from_bytes(&data[content_end..]).expect("fixed width");
    let actual = Hasher::digest(&data[..content_end]);
    if recorded != actual {
        return Err(IndexError::ChecksumMismatch {
            expected: recorded,
            actual,
        });
    }

    if &data[0..4] != INDEX_SIGNATURE {
        return Err(IndexError::InvalidHeader(format!(
            "bad signature {:?}",
            &data[0..4]
        )));
    }
    let version = read_u32(data, 4);
    if version != INDEX_VERSION {
        return Err(IndexError::UnsupportedVersion(version));
    }
    let entry_count = read_u32(data, 8) as usize;

    let mut cursor = 12;
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let (entry, next) = parse_entry(data, cursor, content_end)?;
        entries.push(entry);
        cursor = next;
    }

    let mut cache_tree = None;
    let mut resolve_undo = None;
    let mut unknown_extensions = Vec::new();

    while cursor + 8 <= content_end {
        let sig = &data[cursor..cursor + 4];
        let size = read_u32(data, cursor + 4) as usize;
        cursor += 8;
        if cursor + size > content_end {
            return Err(IndexError::InvalidExtension {
                sig: "????",
                reason: "extension exceeds file bounds".into(),
            });
        }
        let body = &data[cursor..cursor + size];
        match sig {
            b"TREE" => cache_tree = Some(CacheTree::parse(body)?),
            b"REUC" => resolve_undo = Some(ResolveUndo::parse(body)?),
            _ => {
                // Mandatory extensions (lowercase first byte) cannot be skipped.
                if sig[0].is_ascii_lowercase() {
                    return Err(IndexError::InvalidExtension {
                        sig: "????",
                        reason: format!("unsupported mandatory extension {:?}", sig),
                    });
                }
                let mut signature = [0u8; 4];
                signature.copy_from_slice(sig);
                unknown_extensions.push(RawExtension {
                    signature,
                    data: body.to_vec(),
                });
            }
        }
        cursor += size;
    }

    Ok(Index {
        entries,
        cache_tree,
        resolve_undo,
        unknown_extensions,
        path: None,
    })
}

fn parse_entry(
    data: &[u8],
    start: usize,
    content_end: usize,
) -> Result<(IndexEntry, usize), IndexError> {
    // Fixed part: 10 u32 stat words + 20-byte OID + 2-byte flags.
    const FIXED: usize = 40 + 20 + 2;
    if start + FIXED > content_end {
        return Err(IndexError::Truncated { offset: start });
    }

    let stat = StatData {
        ctime_secs: read_u32(data, start),
        ctime_nsecs: read_u32(data, start + 4),
        mtime_secs: read_u32(data, start + 8),
        mtime_nsecs: read_u32(data, start + 12),
        dev: read_u32(data, start + 16),
        ino: read_u32(data, start + 20),
        uid: read_u32(data, start + 28),
        gid: read_u32(data, start + 32),
        size: read_u32(data, start + 36),
    };
    let mode_raw = read_u32(data, start + 24);
    let mode = FileMode::from_raw(mode_raw)
        .map_err(|_| IndexError::InvalidHeader(format!("bad mode {mode_raw:o}")))?;

    let oid = Oid::from_bytes(&data[start + 40..start + 60]).expect("fixed width");
    let flags = u16::from_be_bytes([data[start + 60], data[start + 61]]);

    if flags & FLAG_EXTENDED != 0 {
        return Err(IndexError::InvalidHeader(
            "extended flags are a v3 feature".into(),
        ));
    }

    let name_len = (flags & NAME_LEN_MASK) as usize;
    let name_start = start + FIXED;
    let name_end = if name_len < NAME_LEN_MASK as usize {
        name_start + name_len
    } else {
        // Long path: scan for the NUL.
        data[name_start..content_end]
            .iter()
            .position(|&b| b == 0)
            .map(|p| name_start + p)
            .ok_or(IndexError::Truncated { offset: name_start })?
    };
    if name_end > content_end {
        return Err(IndexError::Truncated { offset: name_start });
    }
    let path = BString::from(&data[name_start..name_end]);

    // Entries are NUL-padded to an 8-byte boundary (at least one NUL).
    let entry_len = (FIXED + (name_end - name_start) + 8) & !7;
    let next = start + entry_len;
    if next > content_end {
        return Err(IndexError::Truncated { offset: start });
    }

    Ok((
        IndexEntry {
            path,
            oid,
            mode,
            stage: Stage::from_raw(flags >> STAGE_SHIFT),
            stat,
            assume_valid: flags & FLAG_ASSUME_VALID != 0,
        },
        next,
    ))
}

pub(crate) fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

pub(crate) fn entry_flags(entry: &IndexEntry) -> u16 {
    let mut flags = (entry.stage.as_raw()) << STAGE_SHIFT;
    flags |= entry.path.len().min(NAME_LEN_MASK as usize) as u16;
    if entry.assume_valid {
        flags |= FLAG_ASSUME_VALID;
    }
    flags
}
