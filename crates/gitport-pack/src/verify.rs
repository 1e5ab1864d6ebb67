//! Pack verification: trailer checksum, entry CRCs, delta resolution.

use gitport_hash::hasher::Hasher;
use gitport_hash::Oid;

use crate::pack::PackFile;
use crate::PackError;

/// Verify a pack end to end against its index.
///
/// Checks, in order: the trailer SHA-1 over the pack bytes, the idx
/// CRC32 of every entry's compressed span (v2 indexes), and that every
/// object resolves (delta chains included) and re-hashes to the OID the
/// index claims for it.
pub fn verify_pack(pack: &PackFile) -> Result<(), PackError> {
    let data = pack_bytes(pack);
    let content_end = data.len() - Oid::RAW_LEN;

    let expected = pack.checksum();
    let actual = Hasher::digest(&data[..content_end]);
    if actual != expected {
        return Err(PackError::ChecksumMismatch { expected, actual });
    }

    let recorded = pack.index().pack_checksum();
    if recorded != expected {
        return Err(PackError::InvalidIndex(format!(
            "index records pack checksum {recorded}, pack has {expected}"
        )));
    }

    // Entry spans run from each offset to the next-larger offset.
    let mut offsets: Vec<u64> = pack.index().iter().map(|(_, off)| off).collect();
    offsets.sort_unstable();

    for (i, (oid, offset)) in pack.index().iter().enumerate() {
        if let Some(recorded_crc) = pack.index().crc_at(i) {
            let span_end = offsets
                .iter()
                .find(|&&o| o > offset)
                .copied()
                .unwrap_or(content_end as u64) as usize;
            let mut crc = crc32fast::Hasher::new();
            crc.update(&data[offset as usize..span_end]);
            if crc.finalize() != recorded_crc {
                return Err(PackError::CorruptEntry(offset));
            }
        }

        let obj = pack.read_at_offset(offset)?;
        let rehashed = Hasher::hash_object(obj.obj_type.as_str(), &obj.data);
        if rehashed != oid {
            return Err(PackError::InvalidIndex(format!(
                "entry at {offset} hashes to {rehashed}, index says {oid}"
            )));
        }
    }

    Ok(())
}

// The mmap is private to PackFile; re-read the file for verification.
fn pack_bytes(pack: &PackFile) -> Vec<u8> {
    std::fs::read(pack.path()).unwrap_or_default()
}
