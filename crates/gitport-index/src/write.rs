//! Index file writing (`DIRC` v2), atomic via a lock file.

use std::path::Path;

use gitport_hash::hasher::Hasher;
use gitport_utils::LockFile;

use crate::entry::IndexEntry;
use crate::extensions::{CacheTree, ResolveUndo};
use crate::read::{entry_flags, INDEX_SIGNATURE, INDEX_VERSION};
use crate::{Index, IndexError};

/// Serialize the index: header, sorted entries, extensions, checksum.
pub fn serialize_index(index: &Index) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(INDEX_SIGNATURE);
    out.extend_from_slice(&INDEX_VERSION.to_be_bytes());
    out.extend_from_slice(&(index.entries().len() as u32).to_be_bytes());

    for entry in index.entries() {
        write_entry(&mut out, entry);
    }

    if let Some(tree) = index.cache_tree() {
        write_extension(&mut out, CacheTree::SIGNATURE, &tree.serialize());
    }
    if let Some(reuc) = index.resolve_undo() {
        write_extension(&mut out, ResolveUndo::SIGNATURE, &reuc.serialize());
    }
    for ext in index.unknown_extensions() {
        write_extension(&mut out, &ext.signature, &ext.data);
    }

    let checksum = Hasher::digest(&out);
    out.extend_from_slice(checksum.as_bytes());
    out
}

/// Atomically replace the index file at `path`.
pub fn write_index(index: &Index, path: &Path) -> Result<(), IndexError> {
    let mut lock = LockFile::acquire(path).map_err(|_| IndexError::LockBusy {
        path: path.to_path_buf(),
    })?;
    lock.write_all(&serialize_index(index))?;
    lock.commit()?;
    Ok(())
}

fn write_entry(out: &mut Vec<u8>, entry: &IndexEntry) {
    let start = out.len();

    out.extend_from_slice(&entry.stat.ctime_secs.to_be_bytes());
    out.extend_from_slice(&entry.stat.ctime_nsecs.to_be_bytes());
    out.extend_from_slice(&entry.stat.mtime_secs.to_be_bytes());
    out.extend_from_slice(&entry.stat.mtime_nsecs.to_be_bytes());
    out.extend_from_slice(&entry.stat.dev.to_be_bytes());
    out.extend_from_slice(&entry.stat.ino.to_be_bytes());
    out.extend_from_slice(&entry.mode.as_raw().to_be_bytes());
    out.extend_from_slice(&entry.stat.uid.to_be_bytes());
    out.extend_from_slice(&entry.stat.gid.to_be_bytes());
    out.extend_from_slice(&entry.stat.size.to_be_bytes());
    out.extend_from_slice(entry.oid.as_bytes());
    out.extend_from_slice(&entry_flags(entry).to_be_bytes());
    out.extend_from_slice(&entry.path);

    // NUL padding to the next 8-byte boundary, at least one byte.
    let len = out.len() - start;
    let padded = (len + 8) & !7;
    out.resize(start + padded, 0);
}

fn write_extension(out: &mut Vec<u8>, signature: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(signature);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
}
