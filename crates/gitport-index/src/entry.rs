//! Index entry types: path + OID + stat data + flags.

use bstr::BString;
use gitport_hash::Oid;
use gitport_object::FileMode;

/// Merge stage of an entry. Stage 0 is a resolved entry; stages 1/2/3
/// are base/ours/theirs for a conflicted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Normal = 0,
    Base = 1,
    Ours = 2,
    Theirs = 3,
}

impl Stage {
    pub fn from_raw(raw: u16) -> Self {
        match raw & 0x3 {
            0 => Self::Normal,
            1 => Self::Base,
            2 => Self::Ours,
            _ => Self::Theirs,
        }
    }

    pub fn as_raw(&self) -> u16 {
        *self as u16
    }
}

/// Cached file-system stat data used for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatData {
    pub ctime_secs: u32,
    pub ctime_nsecs: u32,
    pub mtime_secs: u32,
    pub mtime_nsecs: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
}

impl StatData {
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            ctime_secs: meta.ctime() as u32,
            ctime_nsecs: meta.ctime_nsec() as u32,
            mtime_secs: meta.mtime() as u32,
            mtime_nsecs: meta.mtime_nsec() as u32,
            dev: meta.dev() as u32,
            ino: meta.ino() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.len() as u32,
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::time::UNIX_EPOCH;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        Self {
            ctime_secs: mtime.as_secs() as u32,
            ctime_nsecs: mtime.subsec_nanos(),
            mtime_secs: mtime.as_secs() as u32,
            mtime_nsecs: mtime.subsec_nanos(),
            size: meta.len() as u32,
            ..Self::default()
        }
    }

    /// Does the cached stat still describe this file? Any mismatch
    /// means the working-tree copy must be re-hashed.
    pub fn matches(&self, meta: &std::fs::Metadata) -> bool {
        let other = Self::from_metadata(meta);
        self.size == other.size
            && self.mtime_secs == other.mtime_secs
            && self.mtime_nsecs == other.mtime_nsecs
            && (self.ino == 0 || other.ino == 0 || self.ino == other.ino)
    }
}

/// One index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Repo-relative path with forward slashes.
    pub path: BString,
    pub oid: Oid,
    pub mode: FileMode,
    pub stage: Stage,
    pub stat: StatData,
    /// The assume-valid flag bit.
    pub assume_valid: bool,
}

impl IndexEntry {
    pub fn new(path: impl Into<BString>, oid: Oid, mode: FileMode, stage: Stage) -> Self {
        Self {
            path: path.into(),
            oid,
            mode,
            stage,
            stat: StatData::default(),
            assume_valid: false,
        }
    }

    /// Ordering key: `(name, stage)`, bytewise.
    pub fn key(&self) -> (&[u8], u16) {
        (self.path.as_slice(), self.stage.as_raw())
    }
}
