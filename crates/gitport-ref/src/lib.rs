//! Reference storage: loose refs under `refs/`, the packed-refs file,
//! symbolic refs, and the reflog.
//!
//! Updates are linearised per ref with compare-and-set over lock files;
//! the reflog entry for a successful update is appended before the ref
//! file is renamed into place, so an observer sees either the old ref
//! with the old log or the new ref with the new log.

pub mod name;
pub mod packed;
pub mod reflog;
mod store;

pub use name::RefName;
pub use packed::PackedRefs;
pub use reflog::ReflogEntry;
pub use store::{Expect, FilesRefStore, RefTransaction, RefUpdate};

use gitport_hash::Oid;

/// Maximum symbolic-ref indirections before resolution fails.
pub const MAX_SYMREF_DEPTH: usize = 5;

/// Errors from reference operations.
#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid ref name: {name} (try {suggestion:?})")]
    InvalidName { name: String, suggestion: String },

    #[error("ref not found: {0}")]
    NotFound(String),

    #[error("ref already exists: {0}")]
    AlreadyExists(String),

    #[error("ref update rejected: {name}: expected {expected:?}, found {actual:?}")]
    CasFailed {
        name: String,
        expected: Option<Oid>,
        actual: Option<Oid>,
    },

    #[error("symbolic ref chain for {0} exceeds {MAX_SYMREF_DEPTH} links or cycles")]
    SymrefDepthExceeded(String),

    #[error("cannot create ref '{name}': '{conflict}' exists")]
    DirectoryConflict { name: String, conflict: String },

    #[error("ref lock busy: {0}")]
    LockBusy(String),

    #[error("parse error in {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error(transparent)]
    Util(#[from] gitport_utils::UtilError),

    #[error(transparent)]
    Hash(#[from] gitport_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The raw value stored at a ref: direct or one symbolic hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A 40-hex OID.
    Direct(Oid),
    /// `ref: <target>`.
    Symbolic(RefName),
}

impl Reference {
    pub fn as_direct(&self) -> Option<&Oid> {
        match self {
            Reference::Direct(oid) => Some(oid),
            Reference::Symbolic(_) => None,
        }
    }

    /// Serialize to the loose-ref file content.
    pub fn to_file_contents(&self) -> String {
        match self {
            Reference::Direct(oid) => format!("{}\n", oid.to_hex()),
            Reference::Symbolic(target) => format!("ref: {}\n", target.as_str()),
        }
    }

    /// Parse loose-ref file contents.
    pub fn parse(data: &[u8]) -> Result<Self, RefError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| RefError::Parse {
                what: "loose ref",
                reason: "not UTF-8".into(),
            })?
            .trim_end();
        if let Some(target) = text.strip_prefix("ref:") {
            Ok(Reference::Symbolic(RefName::new(target.trim())?))
        } else {
            let oid = Oid::from_hex(text.trim()).map_err(|e| RefError::Parse {
                what: "loose ref",
                reason: e.to_string(),
            })?;
            Ok(Reference::Direct(oid))
        }
    }
}
