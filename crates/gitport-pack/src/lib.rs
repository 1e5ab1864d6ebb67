//! Packfile reading, writing, delta resolution, and index support.
//!
//! Packs are both the on-disk storage optimisation and the wire format
//! for fetch/push. This crate covers the mmap'd reader with delta
//! chains, idx v1/v2, the multi-pack-index, receive-side indexing, and
//! a writer for outgoing packs.

pub mod delta;
pub mod entry;
pub mod index;
pub mod indexer;
pub mod midx;
pub mod pack;
pub mod verify;
pub mod writer;

use gitport_hash::Oid;
use gitport_object::ObjectType;

/// Pack file signature bytes.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Supported pack stream version.
pub const PACK_VERSION: u32 = 2;

/// Pack header size: signature + version + object count.
pub const PACK_HEADER_SIZE: usize = 12;

/// Idx v2 signature bytes.
pub const IDX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];

/// Supported idx version (v1 has no signature).
pub const IDX_VERSION: u32 = 2;

/// Maximum delta chain depth before the pack is declared corrupt.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 50;

/// Errors from pack operations.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid pack header: {0}")]
    InvalidHeader(String),

    #[error("invalid pack index: {0}")]
    InvalidIndex(String),

    #[error("invalid delta at offset {offset}: {reason}")]
    InvalidDelta { offset: u64, reason: String },

    #[error("delta base not found: {0}")]
    MissingBase(Oid),

    #[error("delta chain too deep (>{max_depth}) at offset {offset}")]
    DeltaChainTooDeep { offset: u64, max_depth: usize },

    #[error("pack checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: Oid, actual: Oid },

    #[error("corrupt pack entry at offset {0}")]
    CorruptEntry(u64),

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("truncated pack: need {needed} bytes at offset {offset}")]
    Truncated { offset: u64, needed: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Object(#[from] gitport_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] gitport_hash::HashError),
}

/// Type tag of an entry as stored in the pack stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackEntryType {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta whose base lives earlier in the same pack.
    OfsDelta { base_offset: u64 },
    /// Delta whose base is referenced by OID.
    RefDelta { base_oid: Oid },
}

impl PackEntryType {
    /// The object type for non-delta entries.
    pub fn to_object_type(self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::OfsDelta { .. } | Self::RefDelta { .. } => None,
        }
    }

    /// The 3-bit type tag written into entry headers.
    pub fn type_number(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::OfsDelta { .. } => 6,
            Self::RefDelta { .. } => 7,
        }
    }

    pub fn from_object_type(ty: ObjectType) -> Self {
        match ty {
            ObjectType::Commit => Self::Commit,
            ObjectType::Tree => Self::Tree,
            ObjectType::Blob => Self::Blob,
            ObjectType::Tag => Self::Tag,
        }
    }
}

/// A fully resolved object read out of a pack.
#[derive(Debug, Clone)]
pub struct PackedObject {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    /// Offset of the entry this object was read from.
    pub offset: u64,
}
