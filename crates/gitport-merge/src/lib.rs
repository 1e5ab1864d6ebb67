//! The merge engine: line diff, three-way text merge with conflict
//! markers, three-way tree merge, and the ancestry walks behind the
//! fast-forward policy.

pub mod ancestry;
pub mod content;
pub mod diff;
pub mod tree;

pub use ancestry::{is_descendant, merge_base};
pub use content::{merge_file, MergeFileResult};
pub use tree::{merge_trees, MergeConflict, TreeMergeResult};

use gitport_hash::Oid;
use gitport_object::ObjectType;

/// Errors from merge operations.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("{oid} is a {actual}, expected a tree")]
    NotATree { oid: Oid, actual: ObjectType },

    #[error("{oid} is a {actual}, expected a commit")]
    NotACommit { oid: Oid, actual: ObjectType },

    #[error("merging unrelated histories was not requested")]
    UnrelatedHistories,

    #[error(transparent)]
    Odb(#[from] gitport_odb::OdbError),

    #[error(transparent)]
    Object(#[from] gitport_object::ObjectError),
}

/// Conflict marker style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStyle {
    /// Ours and theirs only.
    #[default]
    Merge,
    /// Base content between `|||||||` markers as well.
    Diff3,
}

/// Labels rendered after the conflict markers.
#[derive(Debug, Clone)]
pub struct MergeLabels<'a> {
    pub ours: &'a str,
    pub base: &'a str,
    pub theirs: &'a str,
}

impl Default for MergeLabels<'_> {
    fn default() -> Self {
        Self {
            ours: "ours",
            base: "base",
            theirs: "theirs",
        }
    }
}
