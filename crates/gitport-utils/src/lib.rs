//! Shared plumbing: lock files and glob matching.

pub mod lockfile;
pub mod wildmatch;

pub use lockfile::LockFile;

/// Errors from the shared plumbing.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error("lock already held: {path}")]
    AlreadyLocked { path: std::path::PathBuf },

    #[error("cannot create lock file {path}: {source}")]
    LockCreate {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot commit lock file {path}: {source}")]
    LockCommit {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
