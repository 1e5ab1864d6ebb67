//! Lock-file protocol for atomic file replacement.
//!
//! The protocol matches what git uses on disk:
//! - create `<path>.lock` with O_CREAT|O_EXCL
//! - write the new contents to the lock file
//! - atomically rename `.lock` over the target on commit
//! - remove `.lock` on drop if not committed (rollback)

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::UtilError;

const LOCK_SUFFIX: &str = ".lock";

/// RAII lock-file guard.
#[derive(Debug)]
pub struct LockFile {
    /// The target file path (without .lock suffix).
    path: PathBuf,
    /// The lock file path (with .lock suffix).
    lock_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl LockFile {
    /// Acquire a lock on the given path.
    ///
    /// Fails with [`UtilError::AlreadyLocked`] if another holder exists.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, UtilError> {
        let path = path.as_ref().to_path_buf();
        let mut lock_os = path.clone().into_os_string();
        lock_os.push(LOCK_SUFFIX);
        let lock_path = PathBuf::from(lock_os);

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    UtilError::AlreadyLocked {
                        path: lock_path.clone(),
                    }
                } else {
                    UtilError::LockCreate {
                        path: lock_path.clone(),
                        source: e,
                    }
                }
            })?;

        Ok(Self {
            path,
            lock_path,
            file: Some(file),
            committed: false,
        })
    }

    /// The target path (without the `.lock` suffix).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write bytes to the lock file.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), UtilError> {
        self.file
            .as_mut()
            .expect("lock file open until commit")
            .write_all(data)?;
        Ok(())
    }

    /// Flush, fsync, and rename the lock file over the target.
    pub fn commit(mut self) -> Result<(), UtilError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| UtilError::LockCommit {
                path: self.lock_path.clone(),
                source: e,
            })?;
        }
        fs::rename(&self.lock_path, &self.path).map_err(|e| UtilError::LockCommit {
            path: self.lock_path.clone(),
            source: e,
        })?;
        self.committed = true;
        Ok(())
    }

    /// Abandon the lock, removing the lock file.
    pub fn rollback(mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.lock_path);
        self.committed = true; // suppress Drop cleanup
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
