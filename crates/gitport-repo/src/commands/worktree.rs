//! Working-tree commands: add, rm, restore, checkout, switch.

use std::fs;

use bstr::BString;
use gitport_index::{eol, IndexEntry, Stage, StatData};
use gitport_object::{FileMode, ObjectType};
use gitport_ref::RefName;

use crate::checkout::{flatten_tree, safe_join};
use crate::error::{ctx, CommandError, ErrorKind};
use crate::{CheckoutOptions, Repository};

impl Repository {
    /// Stage files: hash the working-tree content (after EOL
    /// normalization) into blobs and insert stage-0 entries.
    pub fn add(&self, paths: &[&str]) -> Result<(), CommandError> {
        let caller = "add";
        let work_tree = self.require_work_tree(caller)?.to_path_buf();
        let mut index = self.index()?;
        let autocrlf = self.autocrlf();

        for path in paths {
            let rel = BString::from(*path);
            let abs = safe_join(&work_tree, rel.as_ref()).map_err(ctx(caller))?;
            let meta = fs::symlink_metadata(&abs).map_err(|_| {
                CommandError::new(caller, ErrorKind::NotFound(path.to_string()))
            })?;

            let (mode, content) = if meta.is_symlink() {
                (FileMode::Symlink, link_target(&abs).map_err(ctx(caller))?)
            } else {
                let raw = fs::read(&abs).map_err(ctx(caller))?;
                let mode = if is_executable(&meta) {
                    FileMode::Executable
                } else {
                    FileMode::Regular
                };
                (mode, eol::to_odb(&raw, autocrlf))
            };

            let oid = self
                .odb()
                .write(ObjectType::Blob, &content)
                .map_err(ctx(caller))?;

            let mut entry = IndexEntry::new(rel, oid, mode, Stage::Normal);
            entry.stat = StatData::from_metadata(&meta);
            index.stage_file(entry);
        }

        index.write().map_err(ctx(caller))
    }

    /// Unstage and delete files.
    pub fn rm(&self, paths: &[&str]) -> Result<(), CommandError> {
        let caller = "rm";
        let work_tree = self.require_work_tree(caller)?.to_path_buf();
        let mut index = self.index()?;

        for path in paths {
            let rel = BString::from(*path);
            if !index.remove_path(rel.as_ref()) {
                return Err(CommandError::new(
                    caller,
                    ErrorKind::NotFound(path.to_string()),
                ));
            }
            let abs = safe_join(&work_tree, rel.as_ref()).map_err(ctx(caller))?;
            match fs::remove_file(&abs) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CommandError::new(caller, ErrorKind::Io(e))),
            }
        }

        index.write().map_err(ctx(caller))
    }

    /// Restore working-tree files to their HEAD content.
    pub fn restore(&self, paths: &[&str]) -> Result<(), CommandError> {
        let caller = "restore";
        let work_tree = self.require_work_tree(caller)?.to_path_buf();
        let head_tree = self.head_tree().map_err(ctx(caller))?;
        let head_map = flatten_tree(self.odb(), head_tree.as_ref()).map_err(ctx(caller))?;
        let mut index = self.index()?;
        let autocrlf = self.autocrlf();

        for path in paths {
            let rel = BString::from(*path);
            let Some((mode, oid)) = head_map.get(&rel) else {
                return Err(CommandError::new(
                    caller,
                    ErrorKind::NotFound(path.to_string()),
                ));
            };
            let abs = safe_join(&work_tree, rel.as_ref()).map_err(ctx(caller))?;
            let (kind, data) = self.odb().read(oid).map_err(ctx(caller))?;
            debug_assert_eq!(kind, ObjectType::Blob);
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent).map_err(ctx(caller))?;
            }
            fs::write(&abs, eol::to_worktree(&data, autocrlf)).map_err(ctx(caller))?;

            let mut entry = IndexEntry::new(rel, *oid, *mode, Stage::Normal);
            if let Ok(meta) = fs::symlink_metadata(&abs) {
                entry.stat = StatData::from_metadata(&meta);
            }
            index.stage_file(entry);
        }

        index.write().map_err(ctx(caller))
    }

    /// Check out a branch, tag, or commit: materialise its tree, then
    /// move HEAD (symbolic for branches, detached otherwise).
    pub fn checkout(
        &self,
        reference: &str,
        options: CheckoutOptions,
    ) -> Result<(), CommandError> {
        let caller = "checkout";
        let target = self.resolve_ref(reference)?;
        self.checkout_tree(&target, options)?;

        let head = RefName::new("HEAD").expect("static name");
        if reference == "HEAD" {
            return Ok(());
        }

        let branch_name = if reference.starts_with("refs/heads/") {
            Some(reference.to_string())
        } else {
            let candidate = format!("refs/heads/{reference}");
            RefName::new(candidate.clone())
                .ok()
                .filter(|name| self.refs().read_raw(name).ok().flatten().is_some())
                .map(|_| candidate)
        };

        match branch_name {
            Some(branch) => {
                let branch = RefName::new(branch).map_err(ctx(caller))?;
                self.refs()
                    .set_symbolic(&head, &branch)
                    .map_err(ctx(caller))?;
            }
            None => {
                self.refs()
                    .set_detached(
                        &head,
                        target,
                        &self.identity(),
                        &format!("checkout: moving to {reference}"),
                    )
                    .map_err(ctx(caller))?;
            }
        }
        Ok(())
    }

    /// Switch to an existing branch (refuses detached targets).
    pub fn switch(&self, branch: &str) -> Result<(), CommandError> {
        let caller = "switch";
        let full = format!("refs/heads/{branch}");
        let name = super::refs::valid_name(caller, &full)?;
        if self
            .refs()
            .read_raw(&name)
            .map_err(ctx(caller))?
            .is_none()
        {
            return Err(CommandError::new(caller, ErrorKind::NotFound(full)));
        }
        self.checkout(branch, CheckoutOptions::default())
    }

    /// Create a branch and switch to it.
    pub fn switch_create(&self, branch: &str) -> Result<(), CommandError> {
        self.branch(branch, None)?;
        self.switch(branch)
    }

    /// Update HEAD to a branch without touching the working tree
    /// (used right after clone/init flows).
    pub fn set_head(&self, branch: &str) -> Result<(), CommandError> {
        let caller = "checkout";
        let head = RefName::new("HEAD").expect("static name");
        let target = super::refs::valid_name(caller, &format!("refs/heads/{branch}"))?;
        self.refs()
            .set_symbolic(&head, &target)
            .map_err(ctx(caller))
    }
}

fn is_executable(meta: &fs::Metadata) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        false
    }
}

#[cfg(unix)]
fn link_target(abs: &std::path::Path) -> Result<Vec<u8>, std::io::Error> {
    use std::os::unix::ffi::OsStrExt;
    Ok(fs::read_link(abs)?.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn link_target(abs: &std::path::Path) -> Result<Vec<u8>, std::io::Error> {
    fs::read(abs)
}
