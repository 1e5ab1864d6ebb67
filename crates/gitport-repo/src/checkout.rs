//! Checkout: materialising a commit's tree into the working tree and
//! index, with the usual guard against clobbering local changes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use gitport_hash::Oid;
use gitport_index::{eol, IndexEntry, Stage, StatData};
use gitport_object::{FileMode, Object, ObjectType};
use gitport_odb::Odb;
use tracing::debug;

use crate::error::{ctx, CommandError, ErrorKind};
use crate::Repository;

/// Options for checkout-style commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckoutOptions {
    /// Overwrite local modifications and restore missing files.
    pub force: bool,
}

/// A flattened tree: path → (mode, oid).
pub(crate) type TreeMap = BTreeMap<BString, (FileMode, Oid)>;

/// Recursively flatten a tree object into path/blob pairs.
pub(crate) fn flatten_tree(odb: &Odb, tree: Option<&Oid>) -> Result<TreeMap, ErrorKind> {
    let mut map = TreeMap::new();
    if let Some(oid) = tree {
        flatten_into(odb, oid, b"", &mut map)?;
    }
    Ok(map)
}

fn flatten_into(odb: &Odb, tree: &Oid, prefix: &[u8], map: &mut TreeMap) -> Result<(), ErrorKind> {
    let tree = match odb.read_object(tree)? {
        Object::Tree(t) => t,
        other => {
            return Err(ErrorKind::NotFound(format!(
                "expected tree, found {} at {:?}",
                other.object_type(),
                prefix.as_bstr()
            )))
        }
    };
    for entry in tree.entries() {
        let mut path = Vec::with_capacity(prefix.len() + entry.name.len() + 1);
        if !prefix.is_empty() {
            path.extend_from_slice(prefix);
            path.push(b'/');
        }
        path.extend_from_slice(&entry.name);
        if entry.mode.is_tree() {
            flatten_into(odb, &entry.oid, &path, map)?;
        } else {
            map.insert(BString::from(path), (entry.mode, entry.oid));
        }
    }
    Ok(())
}

/// Join a repo-relative path onto the work tree, rejecting anything
/// that would escape it.
pub(crate) fn safe_join(work_tree: &Path, rel: &BStr) -> Result<PathBuf, ErrorKind> {
    let rel_str = rel
        .to_str()
        .map_err(|_| ErrorKind::UnsafeFilepath(PathBuf::from(rel.to_str_lossy().into_owned())))?;
    let rel_path = Path::new(rel_str);
    let escapes = rel_path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || rel_str.is_empty() {
        return Err(ErrorKind::UnsafeFilepath(rel_path.to_path_buf()));
    }
    Ok(work_tree.join(rel_path))
}

impl Repository {
    /// The tree of the commit HEAD currently points at, if any.
    pub(crate) fn head_tree(&self) -> Result<Option<Oid>, ErrorKind> {
        let head = gitport_ref::RefName::new("HEAD").expect("static name");
        match self.refs().resolve(&head) {
            Ok(commit_oid) => {
                let commit = self.read_commit_object(&commit_oid)?;
                Ok(Some(commit.tree))
            }
            Err(gitport_ref::RefError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn read_commit_object(
        &self,
        oid: &Oid,
    ) -> Result<gitport_object::Commit, ErrorKind> {
        match self.odb().read_object(oid)? {
            Object::Commit(c) => Ok(c),
            Object::Tag(t) => self.read_commit_object(&t.object),
            other => Err(ErrorKind::NotFound(format!(
                "{oid} is a {}, not a commit",
                other.object_type()
            ))),
        }
    }

    /// Materialise `target_commit`'s tree into the working tree and
    /// index.
    ///
    /// Tracked files whose content differs from the index are never
    /// overwritten unless `force`; with `force`, paths present in the
    /// target but missing from the working tree are restored.
    pub fn checkout_tree(
        &self,
        target_commit: &Oid,
        options: CheckoutOptions,
    ) -> Result<(), CommandError> {
        let caller = "checkout";
        let work_tree = self.require_work_tree(caller)?.to_path_buf();

        let target_tree = self
            .read_commit_object(target_commit)
            .map_err(ctx(caller))?
            .tree;
        let current = self.head_tree().map_err(ctx(caller))?;
        let current_map = flatten_tree(self.odb(), current.as_ref()).map_err(ctx(caller))?;
        let target_map = flatten_tree(self.odb(), Some(&target_tree)).map_err(ctx(caller))?;

        let mut index = self.index()?;
        let autocrlf = self.autocrlf();

        // Guard pass: collect local modifications the switch would clobber.
        if !options.force {
            let mut clobbered = Vec::new();
            for (path, target) in &target_map {
                if current_map.get(path) == Some(target) {
                    continue;
                }
                if self
                    .worktree_differs_from_index(&work_tree, &index, path)
                    .map_err(ctx(caller))?
                {
                    clobbered.push(path.clone());
                }
            }
            for path in current_map.keys() {
                if !target_map.contains_key(path)
                    && self
                        .worktree_differs_from_index(&work_tree, &index, path)
                        .map_err(ctx(caller))?
                {
                    clobbered.push(path.clone());
                }
            }
            if !clobbered.is_empty() {
                return Err(CommandError::new(
                    caller,
                    ErrorKind::CheckoutWouldClobber(clobbered),
                ));
            }
        }

        // Delete paths that vanish.
        for path in current_map.keys() {
            if !target_map.contains_key(path) {
                let abs = safe_join(&work_tree, path.as_ref()).map_err(ctx(caller))?;
                match fs::remove_file(&abs) {
                    Ok(()) => prune_empty_dirs(&work_tree, &abs),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CommandError::new(caller, ErrorKind::Io(e))),
                }
                index.remove_path(path.as_ref());
            }
        }

        // Materialise new or changed paths; with force, also restore
        // files missing from the working tree.
        for (path, (mode, oid)) in &target_map {
            let abs = safe_join(&work_tree, path.as_ref()).map_err(ctx(caller))?;
            let unchanged = current_map.get(path) == Some(&(*mode, *oid));
            if unchanged && abs.exists() {
                continue;
            }
            debug!(path = %path, "materializing");
            self.materialize_blob(&abs, *mode, oid, autocrlf)
                .map_err(ctx(caller))?;

            let mut entry = IndexEntry::new(path.clone(), *oid, *mode, Stage::Normal);
            if let Ok(meta) = fs::symlink_metadata(&abs) {
                entry.stat = StatData::from_metadata(&meta);
            }
            index.stage_file(entry);
        }

        index.write().map_err(ctx(caller))?;
        Ok(())
    }

    /// Does the working-tree copy of `path` differ from its index
    /// entry? Missing files do not count as differing (checkout
    /// restores them).
    fn worktree_differs_from_index(
        &self,
        work_tree: &Path,
        index: &gitport_index::Index,
        path: &BString,
    ) -> Result<bool, ErrorKind> {
        let abs = safe_join(work_tree, path.as_ref())?;
        let Ok(meta) = fs::symlink_metadata(&abs) else {
            return Ok(false);
        };
        let Some(entry) = index.get(path.as_ref(), Stage::Normal) else {
            // Untracked file sitting where the checkout wants to write.
            return Ok(true);
        };
        if entry.stat.matches(&meta) {
            return Ok(false);
        }
        let content = if meta.is_symlink() {
            link_target_bytes(&abs)?
        } else {
            eol::to_odb(&fs::read(&abs)?, self.autocrlf())
        };
        let actual = gitport_hash::hasher::Hasher::hash_object("blob", &content);
        Ok(actual != entry.oid)
    }

    pub(crate) fn materialize_blob(
        &self,
        abs: &Path,
        mode: FileMode,
        oid: &Oid,
        autocrlf: gitport_index::AutoCrlf,
    ) -> Result<(), ErrorKind> {
        let (kind, data) = self.odb().read(oid)?;
        if kind != ObjectType::Blob {
            return Err(ErrorKind::NotFound(format!("{oid} is a {kind}, not a blob")));
        }
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }

        match mode {
            FileMode::Symlink => {
                let _ = fs::remove_file(abs);
                write_symlink(abs, &data)?;
            }
            FileMode::Gitlink => {
                // Submodule population is out of scope; leave a directory.
                fs::create_dir_all(abs)?;
            }
            _ => {
                let content = eol::to_worktree(&data, autocrlf);
                fs::write(abs, content)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode_bits = if mode == FileMode::Executable { 0o755 } else { 0o644 };
                    fs::set_permissions(abs, fs::Permissions::from_mode(mode_bits))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn write_symlink(abs: &Path, target: &[u8]) -> Result<(), std::io::Error> {
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(std::ffi::OsStr::from_bytes(target), abs)
}

#[cfg(not(unix))]
fn write_symlink(abs: &Path, target: &[u8]) -> Result<(), std::io::Error> {
    // Platforms without symlinks store the target as file content.
    fs::write(abs, target)
}

#[cfg(unix)]
fn link_target_bytes(abs: &Path) -> Result<Vec<u8>, std::io::Error> {
    use std::os::unix::ffi::OsStrExt;
    Ok(fs::read_link(abs)?.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn link_target_bytes(abs: &Path) -> Result<Vec<u8>, std::io::Error> {
    fs::read(abs)
}

/// Remove now-empty parent directories up to the work-tree root.
fn prune_empty_dirs(work_tree: &Path, removed: &Path) {
    let mut dir = removed.parent();
    while let Some(d) = dir {
        if d == work_tree || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
}
