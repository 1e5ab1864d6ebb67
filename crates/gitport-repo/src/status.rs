//! Working-tree status: index vs HEAD (staged), worktree vs index
//! (unstaged), untracked files filtered through the ignore stack.

use std::fs;
use std::path::Path;

use bstr::{BStr, BString, ByteSlice};
use gitport_hash::hasher::Hasher;
use gitport_index::{eol, IgnoreStack, Index, Stage};

use crate::checkout::{flatten_tree, safe_join};
use crate::error::{ctx, CommandError, ErrorKind};
use crate::Repository;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeChange {
    Added,
    Modified,
    Deleted,
}

/// One changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: BString,
    pub change: WorktreeChange,
}

/// The full status report.
#[derive(Debug, Default)]
pub struct Status {
    /// Current branch shorthand; None when detached.
    pub branch: Option<String>,
    /// Index vs HEAD.
    pub staged: Vec<StatusEntry>,
    /// Worktree vs index.
    pub unstaged: Vec<StatusEntry>,
    pub untracked: Vec<BString>,
    pub conflicted: Vec<BString>,
}

impl Status {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.unstaged.is_empty()
            && self.untracked.is_empty()
            && self.conflicted.is_empty()
    }
}

impl Repository {
    /// Compute the status report.
    pub fn status(&self) -> Result<Status, CommandError> {
        let caller = "status";
        let work_tree = self.require_work_tree(caller)?.to_path_buf();
        let index = self.index()?;

        let mut status = Status {
            branch: self
                .current_branch()?
                .map(|name| name.shorthand().to_string()),
            conflicted: index.unmerged_paths(),
            ..Status::default()
        };

        // Staged: index against the HEAD tree.
        let head_tree = self.head_tree().map_err(ctx(caller))?;
        let head_map = flatten_tree(self.odb(), head_tree.as_ref()).map_err(ctx(caller))?;
        for entry in index.entries().iter().filter(|e| e.stage == Stage::Normal) {
            match head_map.get(&entry.path) {
                None => status.staged.push(StatusEntry {
                    path: entry.path.clone(),
                    change: WorktreeChange::Added,
                }),
                Some((mode, oid)) if (*mode, *oid) != (entry.mode, entry.oid) => {
                    status.staged.push(StatusEntry {
                        path: entry.path.clone(),
                        change: WorktreeChange::Modified,
                    })
                }
                Some(_) => {}
            }
        }
        for path in head_map.keys() {
            if index.get(path.as_ref(), Stage::Normal).is_none()
                && !status.conflicted.contains(path)
            {
                status.staged.push(StatusEntry {
                    path: path.clone(),
                    change: WorktreeChange::Deleted,
                });
            }
        }

        // Unstaged: worktree against the index.
        let autocrlf = self.autocrlf();
        for entry in index.entries().iter().filter(|e| e.stage == Stage::Normal) {
            let abs = safe_join(&work_tree, entry.path.as_ref()).map_err(ctx(caller))?;
            match fs::symlink_metadata(&abs) {
                Err(_) => status.unstaged.push(StatusEntry {
                    path: entry.path.clone(),
                    change: WorktreeChange::Deleted,
                }),
                Ok(meta) => {
                    if entry.stat.matches(&meta) {
                        continue;
                    }
                    let content = eol::to_odb(
                        &fs::read(&abs).map_err(|e| CommandError::new(caller, ErrorKind::Io(e)))?,
                        autocrlf,
                    );
                    if Hasher::hash_object("blob", &content) != entry.oid {
                        status.unstaged.push(StatusEntry {
                            path: entry.path.clone(),
                            change: WorktreeChange::Modified,
                        });
                    }
                }
            }
        }

        // Untracked: everything else, minus ignored paths.
        let ignore = self.ignore_stack(&work_tree).map_err(ctx(caller))?;
        let mut untracked = Vec::new();
        collect_untracked(
            &work_tree,
            &work_tree,
            &index,
            &ignore,
            &mut untracked,
        )
        .map_err(ctx(caller))?;
        untracked.sort();
        status.untracked = untracked;

        status.staged.sort_by(|a, b| a.path.cmp(&b.path));
        status.unstaged.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(status)
    }

    /// Build the layered ignore stack: `info/exclude`, then every
    /// `.gitignore` from the root downward.
    pub(crate) fn ignore_stack(&self, work_tree: &Path) -> Result<IgnoreStack, ErrorKind> {
        let mut stack = IgnoreStack::new();
        stack.add_file(&self.git_dir().join("info/exclude"), BStr::new(""))?;
        add_gitignores(work_tree, work_tree, &mut stack)?;
        Ok(stack)
    }
}

fn add_gitignores(
    root: &Path,
    dir: &Path,
    stack: &mut IgnoreStack,
) -> Result<(), ErrorKind> {
    let gitignore = dir.join(".gitignore");
    if gitignore.is_file() {
        let base = rel_path(root, dir);
        let base = if base.is_empty() {
            BString::from("")
        } else {
            BString::from(format!("{base}/"))
        };
        stack.add_file(&gitignore, base.as_ref())?;
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && entry.file_name() != ".git" {
            add_gitignores(root, &path, stack)?;
        }
    }
    Ok(())
}

fn collect_untracked(
    root: &Path,
    dir: &Path,
    index: &Index,
    ignore: &IgnoreStack,
    out: &mut Vec<BString>,
) -> Result<(), ErrorKind> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let rel = BString::from(rel_path(root, &path));
        let is_dir = path.is_dir();
        if ignore.is_ignored(rel.as_ref(), is_dir) {
            continue;
        }
        if is_dir {
            collect_untracked(root, &path, index, ignore, out)?;
        } else if index.get_all(rel.as_ref()).is_empty() {
            out.push(rel);
        }
    }
    Ok(())
}

fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
