//! Creating commits from the staging index.

use bstr::BString;
use gitport_hash::Oid;
use gitport_object::{Commit, ObjectType, Signature};
use gitport_ref::{Expect, RefName};

use crate::error::{ctx, CommandError, ErrorKind};
use crate::Repository;

/// Options for [`Repository::commit`].
#[derive(Debug, Default)]
pub struct CommitOptions {
    /// Author override; the configured identity otherwise.
    pub author: Option<Signature>,
    /// Allow a commit whose tree equals its parent's.
    pub allow_empty: bool,
}

impl Repository {
    /// Commit the index: build the tree, assemble parents (HEAD plus
    /// MERGE_HEAD when a merge is pending), write the commit object,
    /// and advance HEAD. Completing a merge clears its state files.
    pub fn commit(&self, message: &str, options: &CommitOptions) -> Result<Oid, CommandError> {
        let caller = "commit";
        let index = self.index()?;

        let unmerged = index.unmerged_paths();
        if !unmerged.is_empty() {
            return Err(CommandError::new(caller, ErrorKind::UnmergedPaths(unmerged)));
        }

        let tree = index.to_tree(self.odb()).map_err(ctx(caller))?;

        let head = RefName::new("HEAD").expect("static name");
        let head_oid = match self.refs().resolve(&head) {
            Ok(oid) => Some(oid),
            Err(gitport_ref::RefError::NotFound(_)) => None,
            Err(e) => return Err(CommandError::new(caller, e)),
        };

        let mut parents = Vec::new();
        if let Some(parent) = head_oid {
            parents.push(parent);
        }
        let merging = self.merge_head()?;
        if let Some(merge_parent) = merging {
            parents.push(merge_parent);
        }

        // Refuse no-op commits outside merges.
        if !options.allow_empty && merging.is_none() {
            if let Some(parent) = head_oid {
                let parent_tree = self.read_commit_object(&parent).map_err(ctx(caller))?.tree;
                if parent_tree == tree {
                    return Err(CommandError::new(caller, ErrorKind::EmptyCommit));
                }
            }
        }

        let committer = self.identity();
        let author = options.author.clone().unwrap_or_else(|| committer.clone());

        let commit = Commit {
            tree,
            parents,
            author,
            committer,
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: with_trailing_newline(message),
        };
        let oid = self
            .odb()
            .write(ObjectType::Commit, &commit.serialize_content())
            .map_err(ctx(caller))?;

        let expect = match head_oid {
            Some(old) => Expect::Value(old),
            None => Expect::MustNotExist,
        };
        let reflog_message = format!(
            "commit{}: {}",
            if merging.is_some() { " (merge)" } else { "" },
            first_line(message)
        );
        self.refs()
            .update(&head, oid, expect, &self.identity(), &reflog_message)
            .map_err(ctx(caller))?;

        if merging.is_some() {
            self.clear_operation_state()?;
        }

        Ok(oid)
    }
}

fn with_trailing_newline(message: &str) -> BString {
    let mut m = BString::from(message);
    if !m.ends_with(b"\n") {
        m.push(b'\n');
    }
    m
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}
