//! Merge, cherry-pick, and rebase commands over the merge engine.

use std::fs;

use bstr::BString;
use gitport_hash::Oid;
use gitport_index::Stage;
use gitport_merge::tree::MergeConflict;
use gitport_merge::{is_descendant, merge_base, merge_trees, ConflictStyle, MergeLabels};
use gitport_object::{Commit, ObjectType};
use gitport_ref::{Expect, RefName};

use crate::checkout::safe_join;
use crate::error::{ctx, CommandError, ErrorKind};
use crate::state::{TodoAction, TodoEntry};
use crate::{CheckoutOptions, Repository};

/// How a merge-like command ended.
#[derive(Debug)]
pub enum MergeOutcome {
    /// `theirs` was already reachable from HEAD.
    AlreadyUpToDate,
    /// HEAD moved forward without a merge commit.
    FastForward(Oid),
    /// A merge (or pick) commit was created.
    Merged(Oid),
    /// Conflicts were recorded in the index and working tree; the
    /// operation is paused.
    Conflicts(Vec<BString>),
}

/// Options for [`Repository::merge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeCommandOptions {
    /// Create a merge commit even when fast-forward is possible.
    pub no_ff: bool,
    pub conflict_style: ConflictStyle,
}

impl Repository {
    /// Merge another branch into HEAD.
    pub fn merge(
        &self,
        theirs_ref: &str,
        options: MergeCommandOptions,
    ) -> Result<MergeOutcome, CommandError> {
        let caller = "merge";
        let head = RefName::new("HEAD").expect("static name");
        let ours = self.resolve_ref("HEAD")?;
        let theirs = self.resolve_ref(theirs_ref)?;

        if is_descendant(self.odb(), &theirs, &ours).map_err(ctx(caller))? {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }

        // Fast-forward policy: HEAD an ancestor of theirs moves the ref,
        // unless no-ff forces a real merge commit.
        if !options.no_ff && is_descendant(self.odb(), &ours, &theirs).map_err(ctx(caller))? {
            self.write_orig_head(&ours)?;
            // Working tree first: the tree diff is computed against the
            // commit HEAD still points at.
            self.checkout_tree(&theirs, CheckoutOptions { force: true })?;
            self.refs()
                .update(
                    &head,
                    theirs,
                    Expect::Value(ours),
                    &self.identity(),
                    &format!("merge {theirs_ref}: Fast-forward"),
                )
                .map_err(ctx(caller))?;
            return Ok(MergeOutcome::FastForward(theirs));
        }

        let base = merge_base(self.odb(), &ours, &theirs).map_err(ctx(caller))?;
        let base = base.ok_or_else(|| {
            CommandError::new(caller, ErrorKind::Merge(gitport_merge::MergeError::UnrelatedHistories))
        })?;

        let message = format!("Merge {theirs_ref}\n");
        let ours_label = self
            .current_branch()?
            .map(|b| b.shorthand().to_string())
            .unwrap_or_else(|| "HEAD".to_string());

        self.three_way(
            caller,
            &base,
            &ours,
            &theirs,
            &ours_label,
            theirs_ref,
            options.conflict_style,
            ThreeWayKind::Merge {
                message,
                theirs,
            },
        )
    }

    /// Apply one commit's change on top of HEAD.
    pub fn cherry_pick(&self, commit_ref: &str) -> Result<MergeOutcome, CommandError> {
        let caller = "cherryPick";
        let ours = self.resolve_ref("HEAD")?;
        let pick = self.resolve_ref(commit_ref)?;
        let commit = self.read_commit_object(&pick).map_err(ctx(caller))?;

        // The change is measured against the commit's first parent; a
        // root commit diffs against the empty tree.
        let base = match commit.first_parent() {
            Some(parent) => Some(*parent),
            None => None,
        };
        let base_oid = base.unwrap_or(Oid::NULL);

        self.three_way(
            caller,
            &base_oid,
            &ours,
            &pick,
            "HEAD",
            commit_ref,
            ConflictStyle::Merge,
            ThreeWayKind::CherryPick {
                pick,
                message: commit.message.to_string(),
                author: commit.author.clone(),
            },
        )
    }

    /// Start a rebase of the current branch onto `onto_ref`, applying
    /// every step immediately. Stops (with persisted state) at the
    /// first conflicting step.
    pub fn rebase(&self, onto_ref: &str) -> Result<MergeOutcome, CommandError> {
        let caller = "rebase";
        let branch = self.current_branch()?.ok_or_else(|| {
            CommandError::new(caller, ErrorKind::NotFound("HEAD is detached".into()))
        })?;
        let head_oid = self.resolve_ref("HEAD")?;
        let onto = self.resolve_ref(onto_ref)?;

        if is_descendant(self.odb(), &head_oid, &onto).map_err(ctx(caller))?
            && head_oid != onto
        {
            // Everything on the branch is already contained: fast-forward.
            self.write_orig_head(&head_oid)?;
            self.checkout_tree(&onto, CheckoutOptions { force: true })?;
            self.refs()
                .update(
                    &RefName::new("HEAD").expect("static name"),
                    onto,
                    Expect::Value(head_oid),
                    &self.identity(),
                    &format!("rebase: fast-forward to {onto_ref}"),
                )
                .map_err(ctx(caller))?;
            return Ok(MergeOutcome::FastForward(onto));
        }

        let base = merge_base(self.odb(), &head_oid, &onto)
            .map_err(ctx(caller))?
            .ok_or_else(|| {
                CommandError::new(
                    caller,
                    ErrorKind::Merge(gitport_merge::MergeError::UnrelatedHistories),
                )
            })?;

        // Commits to replay: base..HEAD, oldest first.
        let mut todo = Vec::new();
        let mut cursor = head_oid;
        while cursor != base {
            let commit = self.read_commit_object(&cursor).map_err(ctx(caller))?;
            todo.push(TodoEntry {
                action: TodoAction::Pick,
                oid: cursor,
                subject: commit.summary().to_string(),
            });
            match commit.first_parent() {
                Some(parent) => cursor = *parent,
                None => break,
            }
        }
        todo.reverse();

        self.write_orig_head(&head_oid)?;
        self.init_rebase(branch.as_str(), &onto, &todo)?;

        // Detach onto the new base and start replaying.
        self.checkout_tree(&onto, CheckoutOptions { force: true })?;
        self.refs()
            .set_detached(
                &RefName::new("HEAD").expect("static name"),
                onto,
                &self.identity(),
                &format!("rebase: checkout {onto_ref}"),
            )
            .map_err(ctx(caller))?;

        self.rebase_continue()
    }

    /// Resume a paused rebase (after conflicts were resolved and
    /// staged, or immediately after `rebase` starts).
    pub fn rebase_continue(&self) -> Result<MergeOutcome, CommandError> {
        let caller = "rebase";
        if !self.is_rebase_in_progress() {
            return Err(CommandError::new(
                caller,
                ErrorKind::NoOperationInProgress("rebase"),
            ));
        }
        let state = self.read_rebase_state()?;
        let mut todo = state.todo.clone();
        let mut last = self.resolve_ref("HEAD")?;

        while let Some(entry) = todo.first().cloned() {
            if entry.action == TodoAction::Drop {
                todo.remove(0);
                self.write_rebase_todo(&todo)?;
                continue;
            }
            match self.cherry_pick(&entry.oid.to_hex())? {
                MergeOutcome::Merged(oid) | MergeOutcome::FastForward(oid) => {
                    last = oid;
                    todo.remove(0);
                    self.write_rebase_todo(&todo)?;
                }
                MergeOutcome::AlreadyUpToDate => {
                    todo.remove(0);
                    self.write_rebase_todo(&todo)?;
                }
                MergeOutcome::Conflicts(paths) => {
                    return Ok(MergeOutcome::Conflicts(paths));
                }
            }
        }

        // All steps done: move the branch and re-attach HEAD.
        let branch = RefName::new(state.head_name.clone()).map_err(ctx(caller))?;
        self.refs()
            .update(
                &branch,
                last,
                Expect::Any,
                &self.identity(),
                "rebase (finish)",
            )
            .map_err(ctx(caller))?;
        self.refs()
            .set_symbolic(&RefName::new("HEAD").expect("static name"), &branch)
            .map_err(ctx(caller))?;
        self.abort_rebase()?; // clears the state directory
        self.clear_operation_state()?;
        Ok(MergeOutcome::Merged(last))
    }

    /// Abort a rebase: restore the branch and working tree from
    /// ORIG_HEAD and drop all rebase state.
    pub fn rebase_abort(&self) -> Result<(), CommandError> {
        let caller = "rebase";
        if !self.is_rebase_in_progress() {
            return Err(CommandError::new(
                caller,
                ErrorKind::NoOperationInProgress("rebase"),
            ));
        }
        let state = self.read_rebase_state()?;
        let orig = self.orig_head()?.ok_or_else(|| {
            CommandError::new(caller, ErrorKind::NotFound("ORIG_HEAD".into()))
        })?;

        // Restore the working tree against the still-detached HEAD,
        // then move the branch back and re-attach.
        self.checkout_tree(&orig, CheckoutOptions { force: true })?;
        let branch = RefName::new(state.head_name).map_err(ctx(caller))?;
        self.refs()
            .update(&branch, orig, Expect::Any, &self.identity(), "rebase: abort")
            .map_err(ctx(caller))?;
        self.refs()
            .set_symbolic(&RefName::new("HEAD").expect("static name"), &branch)
            .map_err(ctx(caller))?;
        self.abort_rebase()?;
        self.clear_operation_state()?;
        Ok(())
    }

    /// Shared three-way machinery for merge and cherry-pick.
    #[allow(clippy::too_many_arguments)]
    fn three_way(
        &self,
        caller: &'static str,
        base: &Oid,
        ours: &Oid,
        theirs: &Oid,
        ours_label: &str,
        theirs_label: &str,
        style: ConflictStyle,
        kind: ThreeWayKind,
    ) -> Result<MergeOutcome, CommandError> {
        let base_tree = if base.is_null() {
            None
        } else {
            Some(self.read_commit_object(base).map_err(ctx(caller))?.tree)
        };
        let ours_tree = self.read_commit_object(ours).map_err(ctx(caller))?.tree;
        let theirs_tree = self.read_commit_object(theirs).map_err(ctx(caller))?.tree;

        let labels = MergeLabels {
            ours: ours_label,
            base: "base",
            theirs: theirs_label,
        };
        let result = merge_trees(
            self.odb(),
            base_tree.as_ref(),
            Some(&ours_tree),
            Some(&theirs_tree),
            style,
            &labels,
        )
        .map_err(ctx(caller))?;

        if result.is_clean() {
            // Build the commit and move HEAD; the tree then reaches the
            // working tree through a forced checkout.
            let identity = self.identity();
            let (message, parents, author) = match &kind {
                ThreeWayKind::Merge { message, theirs } => (
                    message.clone(),
                    vec![*ours, *theirs],
                    identity.clone(),
                ),
                ThreeWayKind::CherryPick { message, author, .. } => {
                    (message.clone(), vec![*ours], author.clone())
                }
            };

            let commit = Commit {
                tree: result.tree,
                parents,
                author,
                committer: identity.clone(),
                encoding: None,
                gpgsig: None,
                extra_headers: Vec::new(),
                message: BString::from(message),
            };
            let oid = self
                .odb()
                .write(ObjectType::Commit, &commit.serialize_content())
                .map_err(ctx(caller))?;

            // Working tree first (the diff runs against the old HEAD),
            // then the ref moves.
            self.checkout_tree(&oid, CheckoutOptions { force: true })?;
            let head = RefName::new("HEAD").expect("static name");
            self.refs()
                .update(
                    &head,
                    oid,
                    Expect::Value(*ours),
                    &identity,
                    &format!("{caller}: {}", theirs_label),
                )
                .map_err(ctx(caller))?;
            return Ok(MergeOutcome::Merged(oid));
        }

        // Conflicts: persist operation state, stage 1/2/3 entries, and
        // leave marked-up content in the working tree.
        match &kind {
            ThreeWayKind::Merge { message, theirs } => {
                self.write_merge_state(theirs, message)?;
            }
            ThreeWayKind::CherryPick { pick, .. } => {
                self.write_cherry_pick_state(pick)?;
            }
        }
        self.record_conflicts(caller, &ours_tree, &result.tree, &result.conflicts)?;

        let paths = result.conflicts.iter().map(|c| c.path.clone()).collect();
        Ok(MergeOutcome::Conflicts(paths))
    }

    /// Install a conflicted merge: cleanly merged paths land in the
    /// working tree and index as stage 0, conflicted paths get their
    /// stages 1/2/3 and marked-up content.
    fn record_conflicts(
        &self,
        caller: &'static str,
        ours_tree: &Oid,
        merged_tree: &Oid,
        conflicts: &[MergeConflict],
    ) -> Result<(), CommandError> {
        let work_tree = self.require_work_tree(caller)?.to_path_buf();
        let mut index = self.index()?;
        let autocrlf = self.autocrlf();

        let conflicted: std::collections::HashSet<&[u8]> =
            conflicts.iter().map(|c| c.path.as_slice()).collect();
        let ours_map =
            crate::checkout::flatten_tree(self.odb(), Some(ours_tree)).map_err(ctx(caller))?;
        let merged_map =
            crate::checkout::flatten_tree(self.odb(), Some(merged_tree)).map_err(ctx(caller))?;

        // Paths the merge deleted cleanly.
        for path in ours_map.keys() {
            if merged_map.contains_key(path) || conflicted.contains(path.as_slice()) {
                continue;
            }
            let abs = safe_join(&work_tree, path.as_ref()).map_err(ctx(caller))?;
            let _ = fs::remove_file(&abs);
            index.remove_path(path.as_ref());
        }

        // Paths the merge changed or added cleanly.
        for (path, (mode, oid)) in &merged_map {
            if conflicted.contains(path.as_slice())
                || ours_map.get(path) == Some(&(*mode, *oid))
            {
                continue;
            }
            let abs = safe_join(&work_tree, path.as_ref()).map_err(ctx(caller))?;
            self.materialize_blob(&abs, *mode, oid, autocrlf)
                .map_err(ctx(caller))?;
            let mut entry = gitport_index::IndexEntry::new(
                path.clone(),
                *oid,
                *mode,
                Stage::Normal,
            );
            if let Ok(meta) = fs::symlink_metadata(&abs) {
                entry.stat = gitport_index::StatData::from_metadata(&meta);
            }
            index.stage_file(entry);
        }

        for conflict in conflicts {
            index.unmerge(
                conflict.path.as_ref(),
                conflict.base,
                conflict.ours,
                conflict.theirs,
            );
            if let Some(content) = &conflict.marked_content {
                let abs = safe_join(&work_tree, conflict.path.as_ref()).map_err(ctx(caller))?;
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent).map_err(ctx(caller))?;
                }
                fs::write(&abs, content).map_err(ctx(caller))?;
            }
        }

        index.write().map_err(ctx(caller))
    }

    /// Resolve a conflicted path after manual editing: stage the file
    /// and drop its conflict stages.
    pub fn mark_resolved(&self, path: &str) -> Result<(), CommandError> {
        let caller = "add";
        let index = self.index()?;
        if index.get_all(BString::from(path).as_ref()).iter().all(|e| e.stage == Stage::Normal) {
            return Err(CommandError::new(
                caller,
                ErrorKind::NotFound(format!("{path} is not conflicted")),
            ));
        }
        self.add(&[path])
    }
}

enum ThreeWayKind {
    Merge {
        message: String,
        theirs: Oid,
    },
    CherryPick {
        pick: Oid,
        message: String,
        author: gitport_object::Signature,
    },
}
