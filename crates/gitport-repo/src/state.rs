//! Operation-state files at the top of the gitdir: merge, cherry-pick,
//! and the rebase/sequencer directories.
//!
//! Every multi-step command follows the same lifecycle: state files are
//! created when the operation starts, consulted while it is paused, and
//! cleared when it completes or aborts.

use std::fs;
use std::path::{Path, PathBuf};

use gitport_hash::Oid;

use crate::error::{ctx, CommandError, ErrorKind};
use crate::Repository;

/// One line of a rebase/sequencer todo list: `<action> <oid> <subject>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoEntry {
    pub action: TodoAction,
    pub oid: Oid,
    pub subject: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoAction {
    Pick,
    Reword,
    Edit,
    Squash,
    Fixup,
    Drop,
}

impl TodoAction {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "pick" | "p" => Some(Self::Pick),
            "reword" | "r" => Some(Self::Reword),
            "edit" | "e" => Some(Self::Edit),
            "squash" | "s" => Some(Self::Squash),
            "fixup" | "f" => Some(Self::Fixup),
            "drop" | "d" => Some(Self::Drop),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pick => "pick",
            Self::Reword => "reword",
            Self::Edit => "edit",
            Self::Squash => "squash",
            Self::Fixup => "fixup",
            Self::Drop => "drop",
        }
    }
}

/// Parse a todo file. Comment and blank lines are skipped on read;
/// [`write_todo`] preserves entries only (callers keep their own
/// comments if they care).
pub fn parse_todo(content: &str) -> Vec<TodoEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        let Some(action) = parts.next().and_then(TodoAction::parse) else {
            continue;
        };
        let Some(oid) = parts.next().and_then(|hex| Oid::from_hex(hex).ok()) else {
            continue;
        };
        entries.push(TodoEntry {
            action,
            oid,
            subject: parts.next().unwrap_or("").to_string(),
        });
    }
    entries
}

/// Serialize a todo list.
pub fn format_todo(entries: &[TodoEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(entry.action.as_str());
        out.push(' ');
        out.push_str(&entry.oid.to_hex());
        if !entry.subject.is_empty() {
            out.push(' ');
            out.push_str(&entry.subject);
        }
        out.push('\n');
    }
    out
}

/// State of an interactive rebase persisted in `rebase-merge/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseState {
    /// The branch being rebased (`refs/heads/feature`).
    pub head_name: String,
    /// The commit being rebased onto.
    pub onto: Oid,
    pub todo: Vec<TodoEntry>,
}

impl Repository {
    fn state_file(&self, name: &str) -> PathBuf {
        self.git_dir().join(name)
    }

    fn read_state_oid(&self, name: &str) -> Result<Option<Oid>, CommandError> {
        match fs::read_to_string(self.state_file(name)) {
            Ok(text) => {
                let oid = Oid::from_hex(text.trim())
                    .map_err(|e| CommandError::new("state", ErrorKind::Hash(e)))?;
                Ok(Some(oid))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CommandError::new("state", ErrorKind::Io(e))),
        }
    }

    fn write_state_oid(&self, name: &str, oid: &Oid) -> Result<(), CommandError> {
        fs::write(self.state_file(name), format!("{}\n", oid.to_hex())).map_err(ctx("state"))
    }

    fn clear_state_file(&self, name: &str) -> Result<(), CommandError> {
        match fs::remove_file(self.state_file(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CommandError::new("state", ErrorKind::Io(e))),
        }
    }

    // ---- merge ----

    pub fn merge_head(&self) -> Result<Option<Oid>, CommandError> {
        self.read_state_oid("MERGE_HEAD")
    }

    pub fn is_merge_in_progress(&self) -> bool {
        self.state_file("MERGE_HEAD").is_file()
    }

    pub fn write_merge_state(&self, head: &Oid, message: &str) -> Result<(), CommandError> {
        self.write_state_oid("MERGE_HEAD", head)?;
        fs::write(self.state_file("MERGE_MSG"), message).map_err(ctx("state"))?;
        fs::write(self.state_file("MERGE_MODE"), "no-ff\n").map_err(ctx("state"))
    }

    pub fn merge_message(&self) -> Result<Option<String>, CommandError> {
        match fs::read_to_string(self.state_file("MERGE_MSG")) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CommandError::new("state", ErrorKind::Io(e))),
        }
    }

    // ---- cherry-pick ----

    pub fn cherry_pick_head(&self) -> Result<Option<Oid>, CommandError> {
        self.read_state_oid("CHERRY_PICK_HEAD")
    }

    pub fn is_cherry_pick_in_progress(&self) -> bool {
        self.state_file("CHERRY_PICK_HEAD").is_file()
    }

    pub fn write_cherry_pick_state(&self, commit: &Oid) -> Result<(), CommandError> {
        self.write_state_oid("CHERRY_PICK_HEAD", commit)?;
        let sequencer = self.state_file("sequencer");
        fs::create_dir_all(&sequencer).map_err(ctx("state"))?;
        fs::write(
            sequencer.join("todo"),
            format!("pick {}\n", commit.to_hex()),
        )
        .map_err(ctx("state"))?;
        fs::write(sequencer.join("head"), format!("{}\n", commit.to_hex()))
            .map_err(ctx("state"))
    }

    // ---- ORIG_HEAD / FETCH_HEAD ----

    pub fn orig_head(&self) -> Result<Option<Oid>, CommandError> {
        self.read_state_oid("ORIG_HEAD")
    }

    pub fn write_orig_head(&self, oid: &Oid) -> Result<(), CommandError> {
        self.write_state_oid("ORIG_HEAD", oid)
    }

    /// Append FETCH_HEAD lines:
    /// `<oid>\t<not-for-merge?>\t<description>`.
    pub fn write_fetch_head(
        &self,
        entries: &[(Oid, bool, String)],
    ) -> Result<(), CommandError> {
        let mut out = String::new();
        for (oid, for_merge, description) in entries {
            out.push_str(&oid.to_hex());
            out.push('\t');
            if !for_merge {
                out.push_str("not-for-merge");
            }
            out.push('\t');
            out.push_str(description);
            out.push('\n');
        }
        fs::write(self.state_file("FETCH_HEAD"), out).map_err(ctx("state"))
    }

    pub fn fetch_head(&self) -> Result<Option<Oid>, CommandError> {
        match fs::read_to_string(self.state_file("FETCH_HEAD")) {
            Ok(text) => {
                // The merge candidate is the first line not marked not-for-merge.
                for line in text.lines() {
                    let mut fields = line.split('\t');
                    let (Some(hex), Some(flag)) = (fields.next(), fields.next()) else {
                        continue;
                    };
                    if flag != "not-for-merge" {
                        return Ok(Oid::from_hex(hex.trim()).ok());
                    }
                }
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CommandError::new("state", ErrorKind::Io(e))),
        }
    }

    // ---- rebase ----

    fn rebase_dir(&self) -> PathBuf {
        self.state_file("rebase-merge")
    }

    pub fn is_rebase_in_progress(&self) -> bool {
        self.rebase_dir().is_dir()
    }

    /// Begin an interactive rebase: persist `head-name`, `onto`, and
    /// the todo list.
    pub fn init_rebase(
        &self,
        head_name: &str,
        onto: &Oid,
        todo: &[TodoEntry],
    ) -> Result<(), CommandError> {
        let dir = self.rebase_dir();
        if dir.exists() {
            return Err(CommandError::new(
                "rebase",
                ErrorKind::AlreadyExists("rebase-merge".into()),
            ));
        }
        fs::create_dir_all(&dir).map_err(ctx("rebase"))?;
        fs::write(dir.join("head-name"), format!("{head_name}\n")).map_err(ctx("rebase"))?;
        fs::write(dir.join("onto"), format!("{}\n", onto.to_hex())).map_err(ctx("rebase"))?;
        fs::write(dir.join("git-rebase-todo"), format_todo(todo)).map_err(ctx("rebase"))
    }

    /// The remaining todo list; empty when no rebase is in progress.
    pub fn read_rebase_todo(&self) -> Result<Vec<TodoEntry>, CommandError> {
        match fs::read_to_string(self.rebase_dir().join("git-rebase-todo")) {
            Ok(text) => Ok(parse_todo(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CommandError::new("rebase", ErrorKind::Io(e))),
        }
    }

    /// Replace the todo list (after completing a step).
    pub fn write_rebase_todo(&self, todo: &[TodoEntry]) -> Result<(), CommandError> {
        fs::write(self.rebase_dir().join("git-rebase-todo"), format_todo(todo))
            .map_err(ctx("rebase"))
    }

    pub fn read_rebase_state(&self) -> Result<RebaseState, CommandError> {
        let dir = self.rebase_dir();
        let head_name = fs::read_to_string(dir.join("head-name"))
            .map_err(|_| CommandError::new("rebase", ErrorKind::NoOperationInProgress("rebase")))?;
        let onto_text = fs::read_to_string(dir.join("onto")).map_err(ctx("rebase"))?;
        let onto = Oid::from_hex(onto_text.trim())
            .map_err(|e| CommandError::new("rebase", ErrorKind::Hash(e)))?;
        Ok(RebaseState {
            head_name: head_name.trim().to_string(),
            onto,
            todo: self.read_rebase_todo()?,
        })
    }

    /// Remove the rebase directory (abort or completion).
    pub fn abort_rebase(&self) -> Result<(), CommandError> {
        remove_dir(&self.rebase_dir()).map_err(ctx("rebase"))
    }

    // ---- cleanup ----

    /// Clear every operation-state file and directory.
    pub fn clear_operation_state(&self) -> Result<(), CommandError> {
        for file in [
            "MERGE_HEAD",
            "MERGE_MSG",
            "MERGE_MODE",
            "CHERRY_PICK_HEAD",
        ] {
            self.clear_state_file(file)?;
        }
        remove_dir(&self.state_file("sequencer")).map_err(ctx("state"))?;
        remove_dir(&self.rebase_dir()).map_err(ctx("state"))
    }
}

fn remove_dir(path: &Path) -> Result<(), std::io::Error> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InitOptions;

    fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), &InitOptions::default()).unwrap();
        (dir, repo)
    }

    fn oid(n: u8) -> Oid {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Oid::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn todo_roundtrip_skips_comments() {
        let text = "# rebase onto abc\n\npick 0000000000000000000000000000000000000001 First\n\
                    drop 0000000000000000000000000000000000000002 Second one\n";
        let todo = parse_todo(text);
        assert_eq!(todo.len(), 2);
        assert_eq!(todo[0].action, TodoAction::Pick);
        assert_eq!(todo[1].subject, "Second one");

        let formatted = format_todo(&todo);
        assert_eq!(parse_todo(&formatted), todo);
    }

    #[test]
    fn merge_state_lifecycle() {
        let (_dir, repo) = repo();
        assert!(!repo.is_merge_in_progress());

        repo.write_merge_state(&oid(1), "Merge branch 'x'\n").unwrap();
        assert!(repo.is_merge_in_progress());
        assert_eq!(repo.merge_head().unwrap(), Some(oid(1)));
        assert_eq!(
            repo.merge_message().unwrap().as_deref(),
            Some("Merge branch 'x'\n")
        );

        repo.clear_operation_state().unwrap();
        assert!(!repo.is_merge_in_progress());
        assert!(repo.merge_head().unwrap().is_none());
    }

    #[test]
    fn cherry_pick_state_uses_sequencer() {
        let (_dir, repo) = repo();
        repo.write_cherry_pick_state(&oid(2)).unwrap();
        assert!(repo.is_cherry_pick_in_progress());
        assert_eq!(repo.cherry_pick_head().unwrap(), Some(oid(2)));
        assert!(repo.git_dir().join("sequencer/todo").is_file());

        repo.clear_operation_state().unwrap();
        assert!(!repo.is_cherry_pick_in_progress());
        assert!(!repo.git_dir().join("sequencer").exists());
    }

    #[test]
    fn rebase_lifecycle() {
        let (_dir, repo) = repo();
        let onto = Oid::from_hex(&"b".repeat(40)).unwrap();
        let todo = vec![
            TodoEntry {
                action: TodoAction::Pick,
                oid: Oid::from_hex(&"c".repeat(40)).unwrap(),
                subject: "C1".into(),
            },
            TodoEntry {
                action: TodoAction::Pick,
                oid: Oid::from_hex(&"d".repeat(40)).unwrap(),
                subject: "C2".into(),
            },
        ];

        repo.init_rebase("refs/heads/feature", &onto, &todo).unwrap();
        assert!(repo.is_rebase_in_progress());

        let state = repo.read_rebase_state().unwrap();
        assert_eq!(state.head_name, "refs/heads/feature");
        assert_eq!(state.onto, onto);
        assert_eq!(state.todo, todo);

        // Order preserved through a write cycle.
        let read = repo.read_rebase_todo().unwrap();
        assert_eq!(read, todo);
        repo.write_rebase_todo(&read[1..]).unwrap();
        assert_eq!(repo.read_rebase_todo().unwrap().len(), 1);

        repo.abort_rebase().unwrap();
        assert!(!repo.is_rebase_in_progress());
        assert!(repo.read_rebase_todo().unwrap().is_empty());
    }

    #[test]
    fn second_rebase_init_fails() {
        let (_dir, repo) = repo();
        repo.init_rebase("refs/heads/x", &oid(1), &[]).unwrap();
        let err = repo.init_rebase("refs/heads/x", &oid(1), &[]).unwrap_err();
        assert_eq!(err.code(), "AlreadyExistsError");
    }

    #[test]
    fn fetch_head_picks_merge_candidate() {
        let (_dir, repo) = repo();
        repo.write_fetch_head(&[
            (oid(9), false, "branch 'x' of example.com".into()),
            (oid(3), true, "branch 'main' of example.com".into()),
        ])
        .unwrap();
        assert_eq!(repo.fetch_head().unwrap(), Some(oid(3)));
    }

    #[test]
    fn orig_head_roundtrip() {
        let (_dir, repo) = repo();
        assert!(repo.orig_head().unwrap().is_none());
        repo.write_orig_head(&oid(7)).unwrap();
        assert_eq!(repo.orig_head().unwrap(), Some(oid(7)));
    }
}
