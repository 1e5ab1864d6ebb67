//! Repository sessions and the command facade.
//!
//! A [`Repository`] ties the object database, ref store, config, and
//! index together for one logical owner. The command modules compose
//! those subsystems into the porcelain-level operations.

mod checkout;
mod commands;
mod error;
mod init;
pub mod remote;
pub mod state;
mod status;

pub use checkout::CheckoutOptions;
pub use commands::commit::CommitOptions;
pub use commands::log::LogEntry;
pub use commands::merge::{MergeCommandOptions, MergeOutcome};
pub use commands::net::{clone, connect, FetchOptions, FetchSummary};
pub use error::{CommandError, ErrorKind};
pub use init::InitOptions;
pub use status::{Status, StatusEntry, WorktreeChange};

use std::path::{Path, PathBuf};

use bstr::BString;
use gitport_config::{ConfigFile, ConfigScope, ConfigSet};
use gitport_index::{AutoCrlf, Index};
use gitport_object::Signature;
use gitport_odb::Odb;
use gitport_ref::{FilesRefStore, RefName};

/// One open repository session.
pub struct Repository {
    git_dir: PathBuf,
    work_tree: Option<PathBuf>,
    odb: Odb,
    refs: FilesRefStore,
    config: ConfigSet,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.git_dir)
            .field("work_tree", &self.work_tree)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Open a repository from a gitdir or working-tree root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CommandError> {
        let path = path.as_ref();
        let (git_dir, work_tree) = if path.join("HEAD").is_file() && path.join("objects").is_dir()
        {
            (path.to_path_buf(), None)
        } else if path.join(".git").is_dir() {
            (path.join(".git"), Some(path.to_path_buf()))
        } else {
            return Err(CommandError::new(
                "open",
                ErrorKind::NotFound(format!("no repository at {}", path.display())),
            ));
        };
        Self::from_dirs(git_dir, work_tree)
    }

    /// Walk up from `start` until a `.git` directory appears.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self, CommandError> {
        let mut dir = start.as_ref().to_path_buf();
        loop {
            if dir.join(".git").is_dir() {
                return Self::from_dirs(dir.join(".git"), Some(dir));
            }
            if !dir.pop() {
                return Err(CommandError::new(
                    "discover",
                    ErrorKind::NotFound(format!(
                        "no repository above {}",
                        start.as_ref().display()
                    )),
                ));
            }
        }
    }

    /// Create a new repository (see [`InitOptions`]).
    pub fn init(path: impl AsRef<Path>, options: &InitOptions) -> Result<Self, CommandError> {
        init::init_repository(path.as_ref(), options)
    }

    fn from_dirs(git_dir: PathBuf, work_tree: Option<PathBuf>) -> Result<Self, CommandError> {
        let odb = Odb::open(git_dir.join("objects")).map_err(error::ctx("open"))?;

        let mut config = ConfigSet::new();
        if let Some(home) = std::env::var_os("HOME") {
            let global = PathBuf::from(home).join(".gitconfig");
            if global.is_file() {
                config.add_file(
                    ConfigScope::Global,
                    ConfigFile::load(&global).map_err(error::ctx("open"))?,
                );
            }
        }
        config.add_file(
            ConfigScope::Local,
            ConfigFile::load(&git_dir.join("config")).map_err(error::ctx("open"))?,
        );

        let logging = config
            .get_bool("core.logallrefupdates", true)
            .unwrap_or(true);
        let refs = FilesRefStore::new(&git_dir).with_logging(logging);

        Ok(Self {
            git_dir,
            work_tree,
            odb,
            refs,
            config,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The working-tree root; bare repositories have none.
    pub fn work_tree(&self) -> Option<&Path> {
        self.work_tree.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.work_tree.is_none()
    }

    pub fn odb(&self) -> &Odb {
        &self.odb
    }

    pub fn refs(&self) -> &FilesRefStore {
        &self.refs
    }

    pub fn config(&self) -> &ConfigSet {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigSet {
        &mut self.config
    }

    /// Load the staging index (fresh from disk each call).
    pub fn index(&self) -> Result<Index, CommandError> {
        Index::load(self.git_dir.join("index")).map_err(error::ctx("index"))
    }

    /// The configured EOL conversion policy.
    pub fn autocrlf(&self) -> AutoCrlf {
        AutoCrlf::from_config(self.config.get_string("core.autocrlf").as_deref())
    }

    /// The committer identity from config, with a neutral fallback.
    pub fn identity(&self) -> Signature {
        let name = self
            .config
            .get_string("user.name")
            .unwrap_or_else(|| "gitport".to_string());
        let email = self
            .config
            .get_string("user.email")
            .unwrap_or_else(|| "gitport@localhost".to_string());
        Signature::now(BString::from(name), BString::from(email))
    }

    /// The branch HEAD points at, or None when detached.
    pub fn current_branch(&self) -> Result<Option<RefName>, CommandError> {
        let head = RefName::new("HEAD").map_err(error::ctx("head"))?;
        match self.refs.read_raw(&head).map_err(error::ctx("head"))? {
            Some(gitport_ref::Reference::Symbolic(target)) => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Require a working tree or fail with `BareRepositoryError`.
    pub(crate) fn require_work_tree(
        &self,
        caller: &'static str,
    ) -> Result<&Path, CommandError> {
        self.work_tree
            .as_deref()
            .ok_or_else(|| CommandError::new(caller, ErrorKind::BareRepository))
    }
}

/// Where a submodule's gitdir lives: `<gitdir>/modules/<path>`.
pub fn submodule_gitdir(git_dir: &Path, submodule_path: &str) -> PathBuf {
    git_dir.join("modules").join(submodule_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_open_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), &InitOptions::default()).unwrap();
        assert!(repo.git_dir().join("HEAD").is_file());
        assert!(!repo.is_bare());

        let opened = Repository::open(dir.path()).unwrap();
        assert_eq!(opened.git_dir(), dir.path().join(".git"));

        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let discovered = Repository::discover(&nested).unwrap();
        assert_eq!(discovered.git_dir(), dir.path().join(".git"));
    }

    #[test]
    fn open_missing_repo_fails_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let err = Repository::open(dir.path()).unwrap_err();
        assert_eq!(err.code(), "NotFoundError");
    }

    #[test]
    fn submodule_gitdir_path() {
        assert_eq!(
            submodule_gitdir(Path::new("/repo/.git"), "libs/dep"),
            Path::new("/repo/.git/modules/libs/dep")
        );
    }
}
