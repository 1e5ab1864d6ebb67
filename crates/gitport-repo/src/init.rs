//! Repository initialization.

use std::fs;
use std::path::Path;

use crate::error::ctx;
use crate::{CommandError, Repository};

/// Options for [`Repository::init`].
pub struct InitOptions {
    pub bare: bool,
    /// Initial branch name; `main` when unset.
    pub default_branch: Option<String>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            bare: false,
            default_branch: None,
        }
    }
}

/// Create the standard gitdir layout. Re-running on an existing
/// repository is a safe no-op.
pub fn init_repository(path: &Path, options: &InitOptions) -> Result<Repository, CommandError> {
    let (git_dir, work_tree) = if options.bare {
        (path.to_path_buf(), None)
    } else {
        (path.join(".git"), Some(path.to_path_buf()))
    };

    if git_dir.join("HEAD").is_file() {
        return Repository::open(path);
    }

    let mk = |p: &Path| fs::create_dir_all(p).map_err(ctx("init"));
    mk(&git_dir)?;
    mk(&git_dir.join("objects/info"))?;
    mk(&git_dir.join("objects/pack"))?;
    mk(&git_dir.join("refs/heads"))?;
    mk(&git_dir.join("refs/tags"))?;
    mk(&git_dir.join("info"))?;

    let default_branch = options.default_branch.as_deref().unwrap_or("main");
    fs::write(
        git_dir.join("HEAD"),
        format!("ref: refs/heads/{default_branch}\n"),
    )
    .map_err(ctx("init"))?;

    let config = if options.bare {
        "[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = true\n"
    } else {
        "[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = false\n\tlogallrefupdates = true\n"
    };
    fs::write(git_dir.join("config"), config).map_err(ctx("init"))?;
    fs::write(
        git_dir.join("info/exclude"),
        "# per-repository ignores, one pattern per line\n",
    )
    .map_err(ctx("init"))?;

    if options.bare {
        Repository::open(&git_dir)
    } else {
        Repository::open(path)
    }
}
