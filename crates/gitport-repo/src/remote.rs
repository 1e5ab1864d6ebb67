//! Remote configuration and refspec handling.

use gitport_config::ConfigKey;

use crate::error::{CommandError, ErrorKind};
use crate::Repository;

/// One refspec: `[+]<src>:<dst>`, optionally with one `*` wildcard on
/// each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub force: bool,
    pub src: String,
    pub dst: String,
}

impl Refspec {
    /// Parse a refspec string.
    pub fn parse(spec: &str) -> Option<Self> {
        let (force, rest) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (src, dst) = rest.split_once(':')?;
        if src.is_empty() || dst.is_empty() {
            return None;
        }
        // Wildcards must pair up.
        if src.contains('*') != dst.contains('*') {
            return None;
        }
        Some(Self {
            force,
            src: src.to_string(),
            dst: dst.to_string(),
        })
    }

    /// Map a remote ref name through this spec, if it matches.
    pub fn map(&self, refname: &str) -> Option<String> {
        match self.src.split_once('*') {
            None => (self.src == refname).then(|| self.dst.clone()),
            Some((prefix, suffix)) => {
                let rest = refname.strip_prefix(prefix)?.strip_suffix(suffix)?;
                Some(self.dst.replacen('*', rest, 1))
            }
        }
    }
}

/// A configured remote.
#[derive(Debug, Clone)]
pub struct Remote {
    pub name: String,
    pub url: String,
    pub fetch: Vec<Refspec>,
}

impl Repository {
    /// Read a remote from config. Fetch refspecs may be empty; callers
    /// that need them fail with `NoRefspec`.
    pub fn remote(&self, name: &str) -> Result<Remote, CommandError> {
        let url = self
            .config()
            .get_string(&format!("remote.{name}.url"))
            .ok_or_else(|| {
                CommandError::new("remote", ErrorKind::NotFound(format!("remote {name}")))
            })?;

        let fetch = self
            .config()
            .get_all(&format!("remote.{name}.fetch"))
            .into_iter()
            .flatten()
            .filter_map(|spec| Refspec::parse(&String::from_utf8_lossy(&spec)))
            .collect();

        Ok(Remote {
            name: name.to_string(),
            url,
            fetch,
        })
    }

    /// Record a remote in local config with the conventional fetch spec.
    pub fn set_remote(&mut self, name: &str, url: &str) -> Result<(), CommandError> {
        let caller = "remote";
        let file = self
            .config_mut()
            .file_mut(gitport_config::ConfigScope::Local)
            .ok_or_else(|| {
                CommandError::new(caller, ErrorKind::NotFound("local config".into()))
            })?;

        let url_key = ConfigKey::parse(&format!("remote.{name}.url"))
            .ok_or_else(|| CommandError::new(caller, ErrorKind::NotFound("config key".into())))?;
        file.set(&url_key, url.into());

        let fetch_key = ConfigKey::parse(&format!("remote.{name}.fetch"))
            .ok_or_else(|| CommandError::new(caller, ErrorKind::NotFound("config key".into())))?;
        file.set(
            &fetch_key,
            format!("+refs/heads/*:refs/remotes/{name}/*").as_str().into(),
        );
        file.save()
            .map_err(|e| CommandError::new(caller, ErrorKind::Config(e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InitOptions;

    #[test]
    fn refspec_parsing() {
        let spec = Refspec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert!(spec.force);
        assert_eq!(spec.src, "refs/heads/*");

        let exact = Refspec::parse("refs/heads/main:refs/remotes/origin/main").unwrap();
        assert!(!exact.force);

        assert!(Refspec::parse("nocolon").is_none());
        assert!(Refspec::parse("refs/heads/*:refs/remotes/origin/main").is_none());
        assert!(Refspec::parse(":refs/x").is_none());
    }

    #[test]
    fn refspec_mapping() {
        let spec = Refspec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert_eq!(
            spec.map("refs/heads/main").unwrap(),
            "refs/remotes/origin/main"
        );
        assert_eq!(
            spec.map("refs/heads/feature/x").unwrap(),
            "refs/remotes/origin/feature/x"
        );
        assert!(spec.map("refs/tags/v1").is_none());

        let exact = Refspec::parse("refs/heads/main:refs/remotes/origin/main").unwrap();
        assert_eq!(
            exact.map("refs/heads/main").unwrap(),
            "refs/remotes/origin/main"
        );
        assert!(exact.map("refs/heads/dev").is_none());
    }

    #[test]
    fn set_then_read_remote() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = crate::Repository::init(dir.path(), &InitOptions::default()).unwrap();
        repo.set_remote("origin", "https://example.com/repo.git")
            .unwrap();

        // Reopen so the config layer reloads from disk.
        let repo = crate::Repository::open(dir.path()).unwrap();
        let remote = repo.remote("origin").unwrap();
        assert_eq!(remote.url, "https://example.com/repo.git");
        assert_eq!(remote.fetch.len(), 1);
        assert_eq!(
            remote.fetch[0].map("refs/heads/main").unwrap(),
            "refs/remotes/origin/main"
        );
    }

    #[test]
    fn missing_remote_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = crate::Repository::init(dir.path(), &InitOptions::default()).unwrap();
        assert_eq!(repo.remote("upstream").unwrap_err().code(), "NotFoundError");
    }
}
