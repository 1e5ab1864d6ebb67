//! Git configuration: the INI dialect parser/writer and the
//! multi-source precedence merge.
//!
//! Variables have a canonical path `section.subsection.name` where the
//! subsection is case-sensitive and section/name are case-insensitive
//! (stored lowercased). Sources merge worktree > local > global >
//! system; a deletion marker at a higher-precedence layer suppresses
//! everything beneath it.

mod file;
pub mod parse;
pub mod types;

pub use file::ConfigFile;

use std::collections::HashSet;
use std::path::PathBuf;

use bstr::{BStr, BString};

/// Errors from config parsing and access.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{file}:{line}: {reason}")]
    Syntax {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("invalid boolean value: {0}")]
    InvalidBool(String),

    #[error("invalid integer value: {0}")]
    InvalidInt(String),

    #[error("config file has no backing path")]
    NoPath,

    #[error("config file locked: {0}")]
    LockBusy(PathBuf),

    #[error(transparent)]
    Util(#[from] gitport_utils::UtilError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Precedence levels, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigScope {
    System,
    Global,
    Local,
    Worktree,
}

/// Canonical variable path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    /// Lowercased section.
    pub section: BString,
    /// Case-sensitive subsection.
    pub subsection: Option<BString>,
    /// Lowercased variable name.
    pub name: BString,
}

impl ConfigKey {
    /// Parse `section.name` or `section.subsection.name`. Any middle
    /// dots belong to the subsection.
    pub fn parse(path: &str) -> Option<Self> {
        let first = path.find('.')?;
        let last = path.rfind('.')?;
        let section = path[..first].to_ascii_lowercase();
        let name = path[last + 1..].to_ascii_lowercase();
        if section.is_empty() || name.is_empty() {
            return None;
        }
        let subsection = if first == last {
            None
        } else {
            Some(BString::from(&path[first + 1..last]))
        };
        Some(Self {
            section: BString::from(section),
            subsection,
            name: BString::from(name),
        })
    }

    /// The dotted display form.
    pub fn to_path(&self) -> String {
        match &self.subsection {
            Some(sub) => format!("{}.{}.{}", self.section, sub, self.name),
            None => format!("{}.{}", self.section, self.name),
        }
    }
}

/// One layer in the merged view.
struct Layer {
    scope: ConfigScope,
    file: ConfigFile,
    /// Keys deleted at this layer; they suppress all lower layers.
    deletions: HashSet<String>,
}

/// The merged, precedence-ordered configuration.
#[derive(Default)]
pub struct ConfigSet {
    /// Layers sorted lowest precedence first.
    layers: Vec<Layer>,
}

impl ConfigSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source file at a scope. Sources may be added in any order.
    pub fn add_file(&mut self, scope: ConfigScope, file: ConfigFile) {
        let layer = Layer {
            scope,
            file,
            deletions: HashSet::new(),
        };
        let at = self
            .layers
            .iter()
            .position(|l| l.scope > scope)
            .unwrap_or(self.layers.len());
        self.layers.insert(at, layer);
    }

    /// Record a deletion marker at a scope: lookups stop there and do
    /// not fall through to lower-precedence layers.
    pub fn mark_deleted(&mut self, scope: ConfigScope, key: &ConfigKey) {
        if let Some(layer) = self.layers.iter_mut().find(|l| l.scope == scope) {
            layer.deletions.insert(key.to_path());
            layer.file.unset_all(key);
        }
    }

    /// Mutable access to the file at a scope.
    pub fn file_mut(&mut self, scope: ConfigScope) -> Option<&mut ConfigFile> {
        self.layers
            .iter_mut()
            .find(|l| l.scope == scope)
            .map(|l| &mut l.file)
    }

    pub fn file(&self, scope: ConfigScope) -> Option<&ConfigFile> {
        self.layers
            .iter()
            .find(|l| l.scope == scope)
            .map(|l| &l.file)
    }

    /// Look up a single value, highest precedence first.
    pub fn get(&self, path: &str) -> Option<Option<BString>> {
        let key = ConfigKey::parse(path)?;
        let dotted = key.to_path();
        for layer in self.layers.iter().rev() {
            if layer.deletions.contains(&dotted) {
                return None;
            }
            if let Some(value) = layer.file.get(&key) {
                return Some(value);
            }
        }
        None
    }

    /// All values for a multi-valued key, lowest precedence first, with
    /// deletion markers cutting off everything beneath them.
    pub fn get_all(&self, path: &str) -> Vec<Option<BString>> {
        let Some(key) = ConfigKey::parse(path) else {
            return Vec::new();
        };
        let dotted = key.to_path();
        let start = self
            .layers
            .iter()
            .rposition(|l| l.deletions.contains(&dotted))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.layers[start..]
            .iter()
            .flat_map(|l| l.file.get_all(&key))
            .collect()
    }

    /// Boolean lookup with a default for missing keys.
    pub fn get_bool(&self, path: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(path) {
            Some(value) => types::parse_bool(value.as_ref().map(|v| v.as_ref())),
            None => Ok(default),
        }
    }

    /// Integer lookup with a default for missing keys.
    pub fn get_int(&self, path: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get(path) {
            Some(Some(value)) => types::parse_int(value.as_ref()),
            Some(None) => Err(ConfigError::InvalidInt("boolean-style key".into())),
            None => Ok(default),
        }
    }

    /// String lookup (lossy UTF-8 conversion).
    pub fn get_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Some(value) => Some(String::from_utf8_lossy(&value).into_owned()),
            None => Some(String::new()),
        }
    }

    /// Path lookup with `~/` expansion.
    pub fn get_path(&self, path: &str) -> Option<PathBuf> {
        match self.get(path)? {
            Some(value) => Some(types::parse_path(BStr::new(value.as_slice()))),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(content: &str) -> ConfigFile {
        ConfigFile::parse(content.as_bytes(), None).unwrap()
    }

    fn set_with_layers() -> ConfigSet {
        let mut set = ConfigSet::new();
        set.add_file(
            ConfigScope::System,
            file("[core]\nautocrlf = true\neditor = syseditor\n"),
        );
        set.add_file(
            ConfigScope::Global,
            file("[core]\neditor = vim\n[user]\nname = Global Name\n"),
        );
        set.add_file(
            ConfigScope::Local,
            file("[user]\nname = Local Name\n[remote \"origin\"]\nurl = https://example.com\n"),
        );
        set
    }

    #[test]
    fn precedence_is_local_over_global_over_system() {
        let set = set_with_layers();
        assert_eq!(set.get_string("user.name").unwrap(), "Local Name");
        assert_eq!(set.get_string("core.editor").unwrap(), "vim");
        assert_eq!(set.get_bool("core.autocrlf", false).unwrap(), true);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut set = ConfigSet::new();
        set.add_file(ConfigScope::Local, file("[a]\nx = local\n"));
        set.add_file(ConfigScope::System, file("[a]\nx = system\n"));
        set.add_file(ConfigScope::Global, file("[a]\nx = global\n"));
        assert_eq!(set.get_string("a.x").unwrap(), "local");
    }

    #[test]
    fn deletion_marker_suppresses_lower_layers() {
        let mut set = set_with_layers();
        let key = ConfigKey::parse("core.editor").unwrap();
        set.mark_deleted(ConfigScope::Local, &key);
        // Global and system still define it, but the local deletion wins.
        assert!(set.get("core.editor").is_none());
        // Typed getter falls back to the built-in default.
        assert_eq!(set.get_bool("core.editor2", false).unwrap(), false);
    }

    #[test]
    fn multi_values_accumulate_across_layers() {
        let mut set = ConfigSet::new();
        set.add_file(
            ConfigScope::Global,
            file("[remote \"origin\"]\nfetch = +refs/heads/*:refs/remotes/origin/*\n"),
        );
        set.add_file(
            ConfigScope::Local,
            file("[remote \"origin\"]\nfetch = +refs/tags/*:refs/tags/*\n"),
        );
        let all = set.get_all("remote.origin.fetch");
        assert_eq!(all.len(), 2);
        // Lowest precedence first.
        assert!(all[0].as_ref().unwrap().starts_with(b"+refs/heads"));
    }

    #[test]
    fn deletion_cuts_multi_values_below() {
        let mut set = ConfigSet::new();
        set.add_file(ConfigScope::Global, file("[a]\nx = low\n"));
        set.add_file(ConfigScope::Local, file("[a]\nx = high\n"));
        let key = ConfigKey::parse("a.x").unwrap();
        set.mark_deleted(ConfigScope::Local, &key);
        assert!(set.get_all("a.x").is_empty());

        // A deletion at global level leaves local values visible.
        let mut set = ConfigSet::new();
        set.add_file(ConfigScope::Global, file("[a]\nx = low\n"));
        set.add_file(ConfigScope::Local, file("[a]\nx = high\n"));
        set.mark_deleted(ConfigScope::Global, &key);
        let all = set.get_all("a.x");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].as_ref().unwrap().as_slice(), b"high");
    }

    #[test]
    fn key_parse_middle_dots_are_subsection() {
        let key = ConfigKey::parse("remote.my.origin.url").unwrap();
        assert_eq!(key.section.as_slice(), b"remote");
        assert_eq!(key.subsection.as_ref().unwrap().as_slice(), b"my.origin");
        assert_eq!(key.name.as_slice(), b"url");

        let key = ConfigKey::parse("core.bare").unwrap();
        assert!(key.subsection.is_none());
        assert!(ConfigKey::parse("nodots").is_none());
    }

    #[test]
    fn section_and_name_case_insensitive() {
        let mut set = ConfigSet::new();
        set.add_file(ConfigScope::Local, file("[Core]\nBare = true\n"));
        assert_eq!(set.get_bool("core.bare", false).unwrap(), true);
        assert_eq!(set.get_bool("CORE.BARE", false).unwrap(), true);
    }
}
