use std::cmp::Ordering;

use bstr::{BString, ByteSlice};
use gitport_hash::Oid;

use crate::ObjectError;

/// File mode for tree entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Directory (040000)
    Tree,
    /// Regular file (100644)
    Regular,
    /// Executable file (100755)
    Executable,
    /// Symbolic link (120000)
    Symlink,
    /// Submodule commit reference (160000)
    Gitlink,
}

impl FileMode {
    /// Parse the octal ASCII form used in tree entries.
    pub fn from_octal(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"40000" | b"040000" => Ok(Self::Tree),
            b"100644" => Ok(Self::Regular),
            b"100755" => Ok(Self::Executable),
            b"120000" => Ok(Self::Symlink),
            b"160000" => Ok(Self::Gitlink),
            _ => Err(ObjectError::InvalidFileMode(
                String::from_utf8_lossy(s).into_owned(),
            )),
        }
    }

    /// Parse the raw numeric form stored in the index.
    pub fn from_raw(raw: u32) -> Result<Self, ObjectError> {
        match raw {
            0o040000 => Ok(Self::Tree),
            0o100644 => Ok(Self::Regular),
            0o100755 => Ok(Self::Executable),
            0o120000 => Ok(Self::Symlink),
            0o160000 => Ok(Self::Gitlink),
            _ => Err(ObjectError::InvalidFileMode(format!("{raw:o}"))),
        }
    }

    pub fn as_raw(&self) -> u32 {
        match self {
            Self::Tree => 0o040000,
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
        }
    }

    /// The octal form written into tree objects (no leading zero for trees).
    pub fn as_tree_bytes(&self) -> &'static [u8] {
        match self {
            Self::Tree => b"40000",
            Self::Regular => b"100644",
            Self::Executable => b"100755",
            Self::Symlink => b"120000",
            Self::Gitlink => b"160000",
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Regular | Self::Executable | Self::Symlink)
    }
}

/// A single `{mode, name, oid}` entry in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: BString,
    pub oid: Oid,
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<BString>, oid: Oid) -> Self {
        Self {
            mode,
            name: name.into(),
            oid,
        }
    }

    /// Canonical ordering key comparison: directories sort as if their
    /// name had a trailing `/`.
    pub fn cmp_canonical(a_name: &[u8], a_is_tree: bool, b_name: &[u8], b_is_tree: bool) -> Ordering {
        let common = a_name.len().min(b_name.len());
        match a_name[..common].cmp(&b_name[..common]) {
            Ordering::Equal => {}
            other => return other,
        }
        // One name is a prefix of the other; compare the virtual next byte.
        let a_next = a_name
            .get(common)
            .copied()
            .unwrap_or(if a_is_tree { b'/' } else { 0 });
        let b_next = b_name
            .get(common)
            .copied()
            .unwrap_or(if b_is_tree { b'/' } else { 0 });
        a_next.cmp(&b_next)
    }
}

/// A tree object — an ordered sequence of entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from entries, sorting them into canonical order.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| {
            TreeEntry::cmp_canonical(&a.name, a.mode.is_tree(), &b.name, b.mode.is_tree())
        });
        Self { entries }
    }

    /// Insert an entry, keeping canonical order. An entry with the same
    /// name and kind replaces the existing one.
    pub fn insert(&mut self, entry: TreeEntry) {
        match self.entries.binary_search_by(|e| {
            TreeEntry::cmp_canonical(&e.name, e.mode.is_tree(), &entry.name, entry.mode.is_tree())
        }) {
            Ok(pos) => self.entries[pos] = entry,
            Err(pos) => self.entries.insert(pos, entry),
        }
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Find an entry by name.
    pub fn get(&self, name: &[u8]) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Parse tree content: repeated `mode SP name NUL oid20`.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let space = content[pos..]
                .find_byte(b' ')
                .map(|p| p + pos)
                .ok_or(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing space after mode".into(),
                })?;
            let mode = FileMode::from_octal(&content[pos..space])?;

            let nul = content[space + 1..]
                .find_byte(b'\0')
                .map(|p| p + space + 1)
                .ok_or(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing NUL after name".into(),
                })?;
            let name = &content[space + 1..nul];
            if name.is_empty() {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "empty entry name".into(),
                });
            }

            let oid_end = nul + 1 + Oid::RAW_LEN;
            if oid_end > content.len() {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "truncated OID".into(),
                });
            }
            let oid = Oid::from_bytes(&content[nul + 1..oid_end])?;

            entries.push(TreeEntry {
                mode,
                name: BString::from(name),
                oid,
            });
            pos = oid_end;
        }

        Ok(Self { entries })
    }

    /// Serialize to tree content bytes, in canonical order.
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * 40);
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_tree_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(b'\0');
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }
}
