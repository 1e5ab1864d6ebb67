//! The staging index: the on-disk `DIRC` structure mapping paths to
//! OIDs, stat data, and merge stages, plus the ignore and EOL machinery
//! that sits between the index and the working tree.

pub mod entry;
pub mod eol;
pub mod extensions;
pub mod ignore;
mod read;
mod write;

pub use entry::{IndexEntry, Stage, StatData};
pub use eol::AutoCrlf;
pub use ignore::IgnoreStack;

use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use gitport_hash::Oid;
use gitport_object::{FileMode, ObjectType, Tree, TreeEntry};
use gitport_odb::Odb;

use extensions::{CacheTree, RawExtension, ResolveUndo};

/// Errors from index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("invalid index header: {0}")]
    InvalidHeader(String),

    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    #[error("index checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: Oid, actual: Oid },

    #[error("truncated index entry at offset {offset}")]
    Truncated { offset: usize },

    #[error("invalid {sig} extension: {reason}")]
    InvalidExtension { sig: &'static str, reason: String },

    #[error("index is locked: {path}")]
    LockBusy { path: PathBuf },

    #[error("unmerged paths remain: {paths:?}")]
    UnmergedPaths { paths: Vec<BString> },

    #[error(transparent)]
    Odb(#[from] gitport_odb::OdbError),

    #[error(transparent)]
    Util(#[from] gitport_utils::UtilError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The in-memory index. Entries are kept sorted by `(name, stage)` with
/// unique keys at all times.
#[derive(Default, Debug)]
pub struct Index {
    entries: Vec<IndexEntry>,
    cache_tree: Option<CacheTree>,
    resolve_undo: Option<ResolveUndo>,
    unknown_extensions: Vec<RawExtension>,
    /// Backing file, when loaded from disk.
    path: Option<PathBuf>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `<gitdir>/index`; an absent file yields an empty index.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(data) => {
                let mut index = read::parse_index(&data)?;
                index.path = Some(path.to_path_buf());
                Ok(index)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                path: Some(path.to_path_buf()),
                ..Self::default()
            }),
            Err(e) => Err(IndexError::Io(e)),
        }
    }

    /// Parse from bytes (checksum verified).
    pub fn parse(data: &[u8]) -> Result<Self, IndexError> {
        read::parse_index(data)
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        write::serialize_index(self)
    }

    /// Atomically write back to the load path.
    pub fn write(&self) -> Result<(), IndexError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| IndexError::InvalidHeader("index has no backing path".into()))?;
        write::write_index(self, &path)
    }

    /// Atomically write to an explicit path.
    pub fn write_to(&self, path: &Path) -> Result<(), IndexError> {
        write::write_index(self, path)
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry by path and stage.
    pub fn get(&self, path: &BStr, stage: Stage) -> Option<&IndexEntry> {
        self.position(path, stage).map(|i| &self.entries[i])
    }

    /// All entries for a path across stages.
    pub fn get_all(&self, path: &BStr) -> Vec<&IndexEntry> {
        self.entries
            .iter()
            .filter(|e| e.path.as_slice() == path.as_bytes())
            .collect()
    }

    /// Paths that currently carry conflict stages.
    pub fn unmerged_paths(&self) -> Vec<BString> {
        let mut paths: Vec<BString> = self
            .entries
            .iter()
            .filter(|e| e.stage != Stage::Normal)
            .map(|e| e.path.clone())
            .collect();
        paths.dedup();
        paths
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.stage != Stage::Normal)
    }

    /// Insert or replace the stage-0 entry for a path, dropping any
    /// conflict stages it carried.
    pub fn stage_file(&mut self, entry: IndexEntry) {
        debug_assert_eq!(entry.stage, Stage::Normal);
        self.remove_path(entry.path.as_ref());
        self.insert(entry);
    }

    /// Replace the stage-0 entry with conflict stages 1..3.
    pub fn unmerge(
        &mut self,
        path: &BStr,
        base: Option<(FileMode, Oid)>,
        ours: Option<(FileMode, Oid)>,
        theirs: Option<(FileMode, Oid)>,
    ) {
        self.remove_path(path);
        for (stage, slot) in [
            (Stage::Base, base),
            (Stage::Ours, ours),
            (Stage::Theirs, theirs),
        ] {
            if let Some((mode, oid)) = slot {
                self.insert(IndexEntry::new(path.to_owned(), oid, mode, stage));
            }
        }
        self.invalidate(path);
    }

    /// Remove every stage of a path. Returns whether anything was removed.
    pub fn remove_path(&mut self, path: &BStr) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path.as_slice() != path.as_bytes());
        let removed = self.entries.len() != before;
        if removed {
            self.invalidate(path);
        }
        removed
    }

    /// Update stat data on an existing stage-0 entry.
    pub fn refresh_stat(&mut self, path: &BStr, stat: StatData) {
        if let Some(i) = self.position(path, Stage::Normal) {
            self.entries[i].stat = stat;
        }
    }

    /// Build the tree hierarchy from stage-0 entries, writing trees
    /// through the ODB. Fails while conflict stages remain.
    pub fn to_tree(&self, odb: &Odb) -> Result<Oid, IndexError> {
        let unmerged = self.unmerged_paths();
        if !unmerged.is_empty() {
            return Err(IndexError::UnmergedPaths { paths: unmerged });
        }
        write_tree_level(&self.entries, 0, b"", odb)
    }

    pub fn cache_tree(&self) -> Option<&CacheTree> {
        self.cache_tree.as_ref()
    }

    pub fn set_cache_tree(&mut self, tree: Option<CacheTree>) {
        self.cache_tree = tree;
    }

    pub fn resolve_undo(&self) -> Option<&ResolveUndo> {
        self.resolve_undo.as_ref()
    }

    pub fn set_resolve_undo(&mut self, reuc: Option<ResolveUndo>) {
        self.resolve_undo = reuc;
    }

    pub fn unknown_extensions(&self) -> &[RawExtension] {
        &self.unknown_extensions
    }

    /// Drop every entry (used by read-tree style resets).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cache_tree = None;
    }

    fn insert(&mut self, entry: IndexEntry) {
        self.invalidate(entry.path.as_ref());
        match self
            .entries
            .binary_search_by(|e| e.key().cmp(&entry.key()))
        {
            Ok(pos) => self.entries[pos] = entry,
            Err(pos) => self.entries.insert(pos, entry),
        }
    }

    fn position(&self, path: &BStr, stage: Stage) -> Option<usize> {
        self.entries
            .binary_search_by(|e| e.key().cmp(&(path.as_bytes(), stage.as_raw())))
            .ok()
    }

    fn invalidate(&mut self, path: &BStr) {
        if let Some(tree) = &mut self.cache_tree {
            tree.invalidate_path(path.as_bytes());
        }
    }
}

/// Recursively build and write the tree covering `entries` whose paths
/// share `prefix`, consuming path components at `depth`.
fn write_tree_level(
    entries: &[IndexEntry],
    depth: usize,
    prefix: &[u8],
    odb: &Odb,
) -> Result<Oid, IndexError> {
    let mut tree = Tree::new();
    let mut i = 0;
    let in_scope: Vec<&IndexEntry> = entries
        .iter()
        .filter(|e| e.path.starts_with(prefix))
        .collect();

    while i < in_scope.len() {
        let entry = in_scope[i];
        let rest = &entry.path[depth..];
        match rest.iter().position(|&b| b == b'/') {
            None => {
                tree.insert(TreeEntry::new(
                    entry.mode,
                    BString::from(rest),
                    entry.oid,
                ));
                i += 1;
            }
            Some(slash) => {
                // A subdirectory: group everything sharing this component.
                let dir = &rest[..slash];
                let mut sub_prefix = Vec::with_capacity(depth + slash + 1);
                sub_prefix.extend_from_slice(&entry.path[..depth]);
                sub_prefix.extend_from_slice(dir);
                sub_prefix.push(b'/');

                let sub_oid =
                    write_tree_level(entries, depth + slash + 1, &sub_prefix, odb)?;
                tree.insert(TreeEntry::new(
                    FileMode::Tree,
                    BString::from(dir),
                    sub_oid,
                ));
                while i < in_scope.len() && in_scope[i].path.starts_with(&sub_prefix) {
                    i += 1;
                }
            }
        }
    }

    Ok(odb.write(ObjectType::Tree, &tree.serialize_content())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::ByteSlice;

    fn oid(n: u8) -> Oid {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Oid::from_bytes(&bytes).unwrap()
    }

    fn entry(path: &str, n: u8) -> IndexEntry {
        IndexEntry::new(path, oid(n), FileMode::Regular, Stage::Normal)
    }

    #[test]
    fn entries_stay_sorted_and_unique() {
        let mut index = Index::new();
        index.stage_file(entry("b.txt", 1));
        index.stage_file(entry("a.txt", 2));
        index.stage_file(entry("a/nested", 3));
        index.stage_file(entry("a.txt", 4)); // replaces

        let paths: Vec<&[u8]> = index.entries().iter().map(|e| e.path.as_slice()).collect();
        assert_eq!(paths, vec![&b"a.txt"[..], &b"a/nested"[..], &b"b.txt"[..]]);
        assert_eq!(index.get(b"a.txt".as_bstr(), Stage::Normal).unwrap().oid, oid(4));
    }

    #[test]
    fn unmerge_replaces_stage_zero() {
        let mut index = Index::new();
        index.stage_file(entry("file", 1));
        index.unmerge(
            b"file".as_bstr(),
            Some((FileMode::Regular, oid(1))),
            Some((FileMode::Regular, oid(2))),
            Some((FileMode::Regular, oid(3))),
        );

        assert!(index.get(b"file".as_bstr(), Stage::Normal).is_none());
        assert_eq!(index.get_all(b"file".as_bstr()).len(), 3);
        assert!(index.has_conflicts());
        assert_eq!(index.unmerged_paths(), vec![BString::from("file")]);

        // Staging again resolves the conflict.
        index.stage_file(entry("file", 4));
        assert!(!index.has_conflicts());
        assert_eq!(index.get_all(b"file".as_bstr()).len(), 1);
    }

    #[test]
    fn serialization_roundtrip() {
        let mut index = Index::new();
        index.stage_file(entry("src/main.rs", 1));
        index.stage_file(entry("README.md", 2));
        index.unmerge(
            b"conflict".as_bstr(),
            None,
            Some((FileMode::Regular, oid(3))),
            Some((FileMode::Executable, oid(4))),
        );

        let bytes = index.to_bytes();
        let reread = Index::parse(&bytes).unwrap();
        assert_eq!(reread.entries(), index.entries());
        assert_eq!(reread.to_bytes(), bytes);
    }

    #[test]
    fn checksum_tamper_detected() {
        let mut index = Index::new();
        index.stage_file(entry("x", 1));
        let mut bytes = index.to_bytes();
        let len = bytes.len();
        bytes[len - 25] ^= 0xff;
        assert!(matches!(
            Index::parse(&bytes).unwrap_err(),
            IndexError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn unknown_extension_roundtrips() {
        let mut index = Index::new();
        index.stage_file(entry("x", 1));
        index.unknown_extensions.push(RawExtension {
            signature: *b"ZZZZ",
            data: b"opaque payload".to_vec(),
        });
        let bytes = index.to_bytes();
        let reread = Index::parse(&bytes).unwrap();
        assert_eq!(reread.unknown_extensions(), index.unknown_extensions());
    }

    #[test]
    fn to_tree_builds_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        std::fs::create_dir_all(objects.join("pack")).unwrap();
        let odb = Odb::open(&objects).unwrap();

        let blob_a = odb.write(ObjectType::Blob, b"a").unwrap();
        let blob_b = odb.write(ObjectType::Blob, b"b").unwrap();
        let blob_c = odb.write(ObjectType::Blob, b"c").unwrap();

        let mut index = Index::new();
        index.stage_file(IndexEntry::new("a.txt", blob_a, FileMode::Regular, Stage::Normal));
        index.stage_file(IndexEntry::new(
            "dir/b.txt",
            blob_b,
            FileMode::Regular,
            Stage::Normal,
        ));
        index.stage_file(IndexEntry::new(
            "dir/sub/c.txt",
            blob_c,
            FileMode::Executable,
            Stage::Normal,
        ));

        let root_oid = index.to_tree(&odb).unwrap();
        let root = match odb.read_object(&root_oid).unwrap() {
            gitport_object::Object::Tree(t) => t,
            other => panic!("expected tree, got {other:?}"),
        };
        assert_eq!(root.len(), 2);
        assert_eq!(root.entries()[0].name.as_slice(), b"a.txt");
        assert_eq!(root.entries()[1].name.as_slice(), b"dir");

        let dir_tree = match odb.read_object(&root.entries()[1].oid).unwrap() {
            gitport_object::Object::Tree(t) => t,
            other => panic!("expected tree, got {other:?}"),
        };
        assert_eq!(dir_tree.len(), 2);
        assert_eq!(dir_tree.entries()[1].name.as_slice(), b"sub");
    }

    #[test]
    fn to_tree_fails_with_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        std::fs::create_dir_all(objects.join("pack")).unwrap();
        let odb = Odb::open(&objects).unwrap();

        let mut index = Index::new();
        index.unmerge(
            b"war".as_bstr(),
            None,
            Some((FileMode::Regular, oid(1))),
            Some((FileMode::Regular, oid(2))),
        );
        assert!(matches!(
            index.to_tree(&odb).unwrap_err(),
            IndexError::UnmergedPaths { .. }
        ));
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::load(dir.path().join("index")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn write_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let mut index = Index::load(&path).unwrap();
        index.stage_file(entry("hello.txt", 7));
        index.write().unwrap();

        let reread = Index::load(&path).unwrap();
        assert_eq!(reread.len(), 1);
        assert_eq!(reread.entries()[0].oid, oid(7));
    }
}
