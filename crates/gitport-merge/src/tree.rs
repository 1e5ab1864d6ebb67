//! Three-way tree merge: a joint sorted walk of base/ours/theirs
//! trees, recursing into subtrees and content-merging blobs.

use bstr::{BString, ByteSlice};
use gitport_hash::Oid;
use gitport_object::{FileMode, Object, ObjectType, Tree, TreeEntry};
use gitport_odb::Odb;

use crate::content::merge_file;
use crate::{ConflictStyle, MergeError, MergeLabels};

/// Mode + OID of one side of a path.
pub type SideEntry = Option<(FileMode, Oid)>;

/// One conflicted path from a tree merge.
#[derive(Debug, Clone)]
pub struct MergeConflict {
    /// Repo-relative path.
    pub path: BString,
    pub base: SideEntry,
    pub ours: SideEntry,
    pub theirs: SideEntry,
    /// Marked-up content for the working tree, where a text conflict
    /// produced one.
    pub marked_content: Option<Vec<u8>>,
}

/// The outcome of a tree merge.
#[derive(Debug)]
pub struct TreeMergeResult {
    /// OID of the merged tree (conflicted text paths carry their
    /// marked-up blob; modify/delete keeps the modified side).
    pub tree: Oid,
    pub conflicts: Vec<MergeConflict>,
}

impl TreeMergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Merge two trees against their common ancestor tree.
pub fn merge_trees(
    odb: &Odb,
    base: Option<&Oid>,
    ours: Option<&Oid>,
    theirs: Option<&Oid>,
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
) -> Result<TreeMergeResult, MergeError> {
    let mut conflicts = Vec::new();
    let tree = merge_level(odb, base, ours, theirs, b"", style, labels, &mut conflicts)?;
    Ok(TreeMergeResult { tree, conflicts })
}

fn load_tree(odb: &Odb, oid: Option<&Oid>) -> Result<Tree, MergeError> {
    match oid {
        None => Ok(Tree::new()),
        Some(oid) => match odb.read_object(oid)? {
            Object::Tree(tree) => Ok(tree),
            other => Err(MergeError::NotATree {
                oid: *oid,
                actual: other.object_type(),
            }),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn merge_level(
    odb: &Odb,
    base: Option<&Oid>,
    ours: Option<&Oid>,
    theirs: Option<&Oid>,
    prefix: &[u8],
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
    conflicts: &mut Vec<MergeConflict>,
) -> Result<Oid, MergeError> {
    let base_tree = load_tree(odb, base)?;
    let ours_tree = load_tree(odb, ours)?;
    let theirs_tree = load_tree(odb, theirs)?;

    // Union of entry names across the three trees, in canonical order.
    let mut names: Vec<(BString, bool)> = Vec::new();
    for tree in [&base_tree, &ours_tree, &theirs_tree] {
        for entry in tree.entries() {
            if !names.iter().any(|(n, _)| n == &entry.name) {
                names.push((entry.name.clone(), entry.mode.is_tree()));
            }
        }
    }
    names.sort_by(|a, b| TreeEntry::cmp_canonical(&a.0, a.1, &b.0, b.1));

    let mut merged = Tree::new();

    for (name, _) in names {
        let b = side_of(&base_tree, &name);
        let o = side_of(&ours_tree, &name);
        let t = side_of(&theirs_tree, &name);

        let path = join_path(prefix, &name);

        match resolve_entry(odb, b, o, t, &path, style, labels, conflicts)? {
            Some((mode, oid)) => merged.insert(TreeEntry::new(mode, name, oid)),
            None => {}
        }
    }

    Ok(odb.write(ObjectType::Tree, &merged.serialize_content())?)
}

fn side_of(tree: &Tree, name: &[u8]) -> SideEntry {
    tree.get(name).map(|e| (e.mode, e.oid))
}

fn join_path(prefix: &[u8], name: &[u8]) -> BString {
    if prefix.is_empty() {
        BString::from(name)
    } else {
        let mut p = Vec::with_capacity(prefix.len() + 1 + name.len());
        p.extend_from_slice(prefix);
        p.push(b'/');
        p.extend_from_slice(name);
        BString::from(p)
    }
}

/// The classic three-way rules for one path. Returns the merged entry,
/// or None when the path ends up deleted.
#[allow(clippy::too_many_arguments)]
fn resolve_entry(
    odb: &Odb,
    base: SideEntry,
    ours: SideEntry,
    theirs: SideEntry,
    path: &BString,
    style: ConflictStyle,
    labels: &MergeLabels<'_>,
    conflicts: &mut Vec<MergeConflict>,
) -> Result<SideEntry, MergeError> {
    // Unchanged on one side takes the other; identical changes take either.
    if ours == theirs {
        return Ok(ours);
    }
    if base == ours {
        return Ok(theirs);
    }
    if base == theirs {
        return Ok(ours);
    }

    // Both sides changed, differently.
    let all_trees = |e: SideEntry| e.map_or(true, |(m, _)| m.is_tree());
    if all_trees(base) && all_trees(ours) && all_trees(theirs) && (ours.is_some() || theirs.is_some())
    {
        // Subtree on every present side: recurse.
        let sub = merge_level(
            odb,
            base.map(|(_, oid)| oid).as_ref(),
            ours.map(|(_, oid)| oid).as_ref(),
            theirs.map(|(_, oid)| oid).as_ref(),
            path,
            style,
            labels,
            conflicts,
        )?;
        let empty = load_tree(odb, Some(&sub))?.is_empty();
        return Ok(if empty { None } else { Some((FileMode::Tree, sub)) });
    }

    // Modify/delete: keep the modified side, record the conflict.
    if ours.is_none() || theirs.is_none() {
        conflicts.push(MergeConflict {
            path: path.clone(),
            base,
            ours,
            theirs,
            marked_content: None,
        });
        return Ok(ours.or(theirs));
    }

    let (ours_mode, ours_oid) = ours.expect("checked above");
    let (theirs_mode, theirs_oid) = theirs.expect("checked above");

    // Text merge only applies to regular/executable blobs; symlinks,
    // gitlinks, and file/directory mismatches conflict outright.
    let mergeable = |m: FileMode| matches!(m, FileMode::Regular | FileMode::Executable);
    if !mergeable(ours_mode) || !mergeable(theirs_mode) {
        conflicts.push(MergeConflict {
            path: path.clone(),
            base,
            ours,
            theirs,
            marked_content: None,
        });
        return Ok(Some((ours_mode, ours_oid)));
    }

    let base_bytes = match base {
        Some((m, oid)) if mergeable(m) => odb.read(&oid)?.1,
        _ => Vec::new(),
    };
    let ours_bytes = odb.read(&ours_oid)?.1;
    let theirs_bytes = odb.read(&theirs_oid)?.1;

    // Binary content cannot be line-merged.
    if is_binary(&base_bytes) || is_binary(&ours_bytes) || is_binary(&theirs_bytes) {
        conflicts.push(MergeConflict {
            path: path.clone(),
            base,
            ours,
            theirs,
            marked_content: None,
        });
        return Ok(Some((ours_mode, ours_oid)));
    }

    let result = merge_file(&base_bytes, &ours_bytes, &theirs_bytes, style, labels);
    // A mode flip on one side sticks when the other side kept the base mode.
    let merged_mode = if base.map(|(m, _)| m) == Some(ours_mode) {
        theirs_mode
    } else {
        ours_mode
    };

    let merged_oid = odb.write(ObjectType::Blob, &result.merged_text)?;
    if result.clean_merge {
        Ok(Some((merged_mode, merged_oid)))
    } else {
        conflicts.push(MergeConflict {
            path: path.clone(),
            base,
            ours,
            theirs,
            marked_content: Some(result.merged_text),
        });
        Ok(Some((merged_mode, merged_oid)))
    }
}

fn is_binary(data: &[u8]) -> bool {
    data[..data.len().min(8000)].find_byte(0).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn odb() -> (tempfile::TempDir, Odb) {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        std::fs::create_dir_all(objects.join("pack")).unwrap();
        (dir, Odb::open(objects.to_str().unwrap()).unwrap())
    }

    fn blob(odb: &Odb, data: &[u8]) -> Oid {
        odb.write(ObjectType::Blob, data).unwrap()
    }

    fn tree(odb: &Odb, entries: Vec<TreeEntry>) -> Oid {
        let t = Tree::from_entries(entries);
        odb.write(ObjectType::Tree, &t.serialize_content()).unwrap()
    }

    fn labels() -> MergeLabels<'static> {
        MergeLabels {
            ours: "HEAD",
            base: "base",
            theirs: "feature",
        }
    }

    fn read_tree(odb: &Odb, oid: &Oid) -> Tree {
        match odb.read_object(oid).unwrap() {
            Object::Tree(t) => t,
            other => panic!("expected tree, got {other:?}"),
        }
    }

    #[test]
    fn disjoint_file_changes_merge_clean() {
        let (_dir, odb) = odb();
        let base = tree(
            &odb,
            vec![
                TreeEntry::new(FileMode::Regular, "a.txt", blob(&odb, b"a\n")),
                TreeEntry::new(FileMode::Regular, "b.txt", blob(&odb, b"b\n")),
            ],
        );
        let ours = tree(
            &odb,
            vec![
                TreeEntry::new(FileMode::Regular, "a.txt", blob(&odb, b"a changed\n")),
                TreeEntry::new(FileMode::Regular, "b.txt", blob(&odb, b"b\n")),
            ],
        );
        let theirs = tree(
            &odb,
            vec![
                TreeEntry::new(FileMode::Regular, "a.txt", blob(&odb, b"a\n")),
                TreeEntry::new(FileMode::Regular, "b.txt", blob(&odb, b"b changed\n")),
            ],
        );

        let result =
            merge_trees(&odb, Some(&base), Some(&ours), Some(&theirs), ConflictStyle::Merge, &labels())
                .unwrap();
        assert!(result.is_clean());

        let merged = read_tree(&odb, &result.tree);
        let a = merged.get(b"a.txt").unwrap();
        assert_eq!(odb.read(&a.oid).unwrap().1, b"a changed\n");
        let b = merged.get(b"b.txt").unwrap();
        assert_eq!(odb.read(&b.oid).unwrap().1, b"b changed\n");
    }

    #[test]
    fn both_delete_removes_entry() {
        let (_dir, odb) = odb();
        let base = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "gone", blob(&odb, b"x\n"))],
        );
        let empty = tree(&odb, vec![]);

        let result = merge_trees(
            &odb,
            Some(&base),
            Some(&empty),
            Some(&empty),
            ConflictStyle::Merge,
            &labels(),
        )
        .unwrap();
        assert!(result.is_clean());
        assert!(read_tree(&odb, &result.tree).is_empty());
    }

    #[test]
    fn modify_delete_conflicts_keeping_modified() {
        let (_dir, odb) = odb();
        let base = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "f", blob(&odb, b"orig\n"))],
        );
        let ours = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "f", blob(&odb, b"edited\n"))],
        );
        let theirs = tree(&odb, vec![]);

        let result = merge_trees(
            &odb,
            Some(&base),
            Some(&ours),
            Some(&theirs),
            ConflictStyle::Merge,
            &labels(),
        )
        .unwrap();
        assert_eq!(result.conflicts.len(), 1);
        let c = &result.conflicts[0];
        assert_eq!(c.path.as_slice(), b"f");
        assert!(c.theirs.is_none());

        let merged = read_tree(&odb, &result.tree);
        assert_eq!(
            odb.read(&merged.get(b"f").unwrap().oid).unwrap().1,
            b"edited\n"
        );
    }

    #[test]
    fn text_conflict_records_markers_and_stages() {
        let (_dir, odb) = odb();
        let base = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "f", blob(&odb, b"line\n"))],
        );
        let ours = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "f", blob(&odb, b"ours\n"))],
        );
        let theirs = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "f", blob(&odb, b"theirs\n"))],
        );

        let result = merge_trees(
            &odb,
            Some(&base),
            Some(&ours),
            Some(&theirs),
            ConflictStyle::Merge,
            &labels(),
        )
        .unwrap();
        assert_eq!(result.conflicts.len(), 1);
        let c = &result.conflicts[0];
        assert!(c.base.is_some() && c.ours.is_some() && c.theirs.is_some());
        let text = String::from_utf8(c.marked_content.clone().unwrap()).unwrap();
        assert!(text.contains("<<<<<<< HEAD"));
        assert!(text.contains(">>>>>>> feature"));
    }

    #[test]
    fn nested_tree_changes_recurse() {
        let (_dir, odb) = odb();
        let sub_base = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "x", blob(&odb, b"1\n"))],
        );
        let sub_ours = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Regular, "x", blob(&odb, b"2\n"))],
        );
        let base = tree(&odb, vec![TreeEntry::new(FileMode::Tree, "dir", sub_base)]);
        let ours = tree(&odb, vec![TreeEntry::new(FileMode::Tree, "dir", sub_ours)]);
        let theirs = base;

        let result = merge_trees(
            &odb,
            Some(&base),
            Some(&ours),
            Some(&theirs),
            ConflictStyle::Merge,
            &labels(),
        )
        .unwrap();
        assert!(result.is_clean());
        assert_eq!(result.tree, ours);
    }

    #[test]
    fn symlink_conflict_not_text_merged() {
        let (_dir, odb) = odb();
        let base = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Symlink, "ln", blob(&odb, b"old"))],
        );
        let ours = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Symlink, "ln", blob(&odb, b"a"))],
        );
        let theirs = tree(
            &odb,
            vec![TreeEntry::new(FileMode::Symlink, "ln", blob(&odb, b"b"))],
        );

        let result = merge_trees(
            &odb,
            Some(&base),
            Some(&ours),
            Some(&theirs),
            ConflictStyle::Merge,
            &labels(),
        )
        .unwrap();
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.conflicts[0].marked_content.is_none());
    }
}
