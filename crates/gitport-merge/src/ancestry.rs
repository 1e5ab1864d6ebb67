//! Commit-graph walks backing the fast-forward policy: merge-base
//! computation and descendant checks.

use std::collections::{HashSet, VecDeque};

use gitport_hash::Oid;
use gitport_object::Object;
use gitport_odb::Odb;

use crate::MergeError;

fn parents_of(odb: &Odb, commit: &Oid) -> Result<Vec<Oid>, MergeError> {
    match odb.read_object(commit)? {
        Object::Commit(c) => Ok(c.parents),
        other => Err(MergeError::NotACommit {
            oid: *commit,
            actual: other.object_type(),
        }),
    }
}

/// Is `descendant` equal to or a descendant of `ancestor`?
pub fn is_descendant(odb: &Odb, ancestor: &Oid, descendant: &Oid) -> Result<bool, MergeError> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([*descendant]);
    while let Some(commit) = queue.pop_front() {
        for parent in parents_of(odb, &commit)? {
            if parent == *ancestor {
                return Ok(true);
            }
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(false)
}

/// Best common ancestor of two commits: the first commit reachable from
/// `b` that is also reachable from `a`, by breadth-first generation.
pub fn merge_base(odb: &Odb, a: &Oid, b: &Oid) -> Result<Option<Oid>, MergeError> {
    let mut ancestors_of_a = HashSet::new();
    let mut queue = VecDeque::from([*a]);
    while let Some(commit) = queue.pop_front() {
        if ancestors_of_a.insert(commit) {
            queue.extend(parents_of(odb, &commit)?);
        }
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([*b]);
    while let Some(commit) = queue.pop_front() {
        if ancestors_of_a.contains(&commit) {
            return Ok(Some(commit));
        }
        if seen.insert(commit) {
            queue.extend(parents_of(odb, &commit)?);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BString;
    use gitport_object::{Commit, GitTime, ObjectType, Signature};

    fn odb() -> (tempfile::TempDir, Odb) {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        std::fs::create_dir_all(objects.join("pack")).unwrap();
        let odb = Odb::open(&objects).unwrap();
        (dir, odb)
    }

    fn commit(odb: &Odb, parents: Vec<Oid>, n: u8) -> Oid {
        let sig = Signature {
            name: BString::from("T"),
            email: BString::from("t@e.com"),
            when: GitTime::new(1700000000 + n as i64, 0),
        };
        let tree = odb
            .write(ObjectType::Tree, &gitport_object::Tree::new().serialize_content())
            .unwrap();
        let c = Commit {
            tree,
            parents,
            author: sig.clone(),
            committer: sig,
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: BString::from(format!("c{n}\n")),
        };
        odb.write(ObjectType::Commit, &c.serialize_content()).unwrap()
    }

    #[test]
    fn linear_history() {
        let (_dir, odb) = odb();
        let a = commit(&odb, vec![], 0);
        let b = commit(&odb, vec![a], 1);
        let c = commit(&odb, vec![b], 2);

        assert!(is_descendant(&odb, &a, &c).unwrap());
        assert!(is_descendant(&odb, &c, &c).unwrap());
        assert!(!is_descendant(&odb, &c, &a).unwrap());
        assert_eq!(merge_base(&odb, &a, &c).unwrap(), Some(a));
    }

    #[test]
    fn forked_history() {
        let (_dir, odb) = odb();
        let root = commit(&odb, vec![], 0);
        let left = commit(&odb, vec![root], 1);
        let right = commit(&odb, vec![root], 2);

        assert!(!is_descendant(&odb, &left, &right).unwrap());
        assert_eq!(merge_base(&odb, &left, &right).unwrap(), Some(root));
    }

    #[test]
    fn merge_commit_descends_from_both() {
        let (_dir, odb) = odb();
        let root = commit(&odb, vec![], 0);
        let left = commit(&odb, vec![root], 1);
        let right = commit(&odb, vec![root], 2);
        let merge = commit(&odb, vec![left, right], 3);

        assert!(is_descendant(&odb, &left, &merge).unwrap());
        assert!(is_descendant(&odb, &right, &merge).unwrap());
        assert_eq!(merge_base(&odb, &merge, &right).unwrap(), Some(right));
    }

    #[test]
    fn unrelated_histories_have_no_base() {
        let (_dir, odb) = odb();
        let a = commit(&odb, vec![], 0);
        let b = commit(&odb, vec![], 1);
        assert_eq!(merge_base(&odb, &a, &b).unwrap(), None);
    }
}
