//! Plumbing reads: typed object access and hashing.

use gitport_hash::hasher::Hasher;
use gitport_hash::Oid;
use gitport_object::{Blob, Commit, Object, ObjectType, Tag, Tree};

use crate::error::{ctx, CommandError, ErrorKind};
use crate::Repository;

impl Repository {
    /// Read a commit, peeling annotated tags.
    pub fn read_commit(&self, reference: &str) -> Result<(Oid, Commit), CommandError> {
        let caller = "readCommit";
        let oid = self.resolve_ref(reference)?;
        let commit = self.read_commit_object(&oid).map_err(ctx(caller))?;
        Ok((oid, commit))
    }

    /// Read a tree; commit-ish references resolve to their root tree.
    pub fn read_tree(&self, reference: &str) -> Result<(Oid, Tree), CommandError> {
        let caller = "readTree";
        let oid = self.resolve_ref(reference)?;
        match self.odb().read_object(&oid).map_err(ctx(caller))? {
            Object::Tree(tree) => Ok((oid, tree)),
            Object::Commit(commit) => {
                let tree_oid = commit.tree;
                match self.odb().read_object(&tree_oid).map_err(ctx(caller))? {
                    Object::Tree(tree) => Ok((tree_oid, tree)),
                    _ => Err(CommandError::new(
                        caller,
                        ErrorKind::NotFound(format!("tree of {reference}")),
                    )),
                }
            }
            other => Err(CommandError::new(
                caller,
                ErrorKind::NotFound(format!(
                    "{reference} is a {}, not a tree",
                    other.object_type()
                )),
            )),
        }
    }

    /// Read an annotated tag object.
    pub fn read_tag(&self, reference: &str) -> Result<(Oid, Tag), CommandError> {
        let caller = "readTag";
        let oid = self.resolve_ref(reference)?;
        match self.odb().read_object(&oid).map_err(ctx(caller))? {
            Object::Tag(tag) => Ok((oid, tag)),
            other => Err(CommandError::new(
                caller,
                ErrorKind::NotFound(format!(
                    "{reference} is a {}, not a tag",
                    other.object_type()
                )),
            )),
        }
    }

    /// Read a blob's bytes.
    pub fn read_blob(&self, reference: &str) -> Result<(Oid, Blob), CommandError> {
        let caller = "readBlob";
        let oid = self.resolve_ref(reference)?;
        match self.odb().read_object(&oid).map_err(ctx(caller))? {
            Object::Blob(blob) => Ok((oid, blob)),
            other => Err(CommandError::new(
                caller,
                ErrorKind::NotFound(format!(
                    "{reference} is a {}, not a blob",
                    other.object_type()
                )),
            )),
        }
    }

    /// Write raw object content to the database, returning its OID.
    pub fn write_object(&self, kind: ObjectType, payload: &[u8]) -> Result<Oid, CommandError> {
        self.odb().write(kind, payload).map_err(ctx("writeObject"))
    }

    /// Compute an object's OID without storing it.
    pub fn hash_object(&self, kind: ObjectType, payload: &[u8]) -> Oid {
        Hasher::hash_object(kind.as_str(), payload)
    }

    /// List notes under a notes ref (default `refs/notes/commits`) as
    /// `(annotated object, note blob)` pairs.
    pub fn list_notes(
        &self,
        notes_ref: Option<&str>,
    ) -> Result<Vec<(Oid, Oid)>, CommandError> {
        let notes_ref = notes_ref.unwrap_or("refs/notes/commits");
        let Ok(tip) = self.resolve_ref(notes_ref) else {
            return Ok(Vec::new());
        };
        let (_, tree) = self.read_tree(&tip.to_hex())?;
        let mut notes = Vec::new();
        for entry in tree.entries() {
            // Notes trees name entries by the annotated object's hex.
            if let Ok(hex) = std::str::from_utf8(&entry.name) {
                if let Ok(annotated) = Oid::from_hex(hex) {
                    notes.push((annotated, entry.oid));
                }
            }
        }
        Ok(notes)
    }

    /// Expand a short OID prefix.
    pub fn expand_oid(&self, prefix: &str) -> Result<Oid, CommandError> {
        let caller = "expandOid";
        self.odb().expand_prefix(prefix).map_err(|e| match e {
            gitport_odb::OdbError::Ambiguous { prefix, count } => CommandError::new(
                caller,
                ErrorKind::AmbiguousOid {
                    value: prefix,
                    count,
                },
            ),
            gitport_odb::OdbError::PrefixTooShort(value) => {
                CommandError::new(caller, ErrorKind::InvalidOid(value))
            }
            other => CommandError::new(caller, other),
        })
    }
}
