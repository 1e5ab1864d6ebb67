//! Ref-level commands: resolution, branches, tags, listing.

use gitport_hash::Oid;
use gitport_object::{ObjectType, Tag};
use gitport_ref::{Expect, RefError, RefName};

use crate::error::{ctx, CommandError, ErrorKind};
use crate::Repository;

/// Validate a ref name, turning grammar failures into the command
/// error with a sanitised suggestion.
pub(crate) fn valid_name(caller: &'static str, name: &str) -> Result<RefName, CommandError> {
    RefName::new(name).map_err(|e| match e {
        RefError::InvalidName { name, suggestion } => {
            CommandError::new(caller, ErrorKind::InvalidRefName { name, suggestion })
        }
        other => CommandError::new(caller, other),
    })
}

impl Repository {
    /// Resolve a revision string: HEAD and pseudo-refs, full and short
    /// ref names (tags before heads, then remotes), full OIDs, and
    /// unambiguous short OIDs.
    pub fn resolve_ref(&self, reference: &str) -> Result<Oid, CommandError> {
        let caller = "resolveRef";

        let candidates = [
            reference.to_string(),
            format!("refs/{reference}"),
            format!("refs/tags/{reference}"),
            format!("refs/heads/{reference}"),
            format!("refs/remotes/{reference}"),
            format!("refs/remotes/{reference}/HEAD"),
        ];
        for candidate in &candidates {
            let Ok(name) = RefName::new(candidate.clone()) else {
                continue;
            };
            match self.refs().resolve(&name) {
                Ok(oid) => return Ok(oid),
                Err(RefError::NotFound(_)) => continue,
                Err(e) => return Err(CommandError::new(caller, e)),
            }
        }

        if reference.len() == Oid::HEX_LEN {
            if let Ok(oid) = Oid::from_hex(reference) {
                if self.odb().has(&oid) {
                    return Ok(oid);
                }
                return Err(CommandError::new(
                    caller,
                    ErrorKind::NotFound(reference.to_string()),
                ));
            }
        }
        if reference.len() >= 4 && reference.bytes().all(|b| b.is_ascii_hexdigit()) {
            match self.odb().expand_prefix(reference) {
                Ok(oid) => return Ok(oid),
                Err(gitport_odb::OdbError::Ambiguous { prefix, count }) => {
                    return Err(CommandError::new(
                        caller,
                        ErrorKind::AmbiguousOid {
                            value: prefix,
                            count,
                        },
                    ))
                }
                Err(_) => {}
            }
        }

        Err(CommandError::new(
            caller,
            ErrorKind::NotFound(reference.to_string()),
        ))
    }

    /// List refs under a prefix as `(name, oid)` pairs.
    pub fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Oid)>, CommandError> {
        Ok(self
            .refs()
            .list(prefix)
            .map_err(ctx("listRefs"))?
            .into_iter()
            .map(|(name, oid)| (name.as_str().to_string(), oid))
            .collect())
    }

    /// Branch shorthands.
    pub fn list_branches(&self) -> Result<Vec<String>, CommandError> {
        Ok(self
            .list_refs("refs/heads/")?
            .into_iter()
            .map(|(name, _)| name["refs/heads/".len()..].to_string())
            .collect())
    }

    /// Tag shorthands.
    pub fn list_tags(&self) -> Result<Vec<String>, CommandError> {
        Ok(self
            .list_refs("refs/tags/")?
            .into_iter()
            .map(|(name, _)| name["refs/tags/".len()..].to_string())
            .collect())
    }

    /// Create a branch pointing at `start_point` (HEAD by default).
    pub fn branch(&self, name: &str, start_point: Option<&str>) -> Result<Oid, CommandError> {
        let caller = "branch";
        let full = valid_name(caller, &format!("refs/heads/{name}"))?;
        let target = self.resolve_ref(start_point.unwrap_or("HEAD"))?;
        self.refs()
            .update(
                &full,
                target,
                Expect::MustNotExist,
                &self.identity(),
                &format!("branch: Created from {}", start_point.unwrap_or("HEAD")),
            )
            .map_err(|e| map_exists(caller, e))?;
        Ok(target)
    }

    /// Delete a branch. Refuses the branch HEAD is on.
    pub fn delete_branch(&self, name: &str) -> Result<(), CommandError> {
        let caller = "deleteBranch";
        let full = valid_name(caller, &format!("refs/heads/{name}"))?;
        if self.current_branch()?.as_ref() == Some(&full) {
            return Err(CommandError::new(
                caller,
                ErrorKind::AlreadyExists(format!("branch {name} is checked out")),
            ));
        }
        self.refs()
            .delete(&full, Expect::Any)
            .map_err(ctx(caller))
    }

    /// Create a lightweight tag at HEAD (or `target`).
    ///
    /// A second tag of the same name fails with `AlreadyExistsError`
    /// unless `force` is set.
    pub fn tag(&self, name: &str, target: Option<&str>, force: bool) -> Result<Oid, CommandError> {
        let caller = "tag";
        let full = valid_name(caller, &format!("refs/tags/{name}"))?;
        let oid = self.resolve_ref(target.unwrap_or("HEAD"))?;
        let expect = if force { Expect::Any } else { Expect::MustNotExist };
        self.refs()
            .update(&full, oid, expect, &self.identity(), &format!("tag: {name}"))
            .map_err(|e| map_exists(caller, e))?;
        Ok(oid)
    }

    /// Create an annotated tag object and the ref pointing at it.
    pub fn tag_annotated(
        &self,
        name: &str,
        message: &str,
        target: Option<&str>,
        force: bool,
    ) -> Result<Oid, CommandError> {
        let caller = "tag";
        let full = valid_name(caller, &format!("refs/tags/{name}"))?;
        let object = self.resolve_ref(target.unwrap_or("HEAD"))?;
        let (target_type, _) = self.odb().read_header(&object).map_err(ctx(caller))?;

        let tag = Tag {
            object,
            target_type,
            name: name.into(),
            tagger: Some(self.identity()),
            gpgsig: None,
            message: ensure_trailing_newline(message),
        };
        let tag_oid = self
            .odb()
            .write(ObjectType::Tag, &tag.serialize_content())
            .map_err(ctx(caller))?;

        let expect = if force { Expect::Any } else { Expect::MustNotExist };
        self.refs()
            .update(
                &full,
                tag_oid,
                expect,
                &self.identity(),
                &format!("tag: {name}"),
            )
            .map_err(|e| map_exists(caller, e))?;
        Ok(tag_oid)
    }

    /// Delete a tag ref (the tag object, if any, stays in the ODB).
    pub fn delete_tag(&self, name: &str) -> Result<(), CommandError> {
        let caller = "deleteTag";
        let full = valid_name(caller, &format!("refs/tags/{name}"))?;
        self.refs().delete(&full, Expect::Any).map_err(ctx(caller))
    }
}

fn map_exists(caller: &'static str, e: RefError) -> CommandError {
    match e {
        RefError::AlreadyExists(name) => {
            CommandError::new(caller, ErrorKind::AlreadyExists(name))
        }
        other => CommandError::new(caller, other),
    }
}

fn ensure_trailing_newline(message: &str) -> bstr::BString {
    let mut m = bstr::BString::from(message);
    if !m.ends_with(b"\n") {
        m.push(b'\n');
    }
    m
}
