//! The files-backed ref store: loose refs under the gitdir plus
//! packed-refs, with compare-and-set updates and reflog maintenance.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use gitport_hash::Oid;
use gitport_object::Signature;
use gitport_utils::{LockFile, UtilError};

use crate::name::RefName;
use crate::packed::PackedRefs;
use crate::reflog::{self, ReflogEntry};
use crate::{RefError, Reference, MAX_SYMREF_DEPTH};

/// Expected prior state for a compare-and-set update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// No check: last writer wins.
    Any,
    /// The ref must not exist yet.
    MustNotExist,
    /// The ref must currently hold exactly this OID.
    Value(Oid),
}

/// Loose refs + packed-refs storage rooted at a gitdir.
pub struct FilesRefStore {
    git_dir: PathBuf,
    log_all_ref_updates: bool,
}

impl FilesRefStore {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
            log_all_ref_updates: true,
        }
    }

    /// Control reflog creation (`core.logAllRefUpdates`).
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.log_all_ref_updates = enabled;
        self
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn ref_path(&self, name: &RefName) -> PathBuf {
        self.git_dir.join(name.as_str())
    }

    /// Read the raw value of a ref: loose wins over packed.
    pub fn read_raw(&self, name: &RefName) -> Result<Option<Reference>, RefError> {
        match fs::read(self.ref_path(name)) {
            Ok(data) => return Reference::parse(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RefError::Io(e)),
        }
        let packed = PackedRefs::load(&self.git_dir)?;
        Ok(packed.get(name).map(|r| Reference::Direct(r.oid)))
    }

    /// Resolve a name through at most [`MAX_SYMREF_DEPTH`] symbolic hops
    /// to its OID.
    pub fn resolve(&self, name: &RefName) -> Result<Oid, RefError> {
        let mut current = name.clone();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.read_raw(&current)? {
                Some(Reference::Direct(oid)) => return Ok(oid),
                Some(Reference::Symbolic(target)) => current = target,
                None => return Err(RefError::NotFound(current.as_str().to_string())),
            }
        }
        Err(RefError::SymrefDepthExceeded(name.as_str().to_string()))
    }

    /// Follow symbolic hops to the name of the final direct ref. The
    /// final name need not exist yet (creating a branch through HEAD).
    pub fn resolve_symbolic_target(&self, name: &RefName) -> Result<RefName, RefError> {
        let mut current = name.clone();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.read_raw(&current)? {
                Some(Reference::Symbolic(target)) => current = target,
                _ => return Ok(current),
            }
        }
        Err(RefError::SymrefDepthExceeded(name.as_str().to_string()))
    }

    /// Compare-and-set update of a ref to `new_oid`.
    ///
    /// Symbolic names are followed first, so updating `HEAD` moves the
    /// branch it points at. The reflog line is appended before the ref
    /// file is renamed into place.
    pub fn update(
        &self,
        name: &RefName,
        new_oid: Oid,
        expected: Expect,
        identity: &Signature,
        message: &str,
    ) -> Result<(), RefError> {
        let final_name = self.resolve_symbolic_target(name)?;
        self.check_directory_conflict(&final_name)?;

        let lock = self.lock_ref(&final_name)?;
        let current = self
            .read_raw(&final_name)?
            .and_then(|r| r.as_direct().copied());
        check_expectation(&final_name, current, expected)?;

        let old_oid = current.unwrap_or(Oid::NULL);
        if self.should_log(&final_name) {
            let entry = ReflogEntry::new(old_oid, new_oid, identity.clone(), message);
            reflog::append(&self.git_dir, &final_name, &entry)?;
            if &final_name != name && self.should_log(name) {
                reflog::append(&self.git_dir, name, &entry)?;
            }
        }

        commit_ref_value(lock, &Reference::Direct(new_oid))
    }

    /// Point a symbolic ref (normally HEAD) at another ref.
    pub fn set_symbolic(&self, name: &RefName, target: &RefName) -> Result<(), RefError> {
        let lock = self.lock_ref(name)?;
        commit_ref_value(lock, &Reference::Symbolic(target.clone()))
    }

    /// Detach a symbolic ref to a bare OID without touching the branch
    /// it previously pointed at.
    pub fn set_detached(
        &self,
        name: &RefName,
        oid: Oid,
        identity: &Signature,
        message: &str,
    ) -> Result<(), RefError> {
        let lock = self.lock_ref(name)?;
        let old = self.resolve(name).unwrap_or(Oid::NULL);
        if self.should_log(name) {
            let entry = ReflogEntry::new(old, oid, identity.clone(), message);
            reflog::append(&self.git_dir, name, &entry)?;
        }
        commit_ref_value(lock, &Reference::Direct(oid))
    }

    /// Delete a ref from both loose and packed storage.
    pub fn delete(&self, name: &RefName, expected: Expect) -> Result<(), RefError> {
        let lock = self.lock_ref(name)?;
        let current = self.read_raw(name)?.and_then(|r| r.as_direct().copied());
        if current.is_none() {
            lock.rollback();
            return Err(RefError::NotFound(name.as_str().to_string()));
        }
        check_expectation(name, current, expected)?;

        let mut packed = PackedRefs::load(&self.git_dir)?;
        if packed.remove(name) {
            packed.save(&self.git_dir)?;
        }

        match fs::remove_file(self.ref_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RefError::Io(e)),
        }
        reflog::remove(&self.git_dir, name)?;
        lock.rollback();
        Ok(())
    }

    /// Fold all loose refs under `refs/` into packed-refs and remove
    /// the loose files.
    pub fn pack_refs(&self) -> Result<(), RefError> {
        let mut packed = PackedRefs::load(&self.git_dir)?;
        let loose = self.collect_loose("refs/")?;

        for (name, reference) in &loose {
            if let Reference::Direct(oid) = reference {
                let peeled = packed.peeled(name);
                packed.upsert(name.clone(), *oid, peeled);
            }
        }
        packed.save(&self.git_dir)?;

        for (name, reference) in &loose {
            if matches!(reference, Reference::Direct(_)) {
                let _ = fs::remove_file(self.ref_path(name));
            }
        }
        Ok(())
    }

    /// List refs under a prefix, loose overriding packed, sorted by name.
    pub fn list(&self, prefix: &str) -> Result<Vec<(RefName, Oid)>, RefError> {
        let mut out: BTreeMap<RefName, Oid> = BTreeMap::new();

        let packed = PackedRefs::load(&self.git_dir)?;
        for r in packed.iter() {
            if r.name.as_str().starts_with(prefix) {
                out.insert(r.name.clone(), r.oid);
            }
        }

        for (name, reference) in self.collect_loose(prefix)? {
            let oid = match reference {
                Reference::Direct(oid) => oid,
                Reference::Symbolic(_) => match self.resolve(&name) {
                    Ok(oid) => oid,
                    Err(_) => continue,
                },
            };
            out.insert(name, oid);
        }

        Ok(out.into_iter().collect())
    }

    /// The peeled (tag-dereferenced) OID recorded for a packed ref.
    pub fn peeled(&self, name: &RefName) -> Result<Option<Oid>, RefError> {
        Ok(PackedRefs::load(&self.git_dir)?.peeled(name))
    }

    /// Read a ref's log, oldest first.
    pub fn reflog(&self, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
        reflog::read_log(&self.git_dir, name)
    }

    fn lock_ref(&self, name: &RefName) -> Result<LockFile, RefError> {
        match LockFile::acquire(self.ref_path(name)) {
            Ok(lock) => Ok(lock),
            Err(UtilError::AlreadyLocked { .. }) => {
                Err(RefError::LockBusy(name.as_str().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn should_log(&self, name: &RefName) -> bool {
        if !self.log_all_ref_updates {
            return false;
        }
        let s = name.as_str();
        s == "HEAD"
            || s.starts_with("refs/heads/")
            || s.starts_with("refs/remotes/")
            || s.starts_with("refs/notes/")
    }

    /// A ref may not sit where an existing ref needs a directory, nor
    /// under a path that is already a ref.
    fn check_directory_conflict(&self, name: &RefName) -> Result<(), RefError> {
        let s = name.as_str();
        if !s.starts_with("refs/") {
            return Ok(());
        }
        let packed = PackedRefs::load(&self.git_dir)?;

        // A ref (or its directory) below this name.
        let as_dir = format!("{s}/");
        if self.ref_path(name).is_dir()
            || packed.iter().any(|r| r.name.as_str().starts_with(&as_dir))
        {
            let conflict = packed
                .iter()
                .find(|r| r.name.as_str().starts_with(&as_dir))
                .map(|r| r.name.as_str().to_string())
                .unwrap_or(as_dir);
            return Err(RefError::DirectoryConflict {
                name: s.to_string(),
                conflict,
            });
        }

        // An existing ref at a proper prefix of this name.
        let mut prefix = String::new();
        for component in s.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            if prefix == s || prefix == "refs" {
                continue;
            }
            let prefix_name = RefName::new(prefix.clone())?;
            if self.ref_path(&prefix_name).is_file() || packed.get(&prefix_name).is_some() {
                return Err(RefError::DirectoryConflict {
                    name: s.to_string(),
                    conflict: prefix,
                });
            }
        }
        Ok(())
    }

    /// Gather loose refs under a prefix by walking the gitdir.
    fn collect_loose(&self, prefix: &str) -> Result<Vec<(RefName, Reference)>, RefError> {
        let mut out = Vec::new();
        // The walk starts at the deepest existing directory of the prefix.
        let start = if prefix.is_empty() {
            self.git_dir.join("refs")
        } else {
            let p = self.git_dir.join(prefix.trim_end_matches('/'));
            if p.is_file() {
                let name = RefName::new(prefix.trim_end_matches('/'))?;
                let data = fs::read(&p)?;
                out.push((name, Reference::parse(&data)?));
                return Ok(out);
            }
            p
        };
        if !start.is_dir() {
            return Ok(out);
        }
        self.walk_loose_dir(&start, &mut out)?;
        out.retain(|(name, _)| name.as_str().starts_with(prefix));
        Ok(out)
    }

    fn walk_loose_dir(
        &self,
        dir: &Path,
        out: &mut Vec<(RefName, Reference)>,
    ) -> Result<(), RefError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_loose_dir(&path, out)?;
            } else if path.extension().map_or(true, |e| e != "lock") {
                let rel = path
                    .strip_prefix(&self.git_dir)
                    .expect("walk stays inside gitdir")
                    .to_string_lossy()
                    .replace('\\', "/");
                let Ok(name) = RefName::new(rel) else {
                    continue;
                };
                let data = fs::read(&path)?;
                if let Ok(reference) = Reference::parse(&data) {
                    out.push((name, reference));
                }
            }
        }
        Ok(())
    }
}

fn check_expectation(
    name: &RefName,
    current: Option<Oid>,
    expected: Expect,
) -> Result<(), RefError> {
    match expected {
        Expect::Any => Ok(()),
        Expect::MustNotExist => {
            if current.is_some() {
                Err(RefError::AlreadyExists(name.as_str().to_string()))
            } else {
                Ok(())
            }
        }
        Expect::Value(want) => {
            if current == Some(want) {
                Ok(())
            } else {
                Err(RefError::CasFailed {
                    name: name.as_str().to_string(),
                    expected: Some(want),
                    actual: current,
                })
            }
        }
    }
}

fn commit_ref_value(mut lock: LockFile, value: &Reference) -> Result<(), RefError> {
    lock.write_all(value.to_file_contents().as_bytes())?;
    lock.commit()?;
    Ok(())
}

/// One queued update within a transaction.
pub struct RefUpdate {
    pub name: RefName,
    pub new_oid: Option<Oid>,
    pub expected: Expect,
    pub message: String,
}

/// An all-or-nothing batch of ref updates.
///
/// Expectations are checked for every update before any ref changes;
/// if a later write still fails, already-applied updates are rolled
/// back to their prior values.
#[derive(Default)]
pub struct RefTransaction {
    updates: Vec<RefUpdate>,
}

impl RefTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, name: RefName, new_oid: Oid, expected: Expect, message: impl Into<String>) {
        self.updates.push(RefUpdate {
            name,
            new_oid: Some(new_oid),
            expected,
            message: message.into(),
        });
    }

    pub fn delete(&mut self, name: RefName, expected: Expect, message: impl Into<String>) {
        self.updates.push(RefUpdate {
            name,
            new_oid: None,
            expected,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn updates(&self) -> &[RefUpdate] {
        &self.updates
    }

    /// Apply every queued update against the store.
    pub fn commit(self, store: &FilesRefStore, identity: &Signature) -> Result<(), RefError> {
        // Phase one: validate all expectations up front.
        for u in &self.updates {
            let current = store.read_raw(&u.name)?.and_then(|r| r.as_direct().copied());
            check_expectation(&u.name, current, u.expected)?;
        }

        // Phase two: apply, remembering prior values for rollback.
        let mut applied: Vec<(RefName, Option<Oid>)> = Vec::new();
        for u in &self.updates {
            let prior = store.read_raw(&u.name)?.and_then(|r| r.as_direct().copied());
            let result = match u.new_oid {
                Some(new_oid) => store.update(&u.name, new_oid, u.expected, identity, &u.message),
                None => store.delete(&u.name, u.expected),
            };
            match result {
                Ok(()) => applied.push((u.name.clone(), prior)),
                Err(e) => {
                    for (name, prior) in applied.into_iter().rev() {
                        let _ = match prior {
                            Some(oid) => {
                                store.update(&name, oid, Expect::Any, identity, "rollback")
                            }
                            None => store.delete(&name, Expect::Any),
                        };
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
