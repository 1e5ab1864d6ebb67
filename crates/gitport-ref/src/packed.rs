//! The packed-refs file: `oid SP refname` lines with `^oid` peel
//! annotations for annotated tags.

use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use gitport_hash::Oid;
use gitport_utils::LockFile;

use crate::name::RefName;
use crate::RefError;

const HEADER: &str = "# pack-refs with: peeled fully-peeled sorted \n";

/// One packed ref with its optional peeled target.
#[derive(Debug, Clone)]
pub struct PackedRef {
    pub name: RefName,
    pub oid: Oid,
    /// For annotated tags: the commit the tag object points at.
    pub peeled: Option<Oid>,
}

/// Parsed contents of `packed-refs`.
#[derive(Debug, Clone, Default)]
pub struct PackedRefs {
    refs: Vec<PackedRef>,
}

impl PackedRefs {
    /// Parse packed-refs file contents.
    pub fn parse(data: &[u8]) -> Result<Self, RefError> {
        let mut refs: Vec<PackedRef> = Vec::new();

        for line in data.lines() {
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }

            if let Some(peel) = line.strip_prefix(b"^") {
                let hex = std::str::from_utf8(peel).map_err(|_| RefError::Parse {
                    what: "packed-refs",
                    reason: "non-UTF8 peeled OID".into(),
                })?;
                let peeled = Oid::from_hex(hex.trim()).map_err(|e| RefError::Parse {
                    what: "packed-refs",
                    reason: e.to_string(),
                })?;
                match refs.last_mut() {
                    Some(last) => last.peeled = Some(peeled),
                    None => {
                        return Err(RefError::Parse {
                            what: "packed-refs",
                            reason: "peel line before any ref".into(),
                        })
                    }
                }
                continue;
            }

            let space = line.find_byte(b' ').ok_or(RefError::Parse {
                what: "packed-refs",
                reason: "missing space".into(),
            })?;
            let hex = std::str::from_utf8(&line[..space]).map_err(|_| RefError::Parse {
                what: "packed-refs",
                reason: "non-UTF8 OID".into(),
            })?;
            let oid = Oid::from_hex(hex).map_err(|e| RefError::Parse {
                what: "packed-refs",
                reason: e.to_string(),
            })?;
            let name_str = std::str::from_utf8(&line[space + 1..]).map_err(|_| {
                RefError::Parse {
                    what: "packed-refs",
                    reason: "non-UTF8 ref name".into(),
                }
            })?;
            refs.push(PackedRef {
                name: RefName::new(name_str.trim())?,
                oid,
                peeled: None,
            });
        }

        Ok(Self { refs })
    }

    /// Load from `<gitdir>/packed-refs`. Empty if the file is absent.
    pub fn load(git_dir: &Path) -> Result<Self, RefError> {
        match std::fs::read(path_in(git_dir)) {
            Ok(data) => Self::parse(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(RefError::Io(e)),
        }
    }

    /// Serialize and atomically replace `<gitdir>/packed-refs`.
    pub fn save(&self, git_dir: &Path) -> Result<(), RefError> {
        let mut out = String::from(HEADER);
        let mut sorted: Vec<&PackedRef> = self.refs.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for r in sorted {
            out.push_str(&r.oid.to_hex());
            out.push(' ');
            out.push_str(r.name.as_str());
            out.push('\n');
            if let Some(peeled) = r.peeled {
                out.push('^');
                out.push_str(&peeled.to_hex());
                out.push('\n');
            }
        }

        let mut lock = LockFile::acquire(path_in(git_dir))
            .map_err(|_| RefError::LockBusy("packed-refs".into()))?;
        lock.write_all(out.as_bytes())?;
        lock.commit()?;
        Ok(())
    }

    pub fn get(&self, name: &RefName) -> Option<&PackedRef> {
        self.refs.iter().find(|r| &r.name == name)
    }

    /// Peeled OID for an annotated tag ref, if recorded.
    pub fn peeled(&self, name: &RefName) -> Option<Oid> {
        self.get(name).and_then(|r| r.peeled)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackedRef> {
        self.refs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Insert or replace a ref binding.
    pub fn upsert(&mut self, name: RefName, oid: Oid, peeled: Option<Oid>) {
        match self.refs.iter_mut().find(|r| r.name == name) {
            Some(existing) => {
                existing.oid = oid;
                existing.peeled = peeled;
            }
            None => self.refs.push(PackedRef { name, oid, peeled }),
        }
    }

    /// Remove a ref binding. Returns whether it was present.
    pub fn remove(&mut self, name: &RefName) -> bool {
        let before = self.refs.len();
        self.refs.retain(|r| &r.name != name);
        self.refs.len() != before
    }
}

pub(crate) fn path_in(git_dir: &Path) -> PathBuf {
    git_dir.join("packed-refs")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &[u8] = b"# pack-refs with: peeled fully-peeled sorted \n\
dba5b92408549e55c36e16c89e2b4a4e4cbc8c8f refs/remotes/origin/master\n\
0a117b8378f5e5323d15694c7eb8f62c4bea152b refs/tags/v0.0.10\n\
^ce03143bd6567fc7063549c204e877834cda5645\n";

    #[test]
    fn parse_fixture_with_peel_lines() {
        let packed = PackedRefs::parse(FIXTURE).unwrap();

        let master = packed
            .get(&RefName::new("refs/remotes/origin/master").unwrap())
            .unwrap();
        assert_eq!(
            master.oid.to_hex(),
            "dba5b92408549e55c36e16c89e2b4a4e4cbc8c8f"
        );
        assert!(master.peeled.is_none());

        let tag_name = RefName::new("refs/tags/v0.0.10").unwrap();
        let tag = packed.get(&tag_name).unwrap();
        assert_eq!(tag.oid.to_hex(), "0a117b8378f5e5323d15694c7eb8f62c4bea152b");
        assert_eq!(
            packed.peeled(&tag_name).unwrap().to_hex(),
            "ce03143bd6567fc7063549c204e877834cda5645"
        );
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut packed = PackedRefs::parse(FIXTURE).unwrap();
        packed.upsert(
            RefName::new("refs/heads/extra").unwrap(),
            Oid::from_hex("1111111111111111111111111111111111111111").unwrap(),
            None,
        );
        packed.save(dir.path()).unwrap();

        let reloaded = PackedRefs::load(dir.path()).unwrap();
        assert!(reloaded
            .get(&RefName::new("refs/heads/extra").unwrap())
            .is_some());
        assert_eq!(
            reloaded
                .peeled(&RefName::new("refs/tags/v0.0.10").unwrap())
                .unwrap()
                .to_hex(),
            "ce03143bd6567fc7063549c204e877834cda5645"
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PackedRefs::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn remove_drops_binding() {
        let mut packed = PackedRefs::parse(FIXTURE).unwrap();
        let name = RefName::new("refs/tags/v0.0.10").unwrap();
        assert!(packed.remove(&name));
        assert!(!packed.remove(&name));
        assert!(packed.get(&name).is_none());
    }

    #[test]
    fn stray_peel_line_rejected() {
        assert!(PackedRefs::parse(b"^ce03143bd6567fc7063549c204e877834cda5645\n").is_err());
    }
}
