//! Unified object database: one read/write surface over loose objects,
//! packfiles, and the multi-pack-index.
//!
//! Reads consult the session cache, then loose storage, then every
//! pack. Writes always land in loose storage; pack placement happens
//! during fetch ingestion. The database is owned by one session; a
//! [`refresh`](Odb::refresh) picks up packs other processes installed.

mod prefix;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use gitport_hash::Oid;
use gitport_loose::LooseStore;
use gitport_object::cache::ObjectCache;
use gitport_object::{Object, ObjectType};
use gitport_pack::midx::MultiPackIndex;
use gitport_pack::pack::PackFile;
use tracing::debug;

pub use prefix::MINIMUM_ABBREV;

/// Errors from the object database.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object not found: {0}")]
    NotFound(Oid),

    #[error("no object matches prefix {0}")]
    PrefixNotFound(String),

    #[error("ambiguous object name: {prefix} matches {count} objects")]
    Ambiguous { prefix: String, count: usize },

    #[error("short OID {0} is below the {MINIMUM_ABBREV}-digit minimum")]
    PrefixTooShort(String),

    #[error("corrupt object {oid}: {reason}")]
    Corrupt { oid: Oid, reason: String },

    #[error(transparent)]
    Loose(#[from] gitport_loose::LooseError),

    #[error(transparent)]
    Pack(#[from] gitport_pack::PackError),

    #[error(transparent)]
    Object(#[from] gitport_object::ObjectError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Number of parsed objects kept in the session cache.
const CACHE_CAPACITY: usize = 512;

/// The unified object database rooted at an `objects/` directory.
pub struct Odb {
    loose: LooseStore,
    packs: RwLock<Vec<PackFile>>,
    midx: Option<MultiPackIndex>,
    cache: Mutex<ObjectCache>,
    objects_dir: PathBuf,
}

impl Odb {
    /// Open the database, scanning `objects/pack/` for packs and the
    /// optional multi-pack-index.
    pub fn open(objects_dir: impl AsRef<Path>) -> Result<Self, OdbError> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        let loose = LooseStore::new(&objects_dir);

        let midx_path = objects_dir.join("pack").join("multi-pack-index");
        let midx = if midx_path.is_file() {
            Some(MultiPackIndex::open(&midx_path)?)
        } else {
            None
        };

        let odb = Self {
            loose,
            packs: RwLock::new(Vec::new()),
            midx,
            cache: Mutex::new(ObjectCache::new(CACHE_CAPACITY)),
            objects_dir,
        };
        odb.refresh()?;
        Ok(odb)
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Re-scan `objects/pack/` for packs that appeared since open.
    pub fn refresh(&self) -> Result<(), OdbError> {
        let pack_dir = self.objects_dir.join("pack");
        let mut packs = self.packs.write().unwrap();

        let known: HashSet<PathBuf> = packs.iter().map(|p| p.path().to_path_buf()).collect();
        let read_dir = match fs::read_dir(&pack_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(OdbError::Io(e)),
        };

        for entry in read_dir {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "pack")
                && path.with_extension("idx").is_file()
                && !known.contains(&path)
            {
                debug!(pack = %path.display(), "opening pack");
                packs.push(PackFile::open(&path)?);
            }
        }
        Ok(())
    }

    /// Check whether an object exists anywhere in the database.
    pub fn has(&self, oid: &Oid) -> bool {
        if self.cache.lock().unwrap().contains(oid) {
            return true;
        }
        if self.loose.contains(oid) {
            return true;
        }
        if self.packs.read().unwrap().iter().any(|p| p.contains(oid)) {
            return true;
        }
        self.midx.as_ref().is_some_and(|m| m.contains(oid))
    }

    /// Read an object as `(kind, payload)`.
    pub fn read(&self, oid: &Oid) -> Result<(ObjectType, Vec<u8>), OdbError> {
        if let Some(obj) = self.cache.lock().unwrap().get(oid) {
            return Ok((obj.object_type(), obj.serialize_content()));
        }

        // Loose reads re-hash the stored bytes (the store verifies).
        if let Some((ty, data)) = self.loose.read(oid)? {
            self.cache_parsed(oid, ty, &data);
            return Ok((ty, data));
        }

        let resolver = |base: &Oid| self.read(base).ok();
        {
            let packs = self.packs.read().unwrap();
            for pack in packs.iter() {
                if let Some(obj) = pack.read_with_resolver(oid, resolver)? {
                    self.cache_parsed(oid, obj.obj_type, &obj.data);
                    return Ok((obj.obj_type, obj.data));
                }
            }
        }

        if let Some(midx) = &self.midx {
            if let Some((pack_id, offset)) = midx.lookup(oid) {
                let name = &midx.pack_names()[pack_id as usize];
                let obj = self.read_from_named_pack(name, offset)?;
                self.cache_parsed(oid, obj.0, &obj.1);
                return Ok(obj);
            }
        }

        Err(OdbError::NotFound(*oid))
    }

    /// Read and parse into the object model.
    pub fn read_object(&self, oid: &Oid) -> Result<Object, OdbError> {
        let (ty, data) = self.read(oid)?;
        Ok(Object::parse_content(ty, &data)?)
    }

    /// Read just `(kind, size)` without materialising the payload when
    /// the object is loose.
    pub fn read_header(&self, oid: &Oid) -> Result<(ObjectType, usize), OdbError> {
        if let Some((ty, size)) = self.loose.read_header(oid)? {
            return Ok((ty, size));
        }
        let (ty, data) = self.read(oid)?;
        Ok((ty, data.len()))
    }

    /// Write an object; idempotent, returns the OID.
    pub fn write(&self, kind: ObjectType, payload: &[u8]) -> Result<Oid, OdbError> {
        Ok(self.loose.write(kind, payload)?)
    }

    /// Write a parsed object.
    pub fn write_object(&self, obj: &Object) -> Result<Oid, OdbError> {
        self.write(obj.object_type(), &obj.serialize_content())
    }

    /// All OIDs across loose storage and every pack, deduplicated.
    pub fn iter_oids(&self) -> Result<Vec<Oid>, OdbError> {
        let mut seen = HashSet::new();
        let mut oids = Vec::new();

        for oid in self.loose.iter_oids(None)? {
            if seen.insert(oid) {
                oids.push(oid);
            }
        }
        for pack in self.packs.read().unwrap().iter() {
            for (oid, _) in pack.index().iter() {
                if seen.insert(oid) {
                    oids.push(oid);
                }
            }
        }
        if let Some(midx) = &self.midx {
            for (oid, _, _) in midx.iter() {
                if seen.insert(oid) {
                    oids.push(oid);
                }
            }
        }
        Ok(oids)
    }

    /// Expand a short hex prefix to the unique matching OID.
    pub fn expand_prefix(&self, prefix: &str) -> Result<Oid, OdbError> {
        prefix::expand_prefix(self, prefix)
    }

    pub(crate) fn loose(&self) -> &LooseStore {
        &self.loose
    }

    pub(crate) fn packs(&self) -> &RwLock<Vec<PackFile>> {
        &self.packs
    }

    pub(crate) fn midx(&self) -> Option<&MultiPackIndex> {
        self.midx.as_ref()
    }

    fn cache_parsed(&self, oid: &Oid, ty: ObjectType, data: &[u8]) {
        if let Ok(obj) = Object::parse_content(ty, data) {
            self.cache.lock().unwrap().insert(*oid, obj);
        }
    }

    fn read_from_named_pack(
        &self,
        name: &str,
        offset: u64,
    ) -> Result<(ObjectType, Vec<u8>), OdbError> {
        let path = self.objects_dir.join("pack").join(name);
        let packs = self.packs.read().unwrap();
        if let Some(pack) = packs.iter().find(|p| p.path() == path) {
            let obj = pack.read_at_offset(offset)?;
            return Ok((obj.obj_type, obj.data));
        }
        drop(packs);
        // Pack named by the MIDX but not yet opened.
        let pack = PackFile::open(&path)?;
        let obj = pack.read_at_offset(offset)?;
        self.packs.write().unwrap().push(pack);
        Ok((obj.obj_type, obj.data))
    }
}
