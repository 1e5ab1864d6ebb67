//! Loose object storage: `objects/xx/yyy…` files holding one
//! zlib-compressed object each.
//!
//! Writes are atomic (temp file + rename) and idempotent: rewriting an
//! OID that already exists is a no-op, which is what makes concurrent
//! writers of identical content safe.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use gitport_hash::hasher::Hasher;
use gitport_hash::{zlib, Oid};
use gitport_object::{header, ObjectType};

/// Errors from the loose object store.
#[derive(Debug, thiserror::Error)]
pub enum LooseError {
    #[error("corrupt loose object {oid}: {reason}")]
    Corrupt { oid: String, reason: String },

    #[error("loose object {path} hashes to {actual}, expected {expected}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Object(#[from] gitport_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] gitport_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The loose half of an object database, rooted at an `objects/` dir.
pub struct LooseStore {
    objects_dir: PathBuf,
    compression_level: u32,
}

impl LooseStore {
    pub fn new(objects_dir: impl Into<PathBuf>) -> Self {
        Self {
            objects_dir: objects_dir.into(),
            compression_level: 6,
        }
    }

    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    fn object_path(&self, oid: &Oid) -> PathBuf {
        self.objects_dir.join(oid.loose_path())
    }

    /// Check if a loose object exists.
    pub fn contains(&self, oid: &Oid) -> bool {
        self.object_path(oid).is_file()
    }

    /// Read a loose object by OID, verifying that the stored bytes
    /// re-hash to the OID. Returns `Ok(None)` if absent.
    pub fn read(&self, oid: &Oid) -> Result<Option<(ObjectType, Vec<u8>)>, LooseError> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LooseError::Io(e)),
        };

        let raw = zlib::inflate(&compressed, None).map_err(|e| LooseError::Corrupt {
            oid: oid.to_hex(),
            reason: e.to_string(),
        })?;

        let actual = Hasher::digest(&raw);
        if actual != *oid {
            return Err(LooseError::HashMismatch {
                path,
                expected: oid.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let (obj_type, content_size, header_len) = header::parse_header(&raw)?;
        if raw.len() - header_len != content_size {
            return Err(LooseError::Corrupt {
                oid: oid.to_hex(),
                reason: format!(
                    "declared size {} but payload is {}",
                    content_size,
                    raw.len() - header_len
                ),
            });
        }
        Ok(Some((obj_type, raw[header_len..].to_vec())))
    }

    /// Read just the type and size without inflating the full payload.
    pub fn read_header(&self, oid: &Oid) -> Result<Option<(ObjectType, usize)>, LooseError> {
        let path = self.object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LooseError::Io(e)),
        };

        // Headers fit comfortably in 64 bytes.
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut buf = [0u8; 64];
        let mut filled = 0;
        loop {
            if filled >= buf.len() {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: "header exceeds 64 bytes".into(),
                });
            }
            let n = decoder
                .read(&mut buf[filled..])
                .map_err(|e| LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: e.to_string(),
                })?;
            if n == 0 {
                return Err(LooseError::Corrupt {
                    oid: oid.to_hex(),
                    reason: "EOF before header terminator".into(),
                });
            }
            filled += n;
            if buf[..filled].contains(&0) {
                break;
            }
        }

        let (obj_type, content_size, _) = header::parse_header(&buf[..filled])?;
        Ok(Some((obj_type, content_size)))
    }

    /// Write an object. Returns its OID; a no-op if it already exists.
    pub fn write(&self, obj_type: ObjectType, content: &[u8]) -> Result<Oid, LooseError> {
        let hdr = header::write_header(obj_type, content.len());

        let mut hasher = Hasher::new();
        hasher.update(&hdr);
        hasher.update(content);
        let oid = hasher.finalize();

        if self.contains(&oid) {
            return Ok(oid);
        }

        let final_path = self.object_path(&oid);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut raw = Vec::with_capacity(hdr.len() + content.len());
        raw.extend_from_slice(&hdr);
        raw.extend_from_slice(content);
        let compressed = zlib::deflate(&raw, self.compression_level);

        let tmp_path = self.objects_dir.join(format!(
            "tmp_obj_{}_{}",
            std::process::id(),
            oid.to_hex()
        ));
        fs::write(&tmp_path, &compressed)?;

        // Loose objects are immutable once placed; 0444 matches git.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o444))?;
        }

        match fs::rename(&tmp_path, &final_path) {
            Ok(()) => Ok(oid),
            Err(_) if final_path.exists() => {
                // Another writer placed identical content first.
                let _ = fs::remove_file(&tmp_path);
                Ok(oid)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(LooseError::Io(e))
            }
        }
    }

    /// Enumerate all loose OIDs, optionally limited to one fan-out
    /// directory (a two-hex-digit prefix).
    pub fn iter_oids(&self, fanout: Option<&str>) -> Result<Vec<Oid>, LooseError> {
        let mut oids = Vec::new();
        let dirs: Vec<String> = match fanout {
            Some(d) => vec![d.to_string()],
            None => {
                let mut dirs = Vec::new();
                let read_dir = match fs::read_dir(&self.objects_dir) {
                    Ok(rd) => rd,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(oids),
                    Err(e) => return Err(LooseError::Io(e)),
                };
                for entry in read_dir {
                    let entry = entry?;
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.len() == 2 && name.bytes().all(|b| b.is_ascii_hexdigit()) {
                        dirs.push(name.into_owned());
                    }
                }
                dirs
            }
        };

        for dir in dirs {
            let dir_path = self.objects_dir.join(&dir);
            let read_dir = match fs::read_dir(&dir_path) {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(LooseError::Io(e)),
            };
            for entry in read_dir {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.len() == 38 {
                    if let Ok(oid) = Oid::from_hex(&format!("{dir}{name}")) {
                        oids.push(oid);
                    }
                }
            }
        }
        Ok(oids)
    }
}
