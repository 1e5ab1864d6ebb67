//! The reflog: an append-only record of ref transitions at
//! `logs/<refname>`, one line per update:
//! `<old> SP <new> SP <identity> TAB <message>`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use gitport_hash::Oid;
use gitport_object::Signature;

use crate::name::RefName;
use crate::RefError;

/// One reflog line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_oid: Oid,
    pub new_oid: Oid,
    pub identity: Signature,
    pub message: BString,
}

impl ReflogEntry {
    pub fn new(old_oid: Oid, new_oid: Oid, identity: Signature, message: impl Into<BString>) -> Self {
        Self {
            old_oid,
            new_oid,
            identity,
            message: message.into(),
        }
    }

    /// Parse one reflog line.
    pub fn parse(line: &BStr) -> Result<Self, RefError> {
        let line = line.as_bytes();
        // Two 40-hex OIDs and their separators come first.
        if line.len() < 82 || line[40] != b' ' || line[81] != b' ' {
            return Err(RefError::Parse {
                what: "reflog",
                reason: format!("malformed line of {} bytes", line.len()),
            });
        }

        let old_hex = std::str::from_utf8(&line[..40]).map_err(|_| RefError::Parse {
            what: "reflog",
            reason: "non-UTF8 old OID".into(),
        })?;
        let new_hex = std::str::from_utf8(&line[41..81]).map_err(|_| RefError::Parse {
            what: "reflog",
            reason: "non-UTF8 new OID".into(),
        })?;

        let rest = &line[82..];
        let (identity_part, message) = match rest.find_byte(b'\t') {
            Some(tab) => (&rest[..tab], &rest[tab + 1..]),
            None => (rest, &b""[..]),
        };

        let identity = Signature::parse(identity_part.as_bstr()).map_err(|e| RefError::Parse {
            what: "reflog",
            reason: e.to_string(),
        })?;

        let message = message.strip_suffix(b"\n").unwrap_or(message);

        Ok(Self {
            old_oid: Oid::from_hex(old_hex)?,
            new_oid: Oid::from_hex(new_hex)?,
            identity,
            message: BString::from(message),
        })
    }

    /// Serialize to one line including the trailing newline.
    pub fn to_line(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + self.message.len());
        out.extend_from_slice(self.old_oid.to_hex().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.new_oid.to_hex().as_bytes());
        out.push(b' ');
        out.extend_from_slice(&self.identity.to_bytes());
        out.push(b'\t');
        out.extend_from_slice(&self.message);
        out.push(b'\n');
        out
    }
}

/// The on-disk path of a ref's log.
pub fn log_path(git_dir: &Path, name: &RefName) -> PathBuf {
    git_dir.join("logs").join(name.as_str())
}

/// Read a ref's log, oldest first. Empty if no log exists.
pub fn read_log(git_dir: &Path, name: &RefName) -> Result<Vec<ReflogEntry>, RefError> {
    let data = match std::fs::read(log_path(git_dir, name)) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RefError::Io(e)),
    };
    data.lines()
        .filter(|l| !l.is_empty())
        .map(|l| ReflogEntry::parse(l.as_bstr()))
        .collect()
}

/// Append one entry to a ref's log, creating parent directories.
pub fn append(git_dir: &Path, name: &RefName, entry: &ReflogEntry) -> Result<(), RefError> {
    let path = log_path(git_dir, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    file.write_all(&entry.to_line())?;
    Ok(())
}

/// Remove a ref's log file, if present.
pub fn remove(git_dir: &Path, name: &RefName) -> Result<(), RefError> {
    match std::fs::remove_file(log_path(git_dir, name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RefError::Io(e)),
    }
}
