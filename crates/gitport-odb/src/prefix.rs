//! Short-OID expansion: resolve a hex prefix to a unique full OID.

use std::collections::BTreeSet;

use gitport_hash::Oid;

use crate::{Odb, OdbError};

/// Minimum accepted prefix length, matching git's MINIMUM_ABBREV.
pub const MINIMUM_ABBREV: usize = 4;

/// Resolve a hex prefix across loose storage, every pack index, and
/// the multi-pack-index.
///
/// Fails with [`OdbError::Ambiguous`] when two distinct objects match
/// and [`OdbError::PrefixNotFound`] when none does.
pub fn expand_prefix(odb: &Odb, prefix: &str) -> Result<Oid, OdbError> {
    if prefix.len() < MINIMUM_ABBREV {
        return Err(OdbError::PrefixTooShort(prefix.to_string()));
    }
    if !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(OdbError::PrefixNotFound(prefix.to_string()));
    }
    let prefix = prefix.to_ascii_lowercase();

    // A full-length OID only needs an existence check.
    if prefix.len() == Oid::HEX_LEN {
        let oid = Oid::from_hex(&prefix).expect("validated hex");
        return if odb.has(&oid) {
            Ok(oid)
        } else {
            Err(OdbError::PrefixNotFound(prefix))
        };
    }

    // Distinct matches only: the same object in several stores is fine.
    let mut matches: BTreeSet<Oid> = BTreeSet::new();

    // Loose: the first two digits pick the fan-out directory.
    let fanout = &prefix[..2];
    for oid in odb.loose().iter_oids(Some(fanout))? {
        if oid.starts_with_hex(&prefix) {
            matches.insert(oid);
        }
    }

    for pack in odb.packs().read().unwrap().iter() {
        for (oid, _) in pack.index().lookup_prefix(&prefix) {
            matches.insert(oid);
        }
    }

    if let Some(midx) = odb.midx() {
        for oid in midx.lookup_prefix(&prefix) {
            matches.insert(oid);
        }
    }

    match matches.len() {
        0 => Err(OdbError::PrefixNotFound(prefix)),
        1 => Ok(*matches.iter().next().unwrap()),
        count => Err(OdbError::Ambiguous { prefix, count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitport_object::ObjectType;

    fn odb() -> (tempfile::TempDir, Odb) {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        std::fs::create_dir_all(objects.join("pack")).unwrap();
        let odb = Odb::open(&objects).unwrap();
        (dir, odb)
    }

    #[test]
    fn unique_prefix_expands() {
        let (_dir, odb) = odb();
        let oid = odb.write(ObjectType::Blob, b"hello world\n").unwrap();
        let hex = oid.to_hex();
        assert_eq!(odb.expand_prefix(&hex[..7]).unwrap(), oid);
        assert_eq!(odb.expand_prefix(&hex).unwrap(), oid);
        // Uppercase input is accepted.
        assert_eq!(
            odb.expand_prefix(&hex[..8].to_ascii_uppercase()).unwrap(),
            oid
        );
    }

    #[test]
    fn too_short_prefix_rejected() {
        let (_dir, odb) = odb();
        assert!(matches!(
            odb.expand_prefix("abc").unwrap_err(),
            OdbError::PrefixTooShort(_)
        ));
    }

    #[test]
    fn unknown_prefix_not_found() {
        let (_dir, odb) = odb();
        assert!(matches!(
            odb.expand_prefix("deadbeef").unwrap_err(),
            OdbError::PrefixNotFound(_)
        ));
    }

    #[test]
    fn ambiguous_prefix_detected() {
        let (_dir, odb) = odb();
        // Write blobs until two share a 4-digit prefix.
        let mut oids: Vec<Oid> = Vec::new();
        let mut ambiguous_prefix = None;
        for i in 0..2000u32 {
            let oid = odb
                .write(ObjectType::Blob, format!("blob #{i}").as_bytes())
                .unwrap();
            let hex = oid.to_hex();
            if let Some(other) = oids.iter().find(|o| o.to_hex()[..4] == hex[..4]) {
                assert_ne!(other, &oid);
                ambiguous_prefix = Some(hex[..4].to_string());
                break;
            }
            oids.push(oid);
        }
        let prefix = ambiguous_prefix.expect("birthday collision within 2000 blobs");
        assert!(matches!(
            odb.expand_prefix(&prefix).unwrap_err(),
            OdbError::Ambiguous { .. }
        ));
    }
}
