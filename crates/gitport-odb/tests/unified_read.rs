//! The object round-trip property over the unified database.

use gitport_hash::hasher::Hasher;
use gitport_object::ObjectType;
use gitport_odb::Odb;
use proptest::prelude::*;

fn open_odb(dir: &tempfile::TempDir) -> Odb {
    let objects = dir.path().join("objects");
    std::fs::create_dir_all(objects.join("pack")).unwrap();
    Odb::open(&objects).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// For every payload, `read(write(kind, payload))` returns the same
    /// kind and payload, and the OID equals `sha1("<kind> <len>\0<payload>")`.
    #[test]
    fn object_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..2048)) {
        let dir = tempfile::tempdir().unwrap();
        let odb = open_odb(&dir);

        let oid = odb.write(ObjectType::Blob, &payload).unwrap();
        prop_assert_eq!(oid, Hasher::hash_object("blob", &payload));

        let (kind, data) = odb.read(&oid).unwrap();
        prop_assert_eq!(kind, ObjectType::Blob);
        prop_assert_eq!(data, payload);
        prop_assert!(odb.has(&oid));
    }
}

#[test]
fn commit_and_tree_roundtrip_through_odb() {
    let dir = tempfile::tempdir().unwrap();
    let odb = open_odb(&dir);

    let blob_oid = odb.write(ObjectType::Blob, b"fn main() {}\n").unwrap();

    let tree = gitport_object::Tree::from_entries(vec![gitport_object::TreeEntry::new(
        gitport_object::FileMode::Regular,
        "main.rs",
        blob_oid,
    )]);
    let tree_oid = odb
        .write(ObjectType::Tree, &tree.serialize_content())
        .unwrap();

    let (kind, data) = odb.read(&tree_oid).unwrap();
    assert_eq!(kind, ObjectType::Tree);
    let reread = gitport_object::Tree::parse(&data).unwrap();
    assert_eq!(reread.entries()[0].oid, blob_oid);
}
