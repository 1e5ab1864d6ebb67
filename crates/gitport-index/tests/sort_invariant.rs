//! The index ordering invariant under arbitrary operation sequences.

use bstr::{BStr, BString};
use gitport_hash::Oid;
use gitport_index::{Index, IndexEntry, Stage};
use gitport_object::FileMode;
use proptest::prelude::*;

fn oid(n: u8) -> Oid {
    let mut bytes = [0u8; 20];
    bytes[19] = n;
    Oid::from_bytes(&bytes).unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    Stage(String, u8),
    Unmerge(String, u8),
    Remove(String),
    Roundtrip,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let path = "[a-c]/[a-c]\\.txt";
    prop_oneof![
        (path, any::<u8>()).prop_map(|(p, n)| Op::Stage(p, n)),
        (path, any::<u8>()).prop_map(|(p, n)| Op::Unmerge(p, n)),
        path.prop_map(Op::Remove),
        Just(Op::Roundtrip),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After any sequence of stage/unmerge/remove/serialize/parse, the
    /// entries are sorted by `(name, stage)` with unique keys.
    #[test]
    fn entries_sorted_unique(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut index = Index::new();
        for op in ops {
            match op {
                Op::Stage(path, n) => index.stage_file(IndexEntry::new(
                    BString::from(path),
                    oid(n),
                    FileMode::Regular,
                    Stage::Normal,
                )),
                Op::Unmerge(path, n) => index.unmerge(
                    BStr::new(&path),
                    Some((FileMode::Regular, oid(n))),
                    Some((FileMode::Regular, oid(n.wrapping_add(1)))),
                    None,
                ),
                Op::Remove(path) => {
                    index.remove_path(BStr::new(&path));
                }
                Op::Roundtrip => {
                    index = Index::parse(&index.to_bytes()).unwrap();
                }
            }

            let keys: Vec<_> = index.entries().iter().map(|e| e.key()).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(&keys, &sorted, "keys must be sorted and unique");
        }
    }
}
