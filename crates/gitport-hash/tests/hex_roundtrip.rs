//! Property tests for hex encoding and OID identity.

use gitport_hash::hasher::Hasher;
use gitport_hash::{hex_decode, hex_encode, Oid};
use proptest::prelude::*;

proptest! {
    /// Any 20 bytes survive a hex round-trip.
    #[test]
    fn hex_roundtrip(bytes in prop::array::uniform20(any::<u8>())) {
        let hex = hex_encode(&bytes);
        let mut decoded = [0u8; 20];
        hex_decode(&hex, &mut decoded).unwrap();
        prop_assert_eq!(decoded, bytes);
    }

    /// Oid::from_hex accepts exactly what to_hex produces.
    #[test]
    fn oid_display_roundtrip(bytes in prop::array::uniform20(any::<u8>())) {
        let oid = Oid::from_bytes(&bytes).unwrap();
        prop_assert_eq!(Oid::from_hex(&oid.to_hex()).unwrap(), oid);
    }

    /// The object hash only depends on kind and payload, and incremental
    /// hashing over any split point agrees with the one-shot form.
    #[test]
    fn incremental_hash_agrees(payload in prop::collection::vec(any::<u8>(), 0..512), split in 0usize..512) {
        let split = split.min(payload.len());
        let expected = Hasher::digest(&payload);
        let mut h = Hasher::new();
        h.update(&payload[..split]);
        h.update(&payload[split..]);
        prop_assert_eq!(h.finalize(), expected);
    }
}
