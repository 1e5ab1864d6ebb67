use std::fmt;
use std::str::FromStr;

use crate::{hex_decode, hex_encode, HashError};

/// A git object identifier — the SHA-1 of an object's canonical
/// serialization, held as raw digest bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    /// Number of raw digest bytes.
    pub const RAW_LEN: usize = 20;

    /// Number of hex digits in the display form.
    pub const HEX_LEN: usize = 40;

    /// The null OID (all zeros), used for "no object" in ref updates.
    pub const NULL: Self = Self([0u8; 20]);

    /// Create an Oid from exactly 20 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != Self::RAW_LEN {
            return Err(HashError::InvalidHashLength {
                expected: Self::RAW_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Create an Oid from a 40-digit hex string (case-insensitive).
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut arr = [0u8; 20];
        hex_decode(hex, &mut arr)?;
        Ok(Self(arr))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether this is the all-zeros null OID.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    /// The first digest byte, used to index fan-out tables.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Whether the hex form starts with the given prefix (case-insensitive).
    pub fn starts_with_hex(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(&prefix.to_ascii_lowercase())
    }

    /// The loose object path component: `"xx/xxxx…"`.
    pub fn loose_path(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], &hex[2..])
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", &self.to_hex()[..8])
    }
}

impl FromStr for Oid {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for Oid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

    #[test]
    fn from_hex_and_back() {
        let oid = Oid::from_hex(SAMPLE).unwrap();
        assert_eq!(oid.to_hex(), SAMPLE);
        let parsed: Oid = SAMPLE.parse().unwrap();
        assert_eq!(parsed, oid);
    }

    #[test]
    fn from_hex_uppercase() {
        let upper = Oid::from_hex(&SAMPLE.to_ascii_uppercase()).unwrap();
        assert_eq!(upper, Oid::from_hex(SAMPLE).unwrap());
    }

    #[test]
    fn from_hex_wrong_length() {
        assert!(matches!(
            Oid::from_hex("abcd").unwrap_err(),
            HashError::InvalidHexLength { expected: 40, .. }
        ));
    }

    #[test]
    fn from_bytes_wrong_length() {
        assert!(matches!(
            Oid::from_bytes(&[0u8; 10]).unwrap_err(),
            HashError::InvalidHashLength {
                expected: 20,
                actual: 10
            }
        ));
    }

    #[test]
    fn null_oid() {
        assert!(Oid::NULL.is_null());
        assert!(!Oid::from_hex(SAMPLE).unwrap().is_null());
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = Oid::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = Oid::from_hex("0000000000000000000000000000000000000002").unwrap();
        assert!(a < b);
    }

    #[test]
    fn debug_shows_short_hash() {
        let oid = Oid::from_hex(SAMPLE).unwrap();
        assert_eq!(format!("{:?}", oid), "Oid(da39a3ee)");
    }

    #[test]
    fn usable_as_map_key() {
        let oid = Oid::from_hex(SAMPLE).unwrap();
        let mut map = HashMap::new();
        map.insert(oid, 1);
        assert_eq!(map.get(&oid), Some(&1));
    }

    #[test]
    fn loose_path_splits_after_two_digits() {
        let oid = Oid::from_hex(SAMPLE).unwrap();
        assert_eq!(oid.loose_path(), format!("da/{}", &SAMPLE[2..]));
    }

    #[test]
    fn starts_with_hex_prefix() {
        let oid = Oid::from_hex(SAMPLE).unwrap();
        assert!(oid.starts_with_hex("da39"));
        assert!(oid.starts_with_hex("DA39"));
        assert!(!oid.starts_with_hex("beef"));
    }
}
