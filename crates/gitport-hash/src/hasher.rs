//! Incremental SHA-1 hashing over object bytes.

use sha1::{Digest, Sha1};

use crate::Oid;

/// Incremental SHA-1 hasher. Feed byte ranges with [`update`](Self::update),
/// then call [`finalize`](Self::finalize) to obtain the OID.
pub struct Hasher {
    inner: Sha1,
}

impl Hasher {
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    /// Feed more bytes into the hash.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest as an Oid.
    pub fn finalize(self) -> Oid {
        let digest: [u8; 20] = self.inner.finalize().into();
        Oid::from_bytes(&digest).expect("sha1 digest is always 20 bytes")
    }

    /// One-shot digest of a byte slice.
    pub fn digest(data: &[u8]) -> Oid {
        let mut h = Self::new();
        h.update(data);
        h.finalize()
    }

    /// Hash an object's canonical serialization: `<kind> <len>\0<payload>`.
    pub fn hash_object(kind: &str, payload: &[u8]) -> Oid {
        let mut h = Self::new();
        h.update(kind.as_bytes());
        h.update(b" ");
        h.update(payload.len().to_string().as_bytes());
        h.update(b"\0");
        h.update(payload);
        h.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
