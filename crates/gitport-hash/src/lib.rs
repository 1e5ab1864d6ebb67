//! Object identifiers, SHA-1 hashing, and zlib framing.
//!
//! Everything in a git repository is addressed by the SHA-1 of its
//! canonical serialization; this crate owns that identity type plus the
//! deflate/inflate wrappers used by the loose store and packfiles.

mod oid;

pub mod hasher;
pub mod zlib;

pub use oid::Oid;

/// Errors from hashing, hex decoding, and zlib framing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex digit {byte:#04x} at position {position}")]
    InvalidHex { byte: u8, position: usize },

    #[error("invalid hex length: expected {expected}, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("zlib decompression failed: {0}")]
    Inflate(String),

    #[error("zlib stream truncated after {consumed} bytes")]
    TruncatedStream { consumed: usize },

    #[error("inflated size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Decode a hex string into a byte buffer. The buffer length determines
/// the expected number of hex digits.
pub fn hex_decode(hex: &str, out: &mut [u8]) -> Result<(), HashError> {
    let bytes = hex.as_bytes();
    if bytes.len() != out.len() * 2 {
        return Err(HashError::InvalidHexLength {
            expected: out.len() * 2,
            actual: bytes.len(),
        });
    }
    for (i, chunk) in bytes.chunks_exact(2).enumerate() {
        let hi = hex_val(chunk[0]).ok_or(HashError::InvalidHex {
            byte: chunk[0],
            position: i * 2,
        })?;
        let lo = hex_val(chunk[1]).ok_or(HashError::InvalidHex {
            byte: chunk[1],
            position: i * 2 + 1,
        })?;
        out[i] = (hi << 4) | lo;
    }
    Ok(())
}

/// Encode bytes as a lowercase hex string.
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0x0f) as usize] as char);
    }
    s
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes: Vec<u8> = (0..20).collect();
        let hex = hex_encode(&bytes);
        let mut decoded = [0u8; 20];
        hex_decode(&hex, &mut decoded).unwrap();
        assert_eq!(decoded.as_slice(), bytes.as_slice());
    }

    #[test]
    fn hex_decode_rejects_bad_digit() {
        let mut out = [0u8; 1];
        let err = hex_decode("zz", &mut out).unwrap_err();
        assert!(matches!(err, HashError::InvalidHex { position: 0, .. }));
    }

    #[test]
    fn hex_decode_rejects_bad_length() {
        let mut out = [0u8; 2];
        assert!(matches!(
            hex_decode("abc", &mut out).unwrap_err(),
            HashError::InvalidHexLength {
                expected: 4,
                actual: 3
            }
        ));
    }
}
