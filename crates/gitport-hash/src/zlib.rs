//! Zlib deflate/inflate framing.
//!
//! Loose objects are whole zlib streams; packfile entries are zlib
//! streams laid back to back, so the pack reader needs to know how many
//! compressed bytes each entry consumed in order to step to the next one.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::HashError;

/// Compress bytes into a zlib stream.
pub fn deflate(data: &[u8], level: u32) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    // Writing into a Vec cannot fail.
    encoder.write_all(data).expect("write to Vec");
    encoder.finish().expect("finish to Vec")
}

/// Decompress a complete zlib stream. `size_hint` pre-sizes the output
/// buffer when the caller knows the uncompressed length.
pub fn inflate(data: &[u8], size_hint: Option<usize>) -> Result<Vec<u8>, HashError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(size_hint.unwrap_or(data.len() * 2));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| HashError::Inflate(e.to_string()))?;
    if let Some(expected) = size_hint {
        if out.len() != expected {
            return Err(HashError::SizeMismatch {
                expected,
                actual: out.len(),
            });
        }
    }
    Ok(out)
}

/// Decompress one zlib stream from the front of `data`, returning the
/// inflated bytes and the number of compressed bytes consumed.
///
/// `expected_len` is the uncompressed length declared by the entry
/// header; a mismatch is an error.
pub fn inflate_with_consumed(
    data: &[u8],
    expected_len: usize,
) -> Result<(Vec<u8>, usize), HashError> {
    let mut inflater = Decompress::new(true);
    let mut out: Vec<u8> = Vec::with_capacity(expected_len.max(64));

    loop {
        let consumed = inflater.total_in() as usize;
        let status = inflater
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Finish)
            .map_err(|e| HashError::Inflate(e.to_string()))?;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    out.reserve(out.capacity().max(64));
                } else if inflater.total_in() as usize >= data.len() {
                    return Err(HashError::TruncatedStream {
                        consumed: inflater.total_in() as usize,
                    });
                }
            }
        }
    }

    if out.len() != expected_len {
        return Err(HashError::SizeMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }

    Ok((out, inflater.total_in() as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_inflate_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = deflate(&data, 6);
        let inflated = inflate(&compressed, Some(data.len())).unwrap();
        assert_eq!(inflated, data);
    }

    #[test]
    fn inflate_rejects_size_mismatch() {
        let compressed = deflate(b"abc", 6);
        assert!(matches!(
            inflate(&compressed, Some(10)).unwrap_err(),
            HashError::SizeMismatch {
                expected: 10,
                actual: 3
            }
        ));
    }

    #[test]
    fn consumed_stops_at_stream_boundary() {
        // Two zlib streams back to back, like adjacent pack entries.
        let first = b"first entry payload";
        let second = b"second";
        let mut buf = deflate(first, 6);
        let first_len = buf.len();
        buf.extend_from_slice(&deflate(second, 6));

        let (data, consumed) = inflate_with_consumed(&buf, first.len()).unwrap();
        assert_eq!(data, first);
        assert_eq!(consumed, first_len);

        let (data2, _) = inflate_with_consumed(&buf[consumed..], second.len()).unwrap();
        assert_eq!(data2, second);
    }

    #[test]
    fn truncated_stream_errors() {
        let compressed = deflate(b"some payload that compresses", 6);
        let truncated = &compressed[..compressed.len() / 2];
        assert!(inflate_with_consumed(truncated, 28).is_err());
    }

    #[test]
    fn empty_payload_roundtrip() {
        let compressed = deflate(b"", 6);
        let (data, consumed) = inflate_with_consumed(&compressed, 0).unwrap();
        assert!(data.is_empty());
        assert_eq!(consumed, compressed.len());
    }
}
