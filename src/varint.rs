//! Unsigned LEB128 varint encoding.
//!
//! Used by the arena-backed [`crate::kvstore`] record format and the TCP
//! wire protocol's `key_len`/`value_len` prefixes — both specified in terms
//! of varints rather than the fixed-width little-endian integers the
//! on-disk `encoding` module uses for WAL/manifest/SSTable containers. Kept
//! as its own small module rather than folded into `encoding` so the two
//! length-prefix conventions never get mixed up at a call site.

use thiserror::Error;

/// Errors from varint decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarintError {
    /// The buffer ended before a terminating byte (high bit clear) was seen.
    #[error("truncated varint")]
    Truncated,

    /// The varint would overflow a `u64` (more than 10 continuation bytes).
    #[error("varint overflows u64")]
    Overflow,
}

/// Appends `value` to `buf` as an unsigned LEB128 varint.
pub fn encode_u64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Decodes an unsigned LEB128 varint from the front of `buf`, returning the
/// value and the number of bytes consumed.
pub fn decode_u64(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(VarintError::Overflow);
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }

    Err(VarintError::Truncated)
}

/// Encodes `value` as a `usize` varint (a thin wrapper over [`encode_u64`]
/// for the common case of encoding a length).
pub fn encode_len(value: usize, buf: &mut Vec<u8>) {
    encode_u64(value as u64, buf);
}

/// Decodes a `usize` length prefix written by [`encode_len`].
pub fn decode_len(buf: &[u8]) -> Result<(usize, usize), VarintError> {
    let (value, n) = decode_u64(buf)?;
    Ok((value as usize, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) {
        let mut buf = Vec::new();
        encode_u64(value, &mut buf);
        let (decoded, n) = decode_u64(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(n, buf.len());
    }

    #[test]
    fn round_trips_boundary_values() {
        for value in [
            0u64,
            1,
            127,
            128,
            16383,
            16384,
            u32::MAX as u64,
            u64::MAX,
            u64::MAX - 1,
        ] {
            round_trip(value);
        }
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let mut buf = Vec::new();
        encode_u64(u64::MAX, &mut buf);
        let truncated = &buf[..buf.len() - 1];
        assert_eq!(decode_u64(truncated), Err(VarintError::Truncated));
    }

    #[test]
    fn empty_buffer_is_truncated() {
        assert_eq!(decode_u64(&[]), Err(VarintError::Truncated));
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let mut buf = Vec::new();
        encode_u64(300, &mut buf);
        buf.extend_from_slice(b"trailer");
        let (value, n) = decode_u64(&buf).unwrap();
        assert_eq!(value, 300);
        assert_eq!(&buf[n..], b"trailer");
    }
}
