//! The log record format: a self-describing, fixed-header frame.
//!
//! ```text
//! offset 0  : u64 timestamp_ms
//! offset 8  : u8  tombstone (0|1)
//! offset 9  : u32 key_size
//! offset 13 : u32 value_size
//! offset 17 : key_size bytes (UTF-8 key)
//! offset 17+key_size : value_size bytes (value)
//! ```
//! All integers are big-endian, matching the on-disk layout fixed by the
//! external interface.

use crate::error::{Error, Result};

/// Fixed header length: 8 (timestamp) + 1 (tombstone) + 4 (key_size) + 4 (value_size).
pub const HEADER_LEN: usize = 17;

/// Hard ceiling on key length, independent of configuration.
pub const MAX_KEY_LEN: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: u64,
    pub tombstone: bool,
    pub key: String,
    pub value: Vec<u8>,
}

/// The total on-disk size of a record framed from the given component sizes.
pub fn framed_size(key_size: u32, value_size: u32) -> usize {
    HEADER_LEN + key_size as usize + value_size as usize
}

/// Encodes a record to its on-disk byte representation.
///
/// `max_value_size` is the configured ceiling (§6); key length is checked
/// against the crate-wide `MAX_KEY_LEN` as well as the caller-supplied
/// `max_key_size`, whichever is stricter.
pub fn encode(
    timestamp: u64,
    tombstone: bool,
    key: &str,
    value: &[u8],
    max_key_size: u32,
    max_value_size: u32,
) -> Result<Vec<u8>> {
    let key_bytes = key.as_bytes();
    if key_bytes.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".into()));
    }
    let limit = max_key_size.min(MAX_KEY_LEN);
    if key_bytes.len() as u32 > limit {
        return Err(Error::InvalidKey(format!(
            "key of {} bytes exceeds max_key_size of {limit} bytes",
            key_bytes.len()
        )));
    }
    if value.len() as u32 > max_value_size {
        return Err(Error::OversizedValue { len: value.len(), max: max_value_size as usize });
    }

    let key_size = key_bytes.len() as u32;
    let value_size = if tombstone { 0 } else { value.len() as u32 };
    let mut buf = Vec::with_capacity(framed_size(key_size, value_size));
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.push(tombstone as u8);
    buf.extend_from_slice(&key_size.to_be_bytes());
    buf.extend_from_slice(&value_size.to_be_bytes());
    buf.extend_from_slice(key_bytes);
    if !tombstone {
        buf.extend_from_slice(value);
    }
    Ok(buf)
}

/// Header fields decoded ahead of the variable-length payload.
pub struct Header {
    pub timestamp: u64,
    pub tombstone: bool,
    pub key_size: u32,
    pub value_size: u32,
}

/// Decodes just the fixed 17-byte header, without touching the payload.
pub fn decode_header(bytes: &[u8]) -> Result<Header> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Truncated);
    }
    let timestamp = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
    // Fail-closed: anything other than a clean 0 is treated as a tombstone,
    // so a bit-flipped flag byte can never resurrect deleted data.
    let tombstone = bytes[8] != 0;
    let key_size = u32::from_be_bytes(bytes[9..13].try_into().unwrap());
    let value_size = u32::from_be_bytes(bytes[13..17].try_into().unwrap());
    Ok(Header { timestamp, tombstone, key_size, value_size })
}

/// Decodes a full record from a buffer that holds at least the framed bytes.
/// Returns the record and the number of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(Record, usize)> {
    let header = decode_header(bytes)?;
    let total = framed_size(header.key_size, header.value_size);
    if bytes.len() < total {
        return Err(Error::Truncated);
    }
    let key_start = HEADER_LEN;
    let key_end = key_start + header.key_size as usize;
    let value_end = key_end + header.value_size as usize;
    let key = String::from_utf8(bytes[key_start..key_end].to_vec())
        .map_err(|_| Error::InvalidKey("key is not valid UTF-8".into()))?;
    let value = if header.tombstone { Vec::new() } else { bytes[key_end..value_end].to_vec() };
    Ok((Record { timestamp: header.timestamp, tombstone: header.tombstone, key, value }, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let encoded = encode(42, false, "hello", b"world", 1024, 1024 * 1024).unwrap();
        let (record, consumed) = decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(record.timestamp, 42);
        assert!(!record.tombstone);
        assert_eq!(record.key, "hello");
        assert_eq!(record.value, b"world");
    }

    #[test]
    fn round_trip_tombstone() {
        let encoded = encode(7, true, "gone", b"", 1024, 1024 * 1024).unwrap();
        let (record, _) = decode(&encoded).unwrap();
        assert!(record.tombstone);
        assert_eq!(record.value, Vec::<u8>::new());
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(encode(1, false, "", b"v", 1024, 1024).unwrap_err(), Error::InvalidKey(_)));
    }

    #[test]
    fn oversized_key_rejected() {
        let key = "x".repeat(2000);
        assert!(matches!(encode(1, false, &key, b"v", 1024, 1024).unwrap_err(), Error::InvalidKey(_)));
    }

    #[test]
    fn oversized_value_rejected() {
        let value = vec![0u8; 10];
        let err = encode(1, false, "k", &value, 1024, 5).unwrap_err();
        assert!(matches!(err, Error::OversizedValue { len: 10, max: 5 }));
    }

    #[test]
    fn truncated_header_is_truncated_error() {
        assert!(matches!(decode(&[0u8; 5]).unwrap_err(), Error::Truncated));
    }

    #[test]
    fn truncated_payload_is_truncated_error() {
        let encoded = encode(1, false, "k", b"value", 1024, 1024).unwrap();
        let short = &encoded[..encoded.len() - 1];
        assert!(matches!(decode(short).unwrap_err(), Error::Truncated));
    }

    #[test]
    fn invalid_utf8_key_is_rejected() {
        // Hand-build a frame with a non-UTF-8 key byte.
        let key_size: u32 = 1;
        let value_size: u32 = 0;
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(&key_size.to_be_bytes());
        buf.extend_from_slice(&value_size.to_be_bytes());
        buf.push(0xFF);
        assert!(matches!(decode(&buf).unwrap_err(), Error::InvalidKey(_)));
    }

    #[test]
    fn corrupt_tombstone_byte_fails_closed() {
        let mut buf = encode(1, false, "k", b"value", 1024, 1024).unwrap();
        buf[8] = 0x7A; // neither 0 nor 1
        let (record, _) = decode(&buf).unwrap();
        assert!(record.tombstone, "a garbled tombstone byte must be treated as a delete");
    }

    #[test]
    fn framed_size_matches_encoded_length() {
        let encoded = encode(1, false, "key", b"val", 1024, 1024).unwrap();
        assert_eq!(framed_size(3, 3), encoded.len());
    }
}
