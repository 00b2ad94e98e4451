//! Versioned postcard envelope: the "serialize" step of value encoding.
//!
//! Every cached value is wrapped before any compression or encryption:
//!
//! ```text
//! ┌─────────────────┬──────────────────┬──────────────────────────┐
//! │ MAGIC (4 bytes) │ VERSION (varint) │ POSTCARD PAYLOAD (N)     │
//! └─────────────────┴──────────────────┴──────────────────────────┘
//!   "CFCD"             u32                postcard::to_allocvec(T)
//! ```
//!
//! The header is checked before the payload is touched, so foreign bytes
//! fail as [`Error::InvalidCacheEntry`] and entries written by an older
//! schema fail as [`Error::VersionMismatch`] instead of decoding into
//! garbage. Either way the caller should treat the entry as a miss.
//!
//! ```rust
//! use cache_facade::serialization::{decode_envelope, encode_envelope};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Report {
//!     id: u64,
//!     rows: Vec<String>,
//! }
//!
//! # fn main() -> cache_facade::Result<()> {
//! let report = Report { id: 42, rows: vec!["total".to_string()] };
//! let bytes = encode_envelope(&report)?;
//! assert_eq!(&bytes[0..4], b"CFCD");
//! assert_eq!(decode_envelope::<Report>(&bytes)?, report);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Leading signature of every envelope.
pub const CACHE_MAGIC: [u8; 4] = *b"CFCD";

/// Schema version written into new envelopes.
///
/// Bump it whenever a cached type changes shape (fields added, removed,
/// retyped or reordered, enum variants changed). Entries written under the
/// old number then read as misses and get recomputed.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// A value plus its magic and schema version.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    pub magic: [u8; 4],
    pub version: u32,
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    pub fn new(payload: T) -> Self {
        CacheEnvelope {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

// Same leading fields as `CacheEnvelope`; postcard writes struct fields back
// to back, so this decodes the header and leaves the payload bytes untouched.
#[derive(Deserialize)]
struct EnvelopeHeader {
    magic: [u8; 4],
    version: u32,
}

/// Wrap `value` in an envelope and serialize it with postcard.
///
/// # Errors
/// `SerializationError` if postcard rejects the value.
pub fn encode_envelope<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(&CacheEnvelope::new(value)).map_err(|e| {
        error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Validate the envelope header, then decode the payload.
///
/// # Errors
/// - `InvalidCacheEntry` for a truncated header or wrong magic
/// - `VersionMismatch` for another schema version
/// - `DeserializationError` for a payload that does not decode as `T`
pub fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (header, payload) = postcard::take_from_bytes::<EnvelopeHeader>(bytes)
        .map_err(|e| Error::InvalidCacheEntry(format!("unreadable envelope header: {}", e)))?;

    if header.magic != CACHE_MAGIC {
        error!(
            "Invalid cache magic: expected {:?}, got {:?}",
            CACHE_MAGIC, header.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, header.magic
        )));
    }

    if header.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, header.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: header.version,
        });
    }

    postcard::from_bytes(payload).map_err(|e| {
        error!("Cache payload deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Report {
        id: u64,
        title: String,
        published: bool,
    }

    fn report() -> Report {
        Report {
            id: 42,
            title: "quarterly".to_string(),
            published: true,
        }
    }

    #[test]
    fn test_roundtrip() {
        let bytes = encode_envelope(&report()).unwrap();
        let decoded: Report = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, report());
    }

    #[test]
    fn test_envelope_matches_struct_layout() {
        let bytes = encode_envelope(&report()).unwrap();

        let envelope: CacheEnvelope<Report> = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(envelope, CacheEnvelope::new(report()));
        assert_eq!(&bytes[..4], &CACHE_MAGIC);
    }

    #[test]
    fn test_unsized_values() {
        let bytes = encode_envelope("plain text").unwrap();
        let decoded: String = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, "plain text");

        let bytes = encode_envelope(&[1u8, 2, 3][..]).unwrap();
        let decoded: Vec<u8> = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn test_wrong_magic_rejected_before_payload() {
        let mut bytes = encode_envelope(&report()).unwrap();
        bytes[..4].copy_from_slice(b"CKIT");

        match decode_envelope::<Report>(&bytes) {
            Err(Error::InvalidCacheEntry(msg)) => assert!(msg.contains("magic")),
            other => panic!("Expected InvalidCacheEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(matches!(
            decode_envelope::<Report>(b"CF"),
            Err(Error::InvalidCacheEntry(_))
        ));
        assert!(matches!(
            decode_envelope::<Report>(&[]),
            Err(Error::InvalidCacheEntry(_))
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut envelope = CacheEnvelope::new(report());
        envelope.version = CURRENT_SCHEMA_VERSION + 1;
        let bytes = postcard::to_allocvec(&envelope).unwrap();

        match decode_envelope::<Report>(&bytes) {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, CURRENT_SCHEMA_VERSION + 1);
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut bytes = encode_envelope(&report()).unwrap();
        bytes.truncate(8);

        assert!(matches!(
            decode_envelope::<Report>(&bytes),
            Err(Error::DeserializationError(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(
            encode_envelope(&report()).unwrap(),
            encode_envelope(&report().clone()).unwrap()
        );
    }

    #[test]
    fn test_smaller_than_json() {
        let envelope = encode_envelope(&report()).unwrap();
        let json = serde_json::to_vec(&report()).unwrap();

        assert!(
            envelope.len() < json.len(),
            "postcard envelope ({} bytes) should be smaller than JSON ({} bytes)",
            envelope.len(),
            json.len()
        );
    }
}
