//! Cache keys and their canonical string encoding.
//!
//! A [`Key`] carries everything a backend needs to know about an entry: how long
//! to keep it, how the value is encoded, which expiry semantics to use, and the
//! caller's logical name for it. The canonical form is self-describing, so a
//! key can be rebuilt from the string alone:
//!
//! ```text
//! durationSeconds:storageStyleOrdinal:expirationTypeOrdinal:base64(friendlyName)
//! ```
//!
//! ```
//! use cache_facade::key::{ExpirationType, Key, StorageStyle};
//! use std::time::Duration;
//!
//! # fn main() -> cache_facade::Result<()> {
//! let key = Key::new(
//!     Duration::from_secs(300),
//!     StorageStyle::Unmodified,
//!     ExpirationType::Absolute,
//!     "report-42",
//! )?;
//! assert_eq!(key.encode(), "300:0:0:cmVwb3J0LTQy");
//! assert_eq!(Key::decode("300:0:0:cmVwb3J0LTQy")?, key);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Maximum length of a canonical key string, in characters.
pub const MAX_KEY_LENGTH: usize = 5000;

/// Maximum length of a friendly name, in characters, before encoding.
pub const MAX_FRIENDLY_NAME_LENGTH: usize = 255;

const KEY_PART_DELIMITER: char = ':';
const NANOS_DIGITS: usize = 9;

/// How a cached value is transformed before it reaches the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StorageStyle {
    /// Serialized only.
    #[default]
    Unmodified = 0,
    Compressed = 1,
    Encrypted = 2,
    /// Compressed first, then encrypted.
    CompressedAndEncrypted = 3,
}

impl StorageStyle {
    /// Wire ordinal of this style.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Style for a wire ordinal, if it names one.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(StorageStyle::Unmodified),
            1 => Some(StorageStyle::Compressed),
            2 => Some(StorageStyle::Encrypted),
            3 => Some(StorageStyle::CompressedAndEncrypted),
            _ => None,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            StorageStyle::Compressed | StorageStyle::CompressedAndEncrypted
        )
    }

    pub fn is_encrypted(self) -> bool {
        matches!(
            self,
            StorageStyle::Encrypted | StorageStyle::CompressedAndEncrypted
        )
    }
}

impl fmt::Display for StorageStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageStyle::Unmodified => write!(f, "Unmodified"),
            StorageStyle::Compressed => write!(f, "Compressed"),
            StorageStyle::Encrypted => write!(f, "Encrypted"),
            StorageStyle::CompressedAndEncrypted => write!(f, "CompressedAndEncrypted"),
        }
    }
}

/// Expiry semantics requested of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ExpirationType {
    /// Expire a fixed duration after the write.
    #[default]
    Absolute = 0,
    /// Expire a fixed duration after the last access.
    Sliding = 1,
}

impl ExpirationType {
    /// Wire ordinal of this expiration type.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Expiration type for a wire ordinal, if it names one.
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(ExpirationType::Absolute),
            1 => Some(ExpirationType::Sliding),
            _ => None,
        }
    }
}

impl fmt::Display for ExpirationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpirationType::Absolute => write!(f, "Absolute"),
            ExpirationType::Sliding => write!(f, "Sliding"),
        }
    }
}

impl FromStr for ExpirationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "absolute" => Ok(ExpirationType::Absolute),
            "sliding" => Ok(ExpirationType::Sliding),
            other => Err(Error::InvalidArgument(format!(
                "unknown expiration type '{}'",
                other
            ))),
        }
    }
}

/// Identity and storage metadata for one cache entry.
///
/// Keys are immutable values. Build one with [`Key::new`] right before a cache
/// operation, or rebuild one from its canonical string with [`Key::decode`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    duration_to_store: Duration,
    storage_style: StorageStyle,
    expiration_type: ExpirationType,
    friendly_name: String,
}

impl Key {
    /// Build a key from its components.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `duration_to_store` is zero, or the
    /// friendly name is blank or longer than [`MAX_FRIENDLY_NAME_LENGTH`].
    pub fn new(
        duration_to_store: Duration,
        storage_style: StorageStyle,
        expiration_type: ExpirationType,
        friendly_name: impl Into<String>,
    ) -> Result<Self> {
        let friendly_name = friendly_name.into();

        if duration_to_store.is_zero() {
            return Err(Error::InvalidArgument(
                "duration_to_store must be greater than zero".to_string(),
            ));
        }
        if friendly_name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "friendly_name not supplied".to_string(),
            ));
        }
        let name_length = friendly_name.chars().count();
        if name_length > MAX_FRIENDLY_NAME_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "friendly_name is {} characters, maximum is {}",
                name_length, MAX_FRIENDLY_NAME_LENGTH
            )));
        }

        Ok(Key {
            duration_to_store,
            storage_style,
            expiration_type,
            friendly_name,
        })
    }

    pub fn duration_to_store(&self) -> Duration {
        self.duration_to_store
    }

    pub fn storage_style(&self) -> StorageStyle {
        self.storage_style
    }

    pub fn expiration_type(&self) -> ExpirationType {
        self.expiration_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn is_compressed(&self) -> bool {
        self.storage_style.is_compressed()
    }

    pub fn is_encrypted(&self) -> bool {
        self.storage_style.is_encrypted()
    }

    /// Canonical string form. Deterministic: equal keys give equal strings.
    pub fn encode(&self) -> String {
        let encoded_name = if self.friendly_name.is_empty() {
            String::new()
        } else {
            BASE64_STANDARD.encode(self.friendly_name.as_bytes())
        };

        format!(
            "{duration}{d}{style}{d}{expiration}{d}{name}",
            duration = encode_seconds(self.duration_to_store),
            style = self.storage_style.ordinal(),
            expiration = self.expiration_type.ordinal(),
            name = encoded_name,
            d = KEY_PART_DELIMITER,
        )
    }

    /// Rebuild a key from its canonical string.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKeyFormat` for any malformed input; no other
    /// error kind is produced.
    pub fn decode(key: &str) -> Result<Self> {
        let length = key.chars().count();
        if length > MAX_KEY_LENGTH {
            return Err(Error::InvalidKeyFormat(format!(
                "key is {} characters, maximum is {}",
                length, MAX_KEY_LENGTH
            )));
        }

        let parts: Vec<&str> = key.split(KEY_PART_DELIMITER).collect();
        let [duration, style, expiration, name] = parts.as_slice() else {
            return Err(invalid_key(key, "expected four ':'-delimited fields"));
        };

        let duration_to_store =
            decode_seconds(duration).ok_or_else(|| invalid_key(key, "bad duration"))?;
        if duration_to_store.is_zero() {
            return Err(invalid_key(key, "duration must be greater than zero"));
        }

        let storage_style = parse_ordinal(style)
            .and_then(StorageStyle::from_ordinal)
            .ok_or_else(|| invalid_key(key, "bad storage style ordinal"))?;

        let expiration_type = parse_ordinal(expiration)
            .and_then(ExpirationType::from_ordinal)
            .ok_or_else(|| invalid_key(key, "bad expiration type ordinal"))?;

        let friendly_name = if name.is_empty() {
            String::new()
        } else {
            let bytes = BASE64_STANDARD
                .decode(name)
                .map_err(|_| invalid_key(key, "friendly name is not base64"))?;
            String::from_utf8(bytes).map_err(|_| invalid_key(key, "friendly name is not UTF-8"))?
        };

        Ok(Key {
            duration_to_store,
            storage_style,
            expiration_type,
            friendly_name,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::decode(s)
    }
}

fn invalid_key(key: &str, reason: &str) -> Error {
    Error::InvalidKeyFormat(format!("{} ({})", key, reason))
}

/// Exact decimal seconds: `300`, `0.5`, `1.000000001`.
fn encode_seconds(duration: Duration) -> String {
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if nanos == 0 {
        return secs.to_string();
    }

    let fraction = format!("{:0width$}", nanos, width = NANOS_DIGITS);
    format!("{}.{}", secs, fraction.trim_end_matches('0'))
}

fn decode_seconds(field: &str) -> Option<Duration> {
    let (whole, fraction) = match field.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (field, None),
    };

    if !is_digits(whole) {
        return None;
    }
    let secs: u64 = whole.parse().ok()?;

    let nanos = match fraction {
        None => 0,
        Some(fraction) if is_digits(fraction) && fraction.len() <= NANOS_DIGITS => {
            let padded = format!("{:0<width$}", fraction, width = NANOS_DIGITS);
            padded.parse::<u32>().ok()?
        }
        Some(_) => return None,
    };

    Some(Duration::new(secs, nanos))
}

fn parse_ordinal(field: &str) -> Option<u8> {
    if !is_digits(field) {
        return None;
    }
    field.parse().ok()
}

// `u64::from_str` accepts a leading '+', which the wire format does not.
fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}
