//! Value encoding: serialize → compress → encrypt, and back.
//!
//! [`CacheItemEncoder`] applies the transforms a key's [`StorageStyle`] asks
//! for, always in the same order. `Unmodified` values are stored as the plain
//! [envelope](crate::serialization) bytes.
//!
//! The transforms sit behind the narrow [`Compressor`] and [`Encryptor`]
//! traits. The bundled implementations are raw DEFLATE ([`DeflateCompressor`])
//! and AES-256-GCM ([`Aes256GcmEncryptor`]).

use crate::error::{Error, Result};
use crate::key::StorageStyle;
use crate::serialization::{decode_envelope, encode_envelope};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

/// Environment variable holding a base64 AES-256 key.
pub const ENCRYPTION_KEY_ENV: &str = "CACHE_ENCRYPTION_KEY";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub trait Compressor: Send + Sync {
    /// # Errors
    /// `CompressionError` on failure.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// # Errors
    /// `CompressionError` when `data` is not a valid stream.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

pub trait Encryptor: Send + Sync {
    /// # Errors
    /// `EncryptionError` on failure.
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// # Errors
    /// `EncryptionError` for a wrong key or tampered ciphertext.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Largest value [`DeflateCompressor`] inflates unless told otherwise.
pub const DEFAULT_MAX_INFLATED: u64 = 64 * 1024 * 1024;

/// Raw DEFLATE (no zlib or gzip framing).
///
/// Inflating stops with `CompressionError` past `max_inflated` bytes, so a
/// corrupt or hostile entry cannot expand without bound.
#[derive(Clone, Copy, Debug)]
pub struct DeflateCompressor {
    level: Compression,
    max_inflated: u64,
}

impl DeflateCompressor {
    /// `level` ranges 0 (store) to 9 (best).
    pub fn with_level(level: u32) -> Self {
        DeflateCompressor {
            level: Compression::new(level.min(9)),
            ..Self::default()
        }
    }

    pub fn with_max_inflated(mut self, bytes: u64) -> Self {
        self.max_inflated = bytes;
        self
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        DeflateCompressor {
            level: Compression::default(),
            max_inflated: DEFAULT_MAX_INFLATED,
        }
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), self.level);
        encoder
            .write_all(data)
            .map_err(|e| Error::CompressionError(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| Error::CompressionError(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let hint = (data.len() as u64).saturating_mul(2).min(self.max_inflated);
        let mut out = Vec::with_capacity(hint as usize);
        // One byte past the limit tells "exactly at" from "over"
        DeflateDecoder::new(data)
            .take(self.max_inflated.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| Error::CompressionError(e.to_string()))?;

        if out.len() as u64 > self.max_inflated {
            return Err(Error::CompressionError(format!(
                "inflated value exceeds {} bytes",
                self.max_inflated
            )));
        }
        Ok(out)
    }
}

/// AES-256-GCM with a fresh random nonce per value.
///
/// Output layout is `nonce (12 bytes) || ciphertext+tag`.
#[derive(Clone)]
pub struct Aes256GcmEncryptor {
    cipher: Aes256Gcm,
}

impl Aes256GcmEncryptor {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Aes256GcmEncryptor {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// # Errors
    /// `ConfigurationError` unless `encoded` is base64 of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::ConfigurationError(format!("encryption key is not base64: {}", e)))?;

        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            Error::ConfigurationError(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;

        Ok(Self::new(key))
    }

    /// Read the key from `CACHE_ENCRYPTION_KEY`.
    ///
    /// # Errors
    /// `ConfigurationError` if the variable is unset or malformed.
    pub fn from_env() -> Result<Self> {
        let encoded = std::env::var(ENCRYPTION_KEY_ENV).map_err(|_| {
            Error::ConfigurationError(format!("{} is not set", ENCRYPTION_KEY_ENV))
        })?;
        Self::from_base64(&encoded)
    }
}

impl fmt::Debug for Aes256GcmEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Aes256GcmEncryptor { .. }")
    }
}

impl Encryptor for Aes256GcmEncryptor {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, data)
            .map_err(|e| Error::EncryptionError(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::EncryptionError(format!(
                "ciphertext too short: {} bytes",
                data.len()
            )));
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                Error::EncryptionError("decryption failed: wrong key or tampered value".to_string())
            })
    }
}

/// Applies a [`StorageStyle`] to values on their way in and out of the cache.
///
/// # Example
///
/// ```
/// use cache_facade::encoding::{Aes256GcmEncryptor, CacheItemEncoder};
/// use cache_facade::key::StorageStyle;
///
/// # fn main() -> cache_facade::Result<()> {
/// let encoder = CacheItemEncoder::new().with_encryptor(Aes256GcmEncryptor::new([7; 32]));
///
/// let bytes = encoder.encode(&vec![1u32, 2, 3], StorageStyle::CompressedAndEncrypted)?;
/// let back: Vec<u32> = encoder.decode(&bytes, StorageStyle::CompressedAndEncrypted)?;
/// assert_eq!(back, vec![1, 2, 3]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CacheItemEncoder {
    compressor: Arc<dyn Compressor>,
    encryptor: Option<Arc<dyn Encryptor>>,
}

impl CacheItemEncoder {
    /// DEFLATE compression, no encryption configured.
    pub fn new() -> Self {
        CacheItemEncoder {
            compressor: Arc::new(DeflateCompressor::default()),
            encryptor: None,
        }
    }

    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Arc::new(compressor);
        self
    }

    pub fn with_encryptor(mut self, encryptor: impl Encryptor + 'static) -> Self {
        self.encryptor = Some(Arc::new(encryptor));
        self
    }

    pub fn has_encryptor(&self) -> bool {
        self.encryptor.is_some()
    }

    /// # Errors
    /// Serialization, compression or encryption errors; `ConfigurationError`
    /// if `style` wants encryption and no encryptor is configured.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T, style: StorageStyle) -> Result<Vec<u8>> {
        let mut bytes = encode_envelope(value)?;
        if style.is_compressed() {
            bytes = self.compressor.compress(&bytes)?;
        }
        if style.is_encrypted() {
            bytes = self.encryptor()?.encrypt(&bytes)?;
        }
        Ok(bytes)
    }

    /// Inverse of [`encode`](Self::encode) for the same `style`.
    ///
    /// # Errors
    /// Any transform or envelope error.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8], style: StorageStyle) -> Result<T> {
        let decrypted;
        let mut bytes = bytes;
        if style.is_encrypted() {
            decrypted = self.encryptor()?.decrypt(bytes)?;
            bytes = &decrypted;
        }

        let decompressed;
        if style.is_compressed() {
            decompressed = self.compressor.decompress(bytes)?;
            bytes = &decompressed;
        }

        decode_envelope(bytes)
    }

    fn encryptor(&self) -> Result<&dyn Encryptor> {
        self.encryptor.as_deref().ok_or_else(|| {
            Error::ConfigurationError(
                "storage style requires encryption but no encryptor is configured".to_string(),
            )
        })
    }
}

impl Default for CacheItemEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheItemEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItemEncoder")
            .field("encryptor", &self.encryptor.is_some())
            .finish_non_exhaustive()
    }
}
