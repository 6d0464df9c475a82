//! Encoding of durable records.
//!
//! Records are JSON, optionally gzipped, optionally sealed with
//! ChaCha20-Poly1305. The file extension records which steps were applied
//! (`json`, `json.gz`, `json.enc`, `json.gz.enc`) so a store written under
//! one setting stays readable after the setting changes.

use std::io::{Read, Write};

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use courier_config::PersistenceConfig;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::QueueError;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits).
pub const KEY_SIZE: usize = 32;

const JSON_EXT: &str = "json";
const GZIP_EXT: &str = "gz";
const SEALED_EXT: &str = "enc";

/// Encoder/decoder for store records.
#[derive(Clone, Default)]
pub struct RecordCodec {
    compress: bool,
    key: Option<[u8; KEY_SIZE]>,
}

impl std::fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCodec")
            .field("compress", &self.compress)
            .field("encrypted", &self.key.is_some())
            .finish()
    }
}

impl RecordCodec {
    /// Plain JSON records.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Seal records with a key derived from `passphrase` (SHA-256).
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.key = Some(derive_key(passphrase));
        self
    }

    /// Build the codec described by the persistence config.
    ///
    /// With encryption on but no passphrase in the environment, records are
    /// written unencrypted and a warning is logged.
    pub fn from_config(config: &PersistenceConfig) -> Self {
        let mut codec = Self::plain().with_compression(config.compression);
        if config.encryption {
            match std::env::var(&config.encryption_key_env) {
                Ok(passphrase) if !passphrase.is_empty() => {
                    codec = codec.with_passphrase(&passphrase);
                }
                _ => warn!(
                    "persistence.encryption is on but {} is not set; writing unencrypted records",
                    config.encryption_key_env
                ),
            }
        }
        codec
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// File extension for records this codec writes.
    pub fn extension(&self) -> String {
        let mut ext = JSON_EXT.to_string();
        if self.compress {
            ext.push('.');
            ext.push_str(GZIP_EXT);
        }
        if self.key.is_some() {
            ext.push('.');
            ext.push_str(SEALED_EXT);
        }
        ext
    }

    /// Whether `file_name` looks like a record in any encoding.
    pub fn is_record_file(file_name: &str) -> bool {
        let Some((_, ext)) = file_name.split_once('.') else {
            return false;
        };
        matches!(ext, "json" | "json.gz" | "json.enc" | "json.gz.enc")
    }

    /// Strip the record extension from a file name.
    pub fn record_stem(file_name: &str) -> Option<&str> {
        if !Self::is_record_file(file_name) {
            return None;
        }
        file_name.split_once('.').map(|(stem, _)| stem)
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, QueueError> {
        let mut bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| QueueError::Codec(format!("Failed to serialize record: {}", e)))?;

        if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&bytes)
                .map_err(|e| QueueError::Codec(format!("Failed to compress record: {}", e)))?;
            bytes = encoder
                .finish()
                .map_err(|e| QueueError::Codec(format!("Failed to compress record: {}", e)))?;
        }

        if let Some(key) = &self.key {
            bytes = seal(key, &bytes)?;
        }

        Ok(bytes)
    }

    /// Decode a record, using `file_name` to decide which steps to undo.
    pub fn decode<T: DeserializeOwned>(
        &self,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<T, QueueError> {
        let mut data = bytes.to_vec();

        if file_name.ends_with(&format!(".{}", SEALED_EXT)) {
            let key = self.key.as_ref().ok_or_else(|| {
                QueueError::Codec(format!("{} is encrypted and no key is configured", file_name))
            })?;
            data = open(key, &data)?;
        }

        let unsealed = file_name.trim_end_matches(&format!(".{}", SEALED_EXT));
        if unsealed.ends_with(&format!(".{}", GZIP_EXT)) {
            let mut decoder = GzDecoder::new(data.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| QueueError::Codec(format!("Failed to decompress record: {}", e)))?;
            data = out;
        }

        serde_json::from_slice(&data)
            .map_err(|e| QueueError::Codec(format!("Failed to deserialize record: {}", e)))
    }
}

fn derive_key(passphrase: &str) -> [u8; KEY_SIZE] {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&digest);
    key
}

/// Encrypt with a fresh random nonce, returned as `nonce || ciphertext`.
fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, QueueError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| QueueError::Codec(e.to_string()))?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| QueueError::Codec(format!("Failed to encrypt record: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>, QueueError> {
    if sealed.len() < NONCE_SIZE {
        return Err(QueueError::Codec("Encrypted record is truncated".to_string()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| QueueError::Codec(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| QueueError::Codec(format!("Failed to decrypt record: {}", e)))
}
