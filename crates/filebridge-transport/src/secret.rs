//! Scrambled private-key storage
//!
//! SFTP private keys are kept at rest as a text blob: the PEM text is
//! deflate-compressed, XORed with a keystream derived from a fixed key, and
//! base64-encoded. This keeps the key out of casual view in the database
//! and in config dumps.
//!
//! ## Design Notes
//!
//! - This is obfuscation, not encryption. Anyone holding the binary can
//!   restore the key.
//! - The scheme sits behind [`SecretScrambler`] so a real key store can
//!   replace it without touching the SFTP transport.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use filebridge_core::domain::{DomainError, ScrambledSecret};

/// Default keystream seed
const DEFAULT_KEY: &[u8] = b"FileBridge/secret-scrambler/v1";

/// Reversible transformation between a plain secret and its stored form
pub trait SecretScrambler: Send + Sync {
    /// Turns plain text into its at-rest form
    fn scramble(&self, plain: &str) -> Result<ScrambledSecret, DomainError>;

    /// Restores plain text from its at-rest form
    fn unscramble(&self, secret: &ScrambledSecret) -> Result<String, DomainError>;
}

/// Deflate, XOR keystream, base64
#[derive(Debug, Clone)]
pub struct XorDeflateScrambler {
    key: Vec<u8>,
}

impl XorDeflateScrambler {
    /// Scrambler with a custom keystream seed
    ///
    /// An empty key falls back to the built-in seed.
    pub fn with_key(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        if key.is_empty() {
            Self::default()
        } else {
            Self { key }
        }
    }

    /// XOR is its own inverse, so the same call obfuscates and restores
    fn apply_keystream(&self, data: &mut [u8]) {
        let len = self.key.len();
        for (i, byte) in data.iter_mut().enumerate() {
            let k = self.key[i % len];
            let mix = (i / len) as u8;
            *byte ^= k.wrapping_add(mix.wrapping_mul(31));
        }
    }
}

impl Default for XorDeflateScrambler {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_vec(),
        }
    }
}

impl SecretScrambler for XorDeflateScrambler {
    fn scramble(&self, plain: &str) -> Result<ScrambledSecret, DomainError> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(plain.as_bytes())
            .map_err(|e| DomainError::InvalidSecret(format!("compression failed: {e}")))?;
        let mut data = encoder
            .finish()
            .map_err(|e| DomainError::InvalidSecret(format!("compression failed: {e}")))?;

        self.apply_keystream(&mut data);
        Ok(ScrambledSecret::new(STANDARD.encode(data)))
    }

    fn unscramble(&self, secret: &ScrambledSecret) -> Result<String, DomainError> {
        let mut data = STANDARD
            .decode(secret.as_str().trim())
            .map_err(|e| DomainError::InvalidSecret(format!("not base64: {e}")))?;

        self.apply_keystream(&mut data);

        let mut plain = String::new();
        DeflateDecoder::new(data.as_slice())
            .read_to_string(&mut plain)
            .map_err(|e| DomainError::InvalidSecret(format!("decompression failed: {e}")))?;
        Ok(plain)
    }
}
