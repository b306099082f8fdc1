//! Credential cipher for refresh tokens at rest.
//!
//! AES-256-GCM with a random 16-byte IV. The key is stretched once from
//! the process secret with scrypt (N=2^14, r=8, p=1). Envelopes have the
//! form `hex(iv):hex(ciphertext):hex(tag)`.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use std::fmt;

use crate::error::CipherError;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;
const SEPARATOR: char = ':';

/// Salt used by deployments that predate per-deployment salts.
pub const LEGACY_SALT: &str = "salt";

/// Encrypts and decrypts refresh tokens.
///
/// Key material is derived at construction and read-only afterwards.
#[derive(Clone)]
pub struct CredentialCipher {
    aead: Aes256Gcm16,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Derives the key from `secret` and `salt` with scrypt.
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` if the secret is empty or scrypt rejects its
    /// parameters.
    pub fn from_secret(secret: &str, salt: &str) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::KeyDerivation {
                reason: "secret is empty".to_string(),
            });
        }

        let params = scrypt::Params::new(14, 8, 1, KEY_LEN).map_err(|e| {
            CipherError::KeyDerivation {
                reason: e.to_string(),
            }
        })?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(secret.as_bytes(), salt.as_bytes(), &params, &mut key).map_err(|e| {
            CipherError::KeyDerivation {
                reason: e.to_string(),
            }
        })?;

        Ok(Self::from_key(key))
    }

    /// Creates a cipher from raw key bytes.
    #[must_use]
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self {
            aead: Aes256Gcm16::new(GenericArray::from_slice(&key)),
        }
    }

    /// Encrypts `plaintext` into an envelope. Empty input yields `None`.
    ///
    /// # Errors
    ///
    /// Returns `Encryption` if the AEAD rejects the input.
    pub fn encrypt(&self, plaintext: &str) -> Result<Option<String>, CipherError> {
        if plaintext.is_empty() {
            return Ok(None);
        }

        let iv: [u8; IV_LEN] = rand::random();
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .aead
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CipherError::Encryption {
                reason: "AEAD encryption failed".to_string(),
            })?;

        Ok(Some(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            hex::encode(iv),
            hex::encode(&buffer),
            hex::encode(tag)
        )))
    }

    /// Decrypts an envelope. Empty input yields `None`.
    ///
    /// # Errors
    ///
    /// Returns `Format` if the envelope does not split into exactly three
    /// well-formed hex segments, and `Integrity` if the tag does not verify.
    pub fn decrypt(&self, envelope: &str) -> Result<Option<String>, CipherError> {
        if envelope.is_empty() {
            return Ok(None);
        }

        let segments: Vec<&str> = envelope.split(SEPARATOR).collect();
        let [iv, ciphertext, tag] = segments.as_slice() else {
            return Err(CipherError::Format {
                reason: format!("expected 3 segments, got {}", segments.len()),
            });
        };

        let iv = decode_segment("iv", iv, Some(IV_LEN))?;
        let mut buffer = decode_segment("ciphertext", ciphertext, None)?;
        let tag = decode_segment("tag", tag, Some(TAG_LEN))?;

        self.aead
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| CipherError::Integrity)?;

        String::from_utf8(buffer)
            .map(Some)
            .map_err(|_| CipherError::Format {
                reason: "plaintext is not valid UTF-8".to_string(),
            })
    }
}

fn decode_segment(
    name: &str,
    segment: &str,
    expected_len: Option<usize>,
) -> Result<Vec<u8>, CipherError> {
    let bytes = hex::decode(segment).map_err(|e| CipherError::Format {
        reason: format!("{name} is not valid hex: {e}"),
    })?;
    match expected_len {
        Some(expected) if bytes.len() != expected => Err(CipherError::Format {
            reason: format!("{name} must be {expected} bytes, got {}", bytes.len()),
        }),
        _ => Ok(bytes),
    }
}
