//! Field-level encryption for registration PII.
//!
//! Email and phone are sealed with XChaCha20-Poly1305 under a key derived
//! once from the configured secret. Each encryption draws a fresh 24-byte
//! nonce, so the stored text is `hex(nonce):hex(ciphertext||tag)` and two
//! encryptions of the same input never match. Equality lookups go through
//! [`FieldCipher::hash`] instead.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of the XChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 24;

const SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("field encryption failed")]
    Encrypt,
}

/// Outcome of [`FieldCipher::decrypt`].
///
/// Rows written before encryption was introduced hold plaintext. Those come
/// back as `PassThrough` so callers can tell a real decryption from a value
/// that was handed back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptedField {
    Decrypted(String),
    PassThrough(String),
}

impl DecryptedField {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, DecryptedField::PassThrough(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            DecryptedField::Decrypted(text) | DecryptedField::PassThrough(text) => text,
        }
    }

    pub fn into_inner(self) -> String {
        match self {
            DecryptedField::Decrypted(text) | DecryptedField::PassThrough(text) => text,
        }
    }
}

pub struct FieldCipher {
    cipher: XChaCha20Poly1305,
}

impl FieldCipher {
    /// Derive the 256-bit key as SHA-256 of the configured secret.
    pub fn from_secret(secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        Ok(format!("{}{}{}", hex::encode(nonce), SEPARATOR, hex::encode(sealed)))
    }

    /// Never fails: anything that does not open under this key is returned
    /// as [`DecryptedField::PassThrough`].
    pub fn decrypt(&self, stored: &str) -> DecryptedField {
        match self.try_open(stored) {
            Some(plaintext) => DecryptedField::Decrypted(plaintext),
            None => DecryptedField::PassThrough(stored.to_string()),
        }
    }

    fn try_open(&self, stored: &str) -> Option<String> {
        let (nonce_hex, body_hex) = stored.split_once(SEPARATOR)?;
        let nonce = hex::decode(nonce_hex).ok()?;
        if nonce.len() != NONCE_SIZE {
            return None;
        }
        let body = hex::decode(body_hex).ok()?;
        let opened = self
            .cipher
            .decrypt(XNonce::from_slice(&nonce), body.as_slice())
            .ok()?;
        String::from_utf8(opened).ok()
    }

    /// Deterministic lookup key: lower-case hex SHA-256.
    pub fn hash(&self, plaintext: &str) -> String {
        hex::encode(Sha256::digest(plaintext.as_bytes()))
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldCipher { key: <redacted> }")
    }
}
