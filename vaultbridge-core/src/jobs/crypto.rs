//! Authenticated encryption for the job queue file.
//!
//! XChaCha20-Poly1305 with a fresh random 24-byte nonce per call. The output
//! is `nonce || ciphertext || tag`, so the nonce always travels with the data
//! it protects.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{VaultError, VaultResult};

/// Size of the key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the XChaCha20 nonce in bytes.
pub const NONCE_SIZE: usize = 24;
/// Size of the Poly1305 tag in bytes.
pub const TAG_SIZE: usize = 16;

/// How a `hashedPassword` string is turned into raw key bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum KeyEncoding {
    /// Lowercase or uppercase hex.
    Hex,
    /// Standard base64 with padding.
    Base64,
    /// Hex first, then base64.
    #[default]
    Auto,
}

/// Job queue encryption key (256-bit).
///
/// Zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct JobKey([u8; KEY_SIZE]);

impl JobKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copies a key out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidKey`] unless `bytes` is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> VaultResult<Self> {
        let array: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            VaultError::InvalidKey(format!("expected {KEY_SIZE} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Decodes the engine's `hashedPassword` into a key.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidKey`] if the string does not decode under
    /// `encoding` or decodes to anything other than 32 bytes.
    pub fn from_encoded(encoded: &str, encoding: KeyEncoding) -> VaultResult<Self> {
        let encoded = encoded.trim();
        let decoded = Zeroizing::new(match encoding {
            KeyEncoding::Hex => decode_hex(encoded)?,
            KeyEncoding::Base64 => decode_base64(encoded)?,
            KeyEncoding::Auto => match decode_hex(encoded) {
                Ok(bytes) if bytes.len() == KEY_SIZE => bytes,
                _ => decode_base64(encoded)?,
            },
        });
        Self::from_slice(&decoded)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobKey").field("key", &"[REDACTED]").finish()
    }
}

fn decode_hex(encoded: &str) -> VaultResult<Vec<u8>> {
    if encoded.len() % 2 != 0 {
        return Err(VaultError::InvalidKey("hex key has odd length".to_string()));
    }
    hex::decode(encoded).map_err(|e| VaultError::InvalidKey(format!("invalid hex key: {e}")))
}

fn decode_base64(encoded: &str) -> VaultResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| VaultError::InvalidKey(format!("invalid base64 key: {e}")))
}

fn cipher_for(key: &[u8]) -> VaultResult<XChaCha20Poly1305> {
    if key.len() != KEY_SIZE {
        return Err(VaultError::InvalidKey(format!(
            "expected {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| VaultError::InvalidKey("key rejected by cipher".to_string()))
}

/// Encrypts `plaintext` and returns `nonce || ciphertext`.
///
/// # Errors
///
/// - [`VaultError::InvalidKey`] if `key` is not 32 bytes.
/// - [`VaultError::InvalidInput`] if `plaintext` is empty.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = cipher_for(key)?;
    if plaintext.is_empty() {
        return Err(VaultError::InvalidInput("plaintext is empty".to_string()));
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| VaultError::InvalidInput("XChaCha20-Poly1305 encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts `nonce || ciphertext` produced by [`encrypt`].
///
/// # Errors
///
/// - [`VaultError::InvalidKey`] if `key` is not 32 bytes.
/// - [`VaultError::AuthenticationFailed`] if the input is too short to hold a
///   nonce, a tag and at least one byte, or if the tag does not verify.
pub fn decrypt(data: &[u8], key: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = cipher_for(key)?;
    if data.len() <= NONCE_SIZE + TAG_SIZE {
        return Err(VaultError::AuthenticationFailed);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::AuthenticationFailed)
}

/// Overwrites a sensitive buffer with zeros.
pub fn secure_zero(buffer: &mut [u8]) {
    buffer.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_round_trip() {
        let key = random_key();
        let sealed = encrypt(b"[{\"id\":\"a\"}]", &key).expect("encrypt");
        assert_eq!(sealed.len(), NONCE_SIZE + 12 + TAG_SIZE);
        let opened = decrypt(&sealed, &key).expect("decrypt");
        assert_eq!(opened, b"[{\"id\":\"a\"}]");
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let key = random_key();
        let a = encrypt(b"same", &key).expect("encrypt");
        let b = encrypt(b"same", &key).expect("encrypt");
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let sealed = encrypt(b"payload", &random_key()).expect("encrypt");
        let err = decrypt(&sealed, &random_key()).expect_err("must fail");
        assert!(matches!(err, VaultError::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_ciphertext_is_authentication_failure() {
        let key = random_key();
        let mut sealed = encrypt(b"payload", &key).expect("encrypt");
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            decrypt(&sealed, &key),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_truncated_input_is_authentication_failure() {
        let key = random_key();
        let sealed = encrypt(b"payload", &key).expect("encrypt");
        assert!(matches!(
            decrypt(&sealed[..NONCE_SIZE + TAG_SIZE], &key),
            Err(VaultError::AuthenticationFailed)
        ));
        assert!(matches!(
            decrypt(&[], &key),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_key_length_is_enforced() {
        assert!(matches!(
            encrypt(b"payload", &[0u8; 16]),
            Err(VaultError::InvalidKey(_))
        ));
        assert!(matches!(
            decrypt(&[0u8; 64], &[0u8; 31]),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_empty_plaintext_is_rejected() {
        assert!(matches!(
            encrypt(&[], &random_key()),
            Err(VaultError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_secure_zero() {
        let mut buffer = vec![0xAAu8; 48];
        secure_zero(&mut buffer);
        assert!(buffer.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_key_from_hex_and_base64() {
        let raw = random_key();
        let from_hex = JobKey::from_encoded(&hex::encode(raw), KeyEncoding::Hex).expect("hex");
        assert_eq!(from_hex.as_bytes(), &raw);

        let from_b64 =
            JobKey::from_encoded(&STANDARD.encode(raw), KeyEncoding::Base64).expect("b64");
        assert_eq!(from_b64.as_bytes(), &raw);

        let auto_hex = JobKey::from_encoded(&hex::encode_upper(raw), KeyEncoding::Auto)
            .expect("auto hex");
        assert_eq!(auto_hex.as_bytes(), &raw);
        let auto_b64 =
            JobKey::from_encoded(&STANDARD.encode(raw), KeyEncoding::Auto).expect("auto b64");
        assert_eq!(auto_b64.as_bytes(), &raw);
    }

    #[test]
    fn test_key_decoding_rejects_bad_material() {
        assert!(matches!(
            JobKey::from_encoded("abc", KeyEncoding::Hex),
            Err(VaultError::InvalidKey(_))
        ));
        assert!(matches!(
            JobKey::from_encoded("zz".repeat(32).as_str(), KeyEncoding::Hex),
            Err(VaultError::InvalidKey(_))
        ));
        assert!(matches!(
            JobKey::from_encoded(&hex::encode([7u8; 16]), KeyEncoding::Hex),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = JobKey::from_bytes([0x42; KEY_SIZE]);
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("42"));
    }
}
