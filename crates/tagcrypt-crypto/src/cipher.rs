//! The `CipherEngine` seam and its XChaCha20-Poly1305 implementation
//!
//! Encrypted field format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::error::{CryptoError, CryptoResult};
use crate::hashing::{self, SlowHashParams};
use crate::keys::Dek;
use crate::pepper::Pepper;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Cryptographic primitives consumed by the field engine.
///
/// Encryption must be authenticated: `decrypt` fails on any tampering
/// rather than returning altered plaintext.
pub trait CipherEngine: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: &Dek) -> CryptoResult<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8], key: &Dek) -> CryptoResult<Vec<u8>>;

    /// Deterministic, unsalted digest used for equality lookups.
    fn hash_fast(&self, data: &[u8]) -> String;

    /// Salted, peppered, memory-hard hash in self-describing encoded form.
    fn hash_slow(&self, data: &[u8], params: &SlowHashParams, pepper: &Pepper)
        -> CryptoResult<String>;

    /// Recompute `encoded` for `data` and compare in constant time.
    ///
    /// `Ok(false)` on mismatch; `Err` only for malformed `encoded` input.
    fn verify_slow(&self, data: &[u8], encoded: &str, pepper: &Pepper) -> CryptoResult<bool>;
}

/// XChaCha20-Poly1305 for fields, SHA-256 for lookups, Argon2id for secrets.
#[derive(Debug, Default, Clone, Copy)]
pub struct XChaChaEngine;

impl XChaChaEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CipherEngine for XChaChaEngine {
    fn encrypt(&self, plaintext: &[u8], key: &Dek) -> CryptoResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| CryptoError::Random(e.to_string()))?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &Dek) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed(format!(
                "ciphertext too short: {} bytes (minimum {})",
                ciphertext.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }

        let (nonce_bytes, body) = ciphertext.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

        cipher.decrypt(nonce, body).map_err(|_| {
            CryptoError::DecryptionFailed("invalid key or corrupted ciphertext".into())
        })
    }

    fn hash_fast(&self, data: &[u8]) -> String {
        hashing::hash_fast(data)
    }

    fn hash_slow(
        &self,
        data: &[u8],
        params: &SlowHashParams,
        pepper: &Pepper,
    ) -> CryptoResult<String> {
        hashing::hash_secure(data, params, pepper)
    }

    fn verify_slow(&self, data: &[u8], encoded: &str, pepper: &Pepper) -> CryptoResult<bool> {
        hashing::verify_secure(data, encoded, pepper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_dek;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let engine = XChaChaEngine::new();
        let key = generate_dek().unwrap();
        let plaintext = b"alice@example.com";

        let encrypted = engine.encrypt(plaintext, &key).unwrap();
        let decrypted = engine.decrypt(&encrypted, &key).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_is_randomized() {
        let engine = XChaChaEngine::new();
        let key = generate_dek().unwrap();

        let a = engine.encrypt(b"same", &key).unwrap();
        let b = engine.encrypt(b"same", &key).unwrap();

        assert_ne!(a, b, "fresh nonce per call");
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let engine = XChaChaEngine::new();
        let key1 = generate_dek().unwrap();
        let key2 = generate_dek().unwrap();

        let encrypted = engine.encrypt(b"secret data", &key1).unwrap();
        let result = engine.decrypt(&encrypted, &key2);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_encrypted_size() {
        let engine = XChaChaEngine::new();
        let key = generate_dek().unwrap();
        let plaintext = vec![0u8; 1000];

        let encrypted = engine.encrypt(&plaintext, &key).unwrap();

        // nonce (24) + plaintext (1000) + tag (16) = 1040
        assert_eq!(encrypted.len(), 24 + 1000 + 16);
    }

    #[test]
    fn test_tampered_ciphertext() {
        let engine = XChaChaEngine::new();
        let key = generate_dek().unwrap();

        let mut encrypted = engine.encrypt(b"secret data", &key).unwrap();
        // Flip a byte in the ciphertext (after nonce)
        encrypted[25] ^= 0xFF;

        assert!(engine.decrypt(&encrypted, &key).is_err(), "tampered ciphertext must fail");
    }

    #[test]
    fn test_truncated_ciphertext() {
        let engine = XChaChaEngine::new();
        let key = generate_dek().unwrap();

        let result = engine.decrypt(&[0u8; NONCE_SIZE + 3], &key);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    mod props {
        use super::*;
        use crate::keys::generate_dek;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_any_plaintext(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
                let engine = XChaChaEngine::new();
                let key = generate_dek().unwrap();

                let encrypted = engine.encrypt(&plaintext, &key).unwrap();
                prop_assert_eq!(encrypted.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
                prop_assert_eq!(engine.decrypt(&encrypted, &key).unwrap(), plaintext);
            }

            #[test]
            fn any_flipped_byte_fails(
                plaintext in proptest::collection::vec(any::<u8>(), 1..64),
                pos in any::<prop::sample::Index>(),
            ) {
                let engine = XChaChaEngine::new();
                let key = generate_dek().unwrap();

                let mut encrypted = engine.encrypt(&plaintext, &key).unwrap();
                let i = pos.index(encrypted.len());
                encrypted[i] ^= 0x01;
                prop_assert!(engine.decrypt(&encrypted, &key).is_err());
            }
        }
    }
}
