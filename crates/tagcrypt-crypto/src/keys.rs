//! Key material: per-record DEKs, master keys, and DEK wrapping

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A per-record 256-bit data encryption key. Zeroized on drop.
///
/// Deliberately not `Clone`: exactly one processing call owns a DEK.
pub struct Dek {
    bytes: [u8; KEY_SIZE],
}

impl Dek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a DEK from an unwrapped buffer, scrubbing the buffer either way.
    pub fn from_slice(mut plaintext: Vec<u8>) -> CryptoResult<Self> {
        if plaintext.len() != KEY_SIZE {
            let len = plaintext.len();
            plaintext.zeroize();
            return Err(CryptoError::DecryptionFailed(format!(
                "unwrapped key has wrong size: {len} bytes (expected {KEY_SIZE})"
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Dek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dek").field("bytes", &"[REDACTED]").finish()
    }
}

/// A 256-bit key-encryption key, as held by an in-process key wrapper.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn generate() -> CryptoResult<Self> {
        Ok(Self {
            bytes: random_key()?,
        })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit DEK from the operating system RNG.
pub fn generate_dek() -> CryptoResult<Dek> {
    Ok(Dek::from_bytes(random_key()?))
}

fn random_key() -> CryptoResult<[u8; KEY_SIZE]> {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(bytes)
}

/// Wrap (encrypt) key material under a master key.
///
/// `context` is bound as associated data, so a wrapped key only unwraps
/// under the same master key *and* the same context (the key ID).
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`
pub fn wrap_key(master: &MasterKey, context: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: context,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(format!("key wrapping failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Unwrap (decrypt) key material wrapped by [`wrap_key`].
pub fn unwrap_key(master: &MasterKey, context: &[u8], wrapped: &[u8]) -> CryptoResult<Vec<u8>> {
    if wrapped.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "wrapped key too short: {} bytes (expected at least {})",
            wrapped.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(master.as_bytes().into());

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: context,
            },
        )
        .map_err(|_| {
            CryptoError::DecryptionFailed(
                "key unwrapping failed: wrong master key or corrupted data".into(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_dek_generation() {
        let k1 = generate_dek().unwrap();
        let k2 = generate_dek().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_key_wrap_unwrap_roundtrip() {
        let master = test_master_key();
        let dek = generate_dek().unwrap();

        let wrapped = wrap_key(&master, b"kek-1", dek.as_bytes()).unwrap();
        let unwrapped = Dek::from_slice(unwrap_key(&master, b"kek-1", &wrapped).unwrap()).unwrap();

        assert_eq!(dek.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_key_unwrap_wrong_master() {
        let master1 = MasterKey::from_bytes([1u8; KEY_SIZE]);
        let master2 = MasterKey::from_bytes([2u8; KEY_SIZE]);
        let dek = generate_dek().unwrap();

        let wrapped = wrap_key(&master1, b"kek", dek.as_bytes()).unwrap();
        let result = unwrap_key(&master2, b"kek", &wrapped);

        assert!(result.is_err(), "unwrap with wrong master key must fail");
    }

    #[test]
    fn test_key_unwrap_wrong_context() {
        let master = test_master_key();
        let dek = generate_dek().unwrap();

        let wrapped = wrap_key(&master, b"kek-1", dek.as_bytes()).unwrap();
        let result = unwrap_key(&master, b"kek-2", &wrapped);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_wrapped_key_size() {
        let master = test_master_key();
        let dek = generate_dek().unwrap();
        let wrapped = wrap_key(&master, b"", dek.as_bytes()).unwrap();

        // nonce (24) + key (32) + tag (16) = 72
        assert_eq!(wrapped.len(), NONCE_SIZE + KEY_SIZE + TAG_SIZE);
    }

    #[test]
    fn test_dek_from_slice_rejects_wrong_size() {
        assert!(Dek::from_slice(vec![7u8; 16]).is_err());
        assert!(Dek::from_slice(vec![7u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn test_debug_redacts_key_bytes() {
        let dek = Dek::from_bytes([0xAB; KEY_SIZE]);
        let shown = format!("{dek:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("171"));
    }
}
