//! The process-wide pepper mixed into every secure hash

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::PEPPER_SIZE;

/// A non-zero secret shared by all HashSecure operations. Zeroized on drop.
///
/// An all-zero value is the "never initialised" sentinel and is rejected
/// at construction, so holding a `Pepper` means holding a usable one.
#[derive(Clone)]
pub struct Pepper {
    bytes: [u8; PEPPER_SIZE],
}

impl Pepper {
    pub fn from_bytes(bytes: [u8; PEPPER_SIZE]) -> CryptoResult<Self> {
        if bytes.iter().all(|b| *b == 0) {
            return Err(CryptoError::UninitializedSecret);
        }
        Ok(Self { bytes })
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; PEPPER_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidFormat(format!(
                "pepper must be {PEPPER_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Self::from_bytes(array)
    }

    pub fn generate() -> CryptoResult<Self> {
        let mut bytes = [0u8; PEPPER_SIZE];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Random(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEPPER_SIZE] {
        &self.bytes
    }

    /// Short non-secret identifier for logs: first 8 bytes of SHA-256, hex.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.bytes)[..8])
    }
}

impl Drop for Pepper {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Pepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pepper")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_pepper_rejected() {
        assert_eq!(
            Pepper::from_bytes([0u8; PEPPER_SIZE]).unwrap_err(),
            CryptoError::UninitializedSecret
        );
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(matches!(
            Pepper::from_slice(&[1u8; 8]),
            Err(CryptoError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_generate_and_fingerprint() {
        let a = Pepper::generate().unwrap();
        let b = Pepper::generate().unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.fingerprint().len(), 16);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
