use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures reported by the cipher engine, hash primitives and key wrappers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("hashing failed: {0}")]
    HashFailed(String),

    #[error("invalid encoded value: {0}")]
    InvalidFormat(String),

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("KMS unavailable: {0}")]
    KmsUnavailable(String),

    #[error("secret is uninitialized (all-zero)")]
    UninitializedSecret,

    #[error("secure random source failed: {0}")]
    Random(String),
}
