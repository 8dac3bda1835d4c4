use thiserror::Error;

pub type SecretsResult<T> = Result<T, SecretsError>;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("invalid secret name: {0:?}")]
    InvalidName(String),

    #[error("secret {name} is corrupt: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("secure random source failed: {0}")]
    Random(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] tagcrypt_crypto::CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
