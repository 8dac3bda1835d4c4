//! tagcrypt-crypto: cryptographic collaborators for the field engine
//!
//! Envelope layout:
//! ```text
//! Master Key (KEK, held by a KeyWrapper, addressed by key ID / version)
//!   └── Data Encryption Key (per record, 256-bit random, wrapped by the KEK)
//!       └── Field AEAD: XChaCha20-Poly1305 (key=DEK, nonce=random_192bit)
//!
//! HashFast:   SHA-256(value)                               -> lowercase hex
//! HashSecure: Argon2id(value, salt=random_128bit, secret=pepper) -> PHC string
//! ```

pub mod cipher;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod kms;
pub mod pepper;

pub use cipher::{CipherEngine, XChaChaEngine};
pub use error::{CryptoError, CryptoResult};
pub use hashing::{hash_fast, hash_secure, needs_rehash, verify_secure, EncodedHash, SlowHashParams};
pub use keys::{generate_dek, unwrap_key, wrap_key, Dek, MasterKey};
pub use kms::{KeyWrapper, LocalKeyWrapper};
pub use pepper::Pepper;

/// Size of a DEK or master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the process-wide pepper
pub const PEPPER_SIZE: usize = 32;
