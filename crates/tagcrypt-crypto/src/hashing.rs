//! Lookup hashing (SHA-256) and secure hashing (peppered Argon2id)
//!
//! Secure hashes use the PHC string format so every stored value carries
//! the parameters needed to verify it:
//! ```text
//! $argon2id$v=19$m=65536,t=3,p=4$<base64 salt>$<base64 hash>
//! ```
//! Base64 is the standard alphabet without padding.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};
use crate::pepper::Pepper;

/// Argon2id cost parameters for HashSecure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowHashParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
    /// Raw hash length in bytes (default: 32)
    pub output_len: usize,
    /// Random salt length in bytes (default: 16)
    pub salt_len: usize,
}

impl Default for SlowHashParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
            output_len: 32,
            salt_len: 16,
        }
    }
}

impl SlowHashParams {
    fn argon2_params(&self) -> CryptoResult<Params> {
        Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(self.output_len),
        )
        .map_err(|e| CryptoError::HashFailed(format!("invalid Argon2id params: {e}")))
    }
}

/// SHA-256 of `data` as lowercase hex.
pub fn hash_fast(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash `data` with Argon2id, a fresh random salt, and the pepper as the
/// Argon2 secret input.
pub fn hash_secure(data: &[u8], params: &SlowHashParams, pepper: &Pepper) -> CryptoResult<String> {
    let argon2 = Argon2::new_with_secret(
        pepper.as_bytes(),
        Algorithm::Argon2id,
        Version::V0x13,
        params.argon2_params()?,
    )
    .map_err(|e| CryptoError::HashFailed(format!("Argon2id setup failed: {e}")))?;

    let mut salt_bytes = vec![0u8; params.salt_len];
    OsRng
        .try_fill_bytes(&mut salt_bytes)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| CryptoError::HashFailed(format!("salt encoding failed: {e}")))?;

    let hash = argon2
        .hash_password(data, &salt)
        .map_err(|e| CryptoError::HashFailed(format!("Argon2id failed: {e}")))?;

    Ok(hash.to_string())
}

/// Verify `data` against an encoded secure hash using the parameters and
/// salt embedded in it. The final comparison is constant-time.
pub fn verify_secure(data: &[u8], encoded: &str, pepper: &Pepper) -> CryptoResult<bool> {
    EncodedHash::parse(encoded)?;
    let parsed =
        PasswordHash::new(encoded).map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;

    let argon2 = Argon2::new_with_secret(
        pepper.as_bytes(),
        Algorithm::Argon2id,
        Version::V0x13,
        Params::default(),
    )
    .map_err(|e| CryptoError::HashFailed(format!("Argon2id setup failed: {e}")))?;

    match argon2.verify_password(data, &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::InvalidFormat(e.to_string())),
    }
}

/// True when `encoded` was produced with parameters other than `params`.
pub fn needs_rehash(encoded: &str, params: &SlowHashParams) -> CryptoResult<bool> {
    let parsed = EncodedHash::parse(encoded)?;
    Ok(parsed.algorithm != "argon2id"
        || parsed.version != 19
        || parsed.mem_cost_kib != params.mem_cost_kib
        || parsed.time_cost != params.time_cost
        || parsed.parallelism != params.parallelism
        || parsed.hash.len() != params.output_len)
}

/// Structured view of an encoded secure hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedHash {
    pub algorithm: String,
    pub version: u32,
    pub mem_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
    pub hash: Vec<u8>,
}

impl EncodedHash {
    pub fn parse(encoded: &str) -> CryptoResult<Self> {
        let invalid = |reason: &str| CryptoError::InvalidFormat(format!("{reason}: {encoded:?}"));

        let mut parts = encoded.split('$');
        if parts.next() != Some("") {
            return Err(invalid("missing leading '$'"));
        }
        let algorithm = parts.next().ok_or_else(|| invalid("missing algorithm"))?;
        if !matches!(algorithm, "argon2id" | "argon2i" | "argon2d") {
            return Err(invalid("unsupported algorithm"));
        }

        let version = parts
            .next()
            .and_then(|v| v.strip_prefix("v="))
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(|| invalid("missing or malformed version"))?;

        let cost = parts.next().ok_or_else(|| invalid("missing parameters"))?;
        let (mut m, mut t, mut p) = (None, None, None);
        for pair in cost.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("malformed parameter"))?;
            let value = value
                .parse::<u32>()
                .map_err(|_| invalid("non-numeric parameter"))?;
            match key {
                "m" => m = Some(value),
                "t" => t = Some(value),
                "p" => p = Some(value),
                _ => return Err(invalid("unknown parameter")),
            }
        }

        let salt = parts
            .next()
            .and_then(|s| STANDARD_NO_PAD.decode(s).ok())
            .ok_or_else(|| invalid("missing or malformed salt"))?;
        let hash = parts
            .next()
            .and_then(|h| STANDARD_NO_PAD.decode(h).ok())
            .ok_or_else(|| invalid("missing or malformed hash"))?;
        if parts.next().is_some() {
            return Err(invalid("trailing segments"));
        }
        if salt.is_empty() || hash.is_empty() {
            return Err(invalid("empty salt or hash"));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            version,
            mem_cost_kib: m.ok_or_else(|| invalid("missing m"))?,
            time_cost: t.ok_or_else(|| invalid("missing t"))?,
            parallelism: p.ok_or_else(|| invalid("missing p"))?,
            salt,
            hash,
        })
    }
}

impl std::fmt::Display for EncodedHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "${}$v={}$m={},t={},p={}${}${}",
            self.algorithm,
            self.version,
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            STANDARD_NO_PAD.encode(&self.salt),
            STANDARD_NO_PAD.encode(&self.hash)
        )
    }
}
