//! Per-field operation dispatch
//!
//! Runs a field's operations in canonical order against its coerced bytes
//! and returns the companion writes. Nothing is written to the record here:
//! the caller applies all writes of a field only after every operation of
//! that field succeeded.

use std::sync::Arc;

use tagcrypt_crypto::{CipherEngine, CryptoError, Dek, Pepper, SlowHashParams};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::coerce::{self, Coerced};
use crate::dek::KeyManager;
use crate::error::{FieldCryptError, FieldResult, Operation};
use crate::record::Value;
use crate::resolve::FieldPlan;
use crate::tag::Op;

/// Cryptographic collaborators shared by every record processed.
#[derive(Clone)]
pub(crate) struct Primitives {
    pub cipher: Arc<dyn CipherEngine>,
    pub pepper: Arc<Pepper>,
    pub params: Arc<SlowHashParams>,
}

impl Primitives {
    /// Compute companion writes for one field.
    ///
    /// A zero value yields zero writes for every companion without touching
    /// the cipher. The record's DEK is minted into `dek` on the first
    /// encrypt that needs it.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        keys: &KeyManager,
        plan: &FieldPlan,
        coerced: Coerced,
        dek: &mut Option<Dek>,
    ) -> FieldResult<Vec<(String, Value)>> {
        let bytes = match coerced {
            Coerced::Zero => {
                return Ok(plan
                    .companions
                    .iter()
                    .map(|c| (c.def.name.to_string(), Value::zero_for(c.def.kind, c.def.nullable)))
                    .collect())
            }
            Coerced::Bytes(bytes) => bytes,
        };

        let field = plan.name();
        let mut writes = Vec::with_capacity(plan.companions.len());
        for companion in &plan.companions {
            let operation = companion.op.operation();
            if cancel.is_cancelled() {
                return Err(FieldCryptError::cancelled(field, operation));
            }
            let value = match companion.op {
                Op::Encrypt => {
                    let key = match dek.take() {
                        Some(key) => key,
                        None => keys
                            .generate_dek()
                            .map_err(|e| e.into_field_error(field, Operation::GenerateKey))?,
                    };
                    let key = dek.insert(key);
                    let ciphertext = self
                        .cipher
                        .encrypt(&bytes, key)
                        .map_err(|e| FieldCryptError::failed(field, operation, e))?;
                    Value::Bytes(ciphertext)
                }
                Op::HashFast => {
                    let folded = coerce::fold_case(plan.source.kind, &bytes);
                    Value::String(self.cipher.hash_fast(&folded))
                }
                Op::HashSecure => {
                    let input = Zeroizing::new(bytes.to_vec());
                    Value::String(self.hash_secure(cancel, field, input).await?)
                }
            };
            tracing::trace!(field, op = %companion.op, "operation applied");
            writes.push((companion.def.name.to_string(), value));
        }
        Ok(writes)
    }

    /// Argon2id off the async workers, abandoned on cancellation.
    pub async fn hash_secure(
        &self,
        cancel: &CancellationToken,
        field: &str,
        input: Zeroizing<Vec<u8>>,
    ) -> FieldResult<String> {
        let cipher = Arc::clone(&self.cipher);
        let pepper = Arc::clone(&self.pepper);
        let params = Arc::clone(&self.params);
        let task = tokio::task::spawn_blocking(move || cipher.hash_slow(&input, &params, &pepper));
        self.join_blocking(cancel, field, Operation::HashSecure, task)
            .await
    }

    /// Constant-time verification of `input` against an encoded secure hash.
    pub async fn verify_secure(
        &self,
        cancel: &CancellationToken,
        field: &str,
        input: Zeroizing<Vec<u8>>,
        encoded: &str,
    ) -> FieldResult<bool> {
        let cipher = Arc::clone(&self.cipher);
        let pepper = Arc::clone(&self.pepper);
        let encoded = encoded.to_string();
        let task = tokio::task::spawn_blocking(move || cipher.verify_slow(&input, &encoded, &pepper));
        self.join_blocking(cancel, field, Operation::Verify, task)
            .await
    }

    async fn join_blocking<T: Send + 'static>(
        &self,
        cancel: &CancellationToken,
        field: &str,
        operation: Operation,
        task: tokio::task::JoinHandle<Result<T, CryptoError>>,
    ) -> FieldResult<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FieldCryptError::cancelled(field, operation)),
            joined = task => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(CryptoError::InvalidFormat(reason))) => Err(FieldCryptError::InvalidFormat {
                    field: field.to_string(),
                    operation,
                    reason,
                }),
                Ok(Err(e)) => Err(FieldCryptError::failed(field, operation, e)),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(FieldCryptError::failed(
                    field,
                    operation,
                    CryptoError::HashFailed(format!("hash task aborted: {e}")),
                )),
            },
        }
    }
}
