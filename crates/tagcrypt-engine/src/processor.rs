//! Record processor: forward (encrypt/hash) and inverse (decrypt) passes
//!
//! ```text
//! forward: resolve plan ─▶ per field: coerce ─▶ dispatch ─▶ write companions, clear source
//!                      └▶ (any encrypt ran) wrap DEK ─▶ write DEKEncrypted + KeyVersion
//! inverse: resolve plan ─▶ fields with ciphertext? ─▶ unwrap DEK by KeyVersion
//!                      └▶ per field: decrypt ─▶ parse ─▶ restore source
//! ```
//!
//! The DEK lives in an `Option<Dek>` local to one call and is zeroized when
//! that call returns, on every path. Fields processed before a failure stay
//! processed.

use std::sync::Arc;

use tagcrypt_core::config::HashingConfig;
use tagcrypt_crypto::{CipherEngine, CryptoError, Dek, Pepper, SlowHashParams, XChaChaEngine};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::coerce::{self, Coerced};
use crate::dek::KeyManager;
use crate::dispatch::Primitives;
use crate::error::{FieldCryptError, FieldResult, Operation};
use crate::naming::Naming;
use crate::record::{FieldDef, FieldType, Record, Value, ValueError};
use crate::resolve::{FieldPlan, KeyCompanions, RecordPlan};
use crate::tag::Op;

/// Field name used in errors about a free-standing candidate value.
const CANDIDATE: &str = "candidate";

struct Inner {
    prims: Primitives,
    keys: Arc<KeyManager>,
    naming: Naming,
}

/// Applies tag-declared operations to records. Cheap to clone.
#[derive(Clone)]
pub struct RecordProcessor {
    inner: Arc<Inner>,
}

pub struct RecordProcessorBuilder {
    cipher: Option<Arc<dyn CipherEngine>>,
    keys: Option<Arc<KeyManager>>,
    pepper: Option<Pepper>,
    params: SlowHashParams,
    naming: Naming,
}

impl RecordProcessorBuilder {
    /// Defaults to [`XChaChaEngine`].
    pub fn cipher(mut self, cipher: Arc<dyn CipherEngine>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn keys(mut self, keys: Arc<KeyManager>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn pepper(mut self, pepper: Pepper) -> Self {
        self.pepper = Some(pepper);
        self
    }

    pub fn hash_params(mut self, params: SlowHashParams) -> Self {
        self.params = params;
        self
    }

    pub fn hashing_config(mut self, config: &HashingConfig) -> Self {
        self.params = SlowHashParams {
            mem_cost_kib: config.argon2_mem_cost_kib,
            time_cost: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
            ..SlowHashParams::default()
        };
        self
    }

    pub fn naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    /// Fails with `UninitializedSecret` without a pepper.
    pub fn build(self) -> FieldResult<RecordProcessor> {
        let pepper = self.pepper.ok_or(FieldCryptError::UninitializedSecret)?;
        let keys = self
            .keys
            .ok_or_else(|| FieldCryptError::Config("a key manager is required".into()))?;
        let cipher = self
            .cipher
            .unwrap_or_else(|| Arc::new(XChaChaEngine::new()));
        Ok(RecordProcessor {
            inner: Arc::new(Inner {
                prims: Primitives {
                    cipher,
                    pepper: Arc::new(pepper),
                    params: Arc::new(self.params),
                },
                keys,
                naming: self.naming,
            }),
        })
    }
}

impl RecordProcessor {
    pub fn builder() -> RecordProcessorBuilder {
        RecordProcessorBuilder {
            cipher: None,
            keys: None,
            pepper: None,
            params: SlowHashParams::default(),
            naming: Naming::default(),
        }
    }

    pub fn keys(&self) -> &KeyManager {
        &self.inner.keys
    }

    pub fn naming(&self) -> Naming {
        self.inner.naming
    }

    pub fn hash_params(&self) -> &SlowHashParams {
        &self.inner.prims.params
    }

    /// Resolve the processing plan for a record shape without touching it.
    pub fn plan(&self, fields: &[FieldDef]) -> FieldResult<RecordPlan> {
        RecordPlan::resolve(fields, self.inner.naming)
    }

    /// Encrypt and hash every annotated field of `record` in place.
    pub async fn process<R: Record + ?Sized>(&self, cancel: &CancellationToken, record: &mut R) -> FieldResult<()> {
        let plan = self.plan(record.fields())?;
        if plan.is_empty() {
            return Ok(());
        }
        let mut dek: Option<Dek> = None;
        let result = self.process_fields(cancel, &plan, record, &mut dek).await;
        drop(dek);
        result
    }

    async fn process_fields<R: Record + ?Sized>(
        &self,
        cancel: &CancellationToken,
        plan: &RecordPlan,
        record: &mut R,
        dek: &mut Option<Dek>,
    ) -> FieldResult<()> {
        for field in &plan.fields {
            let first_op = field.intent.iter().next().map(Op::operation).unwrap_or(Operation::Validate);
            if cancel.is_cancelled() {
                return Err(FieldCryptError::cancelled(field.name(), first_op));
            }
            let value = read(record, &field.source, first_op)?;
            let coerced = coerce::canonical_bytes(&field.source, value, first_op)?;
            let clear_source = !coerced.is_zero();

            let writes = self
                .inner
                .prims
                .dispatch(cancel, &self.inner.keys, field, coerced, dek)
                .await?;
            for (companion, value) in writes {
                write(record, field.name(), &companion, value, first_op)?;
            }
            if clear_source {
                let zero = Value::zero_for(field.source.kind, field.source.nullable);
                write(record, field.name(), field.name(), zero, first_op)?;
            }
            tracing::debug!(field = field.name(), ops = %field.intent, zero = !clear_source, "field processed");
        }

        if let (Some(key), Some(keys)) = (dek.as_ref(), plan.keys.as_ref()) {
            let wrapped = self
                .inner
                .keys
                .wrap_dek(cancel, key)
                .await
                .map_err(|e| e.into_field_error(&keys.dek.name, Operation::WrapKey))?;
            write(record, &keys.dek.name, &keys.dek.name, Value::Bytes(wrapped.ciphertext), Operation::WrapKey)?;
            write(
                record,
                &keys.version.name,
                &keys.version.name,
                Value::UInt(u64::from(wrapped.version)),
                Operation::WrapKey,
            )?;
            tracing::debug!(version = wrapped.version, "record key wrapped");
        }
        Ok(())
    }

    /// Restore every encrypted field whose ciphertext companion is populated.
    ///
    /// Companions are left in place, so decrypting twice is harmless. Fields
    /// with only hash operations are skipped.
    pub async fn decrypt<R: Record + ?Sized>(&self, cancel: &CancellationToken, record: &mut R) -> FieldResult<()> {
        let plan = self.plan(record.fields())?;
        let mut targets = Vec::new();
        for field in plan.fields.iter().filter(|f| f.intent.contains(Op::Encrypt)) {
            if let Some(ciphertext) = ciphertext_of(record, field)? {
                targets.push((field, ciphertext));
            }
        }
        let (Some(keys), false) = (plan.keys.as_ref(), targets.is_empty()) else {
            return Ok(());
        };

        let wrapped = wrapped_dek_of(record, keys)?;
        let dek = self.unwrap_record_dek(cancel, keys, wrapped).await?;
        for (field, ciphertext) in targets {
            self.decrypt_one(cancel, record, field, &ciphertext, &dek)?;
        }
        Ok(())
    }

    /// Restore a single encrypted field.
    ///
    /// Hash-only fields fail with `UnsupportedOperation`: hashes have no
    /// inverse.
    pub async fn decrypt_field<R: Record + ?Sized>(
        &self,
        cancel: &CancellationToken,
        record: &mut R,
        name: &str,
    ) -> FieldResult<()> {
        let plan = self.plan(record.fields())?;
        let field = plan.field(name).ok_or_else(|| FieldCryptError::MissingField {
            field: name.to_string(),
            operation: Operation::Decrypt,
        })?;
        if !field.intent.contains(Op::Encrypt) {
            return Err(FieldCryptError::UnsupportedOperation {
                field: name.to_string(),
                token: "decrypt".into(),
            });
        }
        let (Some(ciphertext), Some(keys)) = (ciphertext_of(record, field)?, plan.keys.as_ref()) else {
            return Ok(());
        };
        let wrapped = wrapped_dek_of(record, keys)?;
        let dek = self.unwrap_record_dek(cancel, keys, wrapped).await?;
        self.decrypt_one(cancel, record, field, &ciphertext, &dek)
    }

    /// Unwrap the record DEK read by [`wrapped_dek_of`].
    async fn unwrap_record_dek(
        &self,
        cancel: &CancellationToken,
        keys: &KeyCompanions,
        (wrapped, version): (Vec<u8>, u32),
    ) -> FieldResult<Dek> {
        self.inner
            .keys
            .unwrap_dek(cancel, &wrapped, version)
            .await
            .map_err(|e| e.into_field_error(&keys.dek.name, Operation::UnwrapKey))
    }

    fn decrypt_one<R: Record + ?Sized>(
        &self,
        cancel: &CancellationToken,
        record: &mut R,
        field: &FieldPlan,
        ciphertext: &[u8],
        dek: &Dek,
    ) -> FieldResult<()> {
        let op = Operation::Decrypt;
        if cancel.is_cancelled() {
            return Err(FieldCryptError::cancelled(field.name(), op));
        }
        let plaintext = self
            .inner
            .prims
            .cipher
            .decrypt(ciphertext, dek)
            .map_err(|e| FieldCryptError::failed(field.name(), op, e))?;
        let value = coerce::restore(&field.source, Zeroizing::new(plaintext))?;
        write(record, field.name(), field.name(), value, op)?;
        tracing::debug!(field = field.name(), "field decrypted");
        Ok(())
    }

    /// Check `candidate` against a stored secure hash.
    ///
    /// Mismatch is `Ok(false)`; only a malformed `encoded` is an error.
    pub async fn verify_secure_hash<T: FieldType>(
        &self,
        cancel: &CancellationToken,
        candidate: &T,
        encoded: &str,
    ) -> FieldResult<bool> {
        let def = FieldDef::typed::<T>(CANDIDATE, None);
        let bytes = coerce::encode(&def, candidate.to_value(), Operation::Verify)?;
        self.inner
            .prims
            .verify_secure(cancel, CANDIDATE, bytes, encoded)
            .await
    }

    /// The digest a `*Hash` companion would hold for `value`.
    ///
    /// Zero values map to the empty string, matching what processing stores.
    pub fn lookup_hash<T: FieldType>(&self, value: &T) -> FieldResult<String> {
        let def = FieldDef::typed::<T>(CANDIDATE, None);
        match coerce::canonical_bytes(&def, value.to_value(), Operation::HashFast)? {
            Coerced::Zero => Ok(String::new()),
            Coerced::Bytes(bytes) => {
                let folded = coerce::fold_case(def.kind, &bytes);
                Ok(self.inner.prims.cipher.hash_fast(&folded))
            }
        }
    }

    /// Whether `encoded` was produced with parameters other than the current ones.
    pub fn needs_rehash(&self, encoded: &str) -> FieldResult<bool> {
        tagcrypt_crypto::needs_rehash(encoded, &self.inner.prims.params).map_err(|e| match e {
            CryptoError::InvalidFormat(reason) => FieldCryptError::InvalidFormat {
                field: CANDIDATE.into(),
                operation: Operation::Verify,
                reason,
            },
            other => FieldCryptError::failed(CANDIDATE, Operation::Verify, other),
        })
    }
}

impl std::fmt::Debug for RecordProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordProcessor")
            .field("naming", &self.inner.naming)
            .field("keys", &self.inner.keys)
            .field("pepper", &self.inner.prims.pepper)
            .finish_non_exhaustive()
    }
}

fn read<R: Record + ?Sized>(record: &R, def: &FieldDef, operation: Operation) -> FieldResult<Value> {
    record.get(&def.name).ok_or_else(|| FieldCryptError::MissingField {
        field: def.name.to_string(),
        operation,
    })
}

fn write<R: Record + ?Sized>(
    record: &mut R,
    source: &str,
    target: &str,
    value: Value,
    operation: Operation,
) -> FieldResult<()> {
    record.set(target, value).map_err(|e| match e {
        ValueError::UnknownField(_) => FieldCryptError::MissingCompanionField {
            field: source.to_string(),
            companion: target.to_string(),
            operation,
        },
        other => FieldCryptError::TypeConversion {
            field: source.to_string(),
            operation,
            reason: other.to_string(),
        },
    })
}

/// The record's wrapped DEK and key version.
///
/// Read before any await so processing futures only need `R: Send`.
fn wrapped_dek_of<R: Record + ?Sized>(record: &R, keys: &KeyCompanions) -> FieldResult<(Vec<u8>, u32)> {
    let op = Operation::UnwrapKey;
    let dek_field = keys.dek.name.as_ref();
    let wrapped = match read(record, &keys.dek, op)? {
        Value::Bytes(b) if !b.is_empty() => b,
        Value::Bytes(_) | Value::Null => {
            return Err(FieldCryptError::InvalidFormat {
                field: dek_field.to_string(),
                operation: op,
                reason: "wrapped DEK is empty but encrypted fields are present".into(),
            })
        }
        other => return Err(unexpected(dek_field, op, &other)),
    };
    let version = read(record, &keys.version, op)?
        .as_i128()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| FieldCryptError::InvalidFormat {
            field: keys.version.name.to_string(),
            operation: op,
            reason: "key version is not a valid version number".into(),
        })?;
    Ok((wrapped, version))
}

/// Non-empty ciphertext companion of an encrypt field, if any.
fn ciphertext_of<R: Record + ?Sized>(record: &R, field: &FieldPlan) -> FieldResult<Option<Vec<u8>>> {
    let Some(companion) = field.companion(Op::Encrypt) else {
        return Ok(None);
    };
    match read(record, companion, Operation::Decrypt)? {
        Value::Bytes(b) if !b.is_empty() => Ok(Some(b)),
        Value::Bytes(_) | Value::Null => Ok(None),
        other => Err(unexpected(field.name(), Operation::Decrypt, &other)),
    }
}

fn unexpected(field: &str, operation: Operation, value: &Value) -> FieldCryptError {
    FieldCryptError::TypeConversion {
        field: field.to_string(),
        operation,
        reason: format!("unexpected {} value", value.type_name()),
    }
}
