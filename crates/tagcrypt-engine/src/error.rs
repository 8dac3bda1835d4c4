//! Field-qualified error taxonomy
//!
//! Every field-level variant names the offending field and the operation
//! that was being attempted, so a failure can be located from the message
//! alone.

use tagcrypt_crypto::CryptoError;
use thiserror::Error;

pub type FieldResult<T> = Result<T, FieldCryptError>;

/// The operation a field (or record) was undergoing when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Encrypt,
    HashFast,
    HashSecure,
    Decrypt,
    Verify,
    GenerateKey,
    WrapKey,
    UnwrapKey,
    Validate,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Encrypt => "encrypt",
            Operation::HashFast => "hash_basic",
            Operation::HashSecure => "hash_secure",
            Operation::Decrypt => "decrypt",
            Operation::Verify => "verify",
            Operation::GenerateKey => "generate_dek",
            Operation::WrapKey => "wrap_dek",
            Operation::UnwrapKey => "unwrap_dek",
            Operation::Validate => "validate",
        };
        f.write_str(name)
    }
}

/// Error kinds, for callers that branch on the class of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedOperation,
    MissingField,
    MissingCompanionField,
    InvalidFieldType,
    UnsupportedType,
    NilPointer,
    TypeConversion,
    OperationFailed,
    InvalidFormat,
    KeyUnavailable,
    UninitializedSecret,
    Cancelled,
    InvalidItem,
    Config,
}

#[derive(Debug, Clone, Error)]
pub enum FieldCryptError {
    #[error("field `{field}`: unsupported operation `{token}`")]
    UnsupportedOperation { field: String, token: String },

    #[error("field `{field}`: not present on record ({operation})")]
    MissingField { field: String, operation: Operation },

    #[error("field `{field}`: companion field `{companion}` is missing ({operation})")]
    MissingCompanionField {
        field: String,
        companion: String,
        operation: Operation,
    },

    #[error(
        "field `{field}`: companion field `{companion}` must be a settable {expected}, found {found} ({operation})"
    )]
    InvalidFieldType {
        field: String,
        companion: String,
        expected: String,
        found: String,
        operation: Operation,
    },

    #[error("field `{field}`: unsupported type {kind} ({operation})")]
    UnsupportedType {
        field: String,
        kind: String,
        operation: Operation,
    },

    #[error("field `{field}`: value is nil ({operation})")]
    NilPointer { field: String, operation: Operation },

    #[error("field `{field}`: cannot convert value: {reason} ({operation})")]
    TypeConversion {
        field: String,
        operation: Operation,
        reason: String,
    },

    #[error("field `{field}`: {operation} failed: {source}")]
    OperationFailed {
        field: String,
        operation: Operation,
        #[source]
        source: CryptoError,
    },

    #[error("field `{field}`: invalid format: {reason} ({operation})")]
    InvalidFormat {
        field: String,
        operation: Operation,
        reason: String,
    },

    #[error("field `{field}`: key version {version} unavailable: {reason} ({operation})")]
    KeyUnavailable {
        field: String,
        version: u32,
        operation: Operation,
        reason: String,
    },

    #[error("pepper is uninitialized (missing or all-zero)")]
    UninitializedSecret,

    #[error("field `{field}`: cancelled ({operation})")]
    Cancelled { field: String, operation: Operation },

    #[error("batch item {index}: record is absent")]
    InvalidItem { index: usize },

    #[error("config error: {0}")]
    Config(String),
}

impl FieldCryptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::MissingField { .. } => ErrorKind::MissingField,
            Self::MissingCompanionField { .. } => ErrorKind::MissingCompanionField,
            Self::InvalidFieldType { .. } => ErrorKind::InvalidFieldType,
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::NilPointer { .. } => ErrorKind::NilPointer,
            Self::TypeConversion { .. } => ErrorKind::TypeConversion,
            Self::OperationFailed { .. } => ErrorKind::OperationFailed,
            Self::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            Self::KeyUnavailable { .. } => ErrorKind::KeyUnavailable,
            Self::UninitializedSecret => ErrorKind::UninitializedSecret,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InvalidItem { .. } => ErrorKind::InvalidItem,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The field the error is attributed to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::UnsupportedOperation { field, .. }
            | Self::MissingField { field, .. }
            | Self::MissingCompanionField { field, .. }
            | Self::InvalidFieldType { field, .. }
            | Self::UnsupportedType { field, .. }
            | Self::NilPointer { field, .. }
            | Self::TypeConversion { field, .. }
            | Self::OperationFailed { field, .. }
            | Self::InvalidFormat { field, .. }
            | Self::KeyUnavailable { field, .. }
            | Self::Cancelled { field, .. } => Some(field),
            Self::UninitializedSecret | Self::InvalidItem { .. } | Self::Config(_) => None,
        }
    }

    pub(crate) fn failed(field: &str, operation: Operation, source: CryptoError) -> Self {
        Self::OperationFailed {
            field: field.to_string(),
            operation,
            source,
        }
    }

    pub(crate) fn cancelled(field: &str, operation: Operation) -> Self {
        Self::Cancelled {
            field: field.to_string(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_field_and_operation() {
        let err = FieldCryptError::MissingCompanionField {
            field: "Email".into(),
            companion: "EmailHash".into(),
            operation: Operation::HashFast,
        };
        let msg = err.to_string();
        assert!(msg.contains("Email"));
        assert!(msg.contains("EmailHash"));
        assert!(msg.contains("hash_basic"));
        assert_eq!(err.kind(), ErrorKind::MissingCompanionField);
        assert_eq!(err.field(), Some("Email"));
    }

    #[test]
    fn test_operation_failed_keeps_source() {
        use std::error::Error as _;

        let err = FieldCryptError::failed(
            "SSN",
            Operation::HashSecure,
            CryptoError::HashFailed("boom".into()),
        );
        assert!(err.to_string().contains("hash_secure failed"));
        assert!(err.source().is_some());
    }
}
