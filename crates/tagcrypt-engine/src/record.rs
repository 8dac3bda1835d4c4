//! Record model: field descriptors, dynamic values and the [`Record`] trait
//!
//! A record exposes its fields as an ordered list of [`FieldDef`]s and
//! reads/writes them as [`Value`]s. Plain Rust structs get an implementation
//! from [`tagged_record!`](crate::tagged_record); schema-described records use
//! [`DynamicRecord`](crate::DynamicRecord).

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The storage kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Bytes,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Timestamp,
    /// Anything the engine cannot coerce (maps, nested structs, ...).
    Other(&'static str),
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::Bool => "bool",
            FieldKind::I8 => "i8",
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Other(name) => name,
        }
    }

    /// Parse a kind name as written in schema configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        const NAMED: [FieldKind; 14] = [
            FieldKind::String,
            FieldKind::Bytes,
            FieldKind::Bool,
            FieldKind::I8,
            FieldKind::I16,
            FieldKind::I32,
            FieldKind::I64,
            FieldKind::U8,
            FieldKind::U16,
            FieldKind::U32,
            FieldKind::U64,
            FieldKind::F32,
            FieldKind::F64,
            FieldKind::Timestamp,
        ];
        NAMED.into_iter().find(|k| k.name() == name)
    }

    pub fn is_integer(self) -> bool {
        self.int_bounds().is_some()
    }

    pub fn is_float(self) -> bool {
        matches!(self, FieldKind::F32 | FieldKind::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::I64
        )
    }

    fn int_bounds(self) -> Option<(i128, i128)> {
        let bounds = match self {
            FieldKind::I8 => (i8::MIN as i128, i8::MAX as i128),
            FieldKind::I16 => (i16::MIN as i128, i16::MAX as i128),
            FieldKind::I32 => (i32::MIN as i128, i32::MAX as i128),
            FieldKind::I64 => (i64::MIN as i128, i64::MAX as i128),
            FieldKind::U8 => (0, u8::MAX as i128),
            FieldKind::U16 => (0, u16::MAX as i128),
            FieldKind::U32 => (0, u32::MAX as i128),
            FieldKind::U64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(bounds)
    }

    /// Whether an integer fits this (integer) kind.
    pub(crate) fn holds(self, n: i128) -> bool {
        self.int_bounds()
            .is_some_and(|(lo, hi)| (lo..=hi).contains(&n))
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Field descriptor, extracted once per record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: Cow<'static, str>,
    pub kind: FieldKind,
    /// Pointer-like field (`Option<T>`): `None` is a nil value, not a zero value.
    pub nullable: bool,
    /// Raw operation tag, e.g. `"encrypt,hash_basic"`.
    pub tag: Option<Cow<'static, str>>,
    /// Non-settable field; never valid as a companion.
    pub read_only: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<Cow<'static, str>>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            tag: None,
            read_only: false,
        }
    }

    /// Descriptor for a Rust field of type `T`; used by `tagged_record!`.
    pub const fn typed<T: FieldType>(name: &'static str, tag: Option<&'static str>) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind: T::KIND,
            nullable: T::NULLABLE,
            tag: match tag {
                Some(t) => Some(Cow::Borrowed(t)),
                None => None,
            },
            read_only: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn tagged(mut self, tag: impl Into<Cow<'static, str>>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A field value in transit between a record and the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A nil pointer (`None` of a nullable field).
    Null,
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    /// Value of a kind the engine cannot represent.
    Opaque,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Timestamp(_) => "timestamp",
            Value::Opaque => "opaque",
        }
    }

    /// Zero value of its type. The Unix epoch is the zero timestamp; `-0.0` is not zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null | Value::Opaque => true,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Bool(b) => !b,
            Value::Int(n) => *n == 0,
            Value::UInt(n) => *n == 0,
            Value::Float(f) => f.to_bits() == 0,
            Value::Timestamp(t) => *t == DateTime::<Utc>::default(),
        }
    }

    /// The zero value stored into a field of `kind`.
    pub fn zero_for(kind: FieldKind, nullable: bool) -> Self {
        if nullable {
            return Value::Null;
        }
        match kind {
            FieldKind::String => Value::String(String::new()),
            FieldKind::Bytes => Value::Bytes(Vec::new()),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::F32 | FieldKind::F64 => Value::Float(0.0),
            FieldKind::Timestamp => Value::Timestamp(DateTime::<Utc>::default()),
            FieldKind::Other(_) => Value::Opaque,
            k if k.is_signed() => Value::Int(0),
            _ => Value::UInt(0),
        }
    }

    /// Integer payload, regardless of signedness.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(n) => Some(i128::from(*n)),
            Value::UInt(n) => Some(i128::from(*n)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("unknown field `{0}`")]
    UnknownField(String),

    #[error("field `{field}`: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: FieldKind,
        found: &'static str,
    },

    #[error("field `{field}`: value out of range for {kind}")]
    OutOfRange { field: String, kind: FieldKind },

    #[error("field `{field}`: {reason}")]
    Malformed { field: String, reason: String },

    #[error("field `{0}` is read-only")]
    ReadOnly(String),
}

impl ValueError {
    /// Attribute a conversion error to the named field.
    pub fn in_field(self, name: &str) -> Self {
        match self {
            ValueError::TypeMismatch {
                expected, found, ..
            } => ValueError::TypeMismatch {
                field: name.to_string(),
                expected,
                found,
            },
            ValueError::OutOfRange { kind, .. } => ValueError::OutOfRange {
                field: name.to_string(),
                kind,
            },
            ValueError::Malformed { reason, .. } => ValueError::Malformed {
                field: name.to_string(),
                reason,
            },
            other => other,
        }
    }

    pub(crate) fn mismatch(expected: FieldKind, found: &Value) -> Self {
        ValueError::TypeMismatch {
            field: String::new(),
            expected,
            found: found.type_name(),
        }
    }

    pub(crate) fn out_of_range(kind: FieldKind) -> Self {
        ValueError::OutOfRange {
            field: String::new(),
            kind,
        }
    }
}

/// A field container the engine can walk and mutate in place.
pub trait Record: Send + 'static {
    /// Field descriptors in declaration order.
    fn fields(&self) -> &[FieldDef];

    /// Current value of `name`, or `None` if the record has no such field.
    fn get(&self, name: &str) -> Option<Value>;

    fn set(&mut self, name: &str, value: Value) -> Result<(), ValueError>;

    fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }
}

/// Rust types usable as record fields.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::String;

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(ValueError::mismatch(Self::KIND, &other)),
        }
    }
}

impl FieldType for Vec<u8> {
    const KIND: FieldKind = FieldKind::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueError::mismatch(Self::KIND, &other)),
        }
    }
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(ValueError::mismatch(Self::KIND, &other)),
        }
    }
}

macro_rules! int_field_type {
    ($($ty:ty => $kind:ident, $variant:ident, $wide:ty;)*) => {$(
        impl FieldType for $ty {
            const KIND: FieldKind = FieldKind::$kind;

            fn to_value(&self) -> Value {
                Value::$variant(<$wide>::from(*self))
            }

            fn from_value(value: Value) -> Result<Self, ValueError> {
                let converted = match value {
                    Value::Int(n) => <$ty>::try_from(n).ok(),
                    Value::UInt(n) => <$ty>::try_from(n).ok(),
                    other => return Err(ValueError::mismatch(Self::KIND, &other)),
                };
                converted.ok_or_else(|| ValueError::out_of_range(Self::KIND))
            }
        }
    )*};
}

int_field_type! {
    i8 => I8, Int, i64;
    i16 => I16, Int, i64;
    i32 => I32, Int, i64;
    i64 => I64, Int, i64;
    u8 => U8, UInt, u64;
    u16 => U16, UInt, u64;
    u32 => U32, UInt, u64;
    u64 => U64, UInt, u64;
}

impl FieldType for f64 {
    const KIND: FieldKind = FieldKind::F64;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(f) => Ok(f),
            other => Err(ValueError::mismatch(Self::KIND, &other)),
        }
    }
}

impl FieldType for f32 {
    const KIND: FieldKind = FieldKind::F32;

    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(f) if f.is_finite() && f.abs() > f64::from(f32::MAX) => {
                Err(ValueError::out_of_range(Self::KIND))
            }
            Value::Float(f) => Ok(f as f32),
            other => Err(ValueError::mismatch(Self::KIND, &other)),
        }
    }
}

impl FieldType for DateTime<Utc> {
    const KIND: FieldKind = FieldKind::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => Err(ValueError::mismatch(Self::KIND, &other)),
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Declare a struct and derive its [`Record`] implementation from
/// `#[crypt("...")]` field annotations.
///
/// ```
/// tagcrypt_engine::tagged_record! {
///     #[derive(Debug, Default)]
///     pub struct User {
///         #[crypt("encrypt,hash_basic")]
///         pub email: String,
///         pub email_encrypted: Vec<u8>,
///         pub email_hash: String,
///         pub dek_encrypted: Vec<u8>,
///         pub key_version: u32,
///     }
/// }
///
/// use tagcrypt_engine::Record;
/// let user = User::default();
/// assert_eq!(user.fields().len(), 5);
/// assert_eq!(user.fields()[0].tag.as_deref(), Some("encrypt,hash_basic"));
/// ```
#[macro_export]
macro_rules! tagged_record {
    (@tag $tag:literal) => {
        ::core::option::Option::Some($tag)
    };
    (@tag) => {
        ::core::option::Option::None
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[crypt($tag:literal)])?
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $fvis $field: $ty, )*
        }

        impl $name {
            const FIELD_DEFS: &'static [$crate::record::FieldDef] = &[
                $(
                    $crate::record::FieldDef::typed::<$ty>(
                        ::core::stringify!($field),
                        $crate::tagged_record!(@tag $($tag)?),
                    ),
                )*
            ];
        }

        impl $crate::record::Record for $name {
            fn fields(&self) -> &[$crate::record::FieldDef] {
                Self::FIELD_DEFS
            }

            fn get(&self, name: &str) -> ::core::option::Option<$crate::record::Value> {
                $(
                    if name == ::core::stringify!($field) {
                        return ::core::option::Option::Some(
                            $crate::record::FieldType::to_value(&self.$field),
                        );
                    }
                )*
                ::core::option::Option::None
            }

            fn set(
                &mut self,
                name: &str,
                value: $crate::record::Value,
            ) -> ::core::result::Result<(), $crate::record::ValueError> {
                $(
                    if name == ::core::stringify!($field) {
                        self.$field = <$ty as $crate::record::FieldType>::from_value(value)
                            .map_err(|e| e.in_field(name))?;
                        return ::core::result::Result::Ok(());
                    }
                )*
                ::core::result::Result::Err($crate::record::ValueError::UnknownField(
                    name.to_string(),
                ))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::tagged_record! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Sample {
            #[crypt("encrypt")]
            name: String,
            name_encrypted: Vec<u8>,
            #[crypt("hash_basic")]
            age: Option<u16>,
            age_hash: String,
            dek_encrypted: Vec<u8>,
            key_version: i32,
        }
    }

    #[test]
    fn test_macro_descriptors() {
        let sample = Sample::default();
        let fields = sample.fields();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0].name, "name");
        assert_eq!(fields[0].tag.as_deref(), Some("encrypt"));
        assert_eq!(fields[2].kind, FieldKind::U16);
        assert!(fields[2].nullable);
        assert!(fields[1].tag.is_none());
    }

    #[test]
    fn test_macro_get_set() {
        let mut sample = Sample::default();
        sample.set("name", Value::String("ada".into())).unwrap();
        sample.set("age", Value::UInt(36)).unwrap();
        sample.set("key_version", Value::UInt(3)).unwrap();

        assert_eq!(sample.get("name"), Some(Value::String("ada".into())));
        assert_eq!(sample.age, Some(36));
        assert_eq!(sample.key_version, 3);
        assert_eq!(sample.get("nope"), None);

        sample.set("age", Value::Null).unwrap();
        assert_eq!(sample.age, None);
    }

    #[test]
    fn test_set_rejects_mismatch_and_range() {
        let mut sample = Sample::default();
        assert!(matches!(
            sample.set("name", Value::Int(1)),
            Err(ValueError::TypeMismatch { ref field, .. }) if field == "name"
        ));
        assert!(matches!(
            sample.set("age", Value::Int(-1)),
            Err(ValueError::OutOfRange { .. })
        ));
        assert!(matches!(
            sample.set("missing", Value::Null),
            Err(ValueError::UnknownField(_))
        ));
    }

    #[test]
    fn test_zero_values() {
        assert!(Value::String(String::new()).is_zero());
        assert!(Value::Bool(false).is_zero());
        assert!(Value::Timestamp(DateTime::<Utc>::default()).is_zero());
        assert!(!Value::Float(-1.5).is_zero());
        assert!(Value::Float(0.0).is_zero());
        assert!(!Value::Float(-0.0).is_zero());
        assert_eq!(Value::zero_for(FieldKind::I16, false), Value::Int(0));
        assert_eq!(Value::zero_for(FieldKind::U8, false), Value::UInt(0));
        assert_eq!(Value::zero_for(FieldKind::String, true), Value::Null);
    }

    #[test]
    fn test_kind_names_roundtrip() {
        for name in ["string", "bytes", "bool", "i32", "u64", "f32", "timestamp"] {
            assert_eq!(FieldKind::from_name(name).unwrap().name(), name);
        }
        assert!(FieldKind::from_name("map").is_none());
        assert!(FieldKind::U8.holds(255));
        assert!(!FieldKind::U8.holds(256));
        assert!(!FieldKind::String.holds(0));
    }
}
