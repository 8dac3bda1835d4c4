//! Canonical byte forms of field values, and their inverse

use chrono::{DateTime, SecondsFormat, Utc};
use zeroize::Zeroizing;

use crate::error::{FieldCryptError, FieldResult, Operation};
use crate::record::{FieldDef, FieldKind, Value};

/// Result of coercing a source value.
pub enum Coerced {
    /// Zero value: companions are zeroed and no crypto runs.
    Zero,
    Bytes(Zeroizing<Vec<u8>>),
}

impl Coerced {
    pub fn is_zero(&self) -> bool {
        matches!(self, Coerced::Zero)
    }
}

/// Coerce `value` for processing, short-circuiting zero values.
pub fn canonical_bytes(def: &FieldDef, value: Value, operation: Operation) -> FieldResult<Coerced> {
    check_present(def, &value, operation)?;
    if value.is_zero() {
        return Ok(Coerced::Zero);
    }
    encode(def, value, operation).map(Coerced::Bytes)
}

/// Canonical bytes of `value` with no zero-value short-circuit.
///
/// Strings are UTF-8, integers decimal, floats their shortest round-trip
/// decimal, booleans `true`/`false`, timestamps RFC 3339 in UTC.
pub fn encode(
    def: &FieldDef,
    value: Value,
    operation: Operation,
) -> FieldResult<Zeroizing<Vec<u8>>> {
    check_present(def, &value, operation)?;
    let text = match (def.kind, value) {
        (FieldKind::String, Value::String(s)) => return Ok(Zeroizing::new(s.into_bytes())),
        (FieldKind::Bool, Value::Bool(b)) => b.to_string(),
        (kind, Value::Int(n)) if kind.is_integer() => n.to_string(),
        (kind, Value::UInt(n)) if kind.is_integer() => n.to_string(),
        (FieldKind::F32, Value::Float(f)) => (f as f32).to_string(),
        (FieldKind::F64, Value::Float(f)) => f.to_string(),
        (FieldKind::Timestamp, Value::Timestamp(t)) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        (FieldKind::Bytes | FieldKind::Other(_), _) => {
            return Err(FieldCryptError::UnsupportedType {
                field: def.name.to_string(),
                kind: def.kind.to_string(),
                operation,
            })
        }
        (kind, other) => {
            return Err(conversion(
                def,
                operation,
                format!("{} value in {kind} field", other.type_name()),
            ))
        }
    };
    Ok(Zeroizing::new(text.into_bytes()))
}

/// Lower-case string input ahead of a fast hash; other kinds pass through.
pub fn fold_case(kind: FieldKind, bytes: &[u8]) -> Zeroizing<Vec<u8>> {
    match (kind, std::str::from_utf8(bytes)) {
        (FieldKind::String, Ok(s)) => Zeroizing::new(s.to_lowercase().into_bytes()),
        _ => Zeroizing::new(bytes.to_vec()),
    }
}

/// Parse decrypted canonical bytes back into a value of the field's kind.
pub fn restore(def: &FieldDef, bytes: Zeroizing<Vec<u8>>) -> FieldResult<Value> {
    let operation = Operation::Decrypt;
    if def.kind == FieldKind::String {
        return String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|_| conversion(def, operation, "decrypted bytes are not UTF-8".into()));
    }

    let text = std::str::from_utf8(&bytes)
        .map_err(|_| conversion(def, operation, "decrypted bytes are not UTF-8".into()))?;
    let bad = |what: &str| conversion(def, operation, format!("cannot parse {what} as {}", def.kind));

    let value = match def.kind {
        FieldKind::Bool => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(bad("text")),
        },
        kind if kind.is_integer() => {
            let n: i128 = text.parse().map_err(|_| bad("text"))?;
            if !kind.holds(n) {
                return Err(bad("out-of-range integer"));
            }
            if kind.is_signed() {
                Value::Int(i64::try_from(n).map_err(|_| bad("integer"))?)
            } else {
                Value::UInt(u64::try_from(n).map_err(|_| bad("integer"))?)
            }
        }
        FieldKind::F32 => Value::Float(f64::from(text.parse::<f32>().map_err(|_| bad("text"))?)),
        FieldKind::F64 => Value::Float(text.parse::<f64>().map_err(|_| bad("text"))?),
        FieldKind::Timestamp => Value::Timestamp(
            DateTime::parse_from_rfc3339(text)
                .map_err(|_| bad("text"))?
                .with_timezone(&Utc),
        ),
        _ => {
            return Err(FieldCryptError::UnsupportedType {
                field: def.name.to_string(),
                kind: def.kind.to_string(),
                operation,
            })
        }
    };
    Ok(value)
}

fn check_present(def: &FieldDef, value: &Value, operation: Operation) -> FieldResult<()> {
    match value {
        Value::Null if def.nullable => Err(FieldCryptError::NilPointer {
            field: def.name.to_string(),
            operation,
        }),
        Value::Null => Err(conversion(def, operation, "null in non-nullable field".into())),
        _ => Ok(()),
    }
}

fn conversion(def: &FieldDef, operation: Operation, reason: String) -> FieldCryptError {
    FieldCryptError::TypeConversion {
        field: def.name.to_string(),
        operation,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    fn bytes_of(def: &FieldDef, value: Value) -> String {
        let bytes = encode(def, value, Operation::Encrypt).unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_canonical_forms() {
        assert_eq!(bytes_of(&FieldDef::new("s", FieldKind::String), Value::String("A@B.com".into())), "A@B.com");
        assert_eq!(bytes_of(&FieldDef::new("i", FieldKind::I32), Value::Int(-42)), "-42");
        assert_eq!(bytes_of(&FieldDef::new("u", FieldKind::U64), Value::UInt(u64::MAX)), "18446744073709551615");
        assert_eq!(bytes_of(&FieldDef::new("f", FieldKind::F64), Value::Float(0.1)), "0.1");
        assert_eq!(bytes_of(&FieldDef::new("f", FieldKind::F32), Value::Float(f64::from(0.1f32))), "0.1");
        assert_eq!(bytes_of(&FieldDef::new("b", FieldKind::Bool), Value::Bool(true)), "true");

        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(bytes_of(&FieldDef::new("t", FieldKind::Timestamp), Value::Timestamp(t)), "2024-03-01T12:30:00Z");
    }

    #[test]
    fn test_zero_short_circuits() {
        let def = FieldDef::new("n", FieldKind::I64);
        assert!(canonical_bytes(&def, Value::Int(0), Operation::Encrypt).unwrap().is_zero());
        let def = FieldDef::new("t", FieldKind::Timestamp);
        let epoch = Value::Timestamp(DateTime::<Utc>::default());
        assert!(canonical_bytes(&def, epoch, Operation::HashFast).unwrap().is_zero());
    }

    #[test]
    fn test_null_is_nil_pointer() {
        let def = FieldDef::new("p", FieldKind::String).nullable();
        let err = canonical_bytes(&def, Value::Null, Operation::Encrypt).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NilPointer);
    }

    #[test]
    fn test_mismatched_value_is_type_conversion() {
        let def = FieldDef::new("t", FieldKind::Timestamp);
        let err = encode(&def, Value::String("yesterday".into()), Operation::Encrypt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConversion);
    }

    #[test]
    fn test_fold_case_strings_only() {
        assert_eq!(&*fold_case(FieldKind::String, b"A@B.com"), b"a@b.com");
        assert_eq!(&*fold_case(FieldKind::Bool, b"TRUE"), b"TRUE");
    }

    #[test]
    fn test_restore_parses_back() {
        let restore_str = |kind, text: &str| {
            restore(&FieldDef::new("x", kind), Zeroizing::new(text.as_bytes().to_vec()))
        };
        assert_eq!(restore_str(FieldKind::I8, "-7").unwrap(), Value::Int(-7));
        assert_eq!(restore_str(FieldKind::U16, "65535").unwrap(), Value::UInt(65535));
        assert_eq!(restore_str(FieldKind::Bool, "false").unwrap(), Value::Bool(false));
        assert_eq!(restore_str(FieldKind::F64, "2.5").unwrap(), Value::Float(2.5));
        assert!(restore_str(FieldKind::U8, "256").is_err());
        assert!(restore_str(FieldKind::Timestamp, "not a time").is_err());
    }
}
