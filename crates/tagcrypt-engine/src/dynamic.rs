//! Schema-described records backed by a value vector
//!
//! Used where the record shape is only known at runtime, e.g. JSON lines
//! described by `[[records.schemas]]` in the configuration.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use tagcrypt_core::config::SchemaConfig;

use crate::error::{FieldCryptError, FieldResult};
use crate::naming::Naming;
use crate::record::{FieldDef, FieldKind, Record, Value, ValueError};
use crate::tag::{FieldIntent, Op};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    name: String,
    fields: Vec<FieldDef>,
}

impl RecordSchema {
    /// A schema with exactly the given fields.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Source fields plus the companions their tags require.
    ///
    /// Companions already declared are kept as declared; key fields are added
    /// once if any field encrypts.
    pub fn with_companions(
        name: impl Into<String>,
        sources: Vec<FieldDef>,
        naming: Naming,
    ) -> FieldResult<Self> {
        let mut fields = sources;
        let mut encrypts = false;
        let mut derived = Vec::new();
        for def in &fields {
            let Some(tag) = def.tag.as_deref() else {
                continue;
            };
            let Some(intent) = FieldIntent::parse(&def.name, tag)? else {
                continue;
            };
            for op in intent.iter() {
                let kind = match op {
                    Op::Encrypt => {
                        encrypts = true;
                        FieldKind::Bytes
                    }
                    Op::HashFast | Op::HashSecure => FieldKind::String,
                };
                derived.push(FieldDef::new(naming.companion(&def.name, op), kind));
            }
        }
        if encrypts {
            derived.push(FieldDef::new(naming.dek_field(), FieldKind::Bytes));
            derived.push(FieldDef::new(naming.version_field(), FieldKind::U32));
        }
        for def in derived {
            if !fields.iter().any(|f| f.name == def.name) {
                fields.push(def);
            }
        }
        Ok(Self::new(name, fields))
    }

    pub fn from_config(config: &SchemaConfig, naming: Naming) -> FieldResult<Self> {
        let mut sources = Vec::with_capacity(config.fields.len());
        for field in &config.fields {
            let kind = FieldKind::from_name(&field.kind).ok_or_else(|| {
                FieldCryptError::Config(format!(
                    "schema {}: field {} has unknown kind {}",
                    config.name, field.name, field.kind
                ))
            })?;
            let mut def = FieldDef::new(field.name.clone(), kind);
            def.nullable = field.nullable;
            if let Some(tag) = &field.tag {
                def = def.tagged(tag.clone());
            }
            sources.push(def);
        }
        Self::with_companions(config.name.clone(), sources, naming)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRecord {
    schema: Arc<RecordSchema>,
    values: Vec<Value>,
}

impl DynamicRecord {
    /// A record with every field at its zero value.
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        let values = schema
            .fields
            .iter()
            .map(|f| Value::zero_for(f.kind, f.nullable))
            .collect();
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Build from a JSON object. Absent keys keep their zero value; keys
    /// outside the schema are rejected.
    pub fn from_json(schema: Arc<RecordSchema>, json: &serde_json::Value) -> Result<Self, ValueError> {
        let object = json.as_object().ok_or_else(|| ValueError::Malformed {
            field: String::new(),
            reason: "record must be a JSON object".into(),
        })?;
        let mut record = Self::new(schema);
        for (key, raw) in object {
            let def = record
                .schema
                .fields
                .iter()
                .find(|f| f.name == key.as_str())
                .ok_or_else(|| ValueError::UnknownField(key.clone()))?;
            let value = from_json_value(def, raw).map_err(|e| e.in_field(key))?;
            record.set(key, value)?;
        }
        Ok(record)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .schema
            .fields
            .iter()
            .zip(&self.values)
            .map(|(def, value)| (def.name.to_string(), to_json_value(value)))
            .collect();
        serde_json::Value::Object(object)
    }
}

impl Record for DynamicRecord {
    fn fields(&self) -> &[FieldDef] {
        self.schema.fields()
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.schema.position(name).map(|i| self.values[i].clone())
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), ValueError> {
        let i = self
            .schema
            .position(name)
            .ok_or_else(|| ValueError::UnknownField(name.to_string()))?;
        let def = &self.schema.fields[i];
        if def.read_only {
            return Err(ValueError::ReadOnly(name.to_string()));
        }
        self.values[i] = conform(def, value).map_err(|e| e.in_field(name))?;
        Ok(())
    }
}

/// Check `value` against the field's kind, normalising integer signedness.
fn conform(def: &FieldDef, value: Value) -> Result<Value, ValueError> {
    let kind = def.kind;
    match value {
        Value::Null if def.nullable => Ok(Value::Null),
        v @ (Value::Int(_) | Value::UInt(_)) if kind.is_integer() => {
            let n = v.as_i128().unwrap_or_default();
            if !kind.holds(n) {
                return Err(ValueError::out_of_range(kind));
            }
            // holds() bounds n to the kind's range, which fits i64 or u64
            Ok(if kind.is_signed() {
                Value::Int(n as i64)
            } else {
                Value::UInt(n as u64)
            })
        }
        Value::Float(f) if kind == FieldKind::F32 && f.is_finite() && f.abs() > f64::from(f32::MAX) => {
            Err(ValueError::out_of_range(kind))
        }
        v @ Value::Float(_) if kind.is_float() => Ok(v),
        v @ Value::String(_) if kind == FieldKind::String => Ok(v),
        v @ Value::Bytes(_) if kind == FieldKind::Bytes => Ok(v),
        v @ Value::Bool(_) if kind == FieldKind::Bool => Ok(v),
        v @ Value::Timestamp(_) if kind == FieldKind::Timestamp => Ok(v),
        Value::Opaque if matches!(kind, FieldKind::Other(_)) => Ok(Value::Opaque),
        other => Err(ValueError::mismatch(kind, &other)),
    }
}

fn from_json_value(def: &FieldDef, raw: &serde_json::Value) -> Result<Value, ValueError> {
    use serde_json::Value as Json;

    let mismatch = || ValueError::TypeMismatch {
        field: String::new(),
        expected: def.kind,
        found: json_type(raw),
    };
    let value = match (def.kind, raw) {
        (_, Json::Null) => Value::Null,
        (FieldKind::String, Json::String(s)) => Value::String(s.clone()),
        (FieldKind::Bool, Json::Bool(b)) => Value::Bool(*b),
        (FieldKind::Bytes, Json::String(s)) => {
            Value::Bytes(STANDARD.decode(s).map_err(|e| ValueError::Malformed {
                field: String::new(),
                reason: format!("invalid base64: {e}"),
            })?)
        }
        (FieldKind::Timestamp, Json::String(s)) => Value::Timestamp(
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| ValueError::Malformed {
                    field: String::new(),
                    reason: format!("invalid RFC 3339 timestamp: {e}"),
                })?
                .with_timezone(&Utc),
        ),
        (kind, Json::Number(n)) if kind.is_integer() => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Value::Int(i),
            (None, Some(u)) => Value::UInt(u),
            _ => return Err(ValueError::out_of_range(kind)),
        },
        (kind, Json::Number(n)) if kind.is_float() => Value::Float(n.as_f64().ok_or_else(mismatch)?),
        (FieldKind::Other(_), _) => Value::Opaque,
        _ => return Err(mismatch()),
    };
    Ok(value)
}

fn to_json_value(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null | Value::Opaque => Json::Null,
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(STANDARD.encode(b)),
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::UInt(n) => Json::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Timestamp(t) => Json::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    }
}

fn json_type(raw: &serde_json::Value) -> &'static str {
    match raw {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
