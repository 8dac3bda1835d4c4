//! Field resolution: annotated fields -> validated per-record plan
//!
//! The whole plan is computed from descriptors before any field is touched,
//! so structural errors (bad tags, missing or mistyped companions,
//! unsupported source kinds) leave the record unmodified.

use crate::error::{FieldCryptError, FieldResult, Operation};
use crate::naming::Naming;
use crate::record::{FieldDef, FieldKind};
use crate::tag::{FieldIntent, Op};

/// A companion field paired with the operation that fills it.
#[derive(Debug, Clone)]
pub struct Companion {
    pub op: Op,
    pub def: FieldDef,
}

/// One annotated source field with its intent and resolved companions.
#[derive(Debug, Clone)]
pub struct FieldPlan {
    pub source: FieldDef,
    pub intent: FieldIntent,
    /// In canonical operation order.
    pub companions: Vec<Companion>,
}

impl FieldPlan {
    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn companion(&self, op: Op) -> Option<&FieldDef> {
        self.companions.iter().find(|c| c.op == op).map(|c| &c.def)
    }
}

/// Record-level wrapped-DEK storage.
#[derive(Debug, Clone)]
pub struct KeyCompanions {
    pub dek: FieldDef,
    pub version: FieldDef,
}

#[derive(Debug, Clone, Default)]
pub struct RecordPlan {
    /// In declaration order.
    pub fields: Vec<FieldPlan>,
    /// Present iff some field carries `encrypt`.
    pub keys: Option<KeyCompanions>,
}

impl RecordPlan {
    pub fn resolve(fields: &[FieldDef], naming: Naming) -> FieldResult<Self> {
        let mut plans = Vec::new();
        for def in fields {
            let Some(tag) = def.tag.as_deref() else {
                continue;
            };
            let Some(intent) = FieldIntent::parse(&def.name, tag)? else {
                continue;
            };
            plans.push(resolve_field(fields, def, intent, naming)?);
        }

        let first_encrypt = plans.iter().find(|p| p.intent.contains(Op::Encrypt));
        let keys = match first_encrypt {
            Some(plan) => Some(resolve_keys(fields, plan.name(), naming)?),
            None => None,
        };

        Ok(Self {
            fields: plans,
            keys,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldPlan> {
        self.fields.iter().find(|p| p.name() == name)
    }
}

fn resolve_field(
    fields: &[FieldDef],
    source: &FieldDef,
    intent: FieldIntent,
    naming: Naming,
) -> FieldResult<FieldPlan> {
    if matches!(source.kind, FieldKind::Bytes | FieldKind::Other(_)) {
        let operation = intent
            .iter()
            .next()
            .map(Op::operation)
            .unwrap_or(Operation::Validate);
        return Err(FieldCryptError::UnsupportedType {
            field: source.name.to_string(),
            kind: source.kind.to_string(),
            operation,
        });
    }

    let mut companions = Vec::with_capacity(intent.len());
    for op in intent.iter() {
        let name = naming.companion(&source.name, op);
        let expected = match op {
            Op::Encrypt => FieldKind::Bytes,
            Op::HashFast | Op::HashSecure => FieldKind::String,
        };
        let def = lookup(fields, &source.name, &name, op.operation())?;
        if def.kind != expected || def.read_only {
            return Err(invalid_type(&source.name, def, expected.name(), op.operation()));
        }
        companions.push(Companion {
            op,
            def: def.clone(),
        });
    }

    Ok(FieldPlan {
        source: source.clone(),
        intent,
        companions,
    })
}

fn resolve_keys(fields: &[FieldDef], source: &str, naming: Naming) -> FieldResult<KeyCompanions> {
    let dek = lookup(fields, source, naming.dek_field(), Operation::WrapKey)?;
    if dek.kind != FieldKind::Bytes || dek.read_only {
        return Err(invalid_type(source, dek, "bytes", Operation::WrapKey));
    }
    let version = lookup(fields, source, naming.version_field(), Operation::WrapKey)?;
    if !version.kind.is_integer() || version.read_only {
        return Err(invalid_type(source, version, "integer", Operation::WrapKey));
    }
    Ok(KeyCompanions {
        dek: dek.clone(),
        version: version.clone(),
    })
}

fn lookup<'a>(
    fields: &'a [FieldDef],
    source: &str,
    companion: &str,
    operation: Operation,
) -> FieldResult<&'a FieldDef> {
    fields
        .iter()
        .find(|f| f.name == companion)
        .ok_or_else(|| FieldCryptError::MissingCompanionField {
            field: source.to_string(),
            companion: companion.to_string(),
            operation,
        })
}

fn invalid_type(
    source: &str,
    companion: &FieldDef,
    expected: &str,
    operation: Operation,
) -> FieldCryptError {
    let found = if companion.read_only {
        format!("read-only {}", companion.kind)
    } else {
        companion.kind.to_string()
    };
    FieldCryptError::InvalidFieldType {
        field: source.to_string(),
        companion: companion.name.to_string(),
        expected: expected.to_string(),
        found,
        operation,
    }
}
