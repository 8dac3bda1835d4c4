//! Tag parsing: `"encrypt,hash_basic"` -> [`FieldIntent`]

use std::collections::BTreeSet;

use crate::error::{FieldCryptError, FieldResult};

/// A single declared operation.
///
/// The derived ordering is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    Encrypt,
    HashFast,
    HashSecure,
}

impl Op {
    pub const ALL: [Op; 3] = [Op::Encrypt, Op::HashFast, Op::HashSecure];

    /// The keyword used in field tags.
    pub fn keyword(self) -> &'static str {
        match self {
            Op::Encrypt => "encrypt",
            Op::HashFast => "hash_basic",
            Op::HashSecure => "hash_secure",
        }
    }

    pub fn from_keyword(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.keyword() == token)
    }

    pub(crate) fn operation(self) -> crate::error::Operation {
        use crate::error::Operation;
        match self {
            Op::Encrypt => Operation::Encrypt,
            Op::HashFast => Operation::HashFast,
            Op::HashSecure => Operation::HashSecure,
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Parsed form of a field tag: a non-empty, deduplicated set of operations,
/// iterated in canonical order regardless of declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIntent {
    ops: BTreeSet<Op>,
}

impl FieldIntent {
    /// Parse the raw tag attached to `field`.
    ///
    /// Returns `Ok(None)` for an empty or whitespace-only tag: the field is
    /// not processed.
    pub fn parse(field: &str, tag: &str) -> FieldResult<Option<Self>> {
        let mut ops = BTreeSet::new();
        for token in tag.split(',').map(str::trim) {
            if token.is_empty() {
                continue;
            }
            let op = Op::from_keyword(token).ok_or_else(|| {
                FieldCryptError::UnsupportedOperation {
                    field: field.to_string(),
                    token: token.to_string(),
                }
            })?;
            ops.insert(op);
        }
        if ops.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { ops }))
    }

    pub fn contains(&self, op: Op) -> bool {
        self.ops.contains(&op)
    }

    pub fn iter(&self) -> impl Iterator<Item = Op> + '_ {
        self.ops.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl std::fmt::Display for FieldIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for op in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            f.write_str(op.keyword())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_canonical_order_and_dedup() {
        let intent = FieldIntent::parse("email", "hash_secure, encrypt,hash_basic,encrypt")
            .unwrap()
            .unwrap();
        let ops: Vec<Op> = intent.iter().collect();
        assert_eq!(ops, vec![Op::Encrypt, Op::HashFast, Op::HashSecure]);
        assert_eq!(intent.to_string(), "encrypt,hash_basic,hash_secure");
    }

    #[test]
    fn test_empty_tag_skips_field() {
        assert!(FieldIntent::parse("email", "").unwrap().is_none());
        assert!(FieldIntent::parse("email", "  , ").unwrap().is_none());
    }

    #[test]
    fn test_unknown_keyword_names_field_and_token() {
        let err = FieldIntent::parse("email", "encrypt,rot13").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        let msg = err.to_string();
        assert!(msg.contains("email"));
        assert!(msg.contains("rot13"));
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert!(FieldIntent::parse("email", "Encrypt").is_err());
    }
}
