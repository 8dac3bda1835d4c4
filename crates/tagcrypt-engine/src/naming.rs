use tagcrypt_core::config::NamingStyle;

use crate::tag::Op;

/// Companion field naming convention.
///
/// `Pascal` is the stored-data wire contract (`EmailEncrypted`, `DEKEncrypted`,
/// `KeyVersion`); `Snake` is its equivalent for Rust struct fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Naming {
    #[default]
    Snake,
    Pascal,
}

impl Naming {
    pub fn companion(self, field: &str, op: Op) -> String {
        let suffix = match (self, op) {
            (Naming::Snake, Op::Encrypt) => "_encrypted",
            (Naming::Snake, Op::HashFast) => "_hash",
            (Naming::Snake, Op::HashSecure) => "_hash_secure",
            (Naming::Pascal, Op::Encrypt) => "Encrypted",
            (Naming::Pascal, Op::HashFast) => "Hash",
            (Naming::Pascal, Op::HashSecure) => "HashSecure",
        };
        format!("{field}{suffix}")
    }

    /// Record-level field holding the wrapped DEK.
    pub fn dek_field(self) -> &'static str {
        match self {
            Naming::Snake => "dek_encrypted",
            Naming::Pascal => "DEKEncrypted",
        }
    }

    /// Record-level field holding the master-key version of the wrapped DEK.
    pub fn version_field(self) -> &'static str {
        match self {
            Naming::Snake => "key_version",
            Naming::Pascal => "KeyVersion",
        }
    }
}

impl From<NamingStyle> for Naming {
    fn from(style: NamingStyle) -> Self {
        match style {
            NamingStyle::Snake => Naming::Snake,
            NamingStyle::Pascal => Naming::Pascal,
        }
    }
}
