//! tagcrypt-engine: tag-driven field encryption and hashing
//!
//! Annotated source fields declare operations; results land in companion
//! fields named by convention, and the plaintext source is cleared:
//!
//! ```text
//! Email  #[crypt("encrypt,hash_basic")]
//!   ├── EmailEncrypted  XChaCha20-Poly1305 under the record's DEK
//!   └── EmailHash       SHA-256 of the lower-cased value
//! SSN    #[crypt("hash_secure")]
//!   └── SSNHashSecure   $argon2id$v=19$m=..,t=..,p=..$salt$hash (peppered)
//! DEKEncrypted, KeyVersion   the DEK wrapped by the master key, and its version
//! ```
//!
//! [`RecordProcessor`] handles one record; [`RecordProcessor::process_batch`]
//! and [`RecordProcessor::decrypt_batch`] fan out across many.

pub mod batch;
pub mod coerce;
pub mod dek;
mod dispatch;
pub mod dynamic;
pub mod error;
pub mod naming;
pub mod processor;
pub mod record;
pub mod resolve;
pub mod tag;

pub use batch::{auto_batch_size, BatchAborted, BatchOptions, BatchProgress, BatchResult, ItemFailure};
pub use dek::{DekError, KeyManager, WrappedDek};
pub use dynamic::{DynamicRecord, RecordSchema};
pub use error::{ErrorKind, FieldCryptError, FieldResult, Operation};
pub use naming::Naming;
pub use processor::{RecordProcessor, RecordProcessorBuilder};
pub use record::{FieldDef, FieldKind, FieldType, Record, Value, ValueError};
pub use resolve::{FieldPlan, RecordPlan};
pub use tag::{FieldIntent, Op};
