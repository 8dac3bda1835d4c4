//! tagcrypt-core: configuration schema and workspace-level error types

pub mod config;
pub mod error;

pub use config::TagcryptConfig;
pub use error::{CoreError, CoreResult};
