//! # Courier Config
//!
//! Configuration management for the courier message queue: the option
//! schema, a TOML loader with environment expansion, a validator and the
//! [`ConfigStore`] that owns the active configuration at runtime.

mod error;
mod loader;
mod schema;
mod store;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use store::ConfigStore;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
