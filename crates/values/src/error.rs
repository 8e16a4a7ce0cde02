//! Error types for value conversion
//!
//! Simple, flat error hierarchy. No over-engineering.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ValueError>;

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("Unsupported value type: {0}")]
    UnsupportedType(String),

    #[error("Malformed serialized value: {0}")]
    Malformed(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Value lock poisoned")]
    Poisoned,

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}
