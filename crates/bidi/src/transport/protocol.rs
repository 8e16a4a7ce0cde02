//! Bidi wire frame types
//!
//! These are the fundamental types for Bidi communication.
//! Keep them minimal - typed command params/results live in `commands`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id - monotonically increasing, pairs a command with its response
pub type CommandId = u64;

/// Outgoing command envelope; uniquely identifies exactly one expected response
#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    pub id: CommandId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// `{ "type": "success" }` response frame
#[derive(Debug, Clone, Deserialize)]
pub struct SuccessFrame {
    pub id: CommandId,
    #[serde(default)]
    pub result: Value,
}

/// `{ "type": "error" }` response frame
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorFrame {
    pub id: CommandId,
    pub error: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stacktrace: Option<String>,
}

/// Unsolicited event frame; no id, broadcast to method subscribers
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Incoming frame, discriminated by the `type` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IncomingFrame {
    Success(SuccessFrame),
    Error(ErrorFrame),
    Event(EventFrame),
}
