//! Error taxonomy for the Bidi core
//!
//! Four families: transport-fatal (`ConnectionClosed`), command-level remote
//! errors (never retried - side effects are not idempotent), timeouts, and
//! fatal state-invariant violations (`NoWindowsRemaining`). Benign races are
//! not their own variants; callers match them via `is_no_such_alert`.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BidiError>;

#[derive(Debug, Error)]
pub enum BidiError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote answered a command with an error frame
    #[error("Remote error: {error} - {message}")]
    Remote { error: String, message: String },

    #[error("Command {method} timed out after {timeout:?}")]
    CommandTimeout { method: String, timeout: Duration },

    #[error("Connection closed")]
    ConnectionClosed,

    /// Closing the last browsing context leaves nothing to drive
    #[error("all window handles were removed")]
    NoWindowsRemaining,

    /// A response frame did not match the expected result shape
    #[error("Invalid response for {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    /// Script evaluation threw; message carries the rewritten stack
    #[error("{0}")]
    ScriptException(String),

    #[error("Value error: {0}")]
    Value(#[from] values::ValueError),

    #[error("Session not started")]
    NotConnected,
}

impl BidiError {
    /// The dismiss-vs-already-closed race: the prompt was gone before our
    /// handle command landed. Benign, callers swallow it.
    pub fn is_no_such_alert(&self) -> bool {
        matches!(self, BidiError::Remote { error, .. } if error == "no such alert")
    }
}
