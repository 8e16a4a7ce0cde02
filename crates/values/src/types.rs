//! Value model for the Bidi wire format
//!
//! Two representations:
//! - `LocalValue` - values built in this process, about to be sent to the
//!   browser. Containers hold `ValueRef` (shared, mutable) so callers can
//!   build arbitrary object graphs, including cycles.
//! - `RemoteValue` - values decoded from the browser. Remote graphs arrive
//!   already flattened, so containers own their children directly. Node
//!   references decode to a handle id, never a live object.

use std::sync::{Arc, Mutex};

/// Opaque element/node handle assigned by the browser
pub type SharedId = String;

/// Shared handle to a local value. Cloning is cheap; the same ref can appear
/// at multiple positions in a graph, which is how cycles are expressed.
pub type ValueRef = Arc<Mutex<LocalValue>>;

/// Wrap a `LocalValue` into a shareable ref
pub fn local(value: LocalValue) -> ValueRef {
    Arc::new(Mutex::new(value))
}

/// Sentinel emitted in place of a back-edge when a cycle is detected
pub const CIRCULAR: &str = "[Circular]";

/// Marker key for blob payloads carried inside an object value
pub const BLOB_MARKER: &str = "@blob";

/// A native value on the client side
#[derive(Debug)]
pub enum LocalValue {
    Undefined,
    Null,
    Bool(bool),
    /// Covers -0, NaN and the infinities; those get string encodings on the wire
    Number(f64),
    /// Arbitrary precision integers travel as decimal strings
    BigInt(String),
    String(String),
    Array(Vec<ValueRef>),
    Object(Vec<(String, ValueRef)>),
    Map(Vec<(ValueRef, ValueRef)>),
    Set(Vec<ValueRef>),
    RegExp { pattern: String, flags: String },
    /// ISO 8601 timestamp string
    Date(String),
    /// Binary payload; rides the wire base64-encoded under a marker key
    Blob { mime_type: String, bytes: Vec<u8> },
    /// Reference to a browser-side DOM node
    NodeRef { shared_id: SharedId },
}

impl LocalValue {
    /// Convert plain JSON into a local value graph (JSON trees cannot cycle)
    pub fn from_json(json: &serde_json::Value) -> ValueRef {
        use serde_json::Value;
        let value = match json {
            Value::Null => LocalValue::Null,
            Value::Bool(b) => LocalValue::Bool(*b),
            Value::Number(n) => LocalValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => LocalValue::String(s.clone()),
            Value::Array(items) => {
                LocalValue::Array(items.iter().map(LocalValue::from_json).collect())
            }
            Value::Object(entries) => LocalValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), LocalValue::from_json(v)))
                    .collect(),
            ),
        };
        local(value)
    }
}

impl From<bool> for LocalValue {
    fn from(b: bool) -> Self {
        LocalValue::Bool(b)
    }
}

impl From<f64> for LocalValue {
    fn from(n: f64) -> Self {
        LocalValue::Number(n)
    }
}

impl From<i64> for LocalValue {
    fn from(n: i64) -> Self {
        LocalValue::Number(n as f64)
    }
}

impl From<&str> for LocalValue {
    fn from(s: &str) -> Self {
        LocalValue::String(s.to_string())
    }
}

impl From<String> for LocalValue {
    fn from(s: String) -> Self {
        LocalValue::String(s)
    }
}

/// A value decoded from the browser
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(String),
    String(String),
    Array(Vec<RemoteValue>),
    Object(Vec<(String, RemoteValue)>),
    Map(Vec<(RemoteValue, RemoteValue)>),
    Set(Vec<RemoteValue>),
    RegExp { pattern: String, flags: String },
    Date(String),
    Blob { mime_type: String, bytes: Vec<u8> },
    /// Handle record for a browser-side node; there is no live object to
    /// resolve in the controlling process
    Node { shared_id: SharedId },
}

impl RemoteValue {
    /// String payload, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RemoteValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric payload, if this is a number value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RemoteValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}
