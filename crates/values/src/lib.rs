//! Bidi wire value conversion
//!
//! Two-way mapping between native values and the protocol's tagged
//! `SerializedValue` representation:
//!
//! ```text
//! LocalValue (graph, may cycle) → serialize → { "type": ..., "value": ... }
//! { "type": ..., ... }          → deserialize → RemoteValue (tree, handles)
//! ```
//!
//! Cycles are detected along the active recursion path and collapsed to a
//! `"[Circular]"` sentinel. Node references never resolve to live objects on
//! this side of the socket; they stay handle records.

pub mod deserializer;
pub mod error;
pub mod serializer;
pub mod types;

pub use deserializer::deserialize;
pub use error::{Result, ValueError};
pub use serializer::serialize;
pub use types::{local, LocalValue, RemoteValue, SharedId, ValueRef, BLOB_MARKER, CIRCULAR};
