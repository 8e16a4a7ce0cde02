//! Wire -> RemoteValue deserialization
//!
//! Structural inverse of the serializer. Node references come back as handle
//! records; blob payloads are recognized by their marker key and decoded from
//! the declared transport encoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::error::{Result, ValueError};
use crate::types::{RemoteValue, BLOB_MARKER};

/// Decode a wire value into a `RemoteValue`
pub fn deserialize(wire: &Value) -> Result<RemoteValue> {
    let tag = wire
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ValueError::Malformed(format!("missing type tag: {wire}")))?;

    match tag {
        "undefined" => Ok(RemoteValue::Undefined),
        "null" => Ok(RemoteValue::Null),
        "boolean" => Ok(RemoteValue::Bool(required(wire)?.as_bool().ok_or_else(
            || ValueError::Malformed("boolean value is not a bool".into()),
        )?)),
        "number" => deserialize_number(required(wire)?),
        "bigint" => Ok(RemoteValue::BigInt(required_str(wire)?.to_string())),
        "string" => Ok(RemoteValue::String(required_str(wire)?.to_string())),
        "date" => Ok(RemoteValue::Date(required_str(wire)?.to_string())),
        "regexp" => {
            let value = required(wire)?;
            let pattern = value
                .get("pattern")
                .and_then(Value::as_str)
                .ok_or_else(|| ValueError::Malformed("regexp without pattern".into()))?;
            let flags = value.get("flags").and_then(Value::as_str).unwrap_or("");
            Ok(RemoteValue::RegExp {
                pattern: pattern.to_string(),
                flags: flags.to_string(),
            })
        }
        "node" => {
            let shared_id = wire
                .get("sharedId")
                .and_then(Value::as_str)
                .ok_or_else(|| ValueError::Malformed("node without sharedId".into()))?;
            Ok(RemoteValue::Node {
                shared_id: shared_id.to_string(),
            })
        }
        "array" => Ok(RemoteValue::Array(deserialize_list(required(wire)?)?)),
        "set" => Ok(RemoteValue::Set(deserialize_list(required(wire)?)?)),
        "object" => deserialize_object(required(wire)?),
        "map" => {
            let entries = required(wire)?
                .as_array()
                .ok_or_else(|| ValueError::Malformed("map value is not an array".into()))?;
            let mut decoded = Vec::with_capacity(entries.len());
            for entry in entries {
                let pair = entry
                    .as_array()
                    .filter(|p| p.len() == 2)
                    .ok_or_else(|| ValueError::Malformed("map entry is not a pair".into()))?;
                decoded.push((deserialize_key(&pair[0])?, deserialize(&pair[1])?));
            }
            Ok(RemoteValue::Map(decoded))
        }
        other => Err(ValueError::UnsupportedType(other.to_string())),
    }
}

fn required(wire: &Value) -> Result<&Value> {
    wire.get("value")
        .ok_or_else(|| ValueError::Malformed(format!("missing value field: {wire}")))
}

fn required_str(wire: &Value) -> Result<&str> {
    required(wire)?
        .as_str()
        .ok_or_else(|| ValueError::Malformed("value is not a string".into()))
}

fn deserialize_number(value: &Value) -> Result<RemoteValue> {
    if let Some(n) = value.as_f64() {
        return Ok(RemoteValue::Number(n));
    }
    match value.as_str() {
        Some("NaN") => Ok(RemoteValue::Number(f64::NAN)),
        Some("-0") => Ok(RemoteValue::Number(-0.0)),
        Some("Infinity") => Ok(RemoteValue::Number(f64::INFINITY)),
        Some("-Infinity") => Ok(RemoteValue::Number(f64::NEG_INFINITY)),
        _ => Err(ValueError::Malformed(format!("bad number encoding: {value}"))),
    }
}

fn deserialize_list(value: &Value) -> Result<Vec<RemoteValue>> {
    value
        .as_array()
        .ok_or_else(|| ValueError::Malformed("list value is not an array".into()))?
        .iter()
        .map(deserialize)
        .collect()
}

/// Object keys arrive either as plain JSON strings or as serialized string
/// values; map keys may be any serialized value
fn deserialize_key(key: &Value) -> Result<RemoteValue> {
    if let Some(s) = key.as_str() {
        return Ok(RemoteValue::String(s.to_string()));
    }
    deserialize(key)
}

fn deserialize_object(value: &Value) -> Result<RemoteValue> {
    let entries = value
        .as_array()
        .ok_or_else(|| ValueError::Malformed("object value is not an array".into()))?;

    let mut decoded = Vec::with_capacity(entries.len());
    for entry in entries {
        let pair = entry
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| ValueError::Malformed("object entry is not a pair".into()))?;
        let key = match deserialize_key(&pair[0])? {
            RemoteValue::String(s) => s,
            other => {
                return Err(ValueError::Malformed(format!(
                    "object key is not a string: {other:?}"
                )))
            }
        };
        decoded.push((key, deserialize(&pair[1])?));
    }

    // Blob side-channel: an object carrying the marker key reconstitutes as
    // binary, decoded per its declared encoding
    if decoded.iter().any(|(k, _)| k == BLOB_MARKER) {
        return reconstitute_blob(&decoded);
    }

    Ok(RemoteValue::Object(decoded))
}

fn reconstitute_blob(entries: &[(String, RemoteValue)]) -> Result<RemoteValue> {
    let field = |name: &str| {
        entries
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_str())
    };

    let data = field(BLOB_MARKER)
        .ok_or_else(|| ValueError::Malformed("blob marker without string payload".into()))?;
    let encoding = field("encoding").unwrap_or("base64");
    let mime_type = field("mimeType").unwrap_or("application/octet-stream");

    let bytes = match encoding {
        "base64" => BASE64.decode(data)?,
        // Unknown encodings fall back to the raw bytes of the payload
        _ => data.as_bytes().to_vec(),
    };

    Ok(RemoteValue::Blob {
        mime_type: mime_type.to_string(),
        bytes,
    })
}
