//! LocalValue -> wire serialization
//!
//! Produces the tagged `{ "type": ..., "value": ... }` representation the
//! protocol expects. Cycle detection runs over the active recursion path:
//! revisiting a container that is still being serialized emits the
//! `"[Circular]"` sentinel instead of recursing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::error::{Result, ValueError};
use crate::types::{LocalValue, ValueRef, BLOB_MARKER, CIRCULAR};

/// Serialize a local value graph into its wire representation
pub fn serialize(value: &ValueRef) -> Result<Value> {
    let mut path: Vec<*const Mutex<LocalValue>> = Vec::new();
    serialize_ref(value, &mut path)
}

fn serialize_ref(value: &ValueRef, path: &mut Vec<*const Mutex<LocalValue>>) -> Result<Value> {
    let ptr = Arc::as_ptr(value);
    // Back-edge check runs before locking, so a cycle never deadlocks
    if path.contains(&ptr) {
        return Ok(json!({ "type": "string", "value": CIRCULAR }));
    }

    let guard = value.lock().map_err(|_| ValueError::Poisoned)?;
    match &*guard {
        LocalValue::Undefined => Ok(json!({ "type": "undefined" })),
        LocalValue::Null => Ok(json!({ "type": "null" })),
        LocalValue::Bool(b) => Ok(json!({ "type": "boolean", "value": b })),
        LocalValue::Number(n) => Ok(serialize_number(*n)),
        LocalValue::BigInt(digits) => Ok(json!({ "type": "bigint", "value": digits })),
        LocalValue::String(s) => Ok(json!({ "type": "string", "value": s })),
        LocalValue::RegExp { pattern, flags } => Ok(json!({
            "type": "regexp",
            "value": { "pattern": pattern, "flags": flags },
        })),
        LocalValue::Date(iso) => Ok(json!({ "type": "date", "value": iso })),
        LocalValue::NodeRef { shared_id } => Ok(json!({ "type": "node", "sharedId": shared_id })),
        LocalValue::Blob { mime_type, bytes } => Ok(json!({
            "type": "object",
            "value": [
                [BLOB_MARKER, { "type": "string", "value": BASE64.encode(bytes) }],
                ["encoding", { "type": "string", "value": "base64" }],
                ["mimeType", { "type": "string", "value": mime_type }],
            ],
        })),
        LocalValue::Array(items) => {
            path.push(ptr);
            let encoded: Result<Vec<Value>> =
                items.iter().map(|item| serialize_ref(item, path)).collect();
            path.pop();
            Ok(json!({ "type": "array", "value": encoded? }))
        }
        LocalValue::Set(items) => {
            path.push(ptr);
            let encoded: Result<Vec<Value>> =
                items.iter().map(|item| serialize_ref(item, path)).collect();
            path.pop();
            Ok(json!({ "type": "set", "value": encoded? }))
        }
        LocalValue::Object(entries) => {
            path.push(ptr);
            let mut encoded = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                let result = serialize_ref(entry, path);
                match result {
                    Ok(wire) => encoded.push(json!([key, wire])),
                    Err(e) => {
                        path.pop();
                        return Err(e);
                    }
                }
            }
            path.pop();
            Ok(json!({ "type": "object", "value": encoded }))
        }
        LocalValue::Map(entries) => {
            path.push(ptr);
            let mut encoded = Vec::with_capacity(entries.len());
            for (key, entry) in entries {
                let pair = serialize_ref(key, path)
                    .and_then(|k| serialize_ref(entry, path).map(|v| json!([k, v])));
                match pair {
                    Ok(wire) => encoded.push(wire),
                    Err(e) => {
                        path.pop();
                        return Err(e);
                    }
                }
            }
            path.pop();
            Ok(json!({ "type": "map", "value": encoded }))
        }
    }
}

/// NaN, -0 and the infinities have no JSON representation; the protocol
/// encodes them as well-known strings
fn serialize_number(n: f64) -> Value {
    if n.is_nan() {
        json!({ "type": "number", "value": "NaN" })
    } else if n == 0.0 && n.is_sign_negative() {
        json!({ "type": "number", "value": "-0" })
    } else if n == f64::INFINITY {
        json!({ "type": "number", "value": "Infinity" })
    } else if n == f64::NEG_INFINITY {
        json!({ "type": "number", "value": "-Infinity" })
    } else {
        json!({ "type": "number", "value": n })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::local;

    #[test]
    fn test_serialize_primitives() {
        let cases = [
            (LocalValue::Undefined, json!({ "type": "undefined" })),
            (LocalValue::Null, json!({ "type": "null" })),
            (
                LocalValue::Bool(true),
                json!({ "type": "boolean", "value": true }),
            ),
            (
                LocalValue::String("hi".into()),
                json!({ "type": "string", "value": "hi" }),
            ),
            (
                LocalValue::BigInt("42".into()),
                json!({ "type": "bigint", "value": "42" }),
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(serialize(&local(input)).unwrap(), expected);
        }
    }

    #[test]
    fn test_serialize_special_numbers() {
        let nan = serialize(&local(LocalValue::Number(f64::NAN))).unwrap();
        assert_eq!(nan["value"], "NaN");

        let neg_zero = serialize(&local(LocalValue::Number(-0.0))).unwrap();
        assert_eq!(neg_zero["value"], "-0");

        let inf = serialize(&local(LocalValue::Number(f64::INFINITY))).unwrap();
        assert_eq!(inf["value"], "Infinity");

        let neg_inf = serialize(&local(LocalValue::Number(f64::NEG_INFINITY))).unwrap();
        assert_eq!(neg_inf["value"], "-Infinity");

        let plain = serialize(&local(LocalValue::Number(1.5))).unwrap();
        assert_eq!(plain["value"], 1.5);
    }

    #[test]
    fn test_serialize_regexp_and_date() {
        let re = serialize(&local(LocalValue::RegExp {
            pattern: "a+".into(),
            flags: "gi".into(),
        }))
        .unwrap();
        assert_eq!(re, json!({ "type": "regexp", "value": { "pattern": "a+", "flags": "gi" } }));

        let date = serialize(&local(LocalValue::Date("2024-05-01T00:00:00Z".into()))).unwrap();
        assert_eq!(date["type"], "date");
    }

    #[test]
    fn test_serialize_node_ref() {
        let node = serialize(&local(LocalValue::NodeRef {
            shared_id: "node-7".into(),
        }))
        .unwrap();
        assert_eq!(node, json!({ "type": "node", "sharedId": "node-7" }));
    }

    #[test]
    fn test_serialize_object_cycle() {
        // {foo: "bar", self: <self>}
        let obj = local(LocalValue::Object(vec![(
            "foo".into(),
            local(LocalValue::String("bar".into())),
        )]));
        if let LocalValue::Object(entries) = &mut *obj.lock().unwrap() {
            entries.push(("self".into(), obj.clone()));
        }

        let wire = serialize(&obj).unwrap();
        let entries = wire["value"].as_array().unwrap();
        assert_eq!(entries[0], json!(["foo", { "type": "string", "value": "bar" }]));
        assert_eq!(
            entries[1],
            json!(["self", { "type": "string", "value": "[Circular]" }])
        );
    }

    #[test]
    fn test_serialize_array_cycle() {
        let arr = local(LocalValue::Array(vec![local(LocalValue::Number(1.0))]));
        if let LocalValue::Array(items) = &mut *arr.lock().unwrap() {
            items.push(arr.clone());
        }

        let wire = serialize(&arr).unwrap();
        let items = wire["value"].as_array().unwrap();
        assert_eq!(items[1], json!({ "type": "string", "value": "[Circular]" }));
    }

    #[test]
    fn test_serialize_mutual_cycle() {
        let a = local(LocalValue::Object(vec![]));
        let b = local(LocalValue::Object(vec![("a".into(), a.clone())]));
        if let LocalValue::Object(entries) = &mut *a.lock().unwrap() {
            entries.push(("b".into(), b.clone()));
        }

        let wire = serialize(&a).unwrap();
        // a -> b -> a back-edge collapses to the sentinel
        let b_wire = &wire["value"][0][1];
        assert_eq!(
            b_wire["value"][0],
            json!(["a", { "type": "string", "value": "[Circular]" }])
        );
    }

    #[test]
    fn test_shared_ref_without_cycle_is_not_circular() {
        // The same ref at two sibling positions is a DAG, not a cycle
        let shared = local(LocalValue::String("x".into()));
        let arr = local(LocalValue::Array(vec![shared.clone(), shared]));
        let wire = serialize(&arr).unwrap();
        assert_eq!(wire["value"][0]["value"], "x");
        assert_eq!(wire["value"][1]["value"], "x");
    }

    #[test]
    fn test_serialize_blob_marker() {
        let blob = serialize(&local(LocalValue::Blob {
            mime_type: "text/plain".into(),
            bytes: b"hello".to_vec(),
        }))
        .unwrap();
        assert_eq!(blob["type"], "object");
        let entries = blob["value"].as_array().unwrap();
        assert_eq!(entries[0][0], BLOB_MARKER);
        assert_eq!(entries[0][1]["value"], "aGVsbG8=");
        assert_eq!(entries[1][1]["value"], "base64");
    }

    #[test]
    fn test_serialize_map_and_set() {
        let map = local(LocalValue::Map(vec![(
            local(LocalValue::String("k".into())),
            local(LocalValue::Number(2.0)),
        )]));
        let wire = serialize(&map).unwrap();
        assert_eq!(wire["type"], "map");
        assert_eq!(wire["value"][0][0]["value"], "k");
        assert_eq!(wire["value"][0][1]["value"], 2.0);

        let set = local(LocalValue::Set(vec![local(LocalValue::Bool(false))]));
        let wire = serialize(&set).unwrap();
        assert_eq!(wire["type"], "set");
        assert_eq!(wire["value"][0]["value"], false);
    }
}
