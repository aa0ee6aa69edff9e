//! Purpose: Decode generic structured values (`Struct`/`Value`/`ListValue` shapes) into plain JSON.
//! Exports: `decode_struct`, `decode_structured_value`.
//! Role: Shared by explain-metrics decoding for index records and debug stats.
//! Invariants: Payloads already in plain form pass through unchanged.
//! Invariants: Decoding never drops fields; unknown value kinds are decode errors.

use serde_json::{Map, Value as JsonValue};

use crate::core::error::Error;

/// Decode a `{"fields": {...}}` record. Anything without a `fields` object is returned as-is.
pub fn decode_struct(raw: &JsonValue) -> Result<JsonValue, Error> {
    let Some(fields) = raw.get("fields").and_then(JsonValue::as_object) else {
        return Ok(raw.clone());
    };
    let mut out = Map::new();
    for (name, value) in fields {
        out.insert(name.clone(), decode_structured_value(value)?);
    }
    Ok(JsonValue::Object(out))
}

pub fn decode_structured_value(raw: &JsonValue) -> Result<JsonValue, Error> {
    let Some(obj) = raw.as_object() else {
        return Ok(raw.clone());
    };
    if let Some(kind) = obj.get("kind").and_then(JsonValue::as_str) {
        if let Some(inner) = obj.get(kind) {
            return decode_kind(kind, inner);
        }
    }
    for kind in [
        "nullValue",
        "numberValue",
        "stringValue",
        "boolValue",
        "structValue",
        "listValue",
    ] {
        if let Some(inner) = obj.get(kind) {
            return decode_kind(kind, inner);
        }
    }
    Err(Error::decode("structured value has no recognised kind"))
}

fn decode_kind(kind: &str, inner: &JsonValue) -> Result<JsonValue, Error> {
    match kind {
        "nullValue" => Ok(JsonValue::Null),
        "numberValue" | "stringValue" | "boolValue" => Ok(inner.clone()),
        "structValue" => decode_struct(inner),
        "listValue" => {
            let values = match inner.get("values") {
                Some(JsonValue::Array(values)) => values
                    .iter()
                    .map(decode_structured_value)
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => return Err(Error::decode("listValue.values must be an array")),
                None => Vec::new(),
            };
            Ok(JsonValue::Array(values))
        }
        other => Err(Error::decode(format!("unsupported structured value kind {other}"))),
    }
}
