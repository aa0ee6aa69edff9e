// Property values and entities, with the JSON value codec and plain-data conversion.
use std::collections::{BTreeMap, BTreeSet};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde_json::{Map, Number, Value as JsonValue, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::Error;
use crate::core::key::{Key, decode_int64, decode_key, encode_key};

/// Largest integer a plain JSON consumer can represent without loss.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

pub type Properties = BTreeMap<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(OffsetDateTime),
    Key(Key),
    String(String),
    Blob(Bytes),
    GeoPoint { latitude: f64, longitude: f64 },
    Array(Vec<Value>),
    Entity {
        key: Option<Key>,
        properties: Properties,
    },
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Key> for Value {
    fn from(value: Key) -> Self {
        Value::Key(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values)
    }
}

/// A stored record: the key it lives under and its properties.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub key: Key,
    pub properties: Properties,
    pub exclude_from_indexes: BTreeSet<String>,
}

impl Entity {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: Properties::new(),
            exclude_from_indexes: BTreeSet::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn exclude_from_indexes(mut self, name: impl Into<String>) -> Self {
        self.exclude_from_indexes.insert(name.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

pub fn encode_entity(entity: &Entity) -> Result<JsonValue, Error> {
    let mut properties = Map::new();
    for (name, value) in &entity.properties {
        let mut encoded = encode_value(value)?;
        if entity.exclude_from_indexes.contains(name) {
            if let JsonValue::Object(obj) = &mut encoded {
                obj.insert("excludeFromIndexes".to_string(), JsonValue::Bool(true));
            }
        }
        properties.insert(name.clone(), encoded);
    }
    Ok(json!({
        "key": encode_key(&entity.key)?,
        "properties": JsonValue::Object(properties),
    }))
}

pub fn decode_entity(value: &JsonValue) -> Result<Entity, Error> {
    let key = value
        .get("key")
        .ok_or_else(|| Error::decode("entity is missing a key"))
        .and_then(decode_key)?;
    let mut entity = Entity::new(key);
    if let Some(properties) = value.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| Error::decode("entity properties must be an object"))?;
        for (name, raw) in properties {
            if raw.get("excludeFromIndexes").and_then(JsonValue::as_bool) == Some(true) {
                entity.exclude_from_indexes.insert(name.clone());
            }
            entity.properties.insert(name.clone(), decode_value(raw)?);
        }
    }
    Ok(entity)
}

pub fn encode_value(value: &Value) -> Result<JsonValue, Error> {
    let encoded = match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Boolean(b) => json!({ "booleanValue": b }),
        Value::Integer(i) => json!({ "integerValue": i.to_string() }),
        Value::Double(d) => json!({ "doubleValue": encode_double(*d) }),
        Value::Timestamp(ts) => json!({ "timestampValue": format_timestamp(*ts)? }),
        Value::Key(key) => json!({ "keyValue": encode_key(key)? }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Blob(bytes) => json!({ "blobValue": BASE64.encode(bytes) }),
        Value::GeoPoint {
            latitude,
            longitude,
        } => json!({ "geoPointValue": { "latitude": latitude, "longitude": longitude } }),
        Value::Array(values) => {
            let values = values
                .iter()
                .map(encode_value)
                .collect::<Result<Vec<_>, _>>()?;
            json!({ "arrayValue": { "values": values } })
        }
        Value::Entity { key, properties } => {
            let mut props = Map::new();
            for (name, value) in properties {
                props.insert(name.clone(), encode_value(value)?);
            }
            let mut inner = Map::new();
            if let Some(key) = key {
                inner.insert("key".to_string(), encode_key(key)?);
            }
            inner.insert("properties".to_string(), JsonValue::Object(props));
            json!({ "entityValue": JsonValue::Object(inner) })
        }
    };
    Ok(encoded)
}

pub fn decode_value(raw: &JsonValue) -> Result<Value, Error> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::decode("value must be an object"))?;

    if obj.contains_key("nullValue") {
        return Ok(Value::Null);
    }
    if let Some(b) = obj.get("booleanValue") {
        return b
            .as_bool()
            .map(Value::Boolean)
            .ok_or_else(|| Error::decode("booleanValue must be a bool"));
    }
    if let Some(i) = obj.get("integerValue") {
        return decode_int64(i).map(Value::Integer);
    }
    if let Some(d) = obj.get("doubleValue") {
        return decode_double(d).map(Value::Double);
    }
    if let Some(ts) = obj.get("timestampValue") {
        let text = ts
            .as_str()
            .ok_or_else(|| Error::decode("timestampValue must be a string"))?;
        return parse_timestamp(text).map(Value::Timestamp);
    }
    if let Some(key) = obj.get("keyValue") {
        return decode_key(key).map(Value::Key);
    }
    if let Some(s) = obj.get("stringValue") {
        return s
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| Error::decode("stringValue must be a string"));
    }
    if let Some(blob) = obj.get("blobValue") {
        let text = blob
            .as_str()
            .ok_or_else(|| Error::decode("blobValue must be a base64 string"))?;
        let bytes = BASE64
            .decode(text)
            .map_err(|err| Error::decode("blobValue is not valid base64").with_source(err))?;
        return Ok(Value::Blob(Bytes::from(bytes)));
    }
    if let Some(point) = obj.get("geoPointValue") {
        let latitude = point.get("latitude").and_then(JsonValue::as_f64).unwrap_or(0.0);
        let longitude = point.get("longitude").and_then(JsonValue::as_f64).unwrap_or(0.0);
        return Ok(Value::GeoPoint {
            latitude,
            longitude,
        });
    }
    if let Some(array) = obj.get("arrayValue") {
        let values = match array.get("values") {
            Some(JsonValue::Array(values)) => values
                .iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(Error::decode("arrayValue.values must be an array")),
            None => Vec::new(),
        };
        return Ok(Value::Array(values));
    }
    if let Some(entity) = obj.get("entityValue") {
        let key = entity.get("key").map(decode_key).transpose()?;
        let mut properties = Properties::new();
        if let Some(props) = entity.get("properties").and_then(JsonValue::as_object) {
            for (name, value) in props {
                properties.insert(name.clone(), decode_value(value)?);
            }
        }
        return Ok(Value::Entity { key, properties });
    }
    Err(Error::decode("value has no recognised value type"))
}

/// Convert a decoded value into plain JSON data for callers that do not want typed values.
///
/// Integers outside the safe range are rejected unless `wrap_numbers` is set, in which
/// case every integer is rendered as a decimal string so no precision is lost.
pub fn to_plain(value: &Value, wrap_numbers: bool) -> Result<JsonValue, Error> {
    let plain = match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Integer(i) => {
            if wrap_numbers {
                JsonValue::String(i.to_string())
            } else if !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(i) {
                return Err(Error::decode(format!(
                    "integer value {i} is out of bounds; set wrap_numbers to receive it as a string"
                )));
            } else {
                JsonValue::from(*i)
            }
        }
        Value::Double(d) => Number::from_f64(*d)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(encode_double(*d).to_string())),
        Value::Timestamp(ts) => JsonValue::String(format_timestamp(*ts)?),
        Value::Key(key) => encode_key(key)?,
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Blob(bytes) => JsonValue::String(BASE64.encode(bytes)),
        Value::GeoPoint {
            latitude,
            longitude,
        } => json!({ "latitude": latitude, "longitude": longitude }),
        Value::Array(values) => JsonValue::Array(
            values
                .iter()
                .map(|value| to_plain(value, wrap_numbers))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Entity { properties, .. } => {
            let mut out = Map::new();
            for (name, value) in properties {
                out.insert(name.clone(), to_plain(value, wrap_numbers)?);
            }
            JsonValue::Object(out)
        }
    };
    Ok(plain)
}

pub(crate) fn format_timestamp(ts: OffsetDateTime) -> Result<String, Error> {
    ts.format(&Rfc3339).map_err(|err| {
        Error::invalid_argument("timestamp cannot be formatted as RFC 3339").with_source(err)
    })
}

pub(crate) fn parse_timestamp(text: &str) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::parse(text, &Rfc3339)
        .map_err(|err| Error::decode(format!("invalid timestamp {text:?}")).with_source(err))
}

fn encode_double(d: f64) -> JsonValue {
    if d.is_nan() {
        JsonValue::String("NaN".to_string())
    } else if d.is_infinite() {
        let text = if d > 0.0 { "Infinity" } else { "-Infinity" };
        JsonValue::String(text.to_string())
    } else {
        json!(d)
    }
}

fn decode_double(raw: &JsonValue) -> Result<f64, Error> {
    match raw {
        JsonValue::Number(number) => number
            .as_f64()
            .ok_or_else(|| Error::decode("doubleValue is not representable")),
        JsonValue::String(text) => match text.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse::<f64>()
                .map_err(|err| Error::decode("doubleValue is not a number").with_source(err)),
        },
        _ => Err(Error::decode("doubleValue must be a number")),
    }
}
