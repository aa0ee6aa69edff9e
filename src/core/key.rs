// Hierarchical entity keys and their JSON wire shape.
use serde_json::{Map, Value as JsonValue, json};

use crate::core::error::Error;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KeyId {
    Id(i64),
    Name(String),
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PathElement {
    pub kind: String,
    pub id: Option<KeyId>,
}

impl PathElement {
    pub fn new(kind: impl Into<String>, id: Option<KeyId>) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

/// A path of `(kind, id-or-name)` pairs; incomplete when the last element has no identifier.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key {
    pub namespace: Option<String>,
    pub path: Vec<PathElement>,
}

impl Key {
    /// Incomplete key awaiting a server-assigned id.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement::new(kind, None)],
        }
    }

    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement::new(kind, Some(KeyId::Id(id)))],
        }
    }

    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement::new(kind, Some(KeyId::Name(name.into())))],
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn child(mut self, kind: impl Into<String>, id: Option<KeyId>) -> Self {
        self.path.push(PathElement::new(kind, id));
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.path.last().map(|element| element.kind.as_str())
    }

    pub fn id(&self) -> Option<&KeyId> {
        self.path.last().and_then(|element| element.id.as_ref())
    }

    pub fn parent(&self) -> Option<Key> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Key {
            namespace: self.namespace.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    pub fn is_complete(&self) -> bool {
        !self.path.is_empty() && self.path.iter().all(|element| element.id.is_some())
    }

    pub(crate) fn validate_shape(&self) -> Result<(), Error> {
        if self.path.is_empty() {
            return Err(Error::invalid_argument("key path must not be empty"));
        }
        for (index, element) in self.path.iter().enumerate() {
            if element.kind.is_empty() {
                return Err(Error::invalid_argument(
                    "key path element is missing a kind",
                ));
            }
            if element.id.is_none() && index + 1 != self.path.len() {
                return Err(Error::invalid_argument(
                    "only the last key path element may omit an identifier",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn require_complete(&self, context: &str) -> Result<(), Error> {
        self.validate_shape()?;
        if !self.is_complete() {
            return Err(Error::invalid_argument(format!(
                "{context} requires a complete key"
            )));
        }
        Ok(())
    }
}

pub fn encode_key(key: &Key) -> Result<JsonValue, Error> {
    key.validate_shape()?;
    let path: Vec<JsonValue> = key
        .path
        .iter()
        .map(|element| {
            let mut out = Map::new();
            out.insert("kind".to_string(), json!(element.kind));
            match &element.id {
                Some(KeyId::Id(id)) => {
                    out.insert("id".to_string(), json!(id.to_string()));
                }
                Some(KeyId::Name(name)) => {
                    out.insert("name".to_string(), json!(name));
                }
                None => {}
            }
            JsonValue::Object(out)
        })
        .collect();

    let mut out = Map::new();
    if let Some(namespace) = &key.namespace {
        out.insert(
            "partitionId".to_string(),
            json!({ "namespaceId": namespace }),
        );
    }
    out.insert("path".to_string(), JsonValue::Array(path));
    Ok(JsonValue::Object(out))
}

pub fn decode_key(value: &JsonValue) -> Result<Key, Error> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::decode("key must be an object"))?;
    let namespace = obj
        .get("partitionId")
        .and_then(|partition| partition.get("namespaceId"))
        .and_then(JsonValue::as_str)
        .filter(|namespace| !namespace.is_empty())
        .map(str::to_string);
    let elements = obj
        .get("path")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| Error::decode("key is missing a path"))?;

    let mut path = Vec::with_capacity(elements.len());
    for element in elements {
        let kind = element
            .get("kind")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::decode("key path element is missing a kind"))?;
        let id = match (element.get("id"), element.get("name")) {
            (Some(id), _) => Some(KeyId::Id(decode_int64(id)?)),
            (None, Some(name)) => Some(KeyId::Name(
                name.as_str()
                    .ok_or_else(|| Error::decode("key name must be a string"))?
                    .to_string(),
            )),
            (None, None) => None,
        };
        path.push(PathElement::new(kind, id));
    }
    Ok(Key { namespace, path })
}

/// int64 fields arrive as decimal strings on the JSON wire; some emulators send numbers.
pub(crate) fn decode_int64(value: &JsonValue) -> Result<i64, Error> {
    match value {
        JsonValue::Number(number) => number
            .as_i64()
            .ok_or_else(|| Error::decode(format!("expected an integer, got {number}"))),
        JsonValue::String(text) => text
            .parse::<i64>()
            .map_err(|err| Error::decode(format!("invalid integer {text:?}")).with_source(err)),
        other => Err(Error::decode(format!("expected an integer, got {other}"))),
    }
}
