// Buffered write operations and their commit wire shape.
use serde_json::{Value as JsonValue, json};

use crate::core::error::Error;
use crate::core::key::{Key, encode_key};
use crate::core::value::{Entity, encode_entity};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SaveMethod {
    Insert,
    Update,
    #[default]
    Upsert,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Insert(Entity),
    Update(Entity),
    Upsert(Entity),
    Delete(Key),
}

impl Mutation {
    pub fn save(method: SaveMethod, entity: Entity) -> Self {
        match method {
            SaveMethod::Insert => Mutation::Insert(entity),
            SaveMethod::Update => Mutation::Update(entity),
            SaveMethod::Upsert => Mutation::Upsert(entity),
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            Mutation::Insert(entity) | Mutation::Update(entity) | Mutation::Upsert(entity) => {
                &entity.key
            }
            Mutation::Delete(key) => key,
        }
    }

    /// Reject mutations whose key cannot be used for the operation.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Mutation::Insert(entity) | Mutation::Upsert(entity) => entity.key.validate_shape(),
            Mutation::Update(entity) => entity.key.require_complete("update"),
            Mutation::Delete(key) => key.require_complete("delete"),
        }
    }
}

pub fn encode_mutation(mutation: &Mutation) -> Result<JsonValue, Error> {
    let encoded = match mutation {
        Mutation::Insert(entity) => json!({ "insert": encode_entity(entity)? }),
        Mutation::Update(entity) => json!({ "update": encode_entity(entity)? }),
        Mutation::Upsert(entity) => json!({ "upsert": encode_entity(entity)? }),
        Mutation::Delete(key) => json!({ "delete": encode_key(key)? }),
    };
    Ok(encoded)
}

/// Keep only the last mutation per complete key, in first-seen order.
///
/// Incomplete keys are distinct entities-to-be and are never collapsed.
pub fn dedup_by_key(mutations: Vec<Mutation>) -> Vec<Mutation> {
    let mut out: Vec<Mutation> = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        let key = mutation.key();
        if key.is_complete() {
            if let Some(slot) = out
                .iter_mut()
                .find(|existing| existing.key().is_complete() && existing.key() == key)
            {
                *slot = mutation;
                continue;
            }
        }
        out.push(mutation);
    }
    out
}
