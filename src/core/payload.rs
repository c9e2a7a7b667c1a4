use super::key::Key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Body of a stored document: a JSON object without its id field.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A document pending a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub key: Key,
    pub data: Document,
    /// Property paths the store must leave out of its secondary indexes.
    pub exclude_from_indexes: BTreeSet<String>,
}

impl Payload {
    pub fn new(key: Key, data: Document) -> Self {
        Self {
            key,
            data,
            exclude_from_indexes: BTreeSet::new(),
        }
    }

    pub fn with_exclusions(mut self, exclusions: BTreeSet<String>) -> Self {
        self.exclude_from_indexes = exclusions;
        self
    }
}

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: Key,
    pub data: Document,
}

impl Entity {
    pub fn new(key: Key, data: Document) -> Self {
        Self { key, data }
    }
}

impl From<Payload> for Entity {
    fn from(payload: Payload) -> Self {
        Self {
            key: payload.key,
            data: payload.data,
        }
    }
}
