use crate::core::Document;
use crate::index::IndexSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-repository persistence options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryOptions {
    /// Values filled into absent top-level fields on read and write
    pub defaults: Document,

    /// Secondary-index policy for the stored documents
    pub index: IndexSpec,

    /// Field carrying the document id; stripped from the stored body
    pub id_field: String,
}

impl RepositoryOptions {
    pub const DEFAULT_ID_FIELD: &'static str = "id";

    pub fn new() -> Self {
        Self {
            defaults: Document::new(),
            index: IndexSpec::default(),
            id_field: Self::DEFAULT_ID_FIELD.to_string(),
        }
    }

    /// Set default value for one field
    pub fn default_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    /// Replace all defaults
    pub fn defaults(mut self, defaults: Document) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set index policy
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.index = index;
        self
    }

    /// Set id field name
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Validate options
    pub fn validate(&self) -> Result<(), String> {
        if self.id_field.is_empty() {
            return Err("id_field cannot be empty".to_string());
        }

        if self.defaults.contains_key(&self.id_field) {
            return Err(format!(
                "defaults cannot contain the id field '{}'",
                self.id_field
            ));
        }

        Ok(())
    }

    /// Fills absent top-level fields of `doc` from the defaults.
    pub(crate) fn apply_defaults(&self, doc: &mut Document) {
        for (name, value) in &self.defaults {
            if !doc.contains_key(name) {
                doc.insert(name.clone(), value.clone());
            }
        }
    }
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self::new()
    }
}
