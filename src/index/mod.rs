//! Secondary-index exclusion policy.
//!
//! Semi-structured documents vary in shape from one write to the next, so the
//! set of excluded property paths is computed from the concrete document on
//! every write instead of being derived once from the type.

use crate::core::Document;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Recursive index policy for a document type.
///
/// A field missing from a `Fields` map is excluded from indexing, along with
/// everything below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpec {
    /// Index this value and everything below it.
    All,
    /// Exclude this value and everything below it.
    Excluded,
    /// Index only the listed children, each with its own policy.
    Fields(BTreeMap<String, IndexSpec>),
}

impl IndexSpec {
    /// A policy that indexes nothing.
    pub fn none() -> Self {
        Self::Fields(BTreeMap::new())
    }

    pub fn fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, IndexSpec)>,
        K: Into<String>,
    {
        Self::Fields(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Adds (or replaces) the policy for one child field.
    pub fn field(self, name: impl Into<String>, spec: IndexSpec) -> Self {
        let mut fields = match self {
            Self::Fields(fields) => fields,
            Self::All | Self::Excluded => BTreeMap::new(),
        };
        fields.insert(name.into(), spec);
        Self::Fields(fields)
    }

    fn child(&self, name: &str) -> Option<&IndexSpec> {
        match self {
            Self::Fields(fields) => fields.get(name),
            Self::All | Self::Excluded => None,
        }
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::none()
    }
}

impl Serialize for IndexSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_bool(true),
            Self::Excluded => serializer.serialize_bool(false),
            Self::Fields(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for IndexSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Fields(BTreeMap<String, IndexSpec>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => IndexSpec::All,
            Raw::Flag(false) => IndexSpec::Excluded,
            Raw::Fields(fields) => IndexSpec::Fields(fields),
        })
    }
}

/// Excluded property paths for a whole document.
pub fn exclude_from_indexes(document: &Document, spec: &IndexSpec) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if matches!(spec, IndexSpec::All) {
        return out;
    }
    for (name, value) in document {
        collect(value, spec.child(name), name, &mut out);
    }
    out
}

/// Excluded property paths for `document` located at `path`.
///
/// `spec` of `None` means the value is not covered by any policy and is
/// therefore excluded together with all its descendants. Arrays recurse into
/// their elements with the same policy at `path[]`; records recurse into each
/// field at `path.field`. The root path itself is never reported.
pub fn compute_exclusions(
    document: &Value,
    spec: Option<&IndexSpec>,
    path: &str,
) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(document, spec, path, &mut out);
    out
}

fn collect(value: &Value, spec: Option<&IndexSpec>, path: &str, out: &mut BTreeSet<String>) {
    if matches!(spec, Some(IndexSpec::All)) {
        return;
    }

    match value {
        Value::Array(items) => {
            let element_path = format!("{path}[]");
            for item in items {
                collect(item, spec, &element_path, out);
            }
            exclude(path, out);
        }
        Value::Object(fields) => {
            for (name, child) in fields {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}.{name}")
                };
                collect(child, spec.and_then(|s| s.child(name)), &child_path, out);
            }
            exclude(path, out);
        }
        _ => exclude(path, out),
    }
}

fn exclude(path: &str, out: &mut BTreeSet<String>) {
    if !path.is_empty() {
        out.insert(path.to_string());
    }
}
