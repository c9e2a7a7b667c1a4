use crate::core::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Property filter. `property` may be a dotted path into nested records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub property: String,
    pub descending: bool,
}

/// Description of a kind-wide query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kind: String,
    /// Restricts results to descendants of this key.
    pub ancestor: Option<Key>,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Cursor returned as `QueryMeta::end_cursor` by a previous page.
    pub start_cursor: Option<String>,
    pub keys_only: bool,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn filter(mut self, property: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            property: property.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order(mut self, property: impl Into<String>) -> Self {
        self.orders.push(Order {
            property: property.into(),
            descending: false,
        });
        self
    }

    pub fn order_desc(mut self, property: impl Into<String>) -> Self {
        self.orders.push(Order {
            property: property.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn start(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = Some(cursor.into());
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoreResults {
    MoreResultsAfterLimit,
    NoMoreResults,
}

/// Paging metadata returned alongside query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMeta {
    pub end_cursor: Option<String>,
    pub more_results: MoreResults,
}

impl QueryMeta {
    pub fn has_more(&self) -> bool {
        self.more_results == MoreResults::MoreResultsAfterLimit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_ancestor_path_rejected() {
        let result = serde_json::from_value::<Query>(json!({
            "kind": "Team",
            "ancestor": {"path": []},
            "filters": [],
            "orders": [],
            "limit": null,
            "offset": 0,
            "start_cursor": null,
            "keys_only": false
        }));
        assert!(result.is_err());

        let query: Query = serde_json::from_value(json!({
            "kind": "Team",
            "ancestor": {"path": [{"kind": "Org", "id": "acme"}]},
            "filters": [],
            "orders": [],
            "limit": null,
            "offset": 0,
            "start_cursor": null,
            "keys_only": false
        }))
        .unwrap();
        assert_eq!(query.ancestor, Some(Key::new("Org", "acme")));
    }
}
