//! Query descriptors shared by the subscription manager and backends.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

/// Comparison applied by a single filter predicate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Field value equals one of the elements of an array operand.
    In,
    /// Field is an array containing the operand.
    ArrayContains,
}

impl FilterOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "in",
            Self::ArrayContains => "array-contains",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new<S: Into<String>>(field: S, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Canonical textual form used for ordering and key derivation.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{} {} {}", self.field, self.op.symbol(), self.value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

/// A read against one collection: filters, optional ordering, optional row limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuerySpec {
    pub collection: String,
    #[serde(default)]
    pub filters: SmallVec<[Filter; 4]>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QuerySpec {
    /// Start a query over every document in `collection`.
    pub fn collection<S: Into<String>>(collection: S) -> Self {
        Self {
            collection: collection.into(),
            filters: SmallVec::new(),
            order_by: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn filter<S: Into<String>>(mut self, field: S, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    #[must_use]
    pub fn where_eq<S: Into<String>>(self, field: S, value: Value) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    #[must_use]
    pub fn order_by_asc<S: Into<String>>(mut self, field: S) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction: Direction::Asc,
        });
        self
    }

    #[must_use]
    pub fn order_by_desc<S: Into<String>>(mut self, field: S) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction: Direction::Desc,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Identity of the live query: collection plus normalized filter set, so
    /// predicate order at the call site does not make two reads look different.
    #[must_use]
    pub fn key(&self) -> BindingKey {
        let mut filters: Vec<String> = self.filters.iter().map(Filter::canonical).collect();
        filters.sort();
        filters.dedup();
        BindingKey {
            collection: self.collection.clone(),
            filters,
        }
    }

    /// True when both queries read the same rows in the same shape.
    #[must_use]
    pub fn same_read(&self, other: &Self) -> bool {
        self.key() == other.key() && self.order_by == other.order_by && self.limit == other.limit
    }
}

/// Collection name plus normalized filter set; at most one live subscription per
/// binding exists for a given key.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BindingKey {
    pub collection: String,
    pub filters: Vec<String>,
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filters.is_empty() {
            return write!(f, "{}", self.collection);
        }
        write!(f, "{}[{}]", self.collection, self.filters.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_filter_order() {
        let a = QuerySpec::collection("tasks")
            .where_eq("status", json!("open"))
            .filter("priority", FilterOp::Gte, json!(2));
        let b = QuerySpec::collection("tasks")
            .filter("priority", FilterOp::Gte, json!(2))
            .where_eq("status", json!("open"));
        assert_eq!(a.key(), b.key());
        assert!(a.same_read(&b));

        let repeated = a.clone().where_eq("status", json!("open"));
        assert_eq!(repeated.key(), a.key());
    }

    #[test]
    fn limit_changes_the_read_but_not_the_key() {
        let a = QuerySpec::collection("devices");
        let b = QuerySpec::collection("devices").limit(5);
        assert_eq!(a.key(), b.key());
        assert!(!a.same_read(&b));
    }

    #[test]
    fn key_display_is_readable() {
        let q = QuerySpec::collection("weather").where_eq("station", json!("north"));
        assert_eq!(q.key().to_string(), "weather[station == \"north\"]");
        assert_eq!(QuerySpec::collection("tasks").key().to_string(), "tasks");
    }
}
