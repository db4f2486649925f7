//! Query descriptor types.
//!
//! [`QueryDoc`] mirrors the wire JSON exactly as callers send it and makes no
//! guarantees beyond shape. [`QueryDescriptor`] is the validated, canonical
//! form produced by [`crate::validate::canonicalize`]; everything downstream
//! (assembly, routing, fingerprinting) consumes only the canonical form.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Untrusted wire form of a query, as deserialized from caller JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryDoc {
    pub select: Vec<RawSelect>,
    pub from: String,
    #[serde(default, rename = "where")]
    pub filters: Vec<RawPredicate>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<RawOrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl QueryDoc {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A select entry on the wire: either a bare column name or an aggregate call
/// written as `{"agg": "sum", "col": "bid_price"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSelect {
    Column(String),
    Aggregate { agg: String, col: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPredicate {
    pub col: String,
    pub op: String,
    pub val: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawOrderBy {
    pub col: String,
    #[serde(default)]
    pub dir: Option<String>,
}

/// Aggregate functions the compiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    /// Lowercase name used in output aliases (`sum(bid_price)`).
    pub fn alias_name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Uppercase name emitted into SQL.
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// One validated select item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectItem {
    Column(String),
    /// `column == "*"` is only legal for `Count`.
    Aggregate {
        func: AggFunc,
        column: String,
    },
}

impl SelectItem {
    /// Stable output column name. Aggregates over rollups and over raw data
    /// share the same alias so both paths produce identical result headers.
    pub fn alias(&self) -> String {
        match self {
            Self::Column(c) => c.clone(),
            Self::Aggregate {
                func: AggFunc::Count,
                column,
            } if column == "*" => "count_star()".to_string(),
            Self::Aggregate { func, column } => format!("{}({})", func.alias_name(), column),
        }
    }
}

/// Comparison operators allowed in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Between,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" | "eq" => Some(Self::Eq),
            "!=" | "<>" | "neq" => Some(Self::Neq),
            ">" | "gt" => Some(Self::Gt),
            ">=" | "gte" => Some(Self::Gte),
            "<" | "lt" => Some(Self::Lt),
            "<=" | "lte" => Some(Self::Lte),
            "in" | "IN" => Some(Self::In),
            "between" | "BETWEEN" => Some(Self::Between),
            _ => None,
        }
    }

    /// Fixed rank used to order predicates on the same column canonically.
    pub fn canonical_rank(&self) -> u8 {
        match self {
            Self::Eq => 0,
            Self::Neq => 1,
            Self::Gt => 2,
            Self::Gte => 3,
            Self::Lt => 4,
            Self::Lte => 5,
            Self::In => 6,
            Self::Between => 7,
        }
    }
}

/// A typed filter literal. Nulls, nested arrays, and objects are rejected
/// during validation, as are non-finite floats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Scalar {}

impl Scalar {
    /// Total order used only for canonical sorting of `IN` lists. Compares by
    /// variant first, then by value; floats use `total_cmp`.
    pub fn canonical_cmp(&self, other: &Self) -> CmpOrdering {
        fn rank(s: &Scalar) -> u8 {
            match s {
                Scalar::Bool(_) => 0,
                Scalar::Int(_) => 1,
                Scalar::Float(_) => 2,
                Scalar::Text(_) => 3,
            }
        }
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

/// One validated filter. `values` holds exactly one scalar for comparison
/// operators, two for `Between`, and one or more for `In`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: Operator,
    pub values: Vec<Scalar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One validated ordering key. `key` is always an output alias of the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub key: String,
    pub dir: Direction,
}

/// Validated, canonical query. Filters are sorted by `(column, operator)`
/// and `IN` lists by value, so semantically equivalent descriptors serialize
/// identically and fingerprint identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub select: Vec<SelectItem>,
    pub from: String,
    pub filters: Vec<Predicate>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
}

impl QueryDescriptor {
    /// Output column names in select order.
    pub fn aliases(&self) -> Vec<String> {
        self.select.iter().map(SelectItem::alias).collect()
    }

    /// Aggregates in select order.
    pub fn aggregates(&self) -> impl Iterator<Item = (AggFunc, &str)> {
        self.select.iter().filter_map(|item| match item {
            SelectItem::Aggregate { func, column } => Some((*func, column.as_str())),
            SelectItem::Column(_) => None,
        })
    }

    /// True if any select item is an aggregate.
    pub fn has_aggregates(&self) -> bool {
        self.aggregates().next().is_some()
    }

    /// Distinct set of columns referenced by filters.
    pub fn filter_columns(&self) -> BTreeSet<&str> {
        self.filters.iter().map(|p| p.column.as_str()).collect()
    }

    /// Every raw (non-aggregate) column the query touches: plain select
    /// columns, filter columns, and group-by columns.
    pub fn referenced_columns(&self) -> BTreeSet<&str> {
        let mut out: BTreeSet<&str> = self.filter_columns();
        for item in &self.select {
            match item {
                SelectItem::Column(c) => {
                    out.insert(c.as_str());
                }
                SelectItem::Aggregate { column, .. } if column != "*" => {
                    out.insert(column.as_str());
                }
                SelectItem::Aggregate { .. } => {}
            }
        }
        for g in &self.group_by {
            out.insert(g.as_str());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_star_alias_is_stable() {
        let item = SelectItem::Aggregate {
            func: AggFunc::Count,
            column: "*".to_string(),
        };
        assert_eq!(item.alias(), "count_star()");
    }

    #[test]
    fn aggregate_alias_uses_lowercase_function() {
        let item = SelectItem::Aggregate {
            func: AggFunc::Avg,
            column: "bid_price".to_string(),
        };
        assert_eq!(item.alias(), "avg(bid_price)");
    }

    #[test]
    fn operator_parse_accepts_symbols_and_words() {
        assert_eq!(Operator::parse("="), Some(Operator::Eq));
        assert_eq!(Operator::parse("!="), Some(Operator::Neq));
        assert_eq!(Operator::parse(">="), Some(Operator::Gte));
        assert_eq!(Operator::parse("between"), Some(Operator::Between));
        assert_eq!(Operator::parse("like"), None);
    }

    #[test]
    fn scalar_ordering_is_total() {
        let mut vals = vec![
            Scalar::Text("b".into()),
            Scalar::Int(3),
            Scalar::Float(1.5),
            Scalar::Text("a".into()),
            Scalar::Int(1),
        ];
        vals.sort_by(Scalar::canonical_cmp);
        assert_eq!(
            vals,
            vec![
                Scalar::Int(1),
                Scalar::Int(3),
                Scalar::Float(1.5),
                Scalar::Text("a".into()),
                Scalar::Text("b".into()),
            ]
        );
    }

    #[test]
    fn wire_doc_parses_aggregates_and_filters() {
        let raw = r#"{
            "select": ["country", {"agg": "sum", "col": "bid_price"}],
            "from": "events",
            "where": [{"col": "country", "op": "=", "val": "US"}],
            "group_by": ["country"],
            "order_by": [{"col": "sum(bid_price)", "dir": "desc"}],
            "limit": 10
        }"#;
        let doc = QueryDoc::from_json(raw).unwrap();
        assert_eq!(doc.select.len(), 2);
        assert_eq!(doc.filters.len(), 1);
        assert_eq!(doc.limit, Some(10));
    }
}
