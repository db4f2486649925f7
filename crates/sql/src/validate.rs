//! Descriptor validation and canonicalization.
//!
//! [`canonicalize`] is the only way to obtain a [`QueryDescriptor`]: it
//! checks the wire document against the supported query shape and rewrites
//! it into a canonical form in which filter order and `IN`-list order no
//! longer matter. Two semantically equivalent documents therefore produce
//! byte-identical canonical descriptors, which is what makes the cache
//! fingerprint reliable.

use std::collections::{BTreeSet, HashSet};

use crate::descriptor::{
    AggFunc, Direction, Operator, OrderKey, Predicate, QueryDescriptor, QueryDoc, RawSelect,
    Scalar, SelectItem,
};
use crate::error::ValidationError;

/// Validate a wire document and produce its canonical descriptor.
pub fn canonicalize(doc: &QueryDoc) -> Result<QueryDescriptor, ValidationError> {
    if doc.select.is_empty() {
        return Err(ValidationError::EmptySelect);
    }
    let from = doc.from.trim();
    if from.is_empty() {
        return Err(ValidationError::EmptyFrom);
    }

    let select = doc
        .select
        .iter()
        .map(parse_select_item)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::new();
    for item in &select {
        let alias = item.alias();
        if !seen.insert(alias.clone()) {
            return Err(ValidationError::DuplicateAlias(alias));
        }
    }

    let mut filters = doc
        .filters
        .iter()
        .map(parse_predicate)
        .collect::<Result<Vec<_>, _>>()?;
    // Canonical order: by column, then by a fixed operator rank. IN lists are
    // themselves order-independent, so their values are sorted too.
    filters.sort_by(|a, b| {
        (a.column.as_str(), a.op.canonical_rank())
            .cmp(&(b.column.as_str(), b.op.canonical_rank()))
    });

    check_grouping(&select, &doc.group_by)?;

    let aliases: BTreeSet<String> = select.iter().map(SelectItem::alias).collect();
    let order_by = doc
        .order_by
        .iter()
        .map(|o| parse_order_key(o, &aliases))
        .collect::<Result<Vec<_>, _>>()?;

    if doc.limit == Some(0) {
        return Err(ValidationError::ZeroLimit);
    }

    Ok(QueryDescriptor {
        select,
        from: from.to_string(),
        filters,
        group_by: doc.group_by.clone(),
        order_by,
        limit: doc.limit,
    })
}

fn parse_select_item(raw: &RawSelect) -> Result<SelectItem, ValidationError> {
    match raw {
        RawSelect::Column(name) => Ok(SelectItem::Column(name.clone())),
        RawSelect::Aggregate { agg, col } => {
            let func = AggFunc::parse(agg)
                .ok_or_else(|| ValidationError::UnknownFunction(agg.clone()))?;
            if col == "*" && func != AggFunc::Count {
                return Err(ValidationError::StarOutsideCount);
            }
            Ok(SelectItem::Aggregate {
                func,
                column: col.clone(),
            })
        }
    }
}

fn parse_predicate(raw: &crate::descriptor::RawPredicate) -> Result<Predicate, ValidationError> {
    let op = Operator::parse(&raw.op)
        .ok_or_else(|| ValidationError::UnknownOperator(raw.op.clone(), raw.col.clone()))?;

    let values = match op {
        Operator::In => {
            let list = as_array(&raw.val, &raw.col, "in")?;
            if list.is_empty() {
                return Err(ValidationError::OperatorArity {
                    column: raw.col.clone(),
                    op: "in",
                    expected: "a non-empty list",
                    actual: 0,
                });
            }
            let mut values = list
                .iter()
                .map(|v| json_to_scalar(v, &raw.col))
                .collect::<Result<Vec<_>, _>>()?;
            values.sort_by(Scalar::canonical_cmp);
            values.dedup();
            values
        }
        Operator::Between => {
            let list = as_array(&raw.val, &raw.col, "between")?;
            if list.len() != 2 {
                return Err(ValidationError::OperatorArity {
                    column: raw.col.clone(),
                    op: "between",
                    expected: "exactly two values",
                    actual: list.len(),
                });
            }
            vec![
                json_to_scalar(&list[0], &raw.col)?,
                json_to_scalar(&list[1], &raw.col)?,
            ]
        }
        _ => {
            if raw.val.is_array() {
                return Err(ValidationError::OperatorArity {
                    column: raw.col.clone(),
                    op: op_name(op),
                    expected: "a single value",
                    actual: raw.val.as_array().map(Vec::len).unwrap_or(0),
                });
            }
            vec![json_to_scalar(&raw.val, &raw.col)?]
        }
    };

    Ok(Predicate {
        column: raw.col.clone(),
        op,
        values,
    })
}

fn op_name(op: Operator) -> &'static str {
    match op {
        Operator::Eq => "=",
        Operator::Neq => "!=",
        Operator::Gt => ">",
        Operator::Gte => ">=",
        Operator::Lt => "<",
        Operator::Lte => "<=",
        Operator::In => "in",
        Operator::Between => "between",
    }
}

fn as_array<'a>(
    val: &'a serde_json::Value,
    column: &str,
    op: &'static str,
) -> Result<&'a Vec<serde_json::Value>, ValidationError> {
    val.as_array().ok_or_else(|| ValidationError::OperatorArity {
        column: column.to_string(),
        op,
        expected: "a list of values",
        actual: 1,
    })
}

fn json_to_scalar(val: &serde_json::Value, column: &str) -> Result<Scalar, ValidationError> {
    match val {
        serde_json::Value::Bool(b) => Ok(Scalar::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Scalar::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Scalar::Float(f))
            } else {
                Err(ValidationError::InvalidValue {
                    column: column.to_string(),
                    reason: format!("number {n} is out of range"),
                })
            }
        }
        serde_json::Value::String(s) => Ok(Scalar::Text(s.clone())),
        serde_json::Value::Null => Err(ValidationError::InvalidValue {
            column: column.to_string(),
            reason: "null is not a filter value; use a comparison that excludes nulls".to_string(),
        }),
        other => Err(ValidationError::InvalidValue {
            column: column.to_string(),
            reason: format!("unsupported JSON value {other}"),
        }),
    }
}

/// Cross-check select items against `group_by`.
///
/// Group-by columns must be selected, and when any aggregate is present every
/// plain select column must be grouped.
fn check_grouping(select: &[SelectItem], group_by: &[String]) -> Result<(), ValidationError> {
    let plain: BTreeSet<&str> = select
        .iter()
        .filter_map(|i| match i {
            SelectItem::Column(c) => Some(c.as_str()),
            SelectItem::Aggregate { .. } => None,
        })
        .collect();

    for g in group_by {
        if !plain.contains(g.as_str()) {
            return Err(ValidationError::GroupByNotSelected(g.clone()));
        }
    }

    let has_aggregates = select
        .iter()
        .any(|i| matches!(i, SelectItem::Aggregate { .. }));
    if has_aggregates {
        let grouped: BTreeSet<&str> = group_by.iter().map(String::as_str).collect();
        for c in plain {
            if !grouped.contains(c) {
                return Err(ValidationError::UngroupedColumn(c.to_string()));
            }
        }
    }
    Ok(())
}

fn parse_order_key(
    raw: &crate::descriptor::RawOrderBy,
    aliases: &BTreeSet<String>,
) -> Result<OrderKey, ValidationError> {
    // Accept the exact alias, or a case-folded spelling of an aggregate alias
    // (callers often write `SUM(bid_price)`).
    let key = if aliases.contains(&raw.col) {
        raw.col.clone()
    } else {
        let folded = raw.col.to_ascii_lowercase();
        aliases
            .iter()
            .find(|a| **a == folded)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownOrderKey(raw.col.clone()))?
    };

    let dir = match raw.dir.as_deref() {
        None => Direction::Asc,
        Some(d) => match d.to_ascii_lowercase().as_str() {
            "asc" => Direction::Asc,
            "desc" => Direction::Desc,
            other => {
                return Err(ValidationError::InvalidValue {
                    column: raw.col.clone(),
                    reason: format!("unknown sort direction '{other}'"),
                })
            }
        },
    };

    Ok(OrderKey { key, dir })
}
