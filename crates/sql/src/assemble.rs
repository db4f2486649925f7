//! SQL assembly.
//!
//! Compiles a canonical [`QueryDescriptor`] into engine SQL against a
//! resolved source. Against the raw event view the aggregates are emitted
//! directly; against a rollup they are rewritten over the pre-aggregated
//! measure columns:
//!
//! * `COUNT(*)`  becomes `SUM(cnt)`
//! * `SUM(x)`    becomes `SUM(sum_x)`
//! * `AVG(x)`    becomes `SUM(sum_x) * 1.0 / NULLIF(SUM(cnt), 0)`
//! * `MIN/MAX(x)` re-aggregate the rollup's own min/max columns when present
//!
//! Both paths share the same output aliases, so a routed query returns the
//! same header row regardless of which source answered it.

use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::{AggFunc, Operator, Predicate, QueryDescriptor, SelectItem};
use crate::error::CompileError;
use crate::literal::format_scalar;
use crate::sanitize::{quote_alias, quote_ident};

/// Physical layout of one rollup table, as the assembler needs it: the
/// dimension columns it retains and the measure columns it stores.
#[derive(Debug, Clone)]
pub struct RollupSource {
    pub table: String,
    /// Dimension columns present in the rollup (grain columns).
    pub dimensions: BTreeSet<String>,
    /// Physical column holding the pre-aggregated `COUNT(*)`.
    pub count_column: Option<String>,
    /// Source column -> physical `SUM` column.
    pub sum_columns: BTreeMap<String, String>,
    /// Source column -> physical `MIN` column.
    pub min_columns: BTreeMap<String, String>,
    /// Source column -> physical `MAX` column.
    pub max_columns: BTreeMap<String, String>,
}

/// The table a routed query will run against.
#[derive(Debug, Clone)]
pub enum ResolvedSource {
    Raw { table: String },
    Rollup(RollupSource),
}

impl ResolvedSource {
    pub fn table(&self) -> &str {
        match self {
            Self::Raw { table } => table,
            Self::Rollup(r) => &r.table,
        }
    }
}

/// A fully assembled query ready for execution.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    /// Output column names, in select order.
    pub columns: Vec<String>,
    /// Table the SQL runs against.
    pub source: String,
}

/// Assemble engine SQL for a canonical descriptor against a resolved source.
pub fn assemble(
    desc: &QueryDescriptor,
    source: &ResolvedSource,
) -> Result<CompiledQuery, CompileError> {
    if let ResolvedSource::Rollup(rollup) = source {
        check_dimensions(desc, rollup)?;
    }

    let select = desc
        .select
        .iter()
        .map(|item| select_expr(item, source))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", select, quote_ident(source.table())?);

    if !desc.filters.is_empty() {
        let clauses = desc
            .filters
            .iter()
            .map(predicate_sql)
            .collect::<Result<Vec<_>, _>>()?;
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if !desc.group_by.is_empty() {
        let cols = desc
            .group_by
            .iter()
            .map(|g| quote_ident(g))
            .collect::<Result<Vec<_>, _>>()?;
        sql.push_str(" GROUP BY ");
        sql.push_str(&cols.join(", "));
    }

    if !desc.order_by.is_empty() {
        let keys = desc
            .order_by
            .iter()
            .map(|o| Ok(format!("{} {}", quote_alias(&o.key)?, o.dir.sql())))
            .collect::<Result<Vec<_>, CompileError>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    if let Some(limit) = desc.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok(CompiledQuery {
        sql,
        columns: desc.aliases(),
        source: source.table().to_string(),
    })
}

/// Reject assembly against a rollup that lacks a referenced dimension.
/// Routing should never let this happen; the check keeps a routing bug from
/// turning into an engine error with a misleading message.
fn check_dimensions(
    desc: &QueryDescriptor,
    rollup: &RollupSource,
) -> Result<(), CompileError> {
    let mut referenced: BTreeSet<&str> = desc.filter_columns();
    for item in &desc.select {
        if let SelectItem::Column(c) = item {
            referenced.insert(c.as_str());
        }
    }
    for g in &desc.group_by {
        referenced.insert(g.as_str());
    }
    for col in referenced {
        if !rollup.dimensions.contains(col) {
            return Err(CompileError::NotDerivable {
                func: "select",
                column: col.to_string(),
                rollup: rollup.table.clone(),
            });
        }
    }
    Ok(())
}

fn select_expr(item: &SelectItem, source: &ResolvedSource) -> Result<String, CompileError> {
    match item {
        SelectItem::Column(c) => quote_ident(c),
        SelectItem::Aggregate { func, column } => {
            let expr = match source {
                ResolvedSource::Raw { .. } => raw_agg_expr(*func, column)?,
                ResolvedSource::Rollup(rollup) => rollup_agg_expr(*func, column, rollup)?,
            };
            Ok(format!("{} AS {}", expr, quote_alias(&item.alias())?))
        }
    }
}

fn raw_agg_expr(func: AggFunc, column: &str) -> Result<String, CompileError> {
    if column == "*" {
        return Ok("COUNT(*)".to_string());
    }
    Ok(format!("{}({})", func.sql_name(), quote_ident(column)?))
}

fn rollup_agg_expr(
    func: AggFunc,
    column: &str,
    rollup: &RollupSource,
) -> Result<String, CompileError> {
    let not_derivable = |func: &'static str| CompileError::NotDerivable {
        func,
        column: column.to_string(),
        rollup: rollup.table.clone(),
    };

    match func {
        AggFunc::Count => {
            if column != "*" {
                return Err(not_derivable("count"));
            }
            let cnt = rollup.count_column.as_deref().ok_or_else(|| {
                not_derivable("count")
            })?;
            Ok(format!("SUM({})", quote_ident(cnt)?))
        }
        AggFunc::Sum => {
            let col = rollup.sum_columns.get(column).ok_or_else(|| {
                not_derivable("sum")
            })?;
            Ok(format!("SUM({})", quote_ident(col)?))
        }
        AggFunc::Avg => {
            let sum = rollup.sum_columns.get(column).ok_or_else(|| {
                not_derivable("avg")
            })?;
            let cnt = rollup.count_column.as_deref().ok_or_else(|| {
                not_derivable("avg")
            })?;
            Ok(format!(
                "SUM({}) * 1.0 / NULLIF(SUM({}), 0)",
                quote_ident(sum)?,
                quote_ident(cnt)?
            ))
        }
        AggFunc::Min => {
            let col = rollup.min_columns.get(column).ok_or_else(|| {
                not_derivable("min")
            })?;
            Ok(format!("MIN({})", quote_ident(col)?))
        }
        AggFunc::Max => {
            let col = rollup.max_columns.get(column).ok_or_else(|| {
                not_derivable("max")
            })?;
            Ok(format!("MAX({})", quote_ident(col)?))
        }
    }
}

fn predicate_sql(p: &Predicate) -> Result<String, CompileError> {
    let col = quote_ident(&p.column)?;
    match p.op {
        Operator::In => {
            let vals = p
                .values
                .iter()
                .map(|v| format_scalar(&p.column, v))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("{} IN ({})", col, vals.join(", ")))
        }
        Operator::Between => {
            let lo = format_scalar(&p.column, &p.values[0])?;
            let hi = format_scalar(&p.column, &p.values[1])?;
            Ok(format!("{col} BETWEEN {lo} AND {hi}"))
        }
        op => {
            let symbol = match op {
                Operator::Eq => "=",
                Operator::Neq => "<>",
                Operator::Gt => ">",
                Operator::Gte => ">=",
                Operator::Lt => "<",
                Operator::Lte => "<=",
                Operator::In | Operator::Between => unreachable!(),
            };
            let lit = format_scalar(&p.column, &p.values[0])?;
            Ok(format!("{col} {symbol} {lit}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Direction, OrderKey, Scalar};

    fn rollup() -> RollupSource {
        RollupSource {
            table: "rollup_by_country_day".to_string(),
            dimensions: ["country", "day"].iter().map(|s| s.to_string()).collect(),
            count_column: Some("cnt".to_string()),
            sum_columns: [
                ("bid_price".to_string(), "sum_bid".to_string()),
                ("total_price".to_string(), "sum_total".to_string()),
            ]
            .into_iter()
            .collect(),
            min_columns: BTreeMap::new(),
            max_columns: BTreeMap::new(),
        }
    }

    fn grouped_descriptor() -> QueryDescriptor {
        QueryDescriptor {
            select: vec![
                SelectItem::Column("country".to_string()),
                SelectItem::Aggregate {
                    func: AggFunc::Count,
                    column: "*".to_string(),
                },
                SelectItem::Aggregate {
                    func: AggFunc::Avg,
                    column: "bid_price".to_string(),
                },
            ],
            from: "events".to_string(),
            filters: vec![Predicate {
                column: "country".to_string(),
                op: Operator::In,
                values: vec![Scalar::Text("DE".into()), Scalar::Text("US".into())],
            }],
            group_by: vec!["country".to_string()],
            order_by: vec![OrderKey {
                key: "count_star()".to_string(),
                dir: Direction::Desc,
            }],
            limit: Some(10),
        }
    }

    #[test]
    fn assembles_raw_sql() {
        let q = assemble(
            &grouped_descriptor(),
            &ResolvedSource::Raw {
                table: "events".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"country\", COUNT(*) AS \"count_star()\", \
             AVG(\"bid_price\") AS \"avg(bid_price)\" \
             FROM \"events\" \
             WHERE \"country\" IN ('DE', 'US') \
             GROUP BY \"country\" \
             ORDER BY \"count_star()\" DESC LIMIT 10"
        );
        assert_eq!(
            q.columns,
            vec!["country", "count_star()", "avg(bid_price)"]
        );
    }

    #[test]
    fn rewrites_aggregates_over_rollup_measures() {
        let q = assemble(&grouped_descriptor(), &ResolvedSource::Rollup(rollup())).unwrap();
        assert!(q.sql.contains("SUM(\"cnt\") AS \"count_star()\""));
        assert!(q
            .sql
            .contains("SUM(\"sum_bid\") * 1.0 / NULLIF(SUM(\"cnt\"), 0) AS \"avg(bid_price)\""));
        assert!(q.sql.contains("FROM \"rollup_by_country_day\""));
        // Output header matches the raw path exactly.
        assert_eq!(
            q.columns,
            vec!["country", "count_star()", "avg(bid_price)"]
        );
    }

    #[test]
    fn rejects_sum_of_unmeasured_column_on_rollup() {
        let mut desc = grouped_descriptor();
        desc.select.push(SelectItem::Aggregate {
            func: AggFunc::Sum,
            column: "latency_ms".to_string(),
        });
        let err = assemble(&desc, &ResolvedSource::Rollup(rollup())).unwrap_err();
        assert!(matches!(err, CompileError::NotDerivable { func: "sum", .. }));
    }

    #[test]
    fn rejects_missing_dimension_on_rollup() {
        let mut desc = grouped_descriptor();
        desc.filters.push(Predicate {
            column: "publisher".to_string(),
            op: Operator::Eq,
            values: vec![Scalar::Text("p1".into())],
        });
        let err = assemble(&desc, &ResolvedSource::Rollup(rollup())).unwrap_err();
        assert!(matches!(err, CompileError::NotDerivable { .. }));
    }

    #[test]
    fn between_and_comparisons_render_typed_literals() {
        let desc = QueryDescriptor {
            select: vec![SelectItem::Aggregate {
                func: AggFunc::Count,
                column: "*".to_string(),
            }],
            from: "events".to_string(),
            filters: vec![
                Predicate {
                    column: "bid_price".to_string(),
                    op: Operator::Between,
                    values: vec![Scalar::Float(0.5), Scalar::Float(2.0)],
                },
                Predicate {
                    column: "day".to_string(),
                    op: Operator::Gte,
                    values: vec![Scalar::Text("2024-01-01".into())],
                },
            ],
            group_by: vec![],
            order_by: vec![],
            limit: None,
        };
        let q = assemble(
            &desc,
            &ResolvedSource::Raw {
                table: "events".to_string(),
            },
        )
        .unwrap();
        assert!(q.sql.contains("\"bid_price\" BETWEEN 0.5 AND 2"));
        assert!(q.sql.contains("\"day\" >= '2024-01-01'"));
    }

    #[test]
    fn rejects_hostile_table_names() {
        let desc = grouped_descriptor();
        let err = assemble(
            &desc,
            &ResolvedSource::Raw {
                table: "events; DROP TABLE events".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidIdentifier(_)));
    }
}
