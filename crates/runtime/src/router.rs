//! Query routing.
//!
//! Picks the source a descriptor should run against. Routing is pure: it
//! looks only at the descriptor and the catalog, never at the engine, so a
//! decision can be made (and tested) without touching DuckDB.
//!
//! A rollup is eligible when it covers every referenced dimension and can
//! derive every aggregate exactly. Among eligible rollups the coarsest grain
//! wins; ties fall to the smaller row estimate, then to the table name so
//! the decision is deterministic.

use std::collections::BTreeSet;

use granary_sql::descriptor::{QueryDescriptor, SelectItem};
use granary_sql::ResolvedSource;
use tracing::debug;

use crate::catalog::{RollupCatalog, RollupSpec};

/// Why a query fell back to the raw view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The query has no aggregates; rollups cannot reproduce raw rows.
    NoAggregates,
    /// At least one aggregate is not derivable from any rollup.
    UnsupportedAggregate,
    /// Aggregates are fine, but no rollup covers the referenced dimensions.
    NoCoveringRollup,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAggregates => "no aggregates",
            Self::UnsupportedAggregate => "aggregate not derivable from any rollup",
            Self::NoCoveringRollup => "no rollup covers the referenced dimensions",
        }
    }
}

/// The router's verdict for one descriptor.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub source: ResolvedSource,
    /// Name of the chosen rollup, if one was chosen.
    pub rollup: Option<String>,
    /// Set when the raw view was chosen.
    pub fallback: Option<FallbackReason>,
    /// How many rollups were eligible.
    pub candidates: usize,
}

impl RoutingDecision {
    fn raw(catalog: &RollupCatalog, reason: FallbackReason, candidates: usize) -> Self {
        Self {
            source: ResolvedSource::Raw {
                table: catalog.raw_table().to_string(),
            },
            rollup: None,
            fallback: Some(reason),
            candidates,
        }
    }
}

/// Route a canonical descriptor against the catalog.
pub fn route(desc: &QueryDescriptor, catalog: &RollupCatalog) -> RoutingDecision {
    if !desc.has_aggregates() {
        debug!(from = %desc.from, "routing to raw: no aggregates");
        return RoutingDecision::raw(catalog, FallbackReason::NoAggregates, 0);
    }

    let referenced = referenced_dimensions(desc);

    let mut covering = 0usize;
    let mut eligible: Vec<&RollupSpec> = Vec::new();
    for rollup in catalog.rollups() {
        if !rollup.covers(&referenced) {
            continue;
        }
        covering += 1;
        if desc
            .aggregates()
            .all(|(func, column)| rollup.derives(func, column))
        {
            eligible.push(rollup);
        }
    }

    if eligible.is_empty() {
        let reason = if covering > 0 {
            FallbackReason::UnsupportedAggregate
        } else {
            FallbackReason::NoCoveringRollup
        };
        debug!(from = %desc.from, reason = reason.as_str(), "routing to raw");
        return RoutingDecision::raw(catalog, reason, 0);
    }

    eligible.sort_by(|a, b| {
        a.grain()
            .cmp(&b.grain())
            .then_with(|| {
                a.row_estimate
                    .unwrap_or(u64::MAX)
                    .cmp(&b.row_estimate.unwrap_or(u64::MAX))
            })
            .then_with(|| a.name.cmp(&b.name))
    });
    let winner = eligible[0];
    debug!(
        from = %desc.from,
        rollup = %winner.name,
        candidates = eligible.len(),
        "routing to rollup"
    );
    RoutingDecision {
        source: ResolvedSource::Rollup(winner.to_source()),
        rollup: Some(winner.name.clone()),
        fallback: None,
        candidates: eligible.len(),
    }
}

/// Dimensions the rollup must retain: plain select columns, group-by
/// columns, and filter columns. Aggregate argument columns are measures,
/// not dimensions.
fn referenced_dimensions(desc: &QueryDescriptor) -> BTreeSet<&str> {
    let mut out: BTreeSet<&str> = desc.filter_columns();
    for item in &desc.select {
        if let SelectItem::Column(c) = item {
            out.insert(c.as_str());
        }
    }
    for g in &desc.group_by {
        out.insert(g.as_str());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_sql::{canonicalize, QueryDoc};

    fn descriptor(raw: &str) -> QueryDescriptor {
        canonicalize(&QueryDoc::from_json(raw).unwrap()).unwrap()
    }

    fn catalog() -> RollupCatalog {
        RollupCatalog::standard("events")
    }

    #[test]
    fn routes_grouped_count_to_matching_grain() {
        let desc = descriptor(r#"{
            "select": ["country", "day", {"agg": "count", "col": "*"}],
            "from": "events",
            "group_by": ["country", "day"]
        }"#);
        let decision = route(&desc, &catalog());
        assert_eq!(decision.rollup.as_deref(), Some("by_country_day"));
        assert!(decision.fallback.is_none());
    }

    #[test]
    fn prefers_the_coarsest_covering_rollup() {
        // Only `day` is referenced; by_day (grain 2) beats by_country_day
        // (grain 3) and everything finer.
        let desc = descriptor(r#"{
            "select": ["day", {"agg": "sum", "col": "bid_price"}],
            "from": "events",
            "group_by": ["day"]
        }"#);
        let decision = route(&desc, &catalog());
        assert_eq!(decision.rollup.as_deref(), Some("by_day"));
        assert!(decision.candidates > 1);
    }

    #[test]
    fn row_estimates_break_grain_ties() {
        let mut cat = catalog();
        // by_publisher and by_country share grain 2 and both cover a
        // filter-free aggregate over no dimensions.
        cat.set_row_estimate("by_country", 50);
        cat.set_row_estimate("by_day", 400);
        cat.set_row_estimate("by_publisher", 100);
        cat.set_row_estimate("by_advertiser", 200);
        cat.set_row_estimate("by_minute", 100_000);
        let desc = descriptor(r#"{
            "select": [{"agg": "count", "col": "*"}],
            "from": "events"
        }"#);
        let decision = route(&desc, &cat);
        assert_eq!(decision.rollup.as_deref(), Some("by_country"));
    }

    #[test]
    fn name_breaks_full_ties_deterministically() {
        // No estimates at all: grain ties fall through to the name.
        let desc = descriptor(r#"{
            "select": [{"agg": "count", "col": "*"}],
            "from": "events"
        }"#);
        let decision = route(&desc, &catalog());
        assert_eq!(decision.rollup.as_deref(), Some("by_advertiser"));
    }

    #[test]
    fn non_aggregate_query_falls_back() {
        let desc = descriptor(r#"{
            "select": ["country", "day"],
            "from": "events",
            "limit": 10
        }"#);
        let decision = route(&desc, &catalog());
        assert!(matches!(decision.fallback, Some(FallbackReason::NoAggregates)));
        assert!(decision.rollup.is_none());
    }

    #[test]
    fn unmeasured_aggregate_falls_back() {
        let desc = descriptor(r#"{
            "select": ["day", {"agg": "sum", "col": "user_id"}],
            "from": "events",
            "group_by": ["day"]
        }"#);
        let decision = route(&desc, &catalog());
        assert!(matches!(
            decision.fallback,
            Some(FallbackReason::UnsupportedAggregate)
        ));
    }

    #[test]
    fn min_max_always_fall_back() {
        let desc = descriptor(r#"{
            "select": ["day", {"agg": "max", "col": "bid_price"}],
            "from": "events",
            "group_by": ["day"]
        }"#);
        let decision = route(&desc, &catalog());
        assert!(decision.fallback.is_some());
    }

    #[test]
    fn uncovered_dimension_falls_back() {
        let desc = descriptor(r#"{
            "select": ["auction_id", {"agg": "count", "col": "*"}],
            "from": "events",
            "group_by": ["auction_id"]
        }"#);
        let decision = route(&desc, &catalog());
        assert!(matches!(
            decision.fallback,
            Some(FallbackReason::NoCoveringRollup)
        ));
    }

    #[test]
    fn daily_revenue_filtered_by_type_uses_the_day_rollup() {
        let desc = descriptor(r#"{
            "select": ["day", {"agg": "sum", "col": "total_price"}],
            "from": "events",
            "where": [{"col": "type", "op": "=", "val": "imp"}],
            "group_by": ["day"]
        }"#);
        let decision = route(&desc, &catalog());
        assert_eq!(decision.rollup.as_deref(), Some("by_day"));
        assert!(decision.fallback.is_none());
    }

    #[test]
    fn filter_columns_count_as_dimensions() {
        let desc = descriptor(r#"{
            "select": ["day", {"agg": "count", "col": "*"}],
            "from": "events",
            "where": [{"col": "publisher_id", "op": "=", "val": 7}],
            "group_by": ["day"]
        }"#);
        let decision = route(&desc, &catalog());
        assert_eq!(decision.rollup.as_deref(), Some("by_publisher_day"));
    }
}
