//! The rollup catalog.
//!
//! Describes the pre-aggregated tables available for routing: their grain
//! (dimension columns), the measures they store, and roughly how many rows
//! they hold. The catalog also carries the data version, which increments on
//! every rebuild and flows into cache fingerprints so stale entries can never
//! be served after the dataset changes.

use std::collections::{BTreeMap, BTreeSet};

use granary_error::{ErrorCode, ErrorContext, GranaryError};
use granary_sql::descriptor::AggFunc;
use granary_sql::sanitize::quote_ident;
use granary_sql::RollupSource;

use crate::engine::QueryEngine;

/// Physical column holding the pre-aggregated row count in every rollup.
pub const COUNT_COLUMN: &str = "cnt";

/// One rollup table: its grain and its measures.
#[derive(Debug, Clone)]
pub struct RollupSpec {
    /// Table name in the engine.
    pub name: String,
    /// Grain columns, in table order.
    pub dimensions: Vec<String>,
    /// Source column -> physical SUM column (e.g. `bid_price -> sum_bid`).
    pub sums: BTreeMap<String, String>,
    /// Row count measured after the last build, used as a routing tie-break.
    pub row_estimate: Option<u64>,
}

impl RollupSpec {
    pub fn new(
        name: impl Into<String>,
        dimensions: &[&str],
        sums: &[(&str, &str)],
    ) -> Self {
        Self {
            name: name.into(),
            dimensions: dimensions.iter().map(|s| s.to_string()).collect(),
            sums: sums
                .iter()
                .map(|(src, phys)| (src.to_string(), phys.to_string()))
                .collect(),
            row_estimate: None,
        }
    }

    /// Number of grain columns. Fewer means coarser, hence fewer rows to
    /// scan for the same answer.
    pub fn grain(&self) -> usize {
        self.dimensions.len()
    }

    /// True if every referenced dimension is part of this rollup's grain.
    pub fn covers(&self, referenced: &BTreeSet<&str>) -> bool {
        referenced
            .iter()
            .all(|c| self.dimensions.iter().any(|d| d == c))
    }

    /// True if this rollup can answer `func(column)` exactly.
    pub fn derives(&self, func: AggFunc, column: &str) -> bool {
        match func {
            AggFunc::Count => column == "*",
            AggFunc::Sum | AggFunc::Avg => self.sums.contains_key(column),
            // Min/max are not preserved by the standard rollups.
            AggFunc::Min | AggFunc::Max => false,
        }
    }

    /// Columns this rollup's table is expected to have.
    pub fn expected_columns(&self) -> Vec<String> {
        let mut cols = self.dimensions.clone();
        cols.push(COUNT_COLUMN.to_string());
        cols.extend(self.sums.values().cloned());
        cols
    }

    /// The assembler's view of this rollup.
    pub fn to_source(&self) -> RollupSource {
        RollupSource {
            table: self.name.clone(),
            dimensions: self.dimensions.iter().cloned().collect(),
            count_column: Some(COUNT_COLUMN.to_string()),
            sum_columns: self.sums.clone(),
            min_columns: BTreeMap::new(),
            max_columns: BTreeMap::new(),
        }
    }

    /// `CREATE OR REPLACE TABLE` statement materializing this rollup from
    /// the persisted event table.
    pub fn build_sql(&self, persisted_table: &str) -> Result<String, GranaryError> {
        let dims = self
            .dimensions
            .iter()
            .map(|d| quote_ident(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_granary_error())?
            .join(", ");
        let mut measures = vec![format!(
            "COUNT(*) AS {}",
            quote_ident(COUNT_COLUMN).map_err(|e| e.to_granary_error())?
        )];
        for (src, phys) in &self.sums {
            measures.push(format!(
                "SUM({}) AS {}",
                quote_ident(src).map_err(|e| e.to_granary_error())?,
                quote_ident(phys).map_err(|e| e.to_granary_error())?
            ));
        }
        Ok(format!(
            "CREATE OR REPLACE TABLE {} AS SELECT {}, {} FROM {} GROUP BY {}",
            quote_ident(&self.name).map_err(|e| e.to_granary_error())?,
            dims,
            measures.join(", "),
            quote_ident(persisted_table).map_err(|e| e.to_granary_error())?,
            dims
        ))
    }
}

/// The set of rollups available for routing, plus the data version.
#[derive(Debug, Clone)]
pub struct RollupCatalog {
    raw_table: String,
    rollups: Vec<RollupSpec>,
    data_version: u64,
}

impl RollupCatalog {
    pub fn new(raw_table: impl Into<String>, rollups: Vec<RollupSpec>) -> Self {
        Self {
            raw_table: raw_table.into(),
            rollups,
            data_version: 0,
        }
    }

    /// The standard catalog: day, minute, and dimension rollups over the
    /// event stream, each keeping `cnt`, `sum_bid`, and `sum_total`.
    pub fn standard(raw_table: impl Into<String>) -> Self {
        let sums: &[(&str, &str)] = &[("bid_price", "sum_bid"), ("total_price", "sum_total")];
        let rollups = vec![
            RollupSpec::new("by_day", &["day", "type"], sums),
            RollupSpec::new("by_country_day", &["day", "country", "type"], sums),
            RollupSpec::new("by_publisher_day", &["day", "publisher_id", "type"], sums),
            RollupSpec::new("by_advertiser_day", &["day", "advertiser_id", "type"], sums),
            RollupSpec::new(
                "by_publisher_country_day",
                &["day", "publisher_id", "country", "type"],
                sums,
            ),
            RollupSpec::new(
                "by_advertiser_country_day",
                &["day", "advertiser_id", "country", "type"],
                sums,
            ),
            RollupSpec::new(
                "by_publisher_advertiser_day",
                &["day", "publisher_id", "advertiser_id", "type"],
                sums,
            ),
            RollupSpec::new("by_minute", &["minute", "day", "type"], sums),
            RollupSpec::new("by_country", &["country", "type"], sums),
            RollupSpec::new("by_publisher", &["publisher_id", "type"], sums),
            RollupSpec::new("by_advertiser", &["advertiser_id", "type"], sums),
        ];
        Self::new(raw_table, rollups)
    }

    pub fn raw_table(&self) -> &str {
        &self.raw_table
    }

    pub fn rollups(&self) -> &[RollupSpec] {
        &self.rollups
    }

    pub fn find(&self, name: &str) -> Option<&RollupSpec> {
        self.rollups.iter().find(|r| r.name == name)
    }

    /// Version stamped into cache fingerprints. Bumped on every rebuild.
    pub fn data_version(&self) -> u64 {
        self.data_version
    }

    pub fn bump_data_version(&mut self) {
        self.data_version += 1;
    }

    pub fn set_row_estimate(&mut self, name: &str, rows: u64) {
        if let Some(r) = self.rollups.iter_mut().find(|r| r.name == name) {
            r.row_estimate = Some(rows);
        }
    }

    /// Check that every declared rollup exists in the engine with at least
    /// its expected columns.
    pub async fn verify(&self, engine: &dyn QueryEngine) -> Result<(), GranaryError> {
        for rollup in &self.rollups {
            let actual = engine.table_columns(&rollup.name).await?;
            let expected = rollup.expected_columns();
            let missing: Vec<String> = expected
                .iter()
                .filter(|c| !actual.contains(c))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(GranaryError::new(
                    ErrorCode::CatalogMismatch,
                    format!(
                        "rollup '{}' is missing columns: {}",
                        rollup.name,
                        missing.join(", ")
                    ),
                )
                .with_context(ErrorContext::CatalogMismatch {
                    table: rollup.name.clone(),
                    expected_columns: expected,
                    actual_columns: actual,
                    missing_columns: missing,
                })
                .with_hint("Rebuild the rollups, then retry"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_has_eleven_rollups() {
        let catalog = RollupCatalog::standard("events");
        assert_eq!(catalog.rollups().len(), 11);
        assert!(catalog.find("by_country_day").is_some());
        assert!(catalog.find("by_hour").is_none());
    }

    #[test]
    fn covers_checks_grain_membership() {
        let catalog = RollupCatalog::standard("events");
        let rollup = catalog.find("by_country_day").unwrap();
        assert!(rollup.covers(&BTreeSet::from(["country", "day"])));
        assert!(rollup.covers(&BTreeSet::from(["country"])));
        assert!(!rollup.covers(&BTreeSet::from(["country", "publisher_id"])));
    }

    #[test]
    fn derivability_matches_stored_measures() {
        let catalog = RollupCatalog::standard("events");
        let rollup = catalog.find("by_day").unwrap();
        assert!(rollup.derives(AggFunc::Count, "*"));
        assert!(rollup.derives(AggFunc::Sum, "bid_price"));
        assert!(rollup.derives(AggFunc::Avg, "total_price"));
        assert!(!rollup.derives(AggFunc::Sum, "user_id"));
        assert!(!rollup.derives(AggFunc::Min, "bid_price"));
        assert!(!rollup.derives(AggFunc::Count, "bid_price"));
    }

    #[test]
    fn build_sql_groups_by_the_grain() {
        let catalog = RollupCatalog::standard("events");
        let sql = catalog
            .find("by_country_day")
            .unwrap()
            .build_sql("events_persisted")
            .unwrap();
        assert_eq!(
            sql,
            "CREATE OR REPLACE TABLE \"by_country_day\" AS \
             SELECT \"day\", \"country\", \"type\", COUNT(*) AS \"cnt\", \
             SUM(\"bid_price\") AS \"sum_bid\", SUM(\"total_price\") AS \"sum_total\" \
             FROM \"events_persisted\" GROUP BY \"day\", \"country\", \"type\""
        );
    }

    #[test]
    fn data_version_bumps() {
        let mut catalog = RollupCatalog::standard("events");
        assert_eq!(catalog.data_version(), 0);
        catalog.bump_data_version();
        assert_eq!(catalog.data_version(), 1);
    }
}
