//! Dataset preparation and rollup materialization.
//!
//! Three build steps, each idempotent:
//!
//! 1. Convert `events_part_*.csv` files to Parquet (skipped when Parquet
//!    parts already exist). All columns are read as VARCHAR; typing happens
//!    in the view.
//! 2. Create the raw event view over the Parquet parts, casting columns and
//!    adding the derived `week`/`day`/`hour`/`minute` columns, then persist
//!    it as a typed table for rollup builds to scan.
//! 3. Materialize every rollup in the catalog from the persisted table,
//!    record fresh row estimates, and bump the data version so previously
//!    cached results can never be served again.

use std::path::{Path, PathBuf};

use granary_common::config::EngineSettings;
use granary_error::{ErrorCode, GranaryError};
use granary_sql::sanitize::quote_ident;
use tracing::{debug, info};

use crate::catalog::RollupCatalog;
use crate::engine::QueryEngine;
use crate::rows::Value;

/// Builds the dataset and rollups on an engine.
pub struct DatasetBuilder<'a> {
    engine: &'a dyn QueryEngine,
    raw_table: String,
    persisted_table: String,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(engine: &'a dyn QueryEngine, settings: &EngineSettings) -> Self {
        Self {
            engine,
            raw_table: settings.raw_table.clone(),
            persisted_table: settings.persisted_table.clone(),
        }
    }

    /// Steps 1 and 2: ingest CSV parts and persist the typed event table.
    pub async fn prepare(&self, data_dir: &Path) -> Result<(), GranaryError> {
        self.convert_csv_parts(data_dir).await?;
        self.create_event_view(data_dir).await?;

        info!(table = %self.persisted_table, "persisting typed event table");
        self.engine
            .execute_batch(&format!(
                "CREATE OR REPLACE TABLE {} AS SELECT * FROM {}",
                quote_ident(&self.persisted_table).map_err(|e| e.to_granary_error())?,
                quote_ident(&self.raw_table).map_err(|e| e.to_granary_error())?
            ))
            .await?;
        Ok(())
    }

    /// Step 3: materialize every catalog rollup and refresh its row
    /// estimate. Bumps the data version on success.
    pub async fn build_rollups(&self, catalog: &mut RollupCatalog) -> Result<(), GranaryError> {
        for rollup in catalog.rollups().to_vec() {
            info!(rollup = %rollup.name, grain = rollup.grain(), "building rollup");
            self.engine
                .execute_batch(&rollup.build_sql(&self.persisted_table)?)
                .await?;
        }

        for name in catalog
            .rollups()
            .iter()
            .map(|r| r.name.clone())
            .collect::<Vec<_>>()
        {
            let rows = self.count_rows(&name).await?;
            debug!(rollup = %name, rows, "rollup row estimate");
            catalog.set_row_estimate(&name, rows);
        }

        catalog.bump_data_version();
        info!(
            rollups = catalog.rollups().len(),
            data_version = catalog.data_version(),
            "rollup build complete"
        );
        Ok(())
    }

    /// Refresh row estimates for an already-built catalog without
    /// rebuilding. Used when a session starts against an existing database.
    pub async fn refresh_estimates(
        &self,
        catalog: &mut RollupCatalog,
    ) -> Result<(), GranaryError> {
        for name in catalog
            .rollups()
            .iter()
            .map(|r| r.name.clone())
            .collect::<Vec<_>>()
        {
            let rows = self.count_rows(&name).await?;
            catalog.set_row_estimate(&name, rows);
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64, GranaryError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            quote_ident(table).map_err(|e| e.to_granary_error())?
        );
        let result = self.engine.fetch(&sql).await?;
        match result.rows.first().and_then(|r| r.first()) {
            Some(Value::Int(n)) => Ok(u64::try_from(*n).unwrap_or(0)),
            _ => Err(GranaryError::new(
                ErrorCode::Internal,
                format!("COUNT(*) on '{table}' returned no rows"),
            )),
        }
    }

    async fn convert_csv_parts(&self, data_dir: &Path) -> Result<(), GranaryError> {
        let csv_parts = event_parts(data_dir, "csv")?;
        let parquet_parts = event_parts(data_dir, "parquet")?;
        if !parquet_parts.is_empty() {
            info!(parts = parquet_parts.len(), "found existing Parquet parts");
            return Ok(());
        }
        if csv_parts.is_empty() {
            return Err(GranaryError::new(
                ErrorCode::InvalidConfig,
                format!("no events_part_*.csv found in {}", data_dir.display()),
            )
            .with_hint("Point --data-dir at the directory holding the event part files"));
        }

        info!(parts = csv_parts.len(), "converting CSV parts to Parquet");
        for csv_file in csv_parts {
            let parquet_file = csv_file.with_extension("parquet");
            debug!(file = %csv_file.display(), "converting part");
            self.engine
                .execute_batch(&format!(
                    "COPY (SELECT * FROM read_csv('{}', AUTO_DETECT = FALSE, HEADER = TRUE, \
                     COLUMNS = {{'ts': 'VARCHAR', 'type': 'VARCHAR', 'auction_id': 'VARCHAR', \
                     'advertiser_id': 'VARCHAR', 'publisher_id': 'VARCHAR', \
                     'bid_price': 'VARCHAR', 'user_id': 'VARCHAR', 'total_price': 'VARCHAR', \
                     'country': 'VARCHAR'}})) TO '{}' (FORMAT PARQUET)",
                    escape_path(&csv_file)?,
                    escape_path(&parquet_file)?
                ))
                .await?;
        }
        Ok(())
    }

    async fn create_event_view(&self, data_dir: &Path) -> Result<(), GranaryError> {
        let glob = data_dir.join("events_part_*.parquet");
        info!(table = %self.raw_table, "creating raw event view");
        self.engine
            .execute_batch(&format!(
                "CREATE OR REPLACE VIEW {} AS \
                 WITH raw AS (SELECT * FROM read_parquet('{}')), \
                 casted AS (SELECT \
                   to_timestamp(TRY_CAST(ts AS DOUBLE) / 1000.0) AS ts, \
                   type, auction_id, \
                   TRY_CAST(advertiser_id AS INTEGER) AS advertiser_id, \
                   TRY_CAST(publisher_id AS INTEGER) AS publisher_id, \
                   NULLIF(bid_price, '')::DOUBLE AS bid_price, \
                   TRY_CAST(user_id AS BIGINT) AS user_id, \
                   NULLIF(total_price, '')::DOUBLE AS total_price, \
                   country \
                 FROM raw) \
                 SELECT ts, \
                   DATE_TRUNC('week', ts) AS week, \
                   DATE(ts) AS day, \
                   DATE_TRUNC('hour', ts) AS hour, \
                   STRFTIME(ts, '%Y-%m-%d %H:%M') AS minute, \
                   type, auction_id, advertiser_id, publisher_id, \
                   bid_price, user_id, total_price, country \
                 FROM casted",
                quote_ident(&self.raw_table).map_err(|e| e.to_granary_error())?,
                escape_path(&glob)?
            ))
            .await
    }
}

fn event_parts(data_dir: &Path, extension: &str) -> Result<Vec<PathBuf>, GranaryError> {
    let entries = std::fs::read_dir(data_dir).map_err(|e| {
        GranaryError::new(
            ErrorCode::InvalidConfig,
            format!("cannot read data directory {}: {e}", data_dir.display()),
        )
    })?;
    let mut parts: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().map(|x| x == extension).unwrap_or(false)
                && p.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.starts_with("events_part_"))
                    .unwrap_or(false)
        })
        .collect();
    parts.sort();
    Ok(parts)
}

/// Paths are interpolated into engine SQL as string literals; reject quotes
/// and control characters instead of escaping them.
fn escape_path(path: &Path) -> Result<String, GranaryError> {
    let s = path.to_str().ok_or_else(|| {
        GranaryError::new(
            ErrorCode::InvalidConfig,
            format!("path is not valid UTF-8: {}", path.display()),
        )
    })?;
    if s.contains('\'') || s.chars().any(|c| c.is_control()) {
        return Err(GranaryError::new(
            ErrorCode::InvalidConfig,
            format!("unsupported character in path: {s}"),
        ));
    }
    Ok(s.to_string())
}
