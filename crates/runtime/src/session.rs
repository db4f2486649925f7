//! The query session: parse, validate, route, execute, cache.
//!
//! One session owns a routing catalog, a cache, and a handle to the engine.
//! `run_json` is the whole pipeline for one query; it either returns a
//! report (rows plus everything needed to explain where they came from) or
//! a single [`GranaryError`]. Engine failures surface as errors; they are
//! never papered over by re-running the query against the raw view, since a
//! result produced that way could disagree with the rollup the cache key
//! names.

use std::sync::Arc;
use std::time::{Duration, Instant};

use granary_common::config::CacheSettings;
use granary_error::{ErrorCode, GranaryError};
use granary_sql::{assemble, canonicalize, Fingerprint, QueryDescriptor, QueryDoc};
use tracing::info;

use crate::cache::{CacheStats, ResultCache};
use crate::catalog::RollupCatalog;
use crate::engine::QueryEngine;
use crate::router::{route, FallbackReason};
use crate::rows::ResultSet;

/// What the cache did for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from cache; the engine was not touched.
    Hit,
    /// Executed and the result was stored.
    MissStored,
    /// Executed with caching disabled.
    Bypass,
}

/// Everything known about one executed query.
#[derive(Debug, Clone)]
pub struct QueryReport {
    pub result: ResultSet,
    pub sql: String,
    /// Table the query ran against.
    pub source: String,
    /// Rollup name when routed; `None` means the raw view answered.
    pub rollup: Option<String>,
    pub fallback: Option<FallbackReason>,
    pub fingerprint: Fingerprint,
    pub elapsed: Duration,
    pub cache: CacheOutcome,
}

/// Long-lived query entry point over one engine and catalog.
pub struct QuerySession {
    engine: Arc<dyn QueryEngine>,
    catalog: RollupCatalog,
    cache: Option<ResultCache>,
}

impl QuerySession {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        catalog: RollupCatalog,
        cache_settings: &CacheSettings,
    ) -> Self {
        let cache = cache_settings
            .enabled
            .then(|| ResultCache::new(cache_settings));
        Self {
            engine,
            catalog,
            cache,
        }
    }

    pub fn catalog(&self) -> &RollupCatalog {
        &self.catalog
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ResultCache::stats)
    }

    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    /// Run one query from its wire JSON.
    pub async fn run_json(&self, raw: &str) -> Result<QueryReport, GranaryError> {
        let doc = QueryDoc::from_json(raw).map_err(|e| {
            GranaryError::new(
                ErrorCode::InvalidDescriptor,
                format!("query is not valid JSON: {e}"),
            )
        })?;
        let desc = canonicalize(&doc)?;
        self.run(&desc).await
    }

    /// Run one canonical descriptor.
    pub async fn run(&self, desc: &QueryDescriptor) -> Result<QueryReport, GranaryError> {
        if desc.from != self.catalog.raw_table() {
            return Err(GranaryError::new(
                ErrorCode::UnknownEntity,
                format!("unknown source table '{}'", desc.from),
            )
            .with_hint(format!(
                "Queries run against '{}'",
                self.catalog.raw_table()
            )));
        }

        let started = Instant::now();
        let decision = route(desc, &self.catalog);
        let compiled = assemble(desc, &decision.source)?;
        let fingerprint =
            Fingerprint::compute(desc, &compiled.source, self.catalog.data_version());

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&fingerprint) {
                info!(
                    fingerprint = fingerprint.short(),
                    source = %compiled.source,
                    rows = entry.result.row_count(),
                    "cache hit"
                );
                return Ok(QueryReport {
                    result: entry.result.clone(),
                    sql: compiled.sql,
                    source: compiled.source,
                    rollup: decision.rollup,
                    fallback: decision.fallback,
                    fingerprint,
                    elapsed: started.elapsed(),
                    cache: CacheOutcome::Hit,
                });
            }
        }

        let result = self
            .engine
            .fetch(&compiled.sql)
            .await
            .map_err(|e| stamp_fingerprint(e, &fingerprint))?;
        let elapsed = started.elapsed();

        let cache_outcome = match &self.cache {
            Some(cache) => {
                // Empty results are cached too: "no matching rows" is a
                // valid answer worth remembering.
                cache.put(fingerprint.clone(), result.clone());
                CacheOutcome::MissStored
            }
            None => CacheOutcome::Bypass,
        };

        info!(
            fingerprint = fingerprint.short(),
            source = %compiled.source,
            rollup = decision.rollup.as_deref().unwrap_or("-"),
            fallback = decision.fallback.map(|f| f.as_str()).unwrap_or("-"),
            rows = result.row_count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "query executed"
        );

        Ok(QueryReport {
            result,
            sql: compiled.sql,
            source: compiled.source,
            rollup: decision.rollup,
            fallback: decision.fallback,
            fingerprint,
            elapsed,
            cache: cache_outcome,
        })
    }
}

/// Fill in the fingerprint on an engine error's execution context; the
/// engine itself never knows it.
fn stamp_fingerprint(mut e: GranaryError, fingerprint: &Fingerprint) -> GranaryError {
    if let Some(granary_error::ErrorContext::Execution {
        fingerprint: slot, ..
    }) = e.context.as_mut()
    {
        if slot.is_empty() {
            *slot = fingerprint.as_str().to_string();
        }
    }
    e
}
