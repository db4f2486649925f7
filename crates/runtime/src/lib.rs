//! Granary runtime: everything between a canonical query descriptor and its
//! rows.
//!
//! The pieces, in the order a query meets them:
//!
//! 1. [`catalog`] declares which rollup tables exist, their grain, and the
//!    measures they store, plus the data version that stamps every cache
//!    fingerprint.
//! 2. [`router`] picks the cheapest source (a rollup, or the raw view) that
//!    can answer a descriptor exactly.
//! 3. [`engine`] executes SQL on DuckDB behind a timeout, off the async
//!    runtime's worker threads.
//! 4. [`cache`] keeps bounded, checksummed result sets keyed by fingerprint.
//! 5. [`session`] ties the above into the single `run` entry point.
//!
//! [`build`] prepares the dataset and materializes the rollups; [`verify`]
//! compares results against ground-truth CSVs with numeric tolerance.

pub mod build;
pub mod cache;
pub mod catalog;
pub mod engine;
pub mod rows;
pub mod router;
pub mod session;
pub mod verify;

pub use cache::{CacheStats, ResultCache};
pub use catalog::{RollupCatalog, RollupSpec};
pub use engine::{DuckDbEngine, QueryEngine};
pub use rows::{ResultSet, Value};
pub use router::{route, FallbackReason, RoutingDecision};
pub use session::{CacheOutcome, QueryReport, QuerySession};
pub use verify::{compare_results, Verdict};
