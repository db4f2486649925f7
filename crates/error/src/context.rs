//! # Error Contexts
//!
//! Structured metadata for errors to enable programmatic analysis.

use serde::{Deserialize, Serialize};

/// Structured context attached to a [`crate::GranaryError`].
///
/// Each variant provides the fields relevant to that error class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for GRANARY-2001 (InvalidDescriptor)
    FieldInvalid {
        field: String,
        message: String,
    },

    /// Context for GRANARY-2003 (UnsupportedValue)
    UnsupportedValue {
        column: String,
        reason: String,
    },

    /// Context for execution errors (GRANARY-1002, 1003, 1004).
    ///
    /// Carries enough to reproduce the failed run: the compiled SQL, the
    /// source the router chose, and the result fingerprint.
    Execution {
        sql: String,
        source: String,
        fingerprint: String,
    },

    /// Context for GRANARY-3002 (CatalogMismatch)
    CatalogMismatch {
        /// Rollup or raw table name
        table: String,
        /// Columns the catalog declares
        expected_columns: Vec<String>,
        /// Columns actually present in the engine
        actual_columns: Vec<String>,
        /// Declared columns missing from the engine
        missing_columns: Vec<String>,
    },

    /// Context for GRANARY-4001 (CacheCorruption)
    CacheCorruption {
        fingerprint: String,
        expected_checksum: String,
        actual_checksum: String,
    },

    /// Generic key-value context for extensibility
    Generic {
        #[serde(flatten)]
        data: std::collections::HashMap<String, serde_json::Value>,
    },
}
