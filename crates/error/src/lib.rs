//! # granary-error
//!
//! Unified error types for the Granary rollup-routing query engine.
//!
//! All errors carry:
//! - Numeric error codes (GRANARY-XXXX)
//! - Structured JSON context
//! - Actionable hints

mod code;
mod context;

pub use code::{ErrorCategory, ErrorCode};
pub use context::ErrorContext;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unified error type for all Granary operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GranaryError {
    /// Numeric error code (e.g., "GRANARY-2003")
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Structured context for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Actionable suggestion for the caller
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl GranaryError {
    /// Create a new error with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
        }
    }

    /// Add structured context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Add an actionable hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Whether the caller may retry the failed operation once with backoff.
    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }

    /// Serialize to JSON for reporting output
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize GranaryError: {}", e);
            format!(
                r#"{{"code":"{}","message":"Serialization failed"}}"#,
                self.code
            )
        })
    }
}

impl fmt::Display for GranaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (Hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for GranaryError {}

/// Result type alias for Granary operations
pub type Result<T> = std::result::Result<T, GranaryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granary_error_builder() {
        let err = GranaryError::new(ErrorCode::UnknownEntity, "Entity not found")
            .with_hint("Check the catalog");

        assert_eq!(err.code, ErrorCode::UnknownEntity);
        assert_eq!(err.message, "Entity not found");
        assert_eq!(err.hint, Some("Check the catalog".to_string()));
        assert!(err.context.is_none());
    }

    #[test]
    fn test_display_implementation() {
        let err = GranaryError::new(ErrorCode::InvalidDescriptor, "Empty select")
            .with_hint("Add at least one select item");

        assert_eq!(
            err.to_string(),
            "[GRANARY-2001] Empty select (Hint: Add at least one select item)"
        );

        let err_no_hint = GranaryError::new(ErrorCode::Internal, "Crash");
        assert_eq!(err_no_hint.to_string(), "[GRANARY-5002] Crash");
    }

    #[test]
    fn test_json_output() {
        let err = GranaryError::new(ErrorCode::ExecutionTimeout, "Query timed out");
        let json = err.to_json();

        assert!(json.contains("\"code\":\"GRANARY-1002\""));
        assert!(json.contains("\"message\":\"Query timed out\""));
    }
}
