//! Typed SQL literal rendering.
//!
//! Filter values reach the engine only through this formatter. Strings are
//! single-quoted with embedded quotes doubled; control characters and
//! non-finite floats are rejected outright.

use crate::descriptor::Scalar;
use crate::error::CompileError;

/// Render a validated scalar as a SQL literal.
pub fn format_scalar(column: &str, value: &Scalar) -> Result<String, CompileError> {
    match value {
        Scalar::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Scalar::Int(i) => Ok(i.to_string()),
        Scalar::Float(f) => {
            if !f.is_finite() {
                return Err(CompileError::UnsupportedValue {
                    column: column.to_string(),
                    reason: "non-finite float".to_string(),
                });
            }
            Ok(f.to_string())
        }
        Scalar::Text(s) => {
            if s.chars().any(|c| c.is_control()) {
                return Err(CompileError::UnsupportedValue {
                    column: column.to_string(),
                    reason: "string contains control characters".to_string(),
                });
            }
            Ok(format!("'{}'", s.replace('\'', "''")))
        }
    }
}
