//! Compiler error types and their mapping onto the unified error model.

use granary_error::{ErrorCode, ErrorContext, GranaryError};
use thiserror::Error;

/// Rejections raised while validating and canonicalizing a wire descriptor.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("select must contain at least one item")]
    EmptySelect,

    #[error("'from' must name a source table")]
    EmptyFrom,

    #[error("unknown aggregate function '{0}'")]
    UnknownFunction(String),

    #[error("COUNT is the only aggregate that accepts '*'")]
    StarOutsideCount,

    #[error("unknown filter operator '{0}' on column '{1}'")]
    UnknownOperator(String, String),

    #[error("operator '{op}' on column '{column}' expects {expected}, got {actual} value(s)")]
    OperatorArity {
        column: String,
        op: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("unsupported filter value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("group_by column '{0}' does not appear in select")]
    GroupByNotSelected(String),

    #[error("aggregate select requires every plain column to be grouped; '{0}' is not")]
    UngroupedColumn(String),

    #[error("duplicate output alias '{0}'")]
    DuplicateAlias(String),

    #[error("order_by key '{0}' is not an output column of the query")]
    UnknownOrderKey(String),

    #[error("limit must be positive")]
    ZeroLimit,
}

impl ValidationError {
    pub fn to_granary_error(self) -> GranaryError {
        let message = self.to_string();
        match self {
            Self::UnknownOperator(op, column) => {
                GranaryError::new(ErrorCode::UnsupportedOperator, message)
                    .with_context(ErrorContext::FieldInvalid {
                        field: format!("where.{column}"),
                        message: format!("operator '{op}' is not supported"),
                    })
                    .with_hint("Supported operators: =, !=, >, >=, <, <=, in, between")
            }
            Self::InvalidValue { column, reason } => {
                GranaryError::new(ErrorCode::UnsupportedValue, message)
                    .with_context(ErrorContext::UnsupportedValue { column, reason })
            }
            Self::UnknownFunction(_) | Self::StarOutsideCount => {
                GranaryError::new(ErrorCode::UnsupportedFunction, message)
                    .with_hint("Supported aggregates: count, sum, avg, min, max")
            }
            Self::DuplicateAlias(alias) => {
                GranaryError::new(ErrorCode::DuplicateAlias, message).with_context(
                    ErrorContext::FieldInvalid {
                        field: "select".to_string(),
                        message: format!("alias '{alias}' appears more than once"),
                    },
                )
            }
            Self::UnknownOrderKey(key) => GranaryError::new(ErrorCode::UnknownOrderKey, message)
                .with_context(ErrorContext::FieldInvalid {
                    field: "order_by".to_string(),
                    message: format!("'{key}' must match a select alias or column"),
                }),
            _ => GranaryError::new(ErrorCode::InvalidDescriptor, message),
        }
    }
}

impl From<ValidationError> for GranaryError {
    fn from(e: ValidationError) -> Self {
        e.to_granary_error()
    }
}

/// Failures raised while assembling SQL from an already-validated descriptor.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("unsupported literal for column '{column}': {reason}")]
    UnsupportedValue { column: String, reason: String },

    #[error("{func}({column}) cannot be answered from rollup '{rollup}'")]
    NotDerivable {
        func: &'static str,
        column: String,
        rollup: String,
    },
}

impl CompileError {
    pub fn to_granary_error(self) -> GranaryError {
        let message = self.to_string();
        match self {
            Self::InvalidIdentifier(name) => {
                GranaryError::new(ErrorCode::InvalidIdentifier, message).with_context(
                    ErrorContext::FieldInvalid {
                        field: "identifier".to_string(),
                        message: format!("'{name}' contains characters that are not allowed"),
                    },
                )
            }
            Self::UnsupportedValue { column, reason } => {
                GranaryError::new(ErrorCode::UnsupportedValue, message)
                    .with_context(ErrorContext::UnsupportedValue { column, reason })
            }
            // Routing is supposed to keep non-derivable queries off rollups,
            // so hitting this during assembly is an internal inconsistency.
            Self::NotDerivable { .. } => GranaryError::new(ErrorCode::Internal, message),
        }
    }
}

impl From<CompileError> for GranaryError {
    fn from(e: CompileError) -> Self {
        e.to_granary_error()
    }
}
