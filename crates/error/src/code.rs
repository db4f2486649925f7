use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following GRANARY-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Engine / execution errors
/// - **2000-2999**: Query errors (validation and compilation)
/// - **3000-3999**: Configuration errors
/// - **4000-4999**: Cache errors
/// - **5000-5999**: Internal/System errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Engine Errors (1000-1999) ===
    /// GRANARY-1001: Could not open the execution engine database
    EngineConnect = 1001,
    /// GRANARY-1002: Query exceeded the caller-supplied deadline
    ExecutionTimeout = 1002,
    /// GRANARY-1003: Engine ran out of memory or another transient resource
    ResourceExhausted = 1003,
    /// GRANARY-1004: Engine rejected compiled SQL (assembler/catalog defect)
    EngineRejected = 1004,

    // === Query Errors (2000-2999) ===
    /// GRANARY-2001: Descriptor failed validation
    InvalidDescriptor = 2001,
    /// GRANARY-2002: Predicate operator outside the recognized set
    UnsupportedOperator = 2002,
    /// GRANARY-2003: Filter value cannot be rendered safely
    UnsupportedValue = 2003,
    /// GRANARY-2004: Aggregate function outside the allow-list
    UnsupportedFunction = 2004,
    /// GRANARY-2005: Duplicate output alias in select list
    DuplicateAlias = 2005,
    /// GRANARY-2006: Order-by key does not reference a select alias or column
    UnknownOrderKey = 2006,
    /// GRANARY-2007: Identifier contains forbidden characters
    InvalidIdentifier = 2007,
    /// GRANARY-2008: Descriptor references an unknown logical entity
    UnknownEntity = 2008,

    // === Configuration Errors (3000-3999) ===
    /// GRANARY-3001: Configuration failed to load or deserialize
    InvalidConfig = 3001,
    /// GRANARY-3002: Catalog does not match the engine schema
    CatalogMismatch = 3002,

    // === Cache Errors (4000-4999) ===
    /// GRANARY-4001: Cached entry failed its consistency check on read
    CacheCorruption = 4001,

    // === Internal Errors (5000-5999) ===
    /// GRANARY-5001: Serialization/deserialization failed
    SerializationFailed = 5001,
    /// GRANARY-5002: Unexpected internal state
    Internal = 5002,

    /// GRANARY-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "GRANARY-2003")
    pub fn as_str(&self) -> String {
        format!("GRANARY-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Engine,
            2000..=2999 => ErrorCategory::Query,
            3000..=3999 => ErrorCategory::Config,
            4000..=4999 => ErrorCategory::Cache,
            _ => ErrorCategory::Internal,
        }
    }

    /// Whether a caller may reasonably retry the failed operation once.
    ///
    /// Only timeouts and resource exhaustion qualify; engine rejection of
    /// compiled SQL is a defect in the compiler or catalog and retrying it
    /// would reproduce the same failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExecutionTimeout | Self::ResourceExhausted)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        // Parse "GRANARY-XXXX" format
        let num: u16 = s
            .strip_prefix("GRANARY-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::EngineConnect),
            1002 => Ok(Self::ExecutionTimeout),
            1003 => Ok(Self::ResourceExhausted),
            1004 => Ok(Self::EngineRejected),
            2001 => Ok(Self::InvalidDescriptor),
            2002 => Ok(Self::UnsupportedOperator),
            2003 => Ok(Self::UnsupportedValue),
            2004 => Ok(Self::UnsupportedFunction),
            2005 => Ok(Self::DuplicateAlias),
            2006 => Ok(Self::UnknownOrderKey),
            2007 => Ok(Self::InvalidIdentifier),
            2008 => Ok(Self::UnknownEntity),
            3001 => Ok(Self::InvalidConfig),
            3002 => Ok(Self::CatalogMismatch),
            4001 => Ok(Self::CacheCorruption),
            5001 => Ok(Self::SerializationFailed),
            5002 => Ok(Self::Internal),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category for reporting and log labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Engine,
    Query,
    Config,
    Cache,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_formatting() {
        assert_eq!(ErrorCode::EngineConnect.as_str(), "GRANARY-1001");
        assert_eq!(ErrorCode::InvalidDescriptor.as_str(), "GRANARY-2001");
        assert_eq!(ErrorCode::Unknown.as_str(), "GRANARY-9999");
    }

    #[test]
    fn test_error_code_parsing() {
        assert_eq!(
            ErrorCode::try_from("GRANARY-1001".to_string()).unwrap(),
            ErrorCode::EngineConnect
        );
        assert_eq!(
            ErrorCode::try_from("GRANARY-9999".to_string()).unwrap(),
            ErrorCode::Unknown
        );
    }

    #[test]
    fn test_error_code_parsing_errors() {
        assert!(ErrorCode::try_from("INVALID".to_string()).is_err());
        assert!(ErrorCode::try_from("GRANARY-0000".to_string()).is_err());
        assert!(ErrorCode::try_from("GRANARY-ABC".to_string()).is_err());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ErrorCode::ExecutionTimeout.category(),
            ErrorCategory::Engine
        );
        assert_eq!(ErrorCode::UnsupportedValue.category(), ErrorCategory::Query);
        assert_eq!(ErrorCode::InvalidConfig.category(), ErrorCategory::Config);
        assert_eq!(ErrorCode::CacheCorruption.category(), ErrorCategory::Cache);
        assert_eq!(ErrorCode::Unknown.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_transient_split() {
        assert!(ErrorCode::ExecutionTimeout.is_transient());
        assert!(ErrorCode::ResourceExhausted.is_transient());
        assert!(!ErrorCode::EngineRejected.is_transient());
        assert!(!ErrorCode::InvalidDescriptor.is_transient());
    }
}
