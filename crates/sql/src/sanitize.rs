//! Identifier hygiene.
//!
//! Every table and column name is validated before it is interpolated into
//! SQL, then emitted double-quoted. Names are restricted to a conservative
//! charset rather than relying on quoting alone.

use crate::error::CompileError;

const MAX_IDENT_LEN: usize = 128;

/// Validate a table or column identifier.
///
/// Accepts ASCII alphanumerics and underscore, starting with a letter or
/// underscore. Rejects empty names, overlong names, and everything that
/// could terminate or escape a quoted identifier.
pub fn validate_identifier(name: &str) -> Result<(), CompileError> {
    if name.is_empty() || name.len() > MAX_IDENT_LEN {
        return Err(CompileError::InvalidIdentifier(name.to_string()));
    }

    let mut chars = name.chars();
    let first = chars.next().ok_or_else(|| {
        CompileError::InvalidIdentifier(name.to_string())
    })?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(CompileError::InvalidIdentifier(name.to_string()));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CompileError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validate and double-quote an identifier for SQL.
pub fn quote_ident(name: &str) -> Result<String, CompileError> {
    validate_identifier(name)?;
    Ok(format!("\"{name}\""))
}

/// Double-quote an output alias. Aliases are compiler-generated (e.g.
/// `sum(bid_price)`), so parens and `*` are allowed, but quote and control
/// characters are still rejected.
pub fn quote_alias(alias: &str) -> Result<String, CompileError> {
    if alias.is_empty()
        || alias.len() > MAX_IDENT_LEN
        || alias.chars().any(|c| c == '"' || c.is_control())
    {
        return Err(CompileError::InvalidIdentifier(alias.to_string()));
    }
    Ok(format!("\"{alias}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        for name in ["events", "bid_price", "_hidden", "t2"] {
            assert!(validate_identifier(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_injection_shapes() {
        for name in [
            "",
            "2col",
            "a-b",
            "a b",
            "a\"b",
            "a;drop table x",
            "a`b",
            "a\0b",
            "events; --",
        ] {
            assert!(validate_identifier(name).is_err(), "{name:?}");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "a".repeat(200);
        assert!(validate_identifier(&name).is_err());
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("country").unwrap(), "\"country\"");
    }

    #[test]
    fn alias_quoting_allows_generated_names() {
        assert_eq!(quote_alias("count_star()").unwrap(), "\"count_star()\"");
        assert_eq!(quote_alias("sum(bid_price)").unwrap(), "\"sum(bid_price)\"");
        assert!(quote_alias("bad\"alias").is_err());
    }
}
