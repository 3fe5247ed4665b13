//! Identifier checks applied before any database I/O.

use std::sync::LazyLock;

use regex::Regex;

/// Schema and procedure names accepted on the execute path.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex"));

/// Stricter form used when listing a schema's procedures: must not start with a digit.
static SQL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

pub fn is_valid_identifier(name: &str) -> bool {
    !name.trim().is_empty() && IDENTIFIER.is_match(name)
}

pub fn is_sql_identifier(name: &str) -> bool {
    SQL_IDENTIFIER.is_match(name)
}

/// Strip a leading `@` sigil from a parameter name or request key.
pub fn normalize_param_key(key: &str) -> &str {
    key.strip_prefix('@').unwrap_or(key)
}

/// Double-quote an identifier for interpolation into SQL text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(is_valid_identifier("sales"));
        assert!(is_valid_identifier("get_orders_2"));
        assert!(is_valid_identifier("9lives"));
    }

    #[test]
    fn rejects_injection_shapes() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("   "));
        assert!(!is_valid_identifier("sales;drop"));
        assert!(!is_valid_identifier("dbo.x"));
        assert!(!is_valid_identifier("a b"));
        assert!(!is_valid_identifier("x'--"));
    }

    #[test]
    fn sql_identifier_rejects_leading_digit() {
        assert!(is_sql_identifier("_private"));
        assert!(!is_sql_identifier("9lives"));
    }

    #[test]
    fn sigil_is_stripped_once() {
        assert_eq!(normalize_param_key("@id"), "id");
        assert_eq!(normalize_param_key("id"), "id");
        assert_eq!(normalize_param_key("@@id"), "@id");
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("sales"), "\"sales\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
