use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Very simple identifier guard: letters, digits, underscore only.
pub fn validate_ident(path: &str) -> Result<()> {
    static SEG: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));
    if path.is_empty() {
        bail!("invalid identifier: empty");
    }
    for part in path.split('.') {
        if part.is_empty() {
            bail!("invalid identifier: empty segment in `{path}`");
        }
        if !SEG.is_match(part) {
            bail!("invalid identifier segment `{part}` in `{path}`");
        }
    }
    Ok(())
}

/// Quote an identifier path into backticked parts: `table`.`col`
pub fn quote_ident_path(path: &str) -> Result<String> {
    validate_ident(path)?;
    Ok(path
        .split('.')
        .map(|p| format!("`{p}`"))
        .collect::<Vec<_>>()
        .join("."))
}

/// `source`.`column`, both validated.
pub fn qualified(source: &str, column: &str) -> Result<String> {
    validate_ident(source)?;
    validate_ident(column)?;
    Ok(format!("`{source}`.`{column}`"))
}

/// Single-quoted SQL string literal; only used for engine-owned constants
/// such as the aggregate separator, never for request values.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Escape `_` and the escape character itself so a LIKE pattern only treats
/// `%` as a wildcard.
pub fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '_' => out.push_str("\\_"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated_per_segment() {
        assert!(validate_ident("self.status").is_ok());
        assert!(validate_ident("membership_type").is_ok());
        assert!(validate_ident("").is_err());
        assert!(validate_ident("self.").is_err());
        assert!(validate_ident("1abc").is_err());
        assert!(validate_ident("status; DROP TABLE users").is_err());
        assert!(validate_ident("a`b").is_err());
    }

    #[test]
    fn paths_are_backticked() -> anyhow::Result<()> {
        assert_eq!(quote_ident_path("self.id")?, "`self`.`id`");
        assert_eq!(qualified("m", "category")?, "`m`.`category`");
        assert!(qualified("m", "cat egory").is_err());
        Ok(())
    }

    #[test]
    fn literals_and_patterns_are_escaped() {
        assert_eq!(quote_literal("|||"), "'|||'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(escape_like("%john_doe%"), "%john\\_doe%");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }
}
