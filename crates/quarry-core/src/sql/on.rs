use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::sql::helpers::{quote_ident_path, quote_literal, validate_ident};

#[derive(Debug, Clone, PartialEq)]
pub enum RightOperand {
    /// dotted identifier path
    Ident(Arc<str>),
    Null,
    /// original text (1, 3.14, -2e10)
    Number(Arc<str>),
    /// unquoted inner string, quoted again when rendered
    Str(Arc<str>),
}

/// One `left <op> right` term of a join condition. Join conditions come from
/// list definitions, never from request input.
#[derive(Debug, Clone)]
pub struct OnClause {
    left: Arc<str>,
    /// normalized (UPPERCASE, single spaces)
    operator: Arc<str>,
    right: RightOperand,
}

impl OnClause {
    pub fn new(left: &str, operator: &str, right: &str) -> Result<Self> {
        let op = normalize_op(operator)?;
        let right = parse_right(right)?;
        validate_on(&op, left, &right)?;
        Ok(Self {
            left: Arc::from(left),
            operator: Arc::from(op.as_str()),
            right,
        })
    }

    /// `left = right` between two column paths; the shape implied by a
    /// foreign-key hint.
    pub fn columns_eq(left: &str, right: &str) -> Result<Self> {
        validate_ident(left)?;
        validate_ident(right)?;
        Ok(Self {
            left: Arc::from(left),
            operator: Arc::from("="),
            right: RightOperand::Ident(Arc::from(right)),
        })
    }

    pub fn left(&self) -> &str {
        &self.left
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn right(&self) -> &RightOperand {
        &self.right
    }

    /// Render to SQL with quoting; handles `IS/IS NOT NULL`.
    pub fn to_sql(&self) -> Result<String> {
        let op = &*self.operator;
        let lq = quote_ident_path(&self.left)?;
        match &self.right {
            RightOperand::Null => match op {
                "IS" => Ok(format!("{lq} IS NULL")),
                "IS NOT" => Ok(format!("{lq} IS NOT NULL")),
                _ => bail!("operator `{op}` not valid with NULL"),
            },
            RightOperand::Ident(p) => Ok(format!("{lq} {op} {}", quote_ident_path(p)?)),
            RightOperand::Number(n) => Ok(format!("{lq} {op} {n}")),
            RightOperand::Str(s) => Ok(format!("{lq} {op} {}", quote_literal(s))),
        }
    }
}

impl FromStr for OnClause {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        // Order matters: longest/most specific first.
        static OP_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i)\s*(\bis\s+not\b|\bis\b|<=|>=|<>|!=|=|<|>)\s*").expect("operator regex")
        });

        let s = input.trim();
        let m = OP_RE
            .find(s)
            .ok_or_else(|| anyhow!("invalid ON clause: `{input}`"))?;

        let left_raw = s[..m.start()].trim();
        let op_raw = s[m.start()..m.end()].trim();
        let right_raw = s[m.end()..].trim();

        if left_raw.is_empty() || right_raw.is_empty() {
            bail!("invalid ON clause: `{input}`");
        }

        Self::new(left_raw, op_raw, right_raw)
    }
}

fn normalize_op(op: &str) -> Result<String> {
    let up = op.trim().to_ascii_uppercase();
    let norm = up.split_whitespace().collect::<Vec<_>>().join(" ");
    match norm.as_str() {
        "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=" | "IS" | "IS NOT" => Ok(norm),
        _ => bail!("unsupported operator `{op}`"),
    }
}

fn parse_right(raw: &str) -> Result<RightOperand> {
    if raw.is_empty() {
        bail!("empty right operand");
    }
    if raw.eq_ignore_ascii_case("NULL") {
        return Ok(RightOperand::Null);
    }
    if raw.len() >= 2 {
        let (first, last) = (raw.as_bytes()[0], raw.as_bytes()[raw.len() - 1]);
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return Ok(RightOperand::Str(Arc::from(&raw[1..raw.len() - 1])));
        }
    }
    if (raw.as_bytes()[0].is_ascii_digit() || raw.starts_with(['+', '-']))
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return Ok(RightOperand::Number(Arc::from(raw)));
    }
    validate_ident(raw)?;
    Ok(RightOperand::Ident(Arc::from(raw)))
}

impl std::fmt::Display for OnClause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_sql() {
            Ok(s) => write!(f, "{s}"),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

impl TryFrom<&str> for OnClause {
    type Error = anyhow::Error;
    fn try_from(s: &str) -> Result<Self> {
        Self::from_str(s)
    }
}

impl TryFrom<String> for OnClause {
    type Error = anyhow::Error;
    fn try_from(s: String) -> Result<Self> {
        Self::from_str(&s)
    }
}

fn validate_on(op: &str, left: &str, right: &RightOperand) -> Result<()> {
    validate_ident(left)?;
    match right {
        RightOperand::Null => match op {
            "IS" | "IS NOT" => Ok(()),
            _ => bail!("only IS / IS NOT allowed with NULL in ON clause"),
        },
        RightOperand::Ident(_) | RightOperand::Number(_) | RightOperand::Str(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_column_equality() -> anyhow::Result<()> {
        let on = OnClause::from_str("self.id = m.user_id")?;
        assert_eq!(on.left(), "self.id");
        assert_eq!(on.right(), &RightOperand::Ident(Arc::from("m.user_id")));
        assert_eq!(on.to_sql()?, "`self`.`id` = `m`.`user_id`");
        Ok(())
    }

    #[test]
    fn parses_literals_and_null_checks() -> anyhow::Result<()> {
        assert_eq!(
            OnClause::from_str("m.status = 'active'")?.to_sql()?,
            "`m`.`status` = 'active'"
        );
        assert_eq!(OnClause::from_str("m.rank >= 2")?.to_sql()?, "`m`.`rank` >= 2");
        assert_eq!(
            OnClause::from_str("m.deleted_at is null")?.to_sql()?,
            "`m`.`deleted_at` IS NULL"
        );
        assert_eq!(
            OnClause::from_str("m.deleted_at IS  NOT NULL")?.to_sql()?,
            "`m`.`deleted_at` IS NOT NULL"
        );
        Ok(())
    }

    #[test]
    fn rejects_malformed_conditions() {
        assert!(OnClause::from_str("self.id").is_err());
        assert!(OnClause::from_str("= m.user_id").is_err());
        assert!(OnClause::from_str("m.deleted_at = NULL").is_err());
        assert!(OnClause::from_str("self.id = m.user id").is_err());
        assert!(OnClause::from_str("self.id LIKE m.x").is_err());
    }

    #[test]
    fn is_inside_identifiers_is_not_an_operator() -> anyhow::Result<()> {
        let on = OnClause::from_str("m.distance = self.is_active")?;
        assert_eq!(on.left(), "m.distance");
        assert_eq!(on.operator(), "=");
        Ok(())
    }

    #[test]
    fn column_equality_constructor_validates() -> anyhow::Result<()> {
        assert_eq!(
            OnClause::columns_eq("self.id", "m.user_id")?.to_sql()?,
            "`self`.`id` = `m`.`user_id`"
        );
        assert!(OnClause::columns_eq("self.id", "m.user-id").is_err());
        Ok(())
    }
}
