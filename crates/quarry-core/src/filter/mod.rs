//! Request filters: parsing an untyped query surface into canonical,
//! allowlisted `(scope, column, operator) → value` entries.

mod parser;

pub use parser::parse_filters;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::params::QueryParams;

/// Every operator a filter can carry. Downstream code matches on this
/// exhaustively; suffix and bracket strings never leave the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterOp {
    Equals,
    Like,
    In,
    Gt,
    Lt,
    Gte,
    Lte,
    Ne,
    IsNull,
    NotNull,
    From,
    To,
}

impl FilterOp {
    /// Operator names accepted in brackets (`field[gte]`) and nested maps.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "eq" => FilterOp::Equals,
            "like" => FilterOp::Like,
            "in" => FilterOp::In,
            "gt" => FilterOp::Gt,
            "lt" => FilterOp::Lt,
            "gte" => FilterOp::Gte,
            "lte" => FilterOp::Lte,
            "ne" => FilterOp::Ne,
            "isnull" => FilterOp::IsNull,
            "notnull" => FilterOp::NotNull,
            "from" => FilterOp::From,
            "to" => FilterOp::To,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Equals => "eq",
            FilterOp::Like => "like",
            FilterOp::In => "in",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::Ne => "ne",
            FilterOp::IsNull => "isNull",
            FilterOp::NotNull => "notNull",
            FilterOp::From => "from",
            FilterOp::To => "to",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Root,
    Related(SmolStr),
}

/// Resolved column a filter applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FilterTarget {
    pub scope: Scope,
    pub column: SmolStr,
}

impl FilterTarget {
    pub fn root(column: &str) -> Self {
        Self {
            scope: Scope::Root,
            column: SmolStr::new(column),
        }
    }

    pub fn related(alias: &str, column: &str) -> Self {
        Self {
            scope: Scope::Related(SmolStr::new(alias)),
            column: SmolStr::new(column),
        }
    }
}

impl fmt::Display for FilterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Root => write!(f, "{}", self.column),
            Scope::Related(alias) => write!(f, "{alias}.{}", self.column),
        }
    }
}

/// A coerced filter value. Each operator produces exactly one shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
    List(Vec<String>),
    /// `IsNull` / `NotNull` carry no value.
    Flag,
}

pub type FilterOps = BTreeMap<FilterOp, FilterValue>;

/// Canonical filter map, ordered so the same request always yields the same
/// predicate order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalFilters(BTreeMap<FilterTarget, FilterOps>);

impl CanonicalFilters {
    pub fn insert(&mut self, target: FilterTarget, op: FilterOp, value: FilterValue) {
        self.0.entry(target).or_default().insert(op, value);
    }

    pub fn get(&self, target: &FilterTarget) -> Option<&FilterOps> {
        self.0.get(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FilterTarget, &FilterOps)> {
        self.0.iter()
    }

    /// Number of `(target, operator)` entries.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedField {
    pub alias: String,
    pub column: String,
}

/// Per-list filter configuration. Immutable and passed explicitly to the
/// parser; there is no global allowlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Field names (as the caller writes them, or their resolved column)
    /// that may be filtered on.
    pub allowed_fields: BTreeSet<String>,
    /// External name to root column, e.g. `createdAt → created_at`. A value
    /// of the form `alias.column` targets a related table instead.
    pub field_mappings: BTreeMap<String, String>,
    /// External name to a related `(alias, column)`.
    pub related_field_mappings: BTreeMap<String, RelatedField>,
    /// Always applied, never checked against the allowlist.
    pub default_filters: QueryParams,
}

impl FilterConfig {
    pub fn allow<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn map_field(mut self, external: &str, column: &str) -> Self {
        self.field_mappings.insert(external.into(), column.into());
        self
    }

    pub fn map_related(mut self, external: &str, alias: &str, column: &str) -> Self {
        self.related_field_mappings.insert(
            external.into(),
            RelatedField {
                alias: alias.into(),
                column: column.into(),
            },
        );
        self
    }

    pub fn default_filter(mut self, key: &str, value: &str) -> Self {
        self.default_filters.insert(key, value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotAllowed,
    InvalidValue,
    UnknownOperator,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IgnoreReason::NotAllowed => "not allowed",
            IgnoreReason::InvalidValue => "invalid value",
            IgnoreReason::UnknownOperator => "unknown operator",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredFilter {
    pub key: String,
    pub reason: IgnoreReason,
}

/// What the parser dropped, and why. Never an error; only a diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub ignored: Vec<IgnoredFilter>,
}

impl FilterReport {
    pub(crate) fn ignore(&mut self, key: impl Into<String>, reason: IgnoreReason) {
        self.ignored.push(IgnoredFilter {
            key: key.into(),
            reason,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.ignored.is_empty()
    }
}
