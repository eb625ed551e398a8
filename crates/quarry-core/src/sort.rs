use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};

use crate::params::QueryParams;
use crate::sql::validate_ident;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Case-insensitive `asc` / `desc`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ASC" => Some(SortOrder::Asc),
            "DESC" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Sortable fields as the caller names them.
    pub allowed_fields: BTreeSet<String>,
    /// External name to root column; unmapped names are snake-cased.
    pub field_mappings: BTreeMap<String, String>,
    /// Root column used when `sortBy` is absent or not allowed.
    pub default_field: String,
    pub default_order: SortOrder,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            allowed_fields: BTreeSet::new(),
            field_mappings: BTreeMap::new(),
            default_field: "id".to_string(),
            default_order: SortOrder::Desc,
        }
    }
}

/// A resolved root-table sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub column: SmolStr,
    pub order: SortOrder,
}

impl Sort {
    /// Reads `sortBy` / `sortOrder`, silently falling back to the defaults.
    pub fn from_params(params: &QueryParams, config: &SortConfig) -> Self {
        let column = params
            .scalar("sortBy")
            .map(str::trim)
            .filter(|f| config.allowed_fields.contains(*f))
            .map(|f| {
                config
                    .field_mappings
                    .get(f)
                    .cloned()
                    .unwrap_or_else(|| f.to_snake_case())
            })
            .filter(|c| !c.contains('.') && validate_ident(c).is_ok())
            .unwrap_or_else(|| config.default_field.clone());
        let order = params
            .scalar("sortOrder")
            .and_then(SortOrder::parse)
            .unwrap_or(config.default_order);
        Self {
            column: SmolStr::new(column),
            order,
        }
    }
}
