use serde::{Deserialize, Serialize};

use crate::filter::FilterConfig;
use crate::join::JoinSpec;
use crate::sort::SortConfig;

fn default_primary_key() -> String {
    "id".to_string()
}

/// Everything the engine needs to serve one list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDefinition {
    /// Root table, queried under the alias `self`.
    pub table: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Root columns to return; all of them when absent.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub sort: SortConfig,
}

impl ListDefinition {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.into(),
            primary_key: default_primary_key(),
            columns: None,
            joins: Vec::new(),
            filters: FilterConfig::default(),
            sort: SortConfig::default(),
        }
    }

    pub fn primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn join(mut self, spec: JoinSpec) -> Self {
        self.joins.push(spec);
        self
    }

    pub fn filters(mut self, filters: FilterConfig) -> Self {
        self.filters = filters;
        self
    }

    pub fn sort(mut self, sort: SortConfig) -> Self {
        self.sort = sort;
        self
    }
}
