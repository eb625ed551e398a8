//! Service configuration for the `quarry` binary

use anyhow::Context;
use quarry_core::{ListDefinition, QueryConfig};
use quarry_shared::{load_layered, DatabaseConfig, ObservabilityConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Named list definitions, keyed by the name the binary is invoked with.
pub type ListCatalog = BTreeMap<String, ListDefinition>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Pagination limits and aggregation settings
    pub query: QueryConfig,

    /// JSON file holding the list catalog. Read verbatim with serde_json,
    /// since layered config sources normalize the case of map keys and
    /// filter mappings are keyed by caller-facing names such as `clubName`.
    pub lists_file: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            observability: ObservabilityConfig::default(),
            query: QueryConfig::default(),
            lists_file: PathBuf::from("lists.json"),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `quarry.toml` and environment variables
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_file("quarry.toml")
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        load_layered(&Self::default(), Some(path.as_ref()))
            .with_context(|| format!("loading {}", path.as_ref().display()))
    }

    /// Reads the list catalog named by `lists_file`.
    pub fn load_lists(&self) -> anyhow::Result<ListCatalog> {
        let raw = std::fs::read_to_string(&self.lists_file)
            .with_context(|| format!("reading list catalog {}", self.lists_file.display()))?;
        parse_lists(&raw).with_context(|| format!("parsing list catalog {}", self.lists_file.display()))
    }
}

pub fn parse_lists(raw: &str) -> anyhow::Result<ListCatalog> {
    Ok(serde_json::from_str(raw)?)
}
