//! Error types for the Quarry query engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// The list definition cannot be assembled into SQL (bad join, bad identifier).
    /// Raised before anything reaches the store.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    /// Sibling aggregated columns of one alias split into different lengths.
    #[error("Aggregated columns of `{alias}` disagree on length: {lengths:?}")]
    MisalignedAggregate { alias: String, lengths: Vec<usize> },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        QueryError::Internal(err.to_string())
    }
}

impl QueryError {
    /// Wrap an assembly-time failure (usually an `anyhow` chain from the SQL
    /// builder) as a configuration error.
    pub fn configuration(err: impl std::fmt::Display) -> Self {
        QueryError::Configuration(err.to_string())
    }
}
