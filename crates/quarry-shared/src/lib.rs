//! Shared configuration and observability for Quarry

pub mod config;
pub mod observability;

pub use config::*;
pub use observability::*;
