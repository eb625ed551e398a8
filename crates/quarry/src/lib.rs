//! `quarry`: convenience façade that re-exports `quarry-core`, plus the
//! service configuration used by the `quarry` binary.

#![deny(missing_docs)]

/// Re-export **everything** from quarry-core at the crate root, so users can `use quarry::*;`.
#[doc(inline)]
pub use quarry_core::*;

/// Also expose quarry-core as a nested module if you like `quarry::core::...` paths.
pub use quarry_core as core;

/// Configuration of the `quarry` binary: store, observability, query limits
/// and the list catalog.
#[allow(missing_docs)]
pub mod config;

pub use config::{ListCatalog, ServiceConfig};
