//! Core list-query engine for Quarry

pub mod aggregate;
pub mod definition;
pub mod error;
pub mod executor;
pub mod filter;
pub mod join;
pub mod pagination;
pub mod params;
pub mod predicate;
pub mod reshape;
pub mod response;
pub mod sort;
pub mod sql;
pub mod sqlx_mysql;
pub mod store;
pub mod value;

pub use aggregate::{AlignmentPolicy, ChildRowCodec, GroupConcatCodec, DEFAULT_SEPARATOR};
pub use definition::ListDefinition;
pub use error::*;
pub use executor::{ListStatements, QueryConfig, QueryEngine};
pub use filter::{parse_filters, CanonicalFilters, FilterConfig, FilterOp, FilterReport, FilterValue};
pub use join::{JoinMode, JoinPlan, JoinSpec, ROOT_ALIAS};
pub use pagination::{Pagination, PaginationConfig};
pub use params::{ParamValue, QueryParams};
pub use predicate::build_predicates;
pub use reshape::Reshaper;
pub use response::{ListPage, ListResponse, PageInfo};
pub use sort::{Sort, SortConfig, SortOrder};
pub use store::{LazyPool, MySqlStore, QueryStore, StoreOptions};
pub use value::{DynamicValue, ObjectValue};
