mod helpers;
mod on;
mod query;
mod selector;

pub use helpers::{escape_like, qualified, quote_ident_path, quote_literal, validate_ident};
pub use on::{OnClause, RightOperand};
pub use query::{Join, JoinKind, Predicate, Query, QueryExt, Statement};
pub use selector::{Selector, Wrapper};
