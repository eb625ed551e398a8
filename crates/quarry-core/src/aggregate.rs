//! Child-row aggregation protocol.
//!
//! When a list query joins one-to-many relations, the data query is grouped by
//! the root primary key and every join-only column is collapsed into a single
//! encoded value per root row. The codec owns both halves of that protocol:
//! the SQL expression that encodes, and the split that decodes. Reshaping only
//! ever talks to the trait, so another store (or another strategy) can be
//! plugged in without touching it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator placed between aggregated child values. Three characters that do
/// not occur in the membership data alphabet.
pub const DEFAULT_SEPARATOR: &str = "|||";

/// Stands in for a NULL cell so every sibling column keeps one entry per
/// child. MySQL's own spelling of NULL in exports.
pub const NULL_MARKER: &str = "\\N";

pub trait ChildRowCodec: Send + Sync + fmt::Debug {
    /// Wrap an already-quoted column expression into its aggregate form.
    ///
    /// `order_sql` is the child ordering of the whole alias (quoted columns,
    /// key first). Every sibling column of an alias receives the same list, so
    /// position `i` names the same child row in all of them.
    fn aggregate_sql(&self, column_sql: &str, order_sql: &[String]) -> String;

    /// Decode one aggregated value back into per-child cells, `None` being a
    /// NULL cell. An empty input decodes to no children.
    fn split(&self, encoded: &str) -> Vec<Option<String>>;
}

/// MySQL `GROUP_CONCAT(IFNULL(col, '\\N') ORDER BY k1 ASC, k2 ASC SEPARATOR sep)`.
///
/// Every sibling column is ordered by the same full child tuple, led by the
/// alias's first column, and NULL cells keep their slot as a marker, so sibling
/// columns line up position by position. Nothing is de-duplicated per column:
/// rows repeated by the fan-out of another join come back as identical
/// adjacent tuples, which the reshaper collapses. The session's
/// `group_concat_max_len` bounds the encoded length, which is why the store
/// raises it on connect.
#[derive(Debug, Clone)]
pub struct GroupConcatCodec {
    separator: String,
}

impl GroupConcatCodec {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }
}

impl Default for GroupConcatCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl ChildRowCodec for GroupConcatCodec {
    fn aggregate_sql(&self, column_sql: &str, order_sql: &[String]) -> String {
        let order = if order_sql.is_empty() {
            format!("{column_sql} ASC")
        } else {
            order_sql
                .iter()
                .map(|key| format!("{key} ASC"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "GROUP_CONCAT(IFNULL({column_sql}, {}) ORDER BY {order} SEPARATOR {})",
            crate::sql::quote_literal(NULL_MARKER),
            crate::sql::quote_literal(&self.separator)
        )
    }

    fn split(&self, encoded: &str) -> Vec<Option<String>> {
        if encoded.is_empty() {
            return Vec::new();
        }
        encoded
            .split(self.separator.as_str())
            .map(|part| (part != NULL_MARKER).then(|| part.to_string()))
            .collect()
    }
}

/// What to do when sibling aggregated columns of one alias decode into a
/// different number of children. With a shared ordering this only happens
/// when an encoded value was cut by `group_concat_max_len` or a value
/// contains the separator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentPolicy {
    /// Cut every column to the shortest one and log a warning.
    #[default]
    BestEffort,
    /// Refuse to reshape the row.
    Strict,
}
