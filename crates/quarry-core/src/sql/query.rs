use anyhow::{bail, Result};
use std::fmt;
use std::sync::Arc;

use super::helpers::{quote_ident_path, validate_ident};
use super::selector::Selector;
use crate::sort::SortOrder;
use crate::sql::OnClause;
use crate::value::DynamicValue;

pub trait QueryExt: Sized {
    type Error;
    fn join<I, S>(&self, kind: JoinKind, other: &str, on: I, alias: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: TryInto<OnClause, Error = Self::Error>;
    fn select<I, S>(&self, cols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: TryInto<Selector, Error = Self::Error>;
    fn and_where(&self, predicate: Predicate) -> Self;
    fn group_by(&self, col: &str) -> Self;
    fn order_by(&self, col: &str, order: SortOrder) -> Self;
    fn limit(&self, count: u64) -> Self;
    fn offset(&self, count: u64) -> Self;
    fn table_name(&self) -> &str;
    fn alias(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: Arc<str>,
    pub on: Vec<OnClause>,
    pub alias: Arc<str>,
}

/// A WHERE fragment with its positional binds. Identifiers inside `sql` are
/// already validated and quoted; values only ever travel in `binds`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub binds: Vec<DynamicValue>,
}

impl Predicate {
    pub fn new(sql: impl Into<String>, binds: Vec<DynamicValue>) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }
}

/// Rendered SQL plus the values for its `?` placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<DynamicValue>,
}

/// A copy-on-write object that holds an assembled query.
#[derive(Debug, Clone)]
pub struct Query {
    table: Arc<str>,
    alias: Arc<str>,
    predicates: Arc<Vec<Predicate>>,
    limit: Option<u64>,
    offset: Option<u64>,
    select: Arc<Vec<Selector>>,
    group_by: Option<Arc<str>>,
    order_by: Arc<Vec<(Arc<str>, SortOrder)>>,
    joins: Vec<Join>,
}

impl Query {
    /// Creates an empty query object for a table under the given alias.
    pub fn new(table: &str, alias: &str) -> Self {
        Query {
            table: Arc::from(table),
            alias: Arc::from(alias),
            predicates: Default::default(),
            limit: None,
            offset: None,
            select: Default::default(),
            group_by: None,
            order_by: Default::default(),
            joins: Vec::new(),
        }
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.select
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Like [`QueryExt::join`], for already-parsed ON clauses.
    pub fn join_on(&self, kind: JoinKind, other: &str, on: Vec<OnClause>, alias: &str) -> Result<Self> {
        if on.is_empty() {
            bail!("join `{other}` AS `{alias}` has no ON condition");
        }
        let mut rv = self.clone();
        rv.joins.push(Join {
            kind,
            table: Arc::from(other),
            on,
            alias: Arc::from(alias),
        });
        Ok(rv)
    }

    /// Replaces the projection with already-built selectors.
    pub fn with_selectors(&self, selectors: Vec<Selector>) -> Self {
        let mut rv = self.clone();
        rv.select = Arc::new(selectors);
        rv
    }
}

impl QueryExt for Query {
    type Error = anyhow::Error;

    fn table_name(&self) -> &str {
        &self.table
    }

    fn alias(&self) -> &str {
        &self.alias
    }

    /// ANDs one more predicate onto the query.
    fn and_where(&self, predicate: Predicate) -> Self {
        let mut rv = self.clone();
        Arc::make_mut(&mut rv.predicates).push(predicate);
        rv
    }

    /// Limits the query to `count` rows.
    fn limit(&self, count: u64) -> Self {
        let mut rv = self.clone();
        rv.limit = Some(count);
        rv
    }

    /// Offsets the query by `count` rows.
    fn offset(&self, count: u64) -> Self {
        let mut rv = self.clone();
        rv.offset = Some(count);
        rv
    }

    fn select<I, S>(&self, cols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: TryInto<Selector, Error = Self::Error>,
    {
        let v: Vec<Selector> = cols
            .into_iter()
            .map(|s| s.try_into())
            .collect::<Result<_, _>>()?;
        Ok(self.with_selectors(v))
    }

    fn group_by(&self, col: &str) -> Self {
        let mut rv = self.clone();
        rv.group_by = Some(Arc::from(col));
        rv
    }

    /// Appends a sort key; earlier keys take precedence.
    fn order_by(&self, col: &str, order: SortOrder) -> Self {
        let mut rv = self.clone();
        Arc::make_mut(&mut rv.order_by).push((Arc::from(col), order));
        rv
    }

    fn join<I, S>(&self, kind: JoinKind, other: &str, on: I, alias: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: TryInto<OnClause, Error = Self::Error>,
    {
        let on = on
            .into_iter()
            .map(|s| s.try_into())
            .collect::<Result<Vec<_>, _>>()?;
        self.join_on(kind, other, on, alias)
    }
}

impl Query {
    /// FROM, JOIN and WHERE: the part shared by the data and count statements.
    fn write_source(&self, sql: &mut String, binds: &mut Vec<DynamicValue>) -> Result<()> {
        let table = &*self.table;
        validate_ident(table)?;
        validate_ident(&self.alias)?;
        sql.push_str(&format!(" FROM `{table}` AS `{}`", self.alias));

        for j in &self.joins {
            validate_ident(&j.table)?;
            validate_ident(&j.alias)?;
            let on = j
                .on
                .iter()
                .map(OnClause::to_sql)
                .collect::<Result<Vec<_>>>()?
                .join(" AND ");
            sql.push_str(&format!(
                " {} `{}` AS `{}` ON {on}",
                j.kind.keyword(),
                j.table,
                j.alias
            ));
        }

        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            for (i, p) in self.predicates.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                sql.push_str(&p.sql);
                binds.extend(p.binds.iter().cloned());
            }
        }
        Ok(())
    }

    /// The data statement: projection, grouping, ordering and pagination.
    pub fn to_sql(&self) -> Result<Statement> {
        let select = if self.select.is_empty() {
            // avoid ambiguity when joins exist
            Selector::new("*").set_source(&self.alias).to_sql()?
        } else {
            self.select
                .iter()
                .map(Selector::to_sql)
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };

        let mut sql = format!("SELECT {select}");
        let mut binds = Vec::<DynamicValue>::new();
        self.write_source(&mut sql, &mut binds)?;

        if let Some(col) = &self.group_by {
            sql.push_str(&format!(" GROUP BY {}", quote_ident_path(col)?));
        }

        if !self.order_by.is_empty() {
            let keys = self
                .order_by
                .iter()
                .map(|(col, order)| Ok(format!("{} {}", quote_ident_path(col)?, order.as_sql())))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
        }

        if let Some(l) = self.limit {
            sql.push_str(" LIMIT ?");
            binds.push(DynamicValue::from(l));
        }
        if let Some(o) = self.offset {
            sql.push_str(" OFFSET ?");
            binds.push(DynamicValue::from(o));
        }

        Ok(Statement { sql, binds })
    }

    /// Counts the filtered rows. With `distinct_on`, counts distinct values of
    /// that column instead, which is what keeps totals right under fan-out.
    pub fn count_sql(&self, distinct_on: Option<&str>) -> Result<Statement> {
        let expr = match distinct_on {
            Some(col) => format!("COUNT(DISTINCT {})", quote_ident_path(col)?),
            None => "COUNT(*)".to_string(),
        };
        let mut sql = format!("SELECT {expr} AS `total`");
        let mut binds = Vec::<DynamicValue>::new();
        self.write_source(&mut sql, &mut binds)?;
        Ok(Statement { sql, binds })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_sql() {
            Ok(stmt) => write!(f, "Query: {}", stmt.sql),
            Err(e) => write!(f, "Query: <error: {e}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Query {
        Query::new("users", "self")
    }

    #[test]
    fn bare_query_selects_root_columns() -> anyhow::Result<()> {
        let stmt = users().to_sql()?;
        assert_eq!(stmt.sql, "SELECT `self`.* FROM `users` AS `self`");
        assert!(stmt.binds.is_empty());
        Ok(())
    }

    #[test]
    fn predicates_binds_and_pagination_stay_in_order() -> anyhow::Result<()> {
        let q = users()
            .and_where(Predicate::new("`self`.`status` = ?", vec!["1".into()]))
            .and_where(Predicate::new("`self`.`deleted_at` IS NULL", vec![]))
            .order_by("self.created_at", SortOrder::Desc)
            .order_by("self.id", SortOrder::Asc)
            .limit(10)
            .offset(20);
        let stmt = q.to_sql()?;
        assert_eq!(
            stmt.sql,
            "SELECT `self`.* FROM `users` AS `self` \
             WHERE `self`.`status` = ? AND `self`.`deleted_at` IS NULL \
             ORDER BY `self`.`created_at` DESC, `self`.`id` ASC LIMIT ? OFFSET ?"
        );
        assert_eq!(
            stmt.binds,
            vec![DynamicValue::from("1"), DynamicValue::from(10u64), DynamicValue::from(20u64)]
        );
        Ok(())
    }

    #[test]
    fn joins_render_before_where() -> anyhow::Result<()> {
        let q = users()
            .join(JoinKind::Left, "memberships", ["self.id = m.user_id"], "m")?
            .select(["self.*", "m.category:m_category"])?
            .and_where(Predicate::new("`m`.`category` = ?", vec!["FOM".into()]))
            .group_by("self.id");
        let stmt = q.to_sql()?;
        assert_eq!(
            stmt.sql,
            "SELECT `self`.*, `m`.`category` AS `m_category` FROM `users` AS `self` \
             LEFT JOIN `memberships` AS `m` ON `self`.`id` = `m`.`user_id` \
             WHERE `m`.`category` = ? GROUP BY `self`.`id`"
        );
        Ok(())
    }

    #[test]
    fn count_ignores_projection_order_and_pagination() -> anyhow::Result<()> {
        let q = users()
            .join(JoinKind::Inner, "memberships", ["self.id = m.user_id"], "m")?
            .and_where(Predicate::new("`self`.`status` = ?", vec!["1".into()]))
            .order_by("self.id", SortOrder::Asc)
            .limit(10);
        let distinct = q.count_sql(Some("self.id"))?;
        assert_eq!(
            distinct.sql,
            "SELECT COUNT(DISTINCT `self`.`id`) AS `total` FROM `users` AS `self` \
             INNER JOIN `memberships` AS `m` ON `self`.`id` = `m`.`user_id` \
             WHERE `self`.`status` = ?"
        );
        assert_eq!(distinct.binds, vec![DynamicValue::from("1")]);
        assert!(q.count_sql(None)?.sql.starts_with("SELECT COUNT(*) AS `total`"));
        Ok(())
    }

    #[test]
    fn builder_is_copy_on_write() -> anyhow::Result<()> {
        let base = users();
        let limited = base.limit(5);
        assert_eq!(base.to_sql()?.binds.len(), 0);
        assert_eq!(limited.to_sql()?.binds.len(), 1);
        Ok(())
    }

    #[test]
    fn invalid_identifiers_fail_at_render_time() {
        assert!(Query::new("users; --", "self").to_sql().is_err());
        assert!(users().group_by("self.id x").to_sql().is_err());
        assert!(users()
            .join(JoinKind::Left, "memberships", Vec::<&str>::new(), "m")
            .is_err());
    }
}
