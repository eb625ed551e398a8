//! Join planning: validating declarative join specifications and attaching
//! them to the root query.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::aggregate::ChildRowCodec;
use crate::error::{QueryError, Result};
use crate::sql::{validate_ident, JoinKind, OnClause, Query, Selector, Wrapper};

pub const ROOT_ALIAS: &str = "self";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Inner join, every column of the related table projected.
    InnerProject,
    /// Left join, every column of the related table projected.
    LeftProject,
    /// Inner join, only the listed columns projected.
    Inner,
    /// Left join, only the listed columns projected.
    Left,
}

impl JoinMode {
    pub fn projects_all(self) -> bool {
        matches!(self, JoinMode::InnerProject | JoinMode::LeftProject)
    }

    fn sql_kind(self) -> JoinKind {
        match self {
            JoinMode::InnerProject | JoinMode::Inner => JoinKind::Inner,
            JoinMode::LeftProject | JoinMode::Left => JoinKind::Left,
        }
    }
}

/// One declared relation of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub table: String,
    pub alias: String,
    pub kind: JoinMode,
    /// Explicit ON terms, ANDed: `["self.id = m.user_id", "m.active = 1"]`.
    #[serde(default)]
    pub condition: Vec<String>,
    /// Column of the related table that references the root primary key.
    #[serde(default)]
    pub foreign_key: Option<String>,
    /// Projected columns. Required for join-only kinds, where the first one
    /// is the child key that orders aggregated children. For projecting kinds
    /// an absent list means "discover from the store".
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl JoinSpec {
    pub fn new(table: &str, alias: &str, kind: JoinMode) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            kind,
            condition: Vec::new(),
            foreign_key: None,
            columns: None,
        }
    }

    pub fn on(mut self, condition: &str) -> Self {
        self.condition.push(condition.into());
        self
    }

    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_key = Some(column.into());
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
}

/// A validated join, ready to be attached.
#[derive(Debug, Clone)]
pub struct PlannedJoin {
    pub table: SmolStr,
    pub alias: SmolStr,
    pub mode: JoinMode,
    pub on: Vec<OnClause>,
    /// `None` until discovered for projecting joins declared without columns.
    pub columns: Option<Vec<SmolStr>>,
}

impl PlannedJoin {
    /// Whether this join's columns come back through the child-row codec.
    pub fn is_aggregated(&self) -> bool {
        !self.mode.projects_all()
    }

    /// `<alias>_<column>`, the flat name a projected column is returned under.
    pub fn output_name(&self, column: &str) -> String {
        format!("{}_{column}", self.alias)
    }
}

#[derive(Debug, Clone, Default)]
pub struct JoinPlan {
    joins: Vec<PlannedJoin>,
}

impl JoinPlan {
    /// Validates join specifications in order. Any problem here is a
    /// configuration error and nothing reaches the store.
    pub fn new(specs: &[JoinSpec], root_pk: &str) -> Result<Self> {
        validate_ident(root_pk).map_err(QueryError::configuration)?;
        let mut seen = BTreeSet::new();
        let mut joins = Vec::with_capacity(specs.len());

        for spec in specs {
            let ctx = |e: anyhow::Error| {
                QueryError::configuration(format!("join `{}` AS `{}`: {e}", spec.table, spec.alias))
            };
            validate_ident(&spec.table).map_err(ctx)?;
            validate_ident(&spec.alias).map_err(ctx)?;
            if spec.alias.contains('.') || spec.alias == ROOT_ALIAS {
                return Err(QueryError::configuration(format!(
                    "join `{}`: alias `{}` is reserved or not a plain name",
                    spec.table, spec.alias
                )));
            }
            if !seen.insert(spec.alias.clone()) {
                return Err(QueryError::configuration(format!(
                    "join alias `{}` declared twice",
                    spec.alias
                )));
            }

            let on = if !spec.condition.is_empty() {
                spec.condition
                    .iter()
                    .map(|c| c.parse::<OnClause>())
                    .collect::<anyhow::Result<Vec<_>>>()
                    .map_err(ctx)?
            } else if let Some(fk) = &spec.foreign_key {
                vec![OnClause::columns_eq(
                    &format!("{ROOT_ALIAS}.{root_pk}"),
                    &format!("{}.{fk}", spec.alias),
                )
                .map_err(ctx)?]
            } else {
                return Err(QueryError::configuration(format!(
                    "join `{}` AS `{}` has neither a condition nor a foreign key",
                    spec.table, spec.alias
                )));
            };

            let columns = match &spec.columns {
                Some(cols) if !cols.is_empty() => {
                    for c in cols {
                        validate_ident(c).map_err(ctx)?;
                        if c.contains('.') {
                            return Err(ctx(anyhow::anyhow!("column `{c}` must be unqualified")));
                        }
                    }
                    Some(cols.iter().map(SmolStr::new).collect())
                }
                _ if spec.kind.projects_all() => None,
                _ => {
                    return Err(QueryError::configuration(format!(
                        "join-only `{}` AS `{}` needs an explicit column list",
                        spec.table, spec.alias
                    )))
                }
            };

            joins.push(PlannedJoin {
                table: SmolStr::new(&spec.table),
                alias: SmolStr::new(&spec.alias),
                mode: spec.kind,
                on,
                columns,
            });
        }
        Ok(Self { joins })
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn joins(&self) -> &[PlannedJoin] {
        &self.joins
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.joins.iter().any(|j| j.alias == alias)
    }

    /// Projecting joins whose columns still have to be discovered.
    pub fn undiscovered(&self) -> impl Iterator<Item = &PlannedJoin> {
        self.joins.iter().filter(|j| j.columns.is_none())
    }

    pub fn set_columns(&mut self, alias: &str, columns: Vec<String>) -> Result<()> {
        let join = self
            .joins
            .iter_mut()
            .find(|j| j.alias == alias)
            .ok_or_else(|| QueryError::configuration(format!("unknown join alias `{alias}`")))?;
        for c in &columns {
            validate_ident(c).map_err(QueryError::configuration)?;
        }
        join.columns = Some(columns.into_iter().map(SmolStr::from).collect());
        Ok(())
    }

    /// Adds the JOIN clauses and the related projections. Under grouping,
    /// projected columns are wrapped in `ANY_VALUE` and join-only columns in
    /// the codec's aggregate, all sharing the alias's column order (first
    /// column as the child key) so their encoded children line up.
    pub fn attach(&self, query: &Query, codec: &Arc<dyn ChildRowCodec>) -> Result<Query> {
        let mut query = query.clone();
        let mut selectors: Vec<Selector> = query.selectors().to_vec();

        for join in &self.joins {
            query = query
                .join_on(join.mode.sql_kind(), &join.table, join.on.clone(), &join.alias)
                .map_err(QueryError::configuration)?;

            let columns = join.columns.as_ref().ok_or_else(|| {
                QueryError::configuration(format!("columns of `{}` were never resolved", join.alias))
            })?;
            let order_by: Arc<[SmolStr]> = Arc::from(columns.clone());
            for column in columns {
                let wrapper = if join.is_aggregated() {
                    Wrapper::Aggregate {
                        codec: codec.clone(),
                        order_by: order_by.clone(),
                    }
                } else {
                    Wrapper::AnyValue
                };
                selectors.push(
                    Selector::new(column)
                        .set_source(&join.alias)
                        .set_alias(&join.output_name(column))
                        .wrap(wrapper),
                );
            }
        }

        Ok(query.with_selectors(selectors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::GroupConcatCodec;
    use crate::sql::QueryExt;

    fn codec() -> Arc<dyn ChildRowCodec> {
        Arc::new(GroupConcatCodec::default())
    }

    fn root() -> anyhow::Result<Query> {
        Query::new("users", ROOT_ALIAS).select(["self.*"])
    }

    #[test]
    fn foreign_key_implies_condition() -> anyhow::Result<()> {
        let plan = JoinPlan::new(
            &[JoinSpec::new("memberships", "m", JoinMode::Left)
                .foreign_key("user_id")
                .columns(["id", "category"])],
            "id",
        )?;
        let stmt = plan.attach(&root()?, &codec())?.group_by("self.id").to_sql()?;
        assert_eq!(
            stmt.sql,
            "SELECT `self`.*, \
             GROUP_CONCAT(IFNULL(`m`.`id`, '\\\\N') ORDER BY `m`.`id` ASC, `m`.`category` ASC SEPARATOR '|||') AS `m_id`, \
             GROUP_CONCAT(IFNULL(`m`.`category`, '\\\\N') ORDER BY `m`.`id` ASC, `m`.`category` ASC SEPARATOR '|||') AS `m_category` \
             FROM `users` AS `self` LEFT JOIN `memberships` AS `m` ON `self`.`id` = `m`.`user_id` \
             GROUP BY `self`.`id`"
        );
        Ok(())
    }

    #[test]
    fn projecting_joins_use_any_value() -> anyhow::Result<()> {
        let mut plan = JoinPlan::new(
            &[JoinSpec::new("clubs", "club", JoinMode::InnerProject).on("self.club_id = club.id")],
            "id",
        )?;
        assert_eq!(plan.undiscovered().count(), 1);
        assert!(plan.attach(&root()?, &codec()).is_err());

        plan.set_columns("club", vec!["id".into(), "name".into()])?;
        let sql = plan.attach(&root()?, &codec())?.to_sql()?.sql;
        assert!(sql.contains("ANY_VALUE(`club`.`name`) AS `club_name`"));
        assert!(sql.contains("INNER JOIN `clubs` AS `club` ON `self`.`club_id` = `club`.`id`"));
        Ok(())
    }

    #[test]
    fn missing_condition_is_a_configuration_error() {
        let err = JoinPlan::new(&[JoinSpec::new("memberships", "m", JoinMode::Left).columns(["id"])], "id");
        assert!(matches!(err, Err(QueryError::Configuration(_))));
    }

    #[test]
    fn join_only_needs_columns() {
        let err = JoinPlan::new(&[JoinSpec::new("memberships", "m", JoinMode::Inner).foreign_key("user_id")], "id");
        assert!(matches!(err, Err(QueryError::Configuration(_))));
    }

    #[test]
    fn aliases_must_be_unique_and_safe() {
        let twice = [
            JoinSpec::new("a", "x", JoinMode::LeftProject).foreign_key("user_id"),
            JoinSpec::new("b", "x", JoinMode::LeftProject).foreign_key("user_id"),
        ];
        assert!(JoinPlan::new(&twice, "id").is_err());
        let reserved = [JoinSpec::new("a", "self", JoinMode::LeftProject).foreign_key("user_id")];
        assert!(JoinPlan::new(&reserved, "id").is_err());
        let bad = [JoinSpec::new("a;b", "x", JoinMode::LeftProject).foreign_key("user_id")];
        assert!(JoinPlan::new(&bad, "id").is_err());
        let bad_on = [JoinSpec::new("a", "x", JoinMode::LeftProject).on("self.id == x.id")];
        assert!(JoinPlan::new(&bad_on, "id").is_err());
    }

    #[test]
    fn spec_deserializes_from_config() -> anyhow::Result<()> {
        let spec: JoinSpec = serde_json::from_str(
            r#"{"table": "memberships", "alias": "m", "kind": "left", "foreign_key": "user_id", "columns": ["id"]}"#,
        )?;
        assert_eq!(spec.kind, JoinMode::Left);
        assert!(spec.condition.is_empty());
        assert!(JoinPlan::new(&[spec], "id")?.has_alias("m"));
        Ok(())
    }
}
