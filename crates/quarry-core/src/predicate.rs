use tracing::debug;

use crate::filter::{CanonicalFilters, FilterOp, FilterTarget, FilterValue, Scope};
use crate::join::{JoinPlan, ROOT_ALIAS};
use crate::sql::{escape_like, qualified, Predicate};
use crate::value::DynamicValue;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One parameterized predicate per canonical filter entry, in map order.
/// Filters on an alias the plan does not join are dropped.
pub fn build_predicates(filters: &CanonicalFilters, plan: &JoinPlan) -> Vec<Predicate> {
    let mut out = Vec::with_capacity(filters.len());
    for (target, ops) in filters.iter() {
        let alias = match &target.scope {
            Scope::Root => ROOT_ALIAS,
            Scope::Related(alias) if plan.has_alias(alias) => alias.as_str(),
            Scope::Related(alias) => {
                debug!(%target, alias = %alias, "filter on an alias that is not joined, skipping");
                continue;
            }
        };
        // identifiers were validated when the filter resolved
        let Ok(column) = qualified(alias, &target.column) else {
            continue;
        };
        for (op, value) in ops {
            match predicate(&column, *op, value) {
                Some(p) => out.push(p),
                None => debug!(%target, %op, ?value, "filter value does not fit its operator"),
            }
        }
    }
    out
}

fn predicate(column: &str, op: FilterOp, value: &FilterValue) -> Option<Predicate> {
    let cmp = |sym: &str, bind: DynamicValue| Predicate::new(format!("{column} {sym} ?"), vec![bind]);

    Some(match (op, value) {
        (FilterOp::Equals, FilterValue::Text(s)) if s.contains('%') => {
            cmp("LIKE", escape_like(s).into())
        }
        (FilterOp::Equals, FilterValue::Text(s)) => cmp("=", s.as_str().into()),
        (FilterOp::Ne, FilterValue::Text(s)) => cmp("<>", s.as_str().into()),
        (FilterOp::Like, FilterValue::Text(s)) => cmp("LIKE", escape_like(s).into()),
        (FilterOp::In, FilterValue::List(items)) => {
            let marks = vec!["?"; items.len()].join(", ");
            Predicate::new(
                format!("{column} IN ({marks})"),
                items.iter().map(|s| DynamicValue::from(s.as_str())).collect(),
            )
        }
        (FilterOp::Gt, FilterValue::Number(n)) => cmp(">", (*n).into()),
        (FilterOp::Lt, FilterValue::Number(n)) => cmp("<", (*n).into()),
        (FilterOp::Gte, FilterValue::Number(n)) => cmp(">=", (*n).into()),
        (FilterOp::Lte, FilterValue::Number(n)) => cmp("<=", (*n).into()),
        (FilterOp::IsNull, FilterValue::Flag) => Predicate::new(format!("{column} IS NULL"), vec![]),
        (FilterOp::NotNull, FilterValue::Flag) => {
            Predicate::new(format!("{column} IS NOT NULL"), vec![])
        }
        (FilterOp::From, FilterValue::Date(d)) => {
            cmp(">=", d.format(DATETIME_FORMAT).to_string().into())
        }
        (FilterOp::To, FilterValue::Date(d)) => {
            cmp("<=", d.format(DATETIME_FORMAT).to_string().into())
        }
        (
            FilterOp::Equals
            | FilterOp::Ne
            | FilterOp::Like
            | FilterOp::In
            | FilterOp::Gt
            | FilterOp::Lt
            | FilterOp::Gte
            | FilterOp::Lte
            | FilterOp::IsNull
            | FilterOp::NotNull
            | FilterOp::From
            | FilterOp::To,
            _,
        ) => return None,
    })
}

/// Target for an optional alias; `self` or no alias means the root table.
pub fn filter_target(alias: Option<&str>, column: &str) -> FilterTarget {
    match alias {
        Some(a) if a != ROOT_ALIAS => FilterTarget::related(a, column),
        _ => FilterTarget::root(column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{parse_filters, FilterConfig};
    use crate::join::{JoinMode, JoinSpec};
    use crate::params::QueryParams;

    fn plan() -> JoinPlan {
        JoinPlan::new(
            &[JoinSpec::new("memberships", "m", JoinMode::Left)
                .foreign_key("user_id")
                .columns(["id", "category"])],
            "id",
        )
        .unwrap_or_default()
    }

    fn build(qs: &str, allowed: &[&str]) -> Vec<Predicate> {
        let config = FilterConfig::default().allow(allowed.iter().copied());
        let (filters, _) = parse_filters(&QueryParams::from_query_string(qs), &config);
        build_predicates(&filters, &plan())
    }

    #[test]
    fn status_equality_is_the_only_predicate() {
        let preds = build("status=1", &["status"]);
        assert_eq!(preds, vec![Predicate::new("`self`.`status` = ?", vec!["1".into()])]);
    }

    #[test]
    fn numeric_comparison_binds_a_number() {
        let preds = build("status[gt]=0.5", &["status"]);
        assert_eq!(preds, vec![Predicate::new("`self`.`status` > ?", vec![0.5f64.into()])]);
        assert!(build("status[gt]=invalid", &["status"]).is_empty());
    }

    #[test]
    fn disallowed_fields_never_reach_sql() {
        let preds = build("password=x&role[ne]=admin&status=1", &["status"]);
        assert_eq!(preds.len(), 1);
        assert!(preds.iter().all(|p| !p.sql.contains("password") && !p.sql.contains("role")));
    }

    #[test]
    fn wildcards_pick_like_and_underscore_stays_literal() {
        let preds = build("email=%25john_d%25&name=john_doe", &["email", "name"]);
        assert_eq!(
            preds,
            vec![
                Predicate::new("`self`.`email` LIKE ?", vec!["%john\\_d%".into()]),
                Predicate::new("`self`.`name` = ?", vec!["john_doe".into()]),
            ]
        );
    }

    #[test]
    fn lists_ranges_and_null_checks() {
        let preds = build(
            "status=1,2&createdAtFrom=2024-01-01&deletedAtIsNull=true",
            &["status", "createdAt", "deletedAt"],
        );
        assert_eq!(
            preds,
            vec![
                Predicate::new("`self`.`createdAt` >= ?", vec!["2024-01-01 00:00:00".into()]),
                Predicate::new("`self`.`deletedAt` IS NULL", vec![]),
                Predicate::new("`self`.`status` IN (?, ?)", vec!["1".into(), "2".into()]),
            ]
        );
    }

    #[test]
    fn related_filters_use_the_join_alias() {
        let preds = build("m.category=FOM&x.category=FOM", &["m.category", "x.category"]);
        assert_eq!(preds, vec![Predicate::new("`m`.`category` = ?", vec!["FOM".into()])]);
    }

    #[test]
    fn mismatched_values_are_skipped() {
        let mut filters = CanonicalFilters::default();
        filters.insert(filter_target(None, "age"), FilterOp::Gt, FilterValue::Text("x".into()));
        filters.insert(filter_target(Some("self"), "age"), FilterOp::Ne, FilterValue::Text("3".into()));
        let preds = build_predicates(&filters, &JoinPlan::default());
        assert_eq!(preds, vec![Predicate::new("`self`.`age` <> ?", vec!["3".into()])]);
    }
}
