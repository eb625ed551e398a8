use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    CanonicalFilters, FilterConfig, FilterOp, FilterReport, FilterTarget, FilterValue,
    IgnoreReason,
};
use crate::params::{ParamValue, QueryParams};
use crate::sql::validate_ident;

/// Keys consumed by pagination and sorting, never treated as filters.
pub(crate) const RESERVED_KEYS: &[&str] = &["page", "limit", "sortBy", "sortOrder"];

const SUFFIXES: &[(&str, FilterOp)] = &[
    ("IsNull", FilterOp::IsNull),
    ("NotNull", FilterOp::NotNull),
    ("From", FilterOp::From),
    ("To", FilterOp::To),
];

const WILDCARD: char = '%';

/// Turns request parameters into canonical filters. Never fails: anything
/// disallowed or malformed is left out and listed in the report.
pub fn parse_filters(params: &QueryParams, config: &FilterConfig) -> (CanonicalFilters, FilterReport) {
    let mut filters = CanonicalFilters::default();
    let mut report = FilterReport::default();

    for (key, value) in config.default_filters.iter() {
        parse_entry(key, value, config, false, &mut filters, &mut report);
    }
    for (key, value) in params.iter() {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        parse_entry(key, value, config, true, &mut filters, &mut report);
    }

    (filters, report)
}

fn parse_entry(
    key: &str,
    value: &ParamValue,
    config: &FilterConfig,
    enforce_allowlist: bool,
    filters: &mut CanonicalFilters,
    report: &mut FilterReport,
) {
    let (base, key_op) = match split_key(key, config) {
        Ok(split) => split,
        Err(reason) => return report.ignore(key, reason),
    };

    let Some((target, resolved)) = resolve(base, config) else {
        return report.ignore(key, IgnoreReason::NotAllowed);
    };
    if enforce_allowlist
        && !config.allowed_fields.contains(base)
        && !config.allowed_fields.contains(&resolved)
    {
        return report.ignore(key, IgnoreReason::NotAllowed);
    }

    match value {
        ParamValue::Scalar(raw) => match coerce(key_op, raw) {
            Some((op, v)) => filters.insert(target, op, v),
            None => report.ignore(key, IgnoreReason::InvalidValue),
        },
        ParamValue::List(items) => match key_op {
            None | Some(FilterOp::In) => match split_list(items.iter().map(String::as_str)) {
                Some(list) => filters.insert(target, FilterOp::In, FilterValue::List(list)),
                None => report.ignore(key, IgnoreReason::InvalidValue),
            },
            // a repeated operator key keeps its last value
            Some(op) => match items.last().and_then(|raw| coerce(Some(op), raw)) {
                Some((op, v)) => filters.insert(target, op, v),
                None => report.ignore(key, IgnoreReason::InvalidValue),
            },
        },
        ParamValue::Operators(ops) => {
            for (name, raw) in ops {
                let entry_key = format!("{key}[{name}]");
                let Some(op) = FilterOp::parse(name) else {
                    report.ignore(entry_key, IgnoreReason::UnknownOperator);
                    continue;
                };
                match coerce(Some(op), raw) {
                    Some((op, v)) => filters.insert(target.clone(), op, v),
                    None => report.ignore(entry_key, IgnoreReason::InvalidValue),
                }
            }
        }
    }
}

/// `field[op]` and `fieldSuffix` into `(field, op)`. A key that is itself an
/// allowed or mapped field is never split, so a column such as `sentTo`
/// keeps working.
fn split_key<'a>(key: &'a str, config: &FilterConfig) -> Result<(&'a str, Option<FilterOp>), IgnoreReason> {
    static BRACKET: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(.+)\[([A-Za-z]+)\]$").expect("bracket regex"));

    if let Some(caps) = BRACKET.captures(key) {
        let (Some(base), Some(op)) = (caps.get(1), caps.get(2)) else {
            return Err(IgnoreReason::UnknownOperator);
        };
        return FilterOp::parse(op.as_str())
            .map(|op| (base.as_str(), Some(op)))
            .ok_or(IgnoreReason::UnknownOperator);
    }

    if config.allowed_fields.contains(key)
        || config.field_mappings.contains_key(key)
        || config.related_field_mappings.contains_key(key)
    {
        return Ok((key, None));
    }

    for (suffix, op) in SUFFIXES {
        if let Some(base) = key.strip_suffix(suffix) {
            if !base.is_empty() {
                return Ok((base, Some(*op)));
            }
        }
    }
    Ok((key, None))
}

/// Resolves an external field name to its target, plus the resolved name
/// (`column` or `alias.column`) used as the second allowlist spelling.
fn resolve(base: &str, config: &FilterConfig) -> Option<(FilterTarget, String)> {
    let (alias, column) = if let Some(rel) = config.related_field_mappings.get(base) {
        (Some(rel.alias.as_str()), rel.column.as_str())
    } else {
        let path = config.field_mappings.get(base).map(String::as_str).unwrap_or(base);
        match path.split_once('.') {
            Some(("self", column)) => (None, column),
            Some((alias, column)) => (Some(alias), column),
            None => (None, path),
        }
    };

    validate_ident(column).ok()?;
    if column.contains('.') {
        return None;
    }
    match alias {
        Some(alias) => {
            validate_ident(alias).ok()?;
            Some((FilterTarget::related(alias, column), format!("{alias}.{column}")))
        }
        None => Some((FilterTarget::root(column), column.to_string())),
    }
}

fn coerce(op: Option<FilterOp>, raw: &str) -> Option<(FilterOp, FilterValue)> {
    let Some(op) = op else {
        if raw.trim().is_empty() {
            return None;
        }
        if raw.contains(',') {
            return split_list(raw.split(',')).map(|l| (FilterOp::In, FilterValue::List(l)));
        }
        if raw.contains(WILDCARD) {
            return Some((FilterOp::Like, FilterValue::Text(raw.to_string())));
        }
        return Some((FilterOp::Equals, FilterValue::Text(raw.to_string())));
    };

    let value = match op {
        FilterOp::Equals | FilterOp::Ne | FilterOp::Like => FilterValue::Text(raw.to_string()),
        FilterOp::In => FilterValue::List(split_list(raw.split(','))?),
        FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
            let n = raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())?;
            FilterValue::Number(n)
        }
        FilterOp::IsNull | FilterOp::NotNull => {
            if raw.trim() != "true" {
                return None;
            }
            FilterValue::Flag
        }
        FilterOp::From | FilterOp::To => FilterValue::Date(parse_date(raw)?),
    };
    Some((op, value))
}

fn split_list<'a>(items: impl Iterator<Item = &'a str>) -> Option<Vec<String>> {
    let list: Vec<String> = items
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!list.is_empty()).then_some(list)
}

/// RFC 3339 (converted to UTC), `YYYY-MM-DD HH:MM:SS`, or a bare date at
/// midnight.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Scope;

    fn config() -> FilterConfig {
        FilterConfig::default()
            .allow(["status", "age", "name", "createdAt", "deletedAt", "category", "m.club_id"])
            .map_field("createdAt", "created_at")
            .map_field("deletedAt", "deleted_at")
            .map_related("category", "m", "category")
    }

    fn parse(qs: &str) -> (CanonicalFilters, FilterReport) {
        parse_filters(&QueryParams::from_query_string(qs), &config())
    }

    #[test]
    fn scalar_equality() {
        let (f, report) = parse("status=1");
        assert_eq!(f.len(), 1);
        let ops = f.get(&FilterTarget::root("status")).cloned().unwrap_or_default();
        assert_eq!(ops.get(&FilterOp::Equals), Some(&FilterValue::Text("1".into())));
        assert!(report.is_clean());
    }

    #[test]
    fn disallowed_fields_are_dropped_and_reported() {
        let (f, report) = parse("password=x&status=1&self.password[ne]=y");
        assert_eq!(f.len(), 1);
        assert!(f.get(&FilterTarget::root("password")).is_none());
        assert_eq!(report.ignored.len(), 2);
        assert!(report
            .ignored
            .iter()
            .all(|i| i.reason == IgnoreReason::NotAllowed));
    }

    #[test]
    fn numeric_operators_require_numbers() {
        let (f, _) = parse("status[gt]=0.5");
        let ops = f.get(&FilterTarget::root("status")).cloned().unwrap_or_default();
        assert_eq!(ops.get(&FilterOp::Gt), Some(&FilterValue::Number(0.5)));

        let (f, report) = parse("status[gt]=invalid&age[lte]=NaN&age[gte]=inf");
        assert!(f.is_empty());
        assert_eq!(report.ignored.len(), 3);
        assert!(report
            .ignored
            .iter()
            .all(|i| i.reason == IgnoreReason::InvalidValue));
    }

    #[test]
    fn eq_and_ne_keep_strings() {
        let (f, _) = parse("status[eq]=01&status[ne]=2");
        let ops = f.get(&FilterTarget::root("status")).cloned().unwrap_or_default();
        assert_eq!(ops.get(&FilterOp::Equals), Some(&FilterValue::Text("01".into())));
        assert_eq!(ops.get(&FilterOp::Ne), Some(&FilterValue::Text("2".into())));
    }

    #[test]
    fn unknown_bracket_operator_is_reported() {
        let (f, report) = parse("status[regex]=.*");
        assert!(f.is_empty());
        assert_eq!(report.ignored[0].reason, IgnoreReason::UnknownOperator);
    }

    #[test]
    fn suffix_operators() {
        let (f, report) =
            parse("deletedAtIsNull=true&createdAtFrom=2024-01-01&createdAtTo=2024-02-01T10:00:00Z");
        assert!(report.is_clean());
        let deleted = f.get(&FilterTarget::root("deleted_at")).cloned().unwrap_or_default();
        assert_eq!(deleted.get(&FilterOp::IsNull), Some(&FilterValue::Flag));

        let created = f.get(&FilterTarget::root("created_at")).cloned().unwrap_or_default();
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
        let to = NaiveDate::from_ymd_opt(2024, 2, 1).and_then(|d| d.and_hms_opt(10, 0, 0));
        assert_eq!(created.get(&FilterOp::From), from.map(FilterValue::Date).as_ref());
        assert_eq!(created.get(&FilterOp::To), to.map(FilterValue::Date).as_ref());
    }

    #[test]
    fn null_checks_only_accept_true_and_dates_must_parse() {
        let (f, report) = parse("deletedAtIsNull=1&deletedAtNotNull=false&createdAtFrom=yesterday");
        assert!(f.is_empty());
        assert_eq!(report.ignored.len(), 3);
    }

    #[test]
    fn commas_make_in_lists() {
        let (f, _) = parse("status=1, 2,,3");
        let ops = f.get(&FilterTarget::root("status")).cloned().unwrap_or_default();
        assert_eq!(
            ops.get(&FilterOp::In),
            Some(&FilterValue::List(vec!["1".into(), "2".into(), "3".into()]))
        );

        let (f, report) = parse("status=,,");
        assert!(f.is_empty());
        assert_eq!(report.ignored[0].reason, IgnoreReason::InvalidValue);
    }

    #[test]
    fn repeated_keys_make_in_lists() {
        let (f, _) = parse("status=1&status=2");
        let ops = f.get(&FilterTarget::root("status")).cloned().unwrap_or_default();
        assert_eq!(
            ops.get(&FilterOp::In),
            Some(&FilterValue::List(vec!["1".into(), "2".into()]))
        );
    }

    #[test]
    fn wildcard_switches_to_like() {
        let (f, _) = parse("name=jo%25");
        let ops = f.get(&FilterTarget::root("name")).cloned().unwrap_or_default();
        assert_eq!(ops.get(&FilterOp::Like), Some(&FilterValue::Text("jo%".into())));
    }

    #[test]
    fn related_fields_resolve_to_their_alias() {
        let (f, report) = parse("category=FOM&m.club_id[gte]=3");
        assert!(report.is_clean());
        assert!(f.get(&FilterTarget::related("m", "category")).is_some());
        let club = f.get(&FilterTarget::related("m", "club_id")).cloned().unwrap_or_default();
        assert_eq!(club.get(&FilterOp::Gte), Some(&FilterValue::Number(3.0)));
        assert!(f.iter().all(|(t, _)| matches!(t.scope, Scope::Related(_))));
    }

    #[test]
    fn nested_operator_maps() -> anyhow::Result<()> {
        let params: QueryParams =
            serde_json::from_str(r#"{"age": {"gte": "18", "lt": "x", "near": "1"}}"#)?;
        let (f, report) = parse_filters(&params, &config());
        let ops = f.get(&FilterTarget::root("age")).cloned().unwrap_or_default();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops.get(&FilterOp::Gte), Some(&FilterValue::Number(18.0)));
        assert_eq!(report.ignored.len(), 2);
        Ok(())
    }

    #[test]
    fn defaults_bypass_the_allowlist() {
        let config = config().default_filter("archivedAtIsNull", "true");
        let (f, _) = parse_filters(&QueryParams::from_query_string("status=1"), &config);
        assert!(f.get(&FilterTarget::root("archived_at")).is_none());
        assert!(f.get(&FilterTarget::root("archivedAt")).is_some());
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn pagination_keys_are_not_filters() {
        let (f, report) = parse("page=2&limit=10&sortBy=name&sortOrder=desc");
        assert!(f.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn unsafe_identifiers_never_resolve() {
        let config = FilterConfig::default().allow(["a`b", "x.y.z"]);
        let (f, report) =
            parse_filters(&QueryParams::from_query_string("a%60b=1&x.y.z=2"), &config);
        assert!(f.is_empty());
        assert_eq!(report.ignored.len(), 2);
    }
}
