use std::{str::FromStr, sync::Arc};

use anyhow::{bail, Result};

use smol_str::SmolStr;

use super::helpers::{qualified, quote_ident_path, validate_ident};
use crate::aggregate::ChildRowCodec;

/// How a projected column is wrapped in a grouped query.
#[derive(Clone)]
pub enum Wrapper {
    /// `ANY_VALUE(col)`: a to-one column that is constant within the group.
    AnyValue,
    /// The child-row aggregate of the active codec, ordered by the listed
    /// columns of the same source.
    Aggregate {
        codec: Arc<dyn ChildRowCodec>,
        order_by: Arc<[SmolStr]>,
    },
}

impl std::fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wrapper::AnyValue => f.write_str("AnyValue"),
            Wrapper::Aggregate { codec, order_by } => f
                .debug_struct("Aggregate")
                .field("codec", codec)
                .field("order_by", order_by)
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct Selector {
    source: Option<Arc<str>>,
    column: Arc<str>,
    alias: Option<Arc<str>>,
    wrapper: Option<Wrapper>,
}

impl Selector {
    pub fn new(column: &str) -> Self {
        Selector {
            source: None,
            column: Arc::from(column),
            alias: None,
            wrapper: None,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Name of the column in the result row.
    pub fn output_name(&self) -> &str {
        self.alias().unwrap_or(&self.column)
    }

    pub fn is_wildcard(&self) -> bool {
        &*self.column == "*"
    }

    pub fn set_source(mut self, source: &str) -> Self {
        self.source = Some(Arc::from(source));
        self
    }

    pub fn set_alias(mut self, alias: &str) -> Self {
        self.alias = Some(Arc::from(alias));
        self
    }

    pub fn wrap(mut self, wrapper: Wrapper) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    pub fn to_sql(&self) -> Result<String> {
        if self.is_wildcard() {
            if self.alias.is_some() {
                bail!("cannot alias a wildcard selector (`*` or `src.*`)");
            }
            if self.wrapper.is_some() {
                bail!("cannot aggregate a wildcard selector");
            }
            return match &self.source {
                Some(src) => {
                    validate_ident(src)?;
                    Ok(format!("`{src}`.*"))
                }
                None => Ok("*".to_string()),
            };
        }

        validate_ident(&self.column)?;
        let column = match &self.source {
            Some(src) => {
                validate_ident(src)?;
                format!("`{}`.`{}`", src, self.column)
            }
            None => format!("`{}`", self.column),
        };
        let expr = match &self.wrapper {
            None => column,
            Some(Wrapper::AnyValue) => format!("ANY_VALUE({column})"),
            Some(Wrapper::Aggregate { codec, order_by }) => {
                let order = order_by
                    .iter()
                    .map(|key| match &self.source {
                        Some(src) => qualified(src, key),
                        None => quote_ident_path(key),
                    })
                    .collect::<Result<Vec<_>>>()?;
                codec.aggregate_sql(&column, &order)
            }
        };

        match &self.alias {
            Some(alias) => {
                validate_ident(alias)?;
                Ok(format!("{expr} AS `{alias}`"))
            }
            // keep the bare column name when a wrapper would otherwise rename it
            None if self.wrapper.is_some() => Ok(format!("{expr} AS `{}`", self.column)),
            None => Ok(expr),
        }
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    /// Parse a selector from a string like:
    ///   "*"
    ///   "src.*"
    ///   "col"
    ///   "src.col"
    ///   "src.col:alias"
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            bail!("empty selector");
        }

        let (lhs, alias) = match input.rsplit_once(':') {
            Some((l, a)) => {
                let a = a.trim();
                if a.is_empty() {
                    bail!("empty alias after ':'");
                }
                validate_ident(a)?;
                (l.trim(), Some(Arc::<str>::from(a)))
            }
            None => (input, None),
        };

        if lhs == "*" {
            if alias.is_some() {
                bail!("cannot alias a wildcard selector (`*` or `src.*`)");
            }
            return Ok(Selector::new("*"));
        }

        let mut parts = lhs.split('.').map(str::trim);
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        if parts.next().is_some() {
            bail!("selector supports at most one dot: `source.column` or `source.*`");
        }

        match (second, alias) {
            (None, None) => {
                validate_ident(first)?;
                Ok(Selector::new(first))
            }
            (None, Some(_)) => bail!("alias requires a source: use `source.column:alias`"),
            (Some(col), alias) => {
                if first.is_empty() || col.is_empty() {
                    bail!("empty source/column in `{input}`");
                }
                validate_ident(first)?;
                if col == "*" {
                    if alias.is_some() {
                        bail!("cannot alias a wildcard selector (`*` or `src.*`)");
                    }
                    return Ok(Selector::new("*").set_source(first));
                }
                validate_ident(col)?;
                Ok(Selector {
                    source: Some(Arc::from(first)),
                    column: Arc::from(col),
                    alias,
                    wrapper: None,
                })
            }
        }
    }
}

impl TryFrom<&str> for Selector {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Selector::from_str(value)
    }
}

impl TryFrom<String> for Selector {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Selector::from_str(&value)
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("source", &self.source.as_deref())
            .field("column", &self.column)
            .field("alias", &self.alias.as_deref())
            .field("wrapper", &self.wrapper)
            .finish()
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_sql()
            .map_err(|_| std::fmt::Error)
            .and_then(|s| f.write_str(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::GroupConcatCodec;

    fn sql(s: &str) -> anyhow::Result<String> {
        Selector::from_str(s)?.to_sql()
    }

    #[test]
    fn parse_wildcards() -> anyhow::Result<()> {
        assert_eq!(sql("*")?, "*");
        assert_eq!(sql("self.*")?, "`self`.*");
        assert!(Selector::from_str("*:x").is_err());
        assert!(Selector::from_str("self.*:x").is_err());
        Ok(())
    }

    #[test]
    fn parse_columns_and_aliases() -> anyhow::Result<()> {
        let sel = Selector::from_str("self.email:user_email")?;
        assert_eq!(sel.source(), Some("self"));
        assert_eq!(sel.column(), "email");
        assert_eq!(sel.output_name(), "user_email");
        assert_eq!(sel.to_sql()?, "`self`.`email` AS `user_email`");
        assert_eq!(sql(" self . id ")?, "`self`.`id`");
        assert!(Selector::from_str("id:alias").is_err());
        assert!(Selector::from_str("a.b.c").is_err());
        Ok(())
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        assert!(Selector::from_str("bad name").is_err());
        assert!(Selector::from_str("self.id:`oops`").is_err());
        assert!(Selector::from_str("sel;ect.id").is_err());
    }

    #[test]
    fn aggregate_wrapper_uses_codec() -> anyhow::Result<()> {
        let codec: Arc<dyn ChildRowCodec> = Arc::new(GroupConcatCodec::default());
        let sel = Selector::new("category")
            .set_source("m")
            .set_alias("m_category")
            .wrap(Wrapper::Aggregate {
                codec,
                order_by: Arc::from(vec![SmolStr::new("id"), SmolStr::new("category")]),
            });
        assert_eq!(
            sel.to_sql()?,
            "GROUP_CONCAT(IFNULL(`m`.`category`, '\\\\N') ORDER BY `m`.`id` ASC, `m`.`category` ASC \
             SEPARATOR '|||') AS `m_category`"
        );

        let bad = Selector::new("category").set_source("m").wrap(Wrapper::Aggregate {
            codec: Arc::new(GroupConcatCodec::default()),
            order_by: Arc::from(vec![SmolStr::new("id;")]),
        });
        assert!(bad.to_sql().is_err());
        Ok(())
    }

    #[test]
    fn any_value_keeps_output_name() -> anyhow::Result<()> {
        let sel = Selector::new("name").set_source("club").wrap(Wrapper::AnyValue);
        assert_eq!(sel.to_sql()?, "ANY_VALUE(`club`.`name`) AS `name`");
        assert!(Selector::new("*").wrap(Wrapper::AnyValue).to_sql().is_err());
        Ok(())
    }
}
