//! Flat rows to nested entities.
//!
//! Related columns come back as `<alias>_<column>`. Projecting joins fold into
//! a single object; aggregated joins are split with the codec and zipped
//! positionally, element `i` of every column forming child `i`. An alias whose
//! columns are all null or empty is omitted from the entity.

use smol_str::SmolStr;
use std::collections::BTreeSet;
use tracing::warn;

use crate::aggregate::{AlignmentPolicy, ChildRowCodec};
use crate::error::{QueryError, Result};
use crate::join::{JoinPlan, PlannedJoin};
use crate::value::{DynamicValue, ObjectValue};

pub struct Reshaper<'a> {
    plan: &'a JoinPlan,
    codec: &'a dyn ChildRowCodec,
    policy: AlignmentPolicy,
}

impl<'a> Reshaper<'a> {
    pub fn new(plan: &'a JoinPlan, codec: &'a dyn ChildRowCodec, policy: AlignmentPolicy) -> Self {
        Self { plan, codec, policy }
    }

    pub fn reshape_all(&self, rows: &[ObjectValue]) -> Result<Vec<ObjectValue>> {
        rows.iter().map(|row| self.reshape(row)).collect()
    }

    pub fn reshape(&self, row: &ObjectValue) -> Result<ObjectValue> {
        let mut related_keys = BTreeSet::new();
        let mut nested = Vec::new();

        for join in self.plan.joins() {
            let Some(columns) = &join.columns else {
                continue;
            };
            let cells: Vec<(&SmolStr, DynamicValue)> = columns
                .iter()
                .map(|c| {
                    let key = join.output_name(c);
                    let value = row.get(&key).cloned().unwrap_or_else(DynamicValue::none);
                    related_keys.insert(key);
                    (c, value)
                })
                .collect();

            let value = if join.is_aggregated() {
                self.unzip(join, &cells)?
            } else {
                fold(&cells)
            };
            if let Some(value) = value {
                nested.push((join.alias.clone(), value));
            }
        }

        let mut out: ObjectValue = row
            .iter()
            .filter(|(k, _)| !related_keys.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (alias, value) in nested {
            out.insert(alias, value);
        }
        Ok(out)
    }

    fn unzip(&self, join: &PlannedJoin, cells: &[(&SmolStr, DynamicValue)]) -> Result<Option<DynamicValue>> {
        let split: Vec<Vec<Option<String>>> = cells
            .iter()
            .map(|(_, v)| {
                if v.is_null() {
                    Vec::new()
                } else {
                    self.codec.split(&v.to_lossy_string())
                }
            })
            .collect();
        let lengths: Vec<usize> = split.iter().map(Vec::len).collect();

        // a missing or NULL column reads as NULL in every child
        let present: BTreeSet<usize> = lengths.iter().copied().filter(|&l| l > 0).collect();
        let Some(&shortest) = present.first() else {
            return Ok(None);
        };
        if present.len() > 1 {
            if self.policy == AlignmentPolicy::Strict {
                return Err(QueryError::MisalignedAggregate {
                    alias: join.alias.to_string(),
                    lengths,
                });
            }
            warn!(
                alias = %join.alias,
                ?lengths,
                kept = shortest,
                "aggregated columns disagree on length, truncating"
            );
        }

        let mut tuples: Vec<Vec<Option<String>>> = (0..shortest)
            .map(|i| split.iter().map(|parts| parts.get(i).cloned().flatten()).collect())
            .filter(|tuple: &Vec<Option<String>>| tuple.iter().any(Option::is_some))
            .collect();
        // fan-out of a sibling join repeats whole tuples next to each other
        tuples.dedup();

        let mut children: Vec<DynamicValue> = tuples
            .into_iter()
            .map(|tuple| {
                let child: ObjectValue = cells
                    .iter()
                    .zip(tuple)
                    .map(|((col, _), v)| ((*col).clone(), DynamicValue::from(v)))
                    .collect();
                DynamicValue::from(child)
            })
            .collect();

        Ok(match children.len() {
            0 => None,
            1 => Some(children.swap_remove(0)),
            _ => Some(DynamicValue::from_seq(children)),
        })
    }
}

/// A to-one relation: one object, or nothing when every column is null.
fn fold(cells: &[(&SmolStr, DynamicValue)]) -> Option<DynamicValue> {
    if cells.iter().all(|(_, v)| v.is_null()) {
        return None;
    }
    let obj: ObjectValue = cells.iter().map(|(c, v)| ((*c).clone(), v.clone())).collect();
    Some(obj.into())
}
