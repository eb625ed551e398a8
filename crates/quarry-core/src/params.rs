//! Raw, untyped request parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One request parameter as it arrives from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(String),
    /// `{"gt": "3", "lte": "9"}`, the nested form of `field[gt]=3&field[lte]=9`.
    Operators(BTreeMap<String, String>),
    /// Repeated keys (`id=1&id=2`).
    List(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Scalar(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Scalar(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, ParamValue>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `a=1&b[gt]=2&c=x&c=y`. Bracket keys are kept flat; repeated keys
    /// collapse into a [`ParamValue::List`].
    pub fn from_query_string(qs: &str) -> Self {
        let qs = qs.strip_prefix('?').unwrap_or(qs);
        let mut params = Self::new();
        for (k, v) in url::form_urlencoded::parse(qs.as_bytes()) {
            params.append(k.into_owned(), v.into_owned());
        }
        params
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Adds a scalar, turning an existing entry for `key` into a list.
    pub fn append(&mut self, key: String, value: String) {
        use std::collections::btree_map::Entry;
        match self.0.entry(key) {
            Entry::Vacant(e) => {
                e.insert(ParamValue::Scalar(value));
            }
            Entry::Occupied(mut e) => {
                let slot = e.get_mut();
                match slot {
                    ParamValue::Scalar(prev) => {
                        *slot = ParamValue::List(vec![std::mem::take(prev), value]);
                    }
                    ParamValue::List(items) => items.push(value),
                    ParamValue::Operators(_) => *slot = ParamValue::Scalar(value),
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// The scalar value of `key`, or the last one when it was repeated.
    pub fn scalar(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            ParamValue::Scalar(s) => Some(s),
            ParamValue::List(items) => items.last().map(String::as_str),
            ParamValue::Operators(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
