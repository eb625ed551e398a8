//! Engine-agnostic dynamic value representation.
//!
//! Rows coming back from the store are decoded into `ObjectValue`s: ordered,
//! clone-cheap maps of column name to `DynamicValue`. Reshaped entities reuse
//! the same types, nesting objects and sequences for related rows, and
//! serialize straight into the response envelope.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Coarse classification of values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[non_exhaustive]
pub enum ValueKind {
    Undefined,
    None,
    Bool,
    Number,
    String,
    Bytes,
    Seq,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            ValueKind::Undefined => "undefined",
            ValueKind::None => "none",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Seq => "sequence",
            ValueKind::Object => "object",
        })
    }
}

/// Nested key/value object: stable iteration via `BTreeMap`, cheap clone via `Arc`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectValue(Arc<BTreeMap<SmolStr, DynamicValue>>);

impl ObjectValue {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_map(map: BTreeMap<SmolStr, DynamicValue>) -> Self {
        Self(Arc::new(map))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn get(&self, key: &str) -> Option<&DynamicValue> {
        self.0.get(key)
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
    pub fn keys(&self) -> impl Iterator<Item = &SmolStr> {
        self.0.keys()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &DynamicValue)> {
        self.0.iter()
    }

    /// Persistent-style insert. Reuses allocation if uniquely owned.
    pub fn insert(&mut self, key: impl Into<SmolStr>, value: DynamicValue) -> &Self {
        let map = Arc::make_mut(&mut self.0);
        map.insert(key.into(), value);
        self
    }
}

impl FromIterator<(SmolStr, DynamicValue)> for ObjectValue {
    fn from_iter<T: IntoIterator<Item = (SmolStr, DynamicValue)>>(iter: T) -> Self {
        Self::with_map(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, DynamicValue)> for ObjectValue {
    fn from_iter<T: IntoIterator<Item = (&'a str, DynamicValue)>>(iter: T) -> Self {
        Self::with_map(iter.into_iter().map(|(k, v)| (SmolStr::new(k), v)).collect())
    }
}

/// Internal representation for `DynamicValue`.
#[derive(Clone)]
pub enum ValueRepr {
    None,
    Undefined,
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    String(Arc<str>),
    SmallStr(SmolStr),
    Bytes(Arc<Vec<u8>>),
    Seq(Arc<Vec<DynamicValue>>),
    Object(ObjectValue),
}

impl fmt::Debug for ValueRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRepr::Undefined => f.write_str("undefined"),
            ValueRepr::None => f.write_str("none"),
            ValueRepr::Bool(v) => fmt::Debug::fmt(v, f),
            ValueRepr::U64(v) => fmt::Debug::fmt(v, f),
            ValueRepr::I64(v) => fmt::Debug::fmt(v, f),
            ValueRepr::F64(v) => fmt::Debug::fmt(v, f),
            ValueRepr::String(s) => fmt::Debug::fmt(s, f),
            ValueRepr::SmallStr(s) => fmt::Debug::fmt(s.as_str(), f),
            ValueRepr::Bytes(b) => {
                write!(f, "b'")?;
                for &byte in b.iter() {
                    write!(f, "{}", byte.escape_ascii())?;
                }
                write!(f, "'")
            }
            ValueRepr::Seq(items) => f.debug_list().entries(items.iter()).finish(),
            ValueRepr::Object(obj) => f
                .debug_map()
                .entries(obj.iter().map(|(k, v)| (k.as_str(), v)))
                .finish(),
        }
    }
}

/// Public dynamic value wrapper.
#[derive(Clone)]
pub struct DynamicValue(pub ValueRepr);

impl DynamicValue {
    #[inline]
    pub fn undefined() -> Self {
        Self(ValueRepr::Undefined)
    }
    #[inline]
    pub fn none() -> Self {
        Self(ValueRepr::None)
    }
    #[inline]
    pub fn from_bytes(b: Vec<u8>) -> Self {
        Self(ValueRepr::Bytes(Arc::new(b)))
    }
    #[inline]
    pub fn from_object(obj: ObjectValue) -> Self {
        Self(ValueRepr::Object(obj))
    }
    #[inline]
    pub fn from_seq(items: Vec<DynamicValue>) -> Self {
        Self(ValueRepr::Seq(Arc::new(items)))
    }

    pub fn kind(&self) -> ValueKind {
        match &self.0 {
            ValueRepr::Undefined => ValueKind::Undefined,
            ValueRepr::None => ValueKind::None,
            ValueRepr::Bool(_) => ValueKind::Bool,
            ValueRepr::I64(_) | ValueRepr::U64(_) | ValueRepr::F64(_) => ValueKind::Number,
            ValueRepr::String(_) | ValueRepr::SmallStr(_) => ValueKind::String,
            ValueRepr::Bytes(_) => ValueKind::Bytes,
            ValueRepr::Seq(_) => ValueKind::Seq,
            ValueRepr::Object(_) => ValueKind::Object,
        }
    }
    pub fn is_undefined(&self) -> bool {
        matches!(self.0, ValueRepr::Undefined)
    }
    pub fn is_none(&self) -> bool {
        matches!(self.0, ValueRepr::None)
    }
    /// Null in the SQL sense: either an explicit NULL or a missing column.
    pub fn is_null(&self) -> bool {
        self.is_none() || self.is_undefined()
    }
    pub fn as_str(&self) -> Option<&str> {
        match &self.0 {
            ValueRepr::String(s) => Some(s),
            ValueRepr::SmallStr(s) => Some(s.as_str()),
            ValueRepr::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match &self.0 {
            ValueRepr::I64(n) => Some(*n),
            ValueRepr::U64(n) => (*n <= i64::MAX as u64).then_some(*n as i64),
            ValueRepr::F64(f) => (f.is_finite() && f.fract() == 0.0).then_some(*f as i64),
            _ => None,
        }
    }
    pub fn as_u64(&self) -> Option<u64> {
        match &self.0 {
            ValueRepr::U64(n) => Some(*n),
            ValueRepr::I64(n) => (*n >= 0).then_some(*n as u64),
            ValueRepr::F64(f) => (f.is_finite() && *f >= 0.0).then_some(*f as u64),
            // COUNT() may come back as a DECIMAL string on some server modes
            ValueRepr::String(_) | ValueRepr::SmallStr(_) | ValueRepr::Bytes(_) => {
                self.as_str().and_then(|s| s.trim().parse().ok())
            }
            _ => None,
        }
    }
    pub fn as_object(&self) -> Option<&ObjectValue> {
        match &self.0 {
            ValueRepr::Object(obj) => Some(obj),
            _ => None,
        }
    }
    pub fn as_seq(&self) -> Option<&[DynamicValue]> {
        match &self.0 {
            ValueRepr::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Lookup by key on nested objects. Returns `Undefined` if key is missing.
    pub fn get_attr(&self, key: &str) -> DynamicValue {
        self.as_object()
            .and_then(|obj| obj.get(key).cloned())
            .unwrap_or_else(DynamicValue::undefined)
    }

    /// Text form used when a scalar column is reinterpreted (aggregate splitting).
    pub fn to_lossy_string(&self) -> String {
        match &self.0 {
            ValueRepr::String(s) => s.to_string(),
            ValueRepr::SmallStr(s) => s.to_string(),
            ValueRepr::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            _ => self.to_string(),
        }
    }
}

impl fmt::Debug for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ValueRepr::Undefined => Ok(()),
            ValueRepr::None => f.write_str("none"),
            ValueRepr::Bool(v) => fmt::Display::fmt(v, f),
            ValueRepr::U64(v) => fmt::Display::fmt(v, f),
            ValueRepr::I64(v) => fmt::Display::fmt(v, f),
            ValueRepr::F64(v) => fmt::Display::fmt(v, f),
            ValueRepr::String(s) => f.write_str(s),
            ValueRepr::SmallStr(s) => f.write_str(s.as_str()),
            ValueRepr::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            ValueRepr::Seq(_) | ValueRepr::Object(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

/* ----------------------- Equality across kinds ----------------------- */

impl PartialEq for DynamicValue {
    fn eq(&self, other: &Self) -> bool {
        use ValueRepr::*;
        match (&self.0, &other.0) {
            (None, None) | (Undefined, Undefined) => true,
            (Bool(a), Bool(b)) => a == b,
            (Bytes(a), Bytes(b)) => a.as_slice() == b.as_slice(),
            (Seq(a), Seq(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (I64(a), U64(b)) | (U64(b), I64(a)) => *a >= 0 && *a as u64 == *b,
            (F64(a), F64(b)) => a == b,
            (F64(f), I64(n)) | (I64(n), F64(f)) => *f == *n as f64,
            (F64(f), U64(n)) | (U64(n), F64(f)) => *f == *n as f64,
            (a, b) => match (self.as_str(), other.as_str()) {
                (Some(x), Some(y)) if matches!(a, String(_) | SmallStr(_))
                    && matches!(b, String(_) | SmallStr(_)) => x == y,
                _ => false,
            },
        }
    }
}

impl Eq for DynamicValue {}

impl Serialize for DynamicValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            ValueRepr::None | ValueRepr::Undefined => serializer.serialize_none(),
            ValueRepr::Bool(b) => serializer.serialize_bool(*b),
            ValueRepr::U64(n) => serializer.serialize_u64(*n),
            ValueRepr::I64(n) => serializer.serialize_i64(*n),
            ValueRepr::F64(f) => serializer.serialize_f64(*f),
            ValueRepr::String(s) => serializer.serialize_str(s),
            ValueRepr::SmallStr(s) => serializer.serialize_str(s.as_str()),
            ValueRepr::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => serializer.serialize_str(s),
                Err(_) => serializer.serialize_bytes(b),
            },
            ValueRepr::Seq(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            ValueRepr::Object(obj) => obj.serialize(serializer),
        }
    }
}

impl Serialize for ObjectValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k.as_str(), v)?;
        }
        map.end()
    }
}

impl From<()> for DynamicValue {
    fn from(_: ()) -> Self {
        Self::none()
    }
}
impl From<bool> for DynamicValue {
    fn from(v: bool) -> Self {
        Self(ValueRepr::Bool(v))
    }
}
impl From<i64> for DynamicValue {
    fn from(v: i64) -> Self {
        Self(ValueRepr::I64(v))
    }
}
impl From<i32> for DynamicValue {
    fn from(v: i32) -> Self {
        Self(ValueRepr::I64(v as i64))
    }
}
impl From<u64> for DynamicValue {
    fn from(v: u64) -> Self {
        Self(ValueRepr::U64(v))
    }
}
impl From<u32> for DynamicValue {
    fn from(v: u32) -> Self {
        Self(ValueRepr::U64(v as u64))
    }
}
impl From<f64> for DynamicValue {
    fn from(v: f64) -> Self {
        Self(ValueRepr::F64(v))
    }
}
impl From<&str> for DynamicValue {
    fn from(s: &str) -> Self {
        if s.len() <= 23 {
            Self(ValueRepr::SmallStr(SmolStr::new(s)))
        } else {
            Self(ValueRepr::String(Arc::from(s)))
        }
    }
}
impl From<String> for DynamicValue {
    fn from(s: String) -> Self {
        DynamicValue::from(s.as_str())
    }
}
impl From<Vec<u8>> for DynamicValue {
    fn from(b: Vec<u8>) -> Self {
        DynamicValue::from_bytes(b)
    }
}
impl From<ObjectValue> for DynamicValue {
    fn from(o: ObjectValue) -> Self {
        DynamicValue::from_object(o)
    }
}
impl From<Vec<DynamicValue>> for DynamicValue {
    fn from(items: Vec<DynamicValue>) -> Self {
        DynamicValue::from_seq(items)
    }
}
impl<T: Into<DynamicValue>> From<Option<T>> for DynamicValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_else(DynamicValue::none)
    }
}
