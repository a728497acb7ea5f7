//! Field values and typed accessors.
//!
//! Resource attributes travel through the reconciler as [`FieldValue`]s held
//! in a [`FieldMap`]. Transports that need a concrete Rust type go through a
//! [`Field`] handle instead of matching on the enum by hand.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Bool,
    Int,
    StringList,
    StringMap,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Bool => "bool",
            FieldType::Int => "integer",
            FieldType::StringList => "list of strings",
            FieldType::StringMap => "map of strings",
        };
        f.write_str(name)
    }
}

/// A single attribute value.
///
/// Serialized untagged, so a manifest can write `"max_ttl": 300` or
/// `"options": {"version": "2"}` directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    String(String),
    StringList(Vec<String>),
    StringMap(BTreeMap<String, String>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::String(_) => FieldType::String,
            FieldValue::StringList(_) => FieldType::StringList,
            FieldValue::StringMap(_) => FieldType::StringMap,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::StringList(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            FieldValue::StringMap(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::String(s) => write!(f, "{:?}", s),
            FieldValue::StringList(l) => write!(f, "{:?}", l),
            FieldValue::StringMap(m) => write!(f, "{:?}", m),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::StringList(v)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(v: Vec<&str>) -> Self {
        FieldValue::StringList(v.into_iter().map(str::to_string).collect())
    }
}

impl From<BTreeMap<String, String>> for FieldValue {
    fn from(v: BTreeMap<String, String>) -> Self {
        FieldValue::StringMap(v)
    }
}

/// Conversion back out of a [`FieldValue`] for typed accessors.
pub trait FromFieldValue: Sized {
    fn from_field_value(value: &FieldValue) -> Option<Self>;
}

impl FromFieldValue for bool {
    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromFieldValue for i64 {
    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_int()
    }
}

impl FromFieldValue for String {
    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromFieldValue for Vec<String> {
    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_list().map(<[String]>::to_vec)
    }
}

impl FromFieldValue for BTreeMap<String, String> {
    fn from_field_value(value: &FieldValue) -> Option<Self> {
        value.as_map().cloned()
    }
}

/// Typed handle for a named field.
///
/// Declared once per resource kind as a constant, e.g.
/// `pub const MAX_LEASE_TTL: Field<i64> = Field::new("max_lease_ttl");`,
/// so a transport can never read an integer attribute as a string.
pub struct Field<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Field<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

/// Ordered set of named field values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, FieldValue>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reads a field through its typed handle. Returns `None` when the field
    /// is absent or holds a value of another type.
    pub fn get_as<T: FromFieldValue>(&self, field: Field<T>) -> Option<T> {
        self.0.get(field.name()).and_then(T::from_field_value)
    }

    pub fn set<T: Into<FieldValue>>(&mut self, field: Field<T>, value: T) {
        self.0.insert(field.name().to_string(), value.into());
    }

    /// Copies every entry of `other` into `self`, overwriting on conflict.
    pub fn extend_from(&mut self, other: &FieldMap) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl FromIterator<(String, FieldValue)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FieldMap {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Builds a [`FieldMap`] from `name => value` pairs.
#[macro_export]
macro_rules! fields {
    () => { $crate::schema::FieldMap::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::schema::FieldMap::new();
        $( map.insert($name, $value); )+
        map
    }};
}
