// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Field values carried by an operation.
//!
//! A value is a scalar, an ordered list of values, or an ordered named map of
//! values. Typed reads go through [`FromValue`] and fail with
//! [`OperationError::TypeMismatch`] when the stored shape differs; a missing
//! field reads as `None`.

use crate::errors::OperationError;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Long,
    Double,
    Bool,
    List,
    Map,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Double => "double",
            Self::Bool => "boolean",
            Self::List => "list",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    List(OperationList),
    Map(OperationMap),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Long(_) => ValueKind::Long,
            Self::Double(_) => ValueKind::Double,
            Self::Bool(_) => ValueKind::Bool,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Long(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Long(i64::from(value))
    }
}

impl From<u64> for Value {
    /// Values above `i64::MAX` saturate.
    fn from(value: u64) -> Self {
        Self::Long(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Long(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Self::Long(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<OperationList> for Value {
    fn from(value: OperationList) -> Self {
        Self::List(value)
    }
}

impl From<OperationMap> for Value {
    fn from(value: OperationMap) -> Self {
        Self::Map(value)
    }
}

/// Typed view of a [`Value`].
pub trait FromValue<'a>: Sized {
    const KIND: ValueKind;

    fn from_value(value: &'a Value) -> Option<Self>;
}

impl<'a> FromValue<'a> for &'a str {
    const KIND: ValueKind = ValueKind::String;

    fn from_value(value: &'a Value) -> Option<Self> {
        value.as_str()
    }
}

impl<'a> FromValue<'a> for i64 {
    const KIND: ValueKind = ValueKind::Long;

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for f64 {
    const KIND: ValueKind = ValueKind::Double;

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for &'a OperationList {
    const KIND: ValueKind = ValueKind::List;

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl<'a> FromValue<'a> for &'a OperationMap {
    const KIND: ValueKind = ValueKind::Map;

    fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

fn typed<'a, T: FromValue<'a>>(
    field: impl FnOnce() -> String,
    value: Option<&'a Value>,
) -> Result<Option<T>, OperationError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match T::from_value(value) {
        Some(v) => Ok(Some(v)),
        None => Err(OperationError::TypeMismatch {
            field: field(),
            expected: T::KIND,
            found: value.kind(),
        }),
    }
}

fn mismatch(field: String, expected: ValueKind, found: &Value) -> OperationError {
    OperationError::TypeMismatch {
        field,
        expected,
        found: found.kind(),
    }
}

/// Insertion-ordered mapping from field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationMap {
    entries: Vec<(String, Value)>,
}

impl OperationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, overwriting an existing one in place.
    pub fn put(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    pub fn get_as<'a, T: FromValue<'a>>(&'a self, name: &str) -> Result<Option<T>, OperationError> {
        typed(|| name.to_string(), self.get(name))
    }

    /// Replaces `name` with an empty map and returns it for filling.
    pub fn create_map(&mut self, name: impl Into<String>) -> Result<&mut OperationMap, OperationError> {
        let name = name.into();
        self.put(name.as_str(), OperationMap::new());
        self.map_mut(&name)
    }

    /// Replaces `name` with an empty list and returns it for filling.
    pub fn create_list(&mut self, name: impl Into<String>) -> Result<&mut OperationList, OperationError> {
        let name = name.into();
        self.put(name.as_str(), OperationList::new());
        self.list_mut(&name)
    }

    /// The map stored under `name`, for adding to it in place.
    pub fn map_mut(&mut self, name: &str) -> Result<&mut OperationMap, OperationError> {
        match self.value_mut(name) {
            Some(Value::Map(map)) => Ok(map),
            Some(other) => Err(mismatch(name.to_string(), ValueKind::Map, other)),
            None => Err(OperationError::Missing(name.to_string())),
        }
    }

    /// The list stored under `name`, for adding to it in place.
    pub fn list_mut(&mut self, name: &str) -> Result<&mut OperationList, OperationError> {
        match self.value_mut(name) {
            Some(Value::List(list)) => Ok(list),
            Some(other) => Err(mismatch(name.to_string(), ValueKind::List, other)),
            None => Err(OperationError::Missing(name.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn value_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find_map(|(k, v)| (k == name).then_some(v))
    }
}

impl Serialize for OperationMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Ordered list of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationList {
    items: Vec<Value>,
}

impl OperationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: impl Into<Value>) -> &mut Self {
        self.items.push(value.into());
        self
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn get_as<'a, T: FromValue<'a>>(&'a self, index: usize) -> Result<Option<T>, OperationError> {
        typed(|| format!("[{index}]"), self.get(index))
    }

    pub fn create_map(&mut self) -> Result<&mut OperationMap, OperationError> {
        self.items.push(Value::Map(OperationMap::new()));
        let index = self.items.len() - 1;
        match self.items.last_mut() {
            Some(Value::Map(map)) => Ok(map),
            Some(other) => Err(mismatch(format!("[{index}]"), ValueKind::Map, other)),
            None => Err(OperationError::Missing(format!("[{index}]"))),
        }
    }

    pub fn create_list(&mut self) -> Result<&mut OperationList, OperationError> {
        self.items.push(Value::List(OperationList::new()));
        let index = self.items.len() - 1;
        match self.items.last_mut() {
            Some(Value::List(list)) => Ok(list),
            Some(other) => Err(mismatch(format!("[{index}]"), ValueKind::List, other)),
            None => Err(OperationError::Missing(format!("[{index}]"))),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }
}

impl<V: Into<Value>> FromIterator<V> for OperationList {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl Serialize for OperationList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}
