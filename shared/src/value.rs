//! Dynamic values carried by replicated fields.
//!
//! A replicated field may hold any [`FieldValue`]: null, a boolean, a
//! double-precision number, a UTF-8 string, or a structured JSON-like value.
//! Change detection uses [`FieldValue::shallow_eq`], which compares
//! primitives by value and structured values key by key.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The value held by one replicated field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Arrays and objects. Rendered to canonical JSON text on the wire.
    Structured(JsonValue),
}

/// Discriminant of a [`FieldValue`], matching the wire tag order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Structured,
}

impl FieldValue {
    /// The variant without its payload
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Null => ValueKind::Null,
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Number(_) => ValueKind::Number,
            FieldValue::String(_) => ValueKind::String,
            FieldValue::Structured(_) => ValueKind::Structured,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Returns the boolean, if this is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number, if this is one.
    ///
    /// Structured values are not converted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrows the string, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the structured document, if this is one
    pub fn as_structured(&self) -> Option<&JsonValue> {
        match self {
            FieldValue::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Equality used to decide whether a write is a change.
    ///
    /// Primitives compare by value (`NaN` is never equal to itself). Two
    /// structured values are equal when they have the same number of keys
    /// (or elements) and every key holds an equal value. Numbers inside
    /// structured values compare numerically, so `1` and `1.0` are equal.
    pub fn shallow_eq(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Structured(a), FieldValue::Structured(b)) => json_shallow_eq(a, b),
            _ => self == other,
        }
    }
}

fn json_shallow_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Object(left), JsonValue::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, value)| right.get(key).is_some_and(|other| json_shallow_eq(value, other)))
        }
        (JsonValue::Array(left), JsonValue::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|(value, other)| json_shallow_eq(value, other))
        }
        (JsonValue::Number(left), JsonValue::Number(right)) => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => left == right,
        },
        _ => a == b,
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::String(s) => write!(f, "{:?}", s),
            FieldValue::Structured(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<JsonValue> for FieldValue {
    /// JSON primitives map onto their dedicated variants; only arrays and
    /// objects become [`FieldValue::Structured`].
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Bool(b),
            JsonValue::Number(n) => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null),
            JsonValue::String(s) => FieldValue::String(s),
            other => FieldValue::Structured(other),
        }
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}
