//! The row-level scalar type (spec §3 "Row").

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use ivm_errors::{type_mismatch, IvmResult};

/// A JSON-like scalar. `Undefined` is semantically distinct from `Null` (it
/// marks an absent optional column) but normalizes to `Null` for comparison
/// purposes, per spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Undefined,
}

impl Value {
    /// Returns `Null` in place of `Undefined`; all other variants pass
    /// through unchanged. Used wherever two values are compared.
    pub fn normalized(&self) -> Value {
        match self {
            Value::Undefined => Value::Null,
            other => other.clone(),
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Convert to the JSON representation used for storage-key encoding
    /// (spec "Storage keys" design note: undefined -> null).
    pub fn to_json(&self) -> serde_json::Value {
        match self.normalized() {
            Value::String(s) => serde_json::Value::String(s),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Null | Value::Undefined => serde_json::Value::Null,
        }
    }

    /// Inverse of [`Self::to_json`], used to decode a storage key's JSON
    /// tuple back into row values (spec §4.4 key-set lookups).
    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Null => Value::Null,
            _ => Value::Null,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
            Value::Undefined => "undefined",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Undefined => write!(f, "undefined"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Compare two values for use in an ordering key, following SQL's
/// null-sorts-first convention regardless of `ASC`/`DESC` (the direction is
/// applied by the caller). Returns a [`type_mismatch`] error if the two
/// values are non-null scalars of different types — see spec §7
/// `typeMismatch`.
pub fn compare_values(operator: &str, a: &Value, b: &Value) -> IvmResult<Ordering> {
    let a = a.normalized();
    let b = b.normalized();
    Ok(match (&a, &b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Undefined, _) | (_, Value::Undefined) => unreachable!("normalized above"),
        _ => type_mismatch!(
            operator,
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ),
    })
}
