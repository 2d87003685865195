//! Rows: immutable, primary-key-identified mappings from column to [`Value`]
//! (spec §3).

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::value::Value;

/// An immutable row. Cheap to clone — the underlying column map is
/// reference-counted, matching how `Node`s and `Change`s pass rows around
/// the graph without re-copying their contents at every hop.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Rc<BTreeMap<String, Value>>);

impl Row {
    pub fn new(columns: impl IntoIterator<Item = (String, Value)>) -> Self {
        Row(Rc::new(columns.into_iter().collect()))
    }

    /// Returns the value of `column`, or [`Value::Undefined`] if the row has
    /// no entry for it (an absent optional column, not an error).
    pub fn get(&self, column: &str) -> Value {
        self.0.get(column).cloned().unwrap_or(Value::Undefined)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Project the given columns out of this row, in order. Used to build
    /// primary-key and join-key tuples.
    pub fn key_values(&self, columns: &[String]) -> Vec<Value> {
        columns.iter().map(|c| self.get(c)).collect()
    }

    /// Returns a copy of this row with `column` set to `value`. The
    /// original row is left untouched — rows are immutable.
    pub fn with_column(&self, column: &str, value: Value) -> Row {
        let mut map = (*self.0).clone();
        map.insert(column.to_string(), value);
        Row(Rc::new(map))
    }

    /// True iff `self` and `other` agree on every column named in `columns`.
    pub fn matches_key(&self, other: &Row, columns: &[String]) -> bool {
        columns
            .iter()
            .all(|c| self.get(c).normalized() == other.get(c).normalized())
    }

    /// True iff `self` matches every column/value pair in a [`FetchRequest`]
    /// constraint (exact equality).
    ///
    /// [`FetchRequest`]: crate::request::FetchRequest
    pub fn matches_constraint(&self, constraint: &BTreeMap<String, Value>) -> bool {
        constraint
            .iter()
            .all(|(col, val)| self.get(col).normalized() == val.normalized())
    }
}
