//! The per-operator keyed storage abstraction Join and Exists use to
//! maintain incremental state (spec §4.6).
//!
//! Storage is deliberately narrow: string keys, small JSON-serializable
//! scalar values, get/set/del and prefix scan. It is not required to be
//! persistent — [`MemoryStorage`] is the reference (and only) in-tree
//! implementation, analogous to how `dataflow-state` backs a node's
//! materialization with an in-process `BTreeMap`/`IndexMap` rather than a
//! real KV store.

use std::collections::BTreeMap;

/// A value small enough to live in per-operator storage: a join-key-set
/// membership flag, or a relationship size counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageValue {
    Bool(bool),
    Int(i64),
}

impl StorageValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StorageValue::Bool(b) => Some(*b),
            StorageValue::Int(i) => Some(*i != 0),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StorageValue::Int(i) => Some(*i),
            StorageValue::Bool(b) => Some(*b as i64),
        }
    }
}

impl From<bool> for StorageValue {
    fn from(b: bool) -> Self {
        StorageValue::Bool(b)
    }
}

impl From<i64> for StorageValue {
    fn from(i: i64) -> Self {
        StorageValue::Int(i)
    }
}

/// Operations consumed by operators, provided externally (spec §6).
///
/// Keys are namespaced by the operator that owns them; this trait knows
/// nothing about that namespacing, it just stores what it's given. When
/// `cleanup` completes on a subtree, the storage belonging to that subtree
/// must be empty — see the [`Storage::scan`]-based emptiness checks used by
/// the property tests in `ivm-dataflow`.
pub trait Storage {
    fn get(&self, key: &str) -> Option<StorageValue>;
    fn set(&mut self, key: &str, value: StorageValue);
    fn del(&mut self, key: &str);

    /// Iterate all `(key, value)` pairs whose key starts with `prefix`, in
    /// key order. Used by Exists to reuse a computed relationship size
    /// across parents that share a join key (spec §4.5).
    fn scan<'a>(&'a self, prefix: &str) -> Box<dyn Iterator<Item = (String, StorageValue)> + 'a>;
}

/// A simple in-memory [`Storage`] backed by a `BTreeMap`, which gives the
/// lexicographic key ordering prefix scans rely on for free.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: BTreeMap<String, StorageValue>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing is stored. Used by tests to assert the
    /// cleanup-emptiness invariant (spec §8, invariant 2).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<StorageValue> {
        self.entries.get(key).copied()
    }

    fn set(&mut self, key: &str, value: StorageValue) {
        self.entries.insert(key.to_string(), value);
    }

    fn del(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn scan<'a>(&'a self, prefix: &str) -> Box<dyn Iterator<Item = (String, StorageValue)> + 'a> {
        let prefix = prefix.to_string();
        Box::new(
            self.entries
                .range(prefix.clone()..)
                .take_while(move |(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), *v)),
        )
    }
}

/// Join composite key segments with `/`, matching the key layout described
/// throughout spec §4.4/§4.5, e.g. `row/<json(joinKey)>/<json(pk)>`.
pub fn join_segments(segments: &[&str]) -> String {
    segments.join("/")
}

/// JSON-encode a tuple of scalar values for use as (part of) a storage key.
///
/// This gives byte-for-byte equality checks and a lexicographic ordering
/// that's stable for tuples of the same shape, which is all prefix scans
/// need (spec "Storage keys" design note).
pub fn encode_tuple(values: &[serde_json::Value]) -> String {
    serde_json::to_string(values).expect("JSON scalars always serialize")
}
