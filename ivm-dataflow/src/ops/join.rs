//! Join: parent/child correlation over a compound key (spec §4.4).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use ivm_errors::IvmResult;
use ivm_storage::{join_segments, Storage, StorageValue};

use crate::change::Change;
use crate::node::{Node, NodeStream};
use crate::operator::{InputSlot, Link, OutputSlot, WeakLink};
use crate::request::FetchRequest;
use crate::row::Row;
use crate::schema::Schema;
use crate::value::Value;

/// Join wires its parent input at slot 0 and its child input at slot 1
/// (mirroring `readyset-dataflow`'s `on_input(from, ...)`, which tells a
/// multi-ancestor operator which ancestor a push came from).
pub const PARENT_SLOT: InputSlot = 0;
pub const CHILD_SLOT: InputSlot = 1;

fn key_tuple(row: &Row, columns: &[String]) -> String {
    ivm_storage::encode_tuple(
        &row.key_values(columns)
            .iter()
            .map(Value::to_json)
            .collect::<Vec<_>>(),
    )
}

fn decode_tuple(columns: &[String], encoded: &str) -> BTreeMap<String, Value> {
    let values: Vec<serde_json::Value> = serde_json::from_str(encoded).unwrap_or_default();
    columns
        .iter()
        .cloned()
        .zip(values.into_iter().map(Value::from_json))
        .collect()
}

fn key_set_key(parent_key: &str, parent_pk: &str) -> String {
    join_segments(&["pKeySet", parent_key, parent_pk])
}

pub struct Join {
    parent_input: Link,
    child_input: Link,
    parent_key: Vec<String>,
    child_key: Vec<String>,
    relationship: String,
    storage: Rc<RefCell<dyn Storage>>,
    schema: Rc<Schema>,
    output: Option<OutputSlot>,
}

impl Join {
    pub fn new(
        parent_input: Link,
        child_input: Link,
        parent_key: Vec<String>,
        child_key: Vec<String>,
        relationship: impl Into<String>,
        storage: Rc<RefCell<dyn Storage>>,
        schema: Rc<Schema>,
    ) -> Self {
        Join {
            parent_input,
            child_input,
            parent_key,
            child_key,
            relationship: relationship.into(),
            storage,
            schema,
            output: None,
        }
    }

    fn child_constraint(&self, parent: &Row) -> BTreeMap<String, Value> {
        self.parent_key
            .iter()
            .zip(&self.child_key)
            .map(|(pk, ck)| (ck.clone(), parent.get(pk)))
            .collect()
    }

    /// Attach this join's relationship to `parent` without disturbing any
    /// relationships already attached upstream (spec §3: a node carries a
    /// map of simultaneously-attached relationships, not just one).
    fn attach_relationship(&self, parent: Node, cleaning_up: bool) -> Node {
        let child_input = self.child_input.clone();
        let request = FetchRequest::new().with_constraint(self.child_constraint(&parent.row));
        parent.with_relationship(
            self.relationship.clone(),
            Box::new(move || {
                if cleaning_up {
                    child_input.borrow().cleanup(&request)
                } else {
                    child_input.borrow().fetch(&request)
                }
            }),
        )
    }

    fn key_set_entry(&self, parent: &Row) -> String {
        key_set_key(
            &key_tuple(parent, &self.parent_key),
            &key_tuple(parent, &self.schema.primary_key),
        )
    }

    fn record_key_set(&self, parent: &Row) {
        let key = self.key_set_entry(parent);
        self.storage.borrow_mut().set(&key, StorageValue::Bool(true));
    }

    fn forget_key_set(&self, parent: &Row) {
        let key = self.key_set_entry(parent);
        self.storage.borrow_mut().del(&key);
    }

    /// Every parent primary key currently recorded under `parent_key_value`,
    /// i.e. every parent sharing the child row's join key value (spec §4.4
    /// "which parent rows currently exist?").
    fn parents_sharing_key(&self, parent_key_value: &str) -> Vec<BTreeMap<String, Value>> {
        let prefix = join_segments(&["pKeySet", parent_key_value, ""]);
        self.storage
            .borrow()
            .scan(&prefix)
            .map(|(key, _)| decode_tuple(&self.schema.primary_key, &key[prefix.len()..]))
            .collect()
    }

    pub fn fetch(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        let parents: Vec<Node> = self.parent_input.borrow().fetch(request)?.collect();
        let mut nodes = Vec::with_capacity(parents.len());
        for parent in parents {
            self.record_key_set(&parent.row);
            nodes.push(self.attach_relationship(parent, false));
        }
        Ok(Box::new(nodes.into_iter()))
    }

    pub fn cleanup(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        let parents: Vec<Node> = self.parent_input.borrow().cleanup(request)?.collect();
        let mut nodes = Vec::with_capacity(parents.len());
        for parent in parents {
            self.forget_key_set(&parent.row);
            nodes.push(self.attach_relationship(parent, true));
        }
        Ok(Box::new(nodes.into_iter()))
    }

    pub fn push(&mut self, from: InputSlot, change: Change) -> IvmResult<()> {
        match from {
            PARENT_SLOT => self.push_parent(change),
            CHILD_SLOT => self.push_child(change),
            other => Err(ivm_errors::IvmError::invariant(
                "Join",
                format!("push from unknown input slot {other}"),
            )),
        }
    }

    fn push_parent(&mut self, change: Change) -> IvmResult<()> {
        match change {
            Change::Add { node } => {
                self.record_key_set(&node.row);
                let out = self.attach_relationship(node, false);
                self.emit(Change::add(out))
            }
            Change::Remove { node } => {
                self.forget_key_set(&node.row);
                let out = self.attach_relationship(node, true);
                self.emit(Change::remove(out))
            }
            Change::Edit { old_row, row } => {
                self.forget_key_set(&old_row);
                self.record_key_set(&row);
                self.emit(Change::edit(old_row, row))
            }
            // A `child` change for a relationship other than ours, already
            // attached upstream of us on the parent row: pass it through
            // unchanged (spec §4.4 "forward unchanged... relationship name
            // remains stable").
            child @ Change::Child { .. } => self.emit(child),
        }
    }

    fn push_child(&mut self, change: Change) -> IvmResult<()> {
        match change {
            Change::Add { node } => {
                let row = node.row.clone();
                self.notify_parents_of_child(&row, &Change::add(node))
            }
            Change::Remove { node } => {
                let row = node.row.clone();
                self.notify_parents_of_child(&row, &Change::remove(node))
            }
            Change::Edit { old_row, row } => {
                let old_key = key_tuple(&old_row, &self.child_key);
                let new_key = key_tuple(&row, &self.child_key);
                if old_key != new_key {
                    // The edit moved the child to a different join key:
                    // decompose into remove(old) + add(new), each dispatched
                    // independently against the key-set (spec §4.4).
                    self.notify_parents_of_child(&old_row, &Change::remove(Node::leaf(old_row.clone())))?;
                    self.notify_parents_of_child(&row, &Change::add(Node::leaf(row.clone())))
                } else {
                    self.notify_parents_of_child(&row.clone(), &Change::edit(old_row, row))
                }
            }
            nested @ Change::Child { .. } => {
                let row = nested.row().clone();
                self.notify_parents_of_child(&row, &nested)
            }
        }
    }

    /// Look up every parent sharing `child_row`'s join key and emit a
    /// `child` change wrapping `original` for each. A child whose key
    /// matches no recorded parent is silently dropped (spec §4.4 "no parent
    /// to attach to").
    fn notify_parents_of_child(&self, child_row: &Row, original: &Change) -> IvmResult<()> {
        let key_value = key_tuple(child_row, &self.child_key);
        let parent_pks = self.parents_sharing_key(&key_value);
        if parent_pks.is_empty() {
            return Ok(());
        }
        for pk_constraint in parent_pks {
            let mut parents = self
                .parent_input
                .borrow()
                .fetch(&FetchRequest::new().with_constraint(pk_constraint))?;
            if let Some(parent) = parents.next() {
                self.emit(Change::child(
                    parent.row,
                    self.relationship.clone(),
                    original.shallow_clone(),
                ))?;
            }
            for leftover in parents {
                leftover.drain()?;
            }
        }
        Ok(())
    }

    fn emit(&self, change: Change) -> IvmResult<()> {
        if let Some(output) = &self.output {
            output.push(change)?;
        }
        Ok(())
    }

    pub fn get_schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    pub fn set_output(&mut self, output: WeakLink, at: InputSlot) {
        self.output = Some(OutputSlot::new(output, at));
    }

    pub fn destroy(&mut self) -> IvmResult<()> {
        self.child_input.borrow_mut().destroy()?;
        self.parent_input.borrow_mut().destroy()
    }
}
