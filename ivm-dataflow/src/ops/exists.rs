//! Exists / NotExists: filter parents by non-emptiness of a relationship,
//! maintaining a per-parent size cache (spec §4.5).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ivm_errors::{IvmError, IvmResult};
use ivm_storage::{join_segments, Storage, StorageValue};

use crate::change::Change;
use crate::node::{Node, NodeStream};
use crate::operator::{InputSlot, Link, OutputSlot, WeakLink};
use crate::request::FetchRequest;
use crate::row::Row;
use crate::schema::Schema;
use crate::value::Value;

fn key_tuple(row: &Row, columns: &[String]) -> String {
    ivm_storage::encode_tuple(
        &row.key_values(columns)
            .iter()
            .map(Value::to_json)
            .collect::<Vec<_>>(),
    )
}

fn drain_change(change: Change) -> IvmResult<()> {
    match change {
        Change::Add { node } | Change::Remove { node } => node.drain(),
        Change::Child { change, .. } => drain_change(*change),
        Change::Edit { .. } => Ok(()),
    }
}

/// One input, parents filtered by a named relationship's emptiness.
/// `parent_key` is the column set the relationship is grouped by — the same
/// columns Join used as its parent key — and lets the size cache be reused
/// across parents that share a join key (many-to-one relationships); when
/// it's empty the cache degenerates to one entry per parent.
pub struct Exists {
    input: Link,
    relationship: String,
    negate: bool,
    parent_key: Vec<String>,
    storage: Rc<RefCell<dyn Storage>>,
    schema: Rc<Schema>,
    output: Option<OutputSlot>,
    in_push: Cell<bool>,
}

impl Exists {
    pub fn new(
        input: Link,
        relationship: impl Into<String>,
        negate: bool,
        parent_key: Vec<String>,
        storage: Rc<RefCell<dyn Storage>>,
        schema: Rc<Schema>,
    ) -> Self {
        Exists {
            input,
            relationship: relationship.into(),
            negate,
            parent_key,
            storage,
            schema,
            output: None,
            in_push: Cell::new(false),
        }
    }

    fn join_key_of(&self, row: &Row) -> String {
        if self.parent_key.is_empty() {
            String::new()
        } else {
            key_tuple(row, &self.parent_key)
        }
    }

    fn full_key(&self, row: &Row) -> String {
        join_segments(&[
            "row",
            &self.join_key_of(row),
            &key_tuple(row, &self.schema.primary_key),
        ])
    }

    fn prefix_key(&self, row: &Row) -> String {
        join_segments(&["row", &self.join_key_of(row), ""])
    }

    fn passes(&self, size: i64) -> bool {
        (size > 0) != self.negate
    }

    fn cached_size(&self, row: &Row) -> i64 {
        self.storage
            .borrow()
            .get(&self.full_key(row))
            .and_then(|v| v.as_int())
            .unwrap_or(0)
    }

    /// Count a node's relationship, buffering it into a fresh one-shot
    /// stream so the returned node still exposes it to a downstream
    /// consumer (the count itself consumes the original lazy sequence).
    fn count_relationship(&self, mut node: Node) -> IvmResult<(Node, i64)> {
        match node.take_relationship(&self.relationship) {
            Some(stream) => {
                let children: Vec<Node> = stream?.collect();
                let count = children.len() as i64;
                let relationship = self.relationship.clone();
                let node = node.with_relationship(
                    relationship,
                    Box::new(move || Ok(Box::new(children.into_iter()) as NodeStream)),
                );
                Ok((node, count))
            }
            None => Ok((node, 0)),
        }
    }

    /// Resolve a node's relationship size per spec §4.5: exact cache hit,
    /// then (outside push processing) prefix reuse, then enumerate and
    /// cache. Always writes the full-key cache before returning.
    fn resolve_size(&self, node: Node) -> IvmResult<(Node, i64)> {
        let full_key = self.full_key(&node.row);
        if let Some(cached) = self.storage.borrow().get(&full_key) {
            return Ok((node, cached.as_int().unwrap_or(0)));
        }
        if !self.in_push.get() {
            let prefix = self.prefix_key(&node.row);
            let reused = self.storage.borrow().scan(&prefix).next();
            if let Some((_, value)) = reused {
                self.storage.borrow_mut().set(&full_key, value);
                return Ok((node, value.as_int().unwrap_or(0)));
            }
        }
        let (node, count) = self.count_relationship(node)?;
        self.storage
            .borrow_mut()
            .set(&full_key, StorageValue::Int(count));
        Ok((node, count))
    }

    /// Fetch the single node for `row` by primary key, for push paths
    /// (`Edit`, unknown-size child adds) whose `Change` doesn't carry a
    /// `Node` of its own.
    fn fetch_one(&self, row: &Row) -> IvmResult<Option<Node>> {
        let constraint = self
            .schema
            .primary_key
            .iter()
            .cloned()
            .zip(row.key_values(&self.schema.primary_key))
            .collect();
        let mut nodes = self
            .input
            .borrow()
            .fetch(&FetchRequest::new().with_constraint(constraint))?;
        let first = nodes.next();
        for leftover in nodes {
            leftover.drain()?;
        }
        Ok(first)
    }

    pub fn fetch(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        self.traverse(request, false)
    }

    pub fn cleanup(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        self.traverse(request, true)
    }

    fn traverse(&self, request: &FetchRequest, cleaning_up: bool) -> IvmResult<NodeStream> {
        let nodes: Vec<Node> = if cleaning_up {
            self.input.borrow().cleanup(request)?.collect()
        } else {
            self.input.borrow().fetch(request)?.collect()
        };
        let mut kept = Vec::with_capacity(nodes.len());
        for node in nodes {
            let full_key = self.full_key(&node.row);
            let (node, size) = self.resolve_size(node)?;
            if cleaning_up {
                self.storage.borrow_mut().del(&full_key);
            }
            if self.passes(size) {
                kept.push(node);
            } else {
                node.drain()?;
            }
        }
        Ok(Box::new(kept.into_iter()))
    }

    pub fn push(&mut self, _from: InputSlot, change: Change) -> IvmResult<()> {
        self.in_push.set(true);
        let result = self.handle_push(change);
        self.in_push.set(false);
        result
    }

    fn handle_push(&mut self, change: Change) -> IvmResult<()> {
        match change {
            Change::Add { node } => self.push_parent_add(node),
            Change::Remove { node } => self.push_parent_remove(node),
            Change::Edit { old_row, row } => self.push_parent_edit(old_row, row),
            Change::Child {
                row,
                relationship,
                change,
            } => {
                if relationship == self.relationship {
                    match *change {
                        Change::Add { node } => self.on_child_added(row, node),
                        Change::Remove { node } => self.on_child_removed(row, node),
                        other => self.forward_if_passes(Change::child(row, relationship, other)),
                    }
                } else {
                    self.forward_if_passes(Change::child(row, relationship, *change))
                }
            }
        }
    }

    fn push_parent_add(&mut self, node: Node) -> IvmResult<()> {
        let (node, size) = self.resolve_size(node)?;
        if self.passes(size) {
            self.emit(Change::add(node))
        } else {
            node.drain()
        }
    }

    fn push_parent_remove(&mut self, node: Node) -> IvmResult<()> {
        let full_key = self.full_key(&node.row);
        let size = self.cached_size(&node.row);
        self.storage.borrow_mut().del(&full_key);
        if self.passes(size) {
            self.emit(Change::remove(node))
        } else {
            node.drain()
        }
    }

    fn push_parent_edit(&mut self, old_row: Row, row: Row) -> IvmResult<()> {
        let size = match self.fetch_one(&row)? {
            Some(node) => {
                let (node, size) = self.resolve_size(node)?;
                node.drain()?;
                size
            }
            None => 0,
        };
        if self.passes(size) {
            self.emit(Change::edit(old_row, row))
        } else {
            Ok(())
        }
    }

    fn forward_if_passes(&self, change: Change) -> IvmResult<()> {
        let size = self.cached_size(change.row());
        if self.passes(size) {
            self.emit(change)
        } else {
            drain_change(change)
        }
    }

    fn on_child_added(&mut self, parent_row: Row, child_node: Node) -> IvmResult<()> {
        let full_key = self.full_key(&parent_row);
        let current = match self.storage.borrow().get(&full_key) {
            Some(v) => v.as_int().unwrap_or(0),
            None => match self.fetch_one(&parent_row)? {
                Some(node) => {
                    let (node, size) = self.resolve_size(node)?;
                    node.drain()?;
                    size
                }
                None => 0,
            },
        };
        let new_size = current + 1;
        self.storage
            .borrow_mut()
            .set(&full_key, StorageValue::Int(new_size));
        if new_size != 1 {
            return self.forward_if_passes(Change::child(
                parent_row,
                self.relationship.clone(),
                Change::add(child_node),
            ));
        }
        if self.negate {
            // The relationship was empty and just gained a child: NOT
            // EXISTS now fails. The added child must not appear in the
            // parent's output, so the remove carries an empty relationship.
            child_node.drain()?;
            let relationship = self.relationship.clone();
            let removed = Node::leaf(parent_row).with_relationship(
                relationship,
                Box::new(|| Ok(Box::new(std::iter::empty()) as NodeStream)),
            );
            self.emit(Change::remove(removed))
        } else {
            let relationship = self.relationship.clone();
            let added = Node::leaf(parent_row).with_relationship(
                relationship,
                Box::new(move || Ok(Box::new(std::iter::once(child_node)) as NodeStream)),
            );
            self.emit(Change::add(added))
        }
    }

    fn on_child_removed(&mut self, parent_row: Row, child_node: Node) -> IvmResult<()> {
        let full_key = self.full_key(&parent_row);
        let current = self.cached_size(&parent_row);
        let new_size = self.decrement_clamped(current);
        self.storage
            .borrow_mut()
            .set(&full_key, StorageValue::Int(new_size));
        if new_size != 0 {
            return self.forward_if_passes(Change::child(
                parent_row,
                self.relationship.clone(),
                Change::remove(child_node),
            ));
        }
        if self.negate {
            child_node.drain()?;
            let relationship = self.relationship.clone();
            let added = Node::leaf(parent_row).with_relationship(
                relationship,
                Box::new(|| Ok(Box::new(std::iter::empty()) as NodeStream)),
            );
            self.emit(Change::add(added))
        } else {
            let relationship = self.relationship.clone();
            let removed = Node::leaf(parent_row).with_relationship(
                relationship,
                Box::new(move || Ok(Box::new(std::iter::once(child_node)) as NodeStream)),
            );
            self.emit(Change::remove(removed))
        }
    }

    /// The one tolerated error kind (spec §7 `storageCorruption`): a size
    /// cache found at zero when a removal should decrement it. Clamp and
    /// warn instead of propagating.
    fn decrement_clamped(&self, current: i64) -> i64 {
        if current <= 0 {
            let err = IvmError::storage_corruption(
                "Exists",
                format!(
                    "relationship '{}' size cache would go negative (current {current})",
                    self.relationship
                ),
            );
            debug_assert!(err.is_tolerated());
            tracing::warn!(error = %err, "clamping Exists size cache to zero");
            0
        } else {
            current - 1
        }
    }

    fn emit(&self, change: Change) -> IvmResult<()> {
        if let Some(output) = &self.output {
            output.push(change)?;
        }
        Ok(())
    }

    pub fn get_schema(&self) -> Rc<Schema> {
        self.input.borrow().get_schema()
    }

    pub fn set_output(&mut self, output: WeakLink, at: InputSlot) {
        self.output = Some(OutputSlot::new(output, at));
    }

    pub fn destroy(&mut self) -> IvmResult<()> {
        self.input.borrow_mut().destroy()
    }
}
