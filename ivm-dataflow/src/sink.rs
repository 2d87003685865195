//! Sinks: the terminal consumers of a root operator's `fetch` result and
//! `push` stream (spec §2 "Misc.", §6 "View output").

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use ivm_errors::IvmResult;

use crate::change::Change;
use crate::node::{Node, NodeStream};
use crate::operator::{InputSlot, WeakLink};
use crate::request::FetchRequest;
use crate::row::Row;
use crate::schema::Schema;

/// A materialized row: the row itself plus the named relationships
/// materialized from its `Node`, recursively. Built once from a `Node` and
/// kept updated in place as pushes arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRow {
    pub row: Row,
    pub relationships: BTreeMap<String, Vec<MaterializedRow>>,
}

impl MaterializedRow {
    fn from_node(mut node: Node) -> IvmResult<Self> {
        let mut relationships = BTreeMap::new();
        let names: Vec<String> = node.relationship_names().map(str::to_string).collect();
        for name in names {
            let stream = node
                .take_relationship(&name)
                .expect("name came from relationship_names")?;
            let mut children = Vec::new();
            for child in stream {
                children.push(MaterializedRow::from_node(child)?);
            }
            relationships.insert(name, children);
        }
        Ok(MaterializedRow {
            row: node.row,
            relationships,
        })
    }
}

/// Collapses a root operator's output into an ordered, primary-key-indexed
/// array, applying pushes to keep it in sync (spec §6 "View output"). A
/// reference count per row tracks how many upstream branches currently
/// produce it — relevant once a FanIn sits just below the sink, since a row
/// surviving on one branch after another branch's `remove` must stay
/// visible until every branch has removed it.
pub struct ArrayView {
    primary_key: Vec<String>,
    rows: Vec<MaterializedRow>,
    ref_counts: BTreeMap<String, usize>,
}

impl ArrayView {
    pub fn new(primary_key: Vec<String>) -> Self {
        ArrayView {
            primary_key,
            rows: Vec::new(),
            ref_counts: BTreeMap::new(),
        }
    }

    /// Replace the current contents with a fresh `fetch` result, in order.
    pub fn load(&mut self, nodes: impl IntoIterator<Item = Node>) -> IvmResult<()> {
        self.rows.clear();
        self.ref_counts.clear();
        for node in nodes {
            let key = self.key_of(&node.row);
            *self.ref_counts.entry(key).or_insert(0) += 1;
            self.rows.push(MaterializedRow::from_node(node)?);
        }
        Ok(())
    }

    pub fn rows(&self) -> &[MaterializedRow] {
        &self.rows
    }

    fn key_of(&self, row: &Row) -> String {
        ivm_storage::encode_tuple(
            &row.key_values(&self.primary_key)
                .iter()
                .map(crate::value::Value::to_json)
                .collect::<Vec<_>>(),
        )
    }

    fn position(&self, row: &Row) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.row.matches_key(row, &self.primary_key))
    }

    /// Apply one change to the materialized array (spec §6, reference-count
    /// tag distinguishing identical rows produced by different branches).
    pub fn apply(&mut self, change: Change) -> IvmResult<()> {
        match change {
            Change::Add { node } => {
                let key = self.key_of(&node.row);
                let count = self.ref_counts.entry(key).or_insert(0);
                *count += 1;
                if *count == 1 {
                    self.rows.push(MaterializedRow::from_node(node)?);
                } else {
                    node.drain()?;
                }
                Ok(())
            }
            Change::Remove { node } => {
                let key = self.key_of(&node.row);
                let remaining = self.ref_counts.get_mut(&key).map(|c| {
                    *c = c.saturating_sub(1);
                    *c
                });
                let pos = self.position(&node.row);
                node.drain()?;
                if remaining == Some(0) {
                    self.ref_counts.remove(&key);
                    if let Some(pos) = pos {
                        self.rows.remove(pos);
                    }
                }
                Ok(())
            }
            Change::Edit { old_row, row } => {
                if let Some(pos) = self.position(&old_row) {
                    self.rows[pos].row = row;
                }
                Ok(())
            }
            Change::Child {
                row,
                relationship,
                change,
            } => self.apply_child(&row, &relationship, *change),
        }
    }

    fn apply_child(&mut self, parent: &Row, relationship: &str, change: Change) -> IvmResult<()> {
        let Some(pos) = self.position(parent) else {
            return drain_unattached(change);
        };
        let children = self.rows[pos]
            .relationships
            .entry(relationship.to_string())
            .or_default();
        match change {
            Change::Add { node } => children.push(MaterializedRow::from_node(node)?),
            Change::Remove { node } => {
                children.retain(|c| !c.row.matches_key(&node.row, &self.primary_key));
                node.drain()?;
            }
            Change::Edit { old_row, row } => {
                if let Some(child) = children
                    .iter_mut()
                    .find(|c| c.row.matches_key(&old_row, &self.primary_key))
                {
                    child.row = row;
                }
            }
            nested @ Change::Child { .. } => {
                // Nested relationships under a relationship aren't exercised
                // by this spec's scenarios; drain rather than silently drop
                // any Node payload it carries.
                drain_unattached(nested)?;
            }
        }
        Ok(())
    }
}

fn drain_unattached(change: Change) -> IvmResult<()> {
    match change {
        Change::Add { node } | Change::Remove { node } => node.drain(),
        Change::Child { change, .. } => drain_unattached(*change),
        Change::Edit { .. } => Ok(()),
    }
}

/// A test-only sink that records every change it receives verbatim, used by
/// scenario tests to assert on the exact change sequence a root operator
/// emits rather than only the final materialized state (spec §2 "Catch
/// harness"). Wired into the graph like any other [`Operator`](crate::operator::Operator)
/// variant, so a test can `set_output` a Join/Exists/FanIn straight at it —
/// it just never has anything fetched through it, since nothing sits
/// downstream of a sink.
pub struct Catch {
    schema: Rc<Schema>,
    received: RefCell<Vec<Change>>,
}

impl Catch {
    pub fn new(schema: Rc<Schema>) -> Self {
        Catch {
            schema,
            received: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, _from: InputSlot, change: Change) -> IvmResult<()> {
        self.received.borrow_mut().push(change);
        Ok(())
    }

    pub fn take(&self) -> Vec<Change> {
        std::mem::take(&mut *self.received.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.received.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.borrow().is_empty()
    }

    pub fn fetch(&self, _request: &FetchRequest) -> IvmResult<NodeStream> {
        Ok(Box::new(std::iter::empty()))
    }

    pub fn cleanup(&self, _request: &FetchRequest) -> IvmResult<NodeStream> {
        Ok(Box::new(std::iter::empty()))
    }

    pub fn get_schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    pub fn set_output(&mut self, _output: WeakLink, _at: InputSlot) {}

    pub fn destroy(&mut self) -> IvmResult<()> {
        Ok(())
    }
}
