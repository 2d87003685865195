//! FanIn: the merging half of disjunction (spec §4.3).

use std::rc::Rc;

use ivm_errors::IvmResult;

use crate::change::Change;
use crate::node::{Node, NodeStream};
use crate::operator::{ChangeKind, InputSlot, Link, OutputSlot, WeakLink};
use crate::request::FetchRequest;
use crate::row::Row;
use crate::schema::Schema;

/// N inputs that all descend from the same FanOut. `fetch`/`cleanup`
/// concatenate and deduplicate by primary key; `push` accumulates one
/// derived change per branch into [`Self::pending`] until the originating
/// FanOut reports the broadcast finished, then collapses them by the
/// upstream change's type (spec §4.3 merge table) and forwards one change.
pub struct FanIn {
    inputs: Vec<Link>,
    primary_key: Vec<String>,
    pending: Vec<Change>,
    output: Option<OutputSlot>,
}

impl FanIn {
    pub fn new(inputs: Vec<Link>, primary_key: Vec<String>) -> Self {
        FanIn {
            inputs,
            primary_key,
            pending: Vec::new(),
            output: None,
        }
    }

    pub fn fetch(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        self.merge_streams(request, |input, request| input.borrow().fetch(request))
    }

    pub fn cleanup(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        self.merge_streams(request, |input, request| input.borrow().cleanup(request))
    }

    fn merge_streams(
        &self,
        request: &FetchRequest,
        call: impl Fn(&Link, &FetchRequest) -> IvmResult<NodeStream>,
    ) -> IvmResult<NodeStream> {
        let mut all: Vec<Node> = Vec::new();
        for input in &self.inputs {
            all.extend(call(input, request)?);
        }
        let pk = self.primary_key.clone();
        all.sort_by(|a, b| {
            a.row
                .key_values(&pk)
                .iter()
                .map(|v| serde_json::to_string(&v.to_json()).unwrap_or_default())
                .collect::<Vec<_>>()
                .cmp(
                    &b.row
                        .key_values(&pk)
                        .iter()
                        .map(|v| serde_json::to_string(&v.to_json()).unwrap_or_default())
                        .collect::<Vec<_>>(),
                )
        });
        let mut deduped = Vec::with_capacity(all.len());
        for node in all {
            let is_duplicate = deduped
                .last()
                .map(|prev: &Node| prev.row.matches_key(&node.row, &pk))
                .unwrap_or(false);
            if is_duplicate {
                node.drain()?;
            } else {
                deduped.push(node);
            }
        }
        Ok(Box::new(deduped.into_iter()))
    }

    /// Called by the FanOut that broadcast to us once every branch has
    /// received its copy of the upstream change. Collapses whatever
    /// accumulated in `pending` and forwards a single change.
    pub fn broadcast_finished(&mut self, kind: ChangeKind) -> IvmResult<()> {
        let pushes = std::mem::take(&mut self.pending);
        if let Some(merged) = merge_pushes(kind, pushes)? {
            self.emit(merged)?;
        }
        Ok(())
    }

    pub fn push(&mut self, _from: InputSlot, change: Change) -> IvmResult<()> {
        self.pending.push(change);
        Ok(())
    }

    fn emit(&self, change: Change) -> IvmResult<()> {
        if let Some(output) = &self.output {
            output.push(change)?;
        }
        Ok(())
    }

    pub fn get_schema(&self) -> Rc<Schema> {
        self.inputs[0].borrow().get_schema()
    }

    pub fn set_output(&mut self, output: WeakLink, at: InputSlot) {
        self.output = Some(OutputSlot::new(output, at));
    }

    pub fn destroy(&mut self) -> IvmResult<()> {
        for input in &self.inputs {
            input.borrow_mut().destroy()?;
        }
        Ok(())
    }
}

/// Branches that agree on the row but disagree on relationship contents
/// (spec: "merged relationships when branches disagree only in child
/// relationships") keep the first branch's relationship set; the rest are
/// drained. Ordinary `OR`/`AND` disjunction produces relationship-free
/// leaves from every branch, so in practice there is nothing to reconcile.
fn merge_nodes(nodes: Vec<Node>) -> IvmResult<Node> {
    let mut iter = nodes.into_iter();
    let merged = iter.next().expect("merge_nodes called with no nodes");
    for extra in iter {
        extra.drain()?;
    }
    Ok(merged)
}

fn merge_pushes(kind: ChangeKind, pushes: Vec<Change>) -> IvmResult<Option<Change>> {
    if pushes.is_empty() {
        return Ok(None);
    }
    if pushes.len() == 1 {
        return Ok(pushes.into_iter().next());
    }
    Ok(match kind {
        ChangeKind::Add => {
            let row = pushes[0].row().clone();
            let nodes = pushes
                .into_iter()
                .filter_map(as_add_node)
                .collect::<Vec<_>>();
            Some(Change::add(merge_nodes_or_leaf(nodes, row)?))
        }
        ChangeKind::Remove => {
            let row = pushes[0].row().clone();
            let nodes = pushes
                .into_iter()
                .filter_map(as_remove_node)
                .collect::<Vec<_>>();
            Some(Change::remove(merge_nodes_or_leaf(nodes, row)?))
        }
        ChangeKind::Edit => {
            if let Some(edit) = pushes.iter().find(|c| matches!(c, Change::Edit { .. })) {
                Some(clone_edit(edit))
            } else {
                let add = pushes.iter().find_map(as_add_row);
                let remove = pushes.iter().find_map(as_remove_row);
                match (remove, add) {
                    (Some(old_row), Some(row)) => Some(Change::edit(old_row, row)),
                    _ => pushes.into_iter().next(),
                }
            }
        }
        ChangeKind::Child => {
            if let Some(child) = pushes.iter().find(|c| matches!(c, Change::Child { .. })) {
                Some(clone_child(child))
            } else if let Some(edit) = pushes.iter().find(|c| matches!(c, Change::Edit { .. })) {
                Some(clone_edit(edit))
            } else {
                let add = pushes.iter().find_map(as_add_row);
                let remove = pushes.iter().find_map(as_remove_row);
                match (remove, add) {
                    (Some(old_row), Some(row)) => Some(Change::edit(old_row, row)),
                    _ => pushes.into_iter().next(),
                }
            }
        }
    })
}

fn merge_nodes_or_leaf(nodes: Vec<Node>, row: Row) -> IvmResult<Node> {
    if nodes.is_empty() {
        Ok(Node::leaf(row))
    } else {
        merge_nodes(nodes)
    }
}

fn as_add_node(change: Change) -> Option<Node> {
    match change {
        Change::Add { node } => Some(node),
        _ => None,
    }
}

fn as_remove_node(change: Change) -> Option<Node> {
    match change {
        Change::Remove { node } => Some(node),
        _ => None,
    }
}

fn as_add_row(change: &Change) -> Option<Row> {
    match change {
        Change::Add { node } => Some(node.row.clone()),
        _ => None,
    }
}

fn as_remove_row(change: &Change) -> Option<Row> {
    match change {
        Change::Remove { node } => Some(node.row.clone()),
        _ => None,
    }
}

fn clone_edit(change: &Change) -> Change {
    match change {
        Change::Edit { old_row, row } => Change::edit(old_row.clone(), row.clone()),
        other => other.shallow_clone(),
    }
}

fn clone_child(change: &Change) -> Change {
    match change {
        Change::Child {
            row,
            relationship,
            change,
        } => Change::child(row.clone(), relationship.clone(), change.shallow_clone()),
        other => other.shallow_clone(),
    }
}
