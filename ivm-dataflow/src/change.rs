//! Changes: the unit of push notification (spec §3 "Change", §4 per-operator
//! push rules).

use ivm_errors::IvmResult;

use crate::node::Node;
use crate::row::Row;

/// A single change pushed downstream by an operator. `Child` nests a change
/// that occurred within a named relationship of `row`, so a join's parent
/// can be notified without the parent row itself changing.
#[derive(Debug)]
pub enum Change {
    Add { node: Node },
    Remove { node: Node },
    Edit { old_row: Row, row: Row },
    Child {
        row: Row,
        relationship: String,
        change: Box<Change>,
    },
}

impl Change {
    pub fn add(node: Node) -> Self {
        Change::Add { node }
    }

    pub fn remove(node: Node) -> Self {
        Change::Remove { node }
    }

    pub fn edit(old_row: Row, row: Row) -> Self {
        Change::Edit { old_row, row }
    }

    pub fn child(row: Row, relationship: impl Into<String>, change: Change) -> Self {
        Change::Child {
            row,
            relationship: relationship.into(),
            change: Box::new(change),
        }
    }

    /// The row at the root of this change, following `Child` wrappers down
    /// to the nearest `Add`/`Remove`/`Edit`.
    pub fn row(&self) -> &Row {
        match self {
            Change::Add { node } => &node.row,
            Change::Remove { node } => &node.row,
            Change::Edit { row, .. } => row,
            Change::Child { row, .. } => row,
        }
    }

    /// True for changes that add a new row to the result set.
    pub fn is_add(&self) -> bool {
        matches!(self, Change::Add { .. })
    }

    /// True for changes that remove a row from the result set.
    pub fn is_remove(&self) -> bool {
        matches!(self, Change::Remove { .. })
    }

    /// A row-only copy of this change. `Node`'s relationship factories are
    /// `FnOnce`, so a `Change` can't be cloned verbatim; FanOut needs an
    /// independent copy per branch, so it rebuilds each branch's `Node` as
    /// a relationship-free leaf from the row alone. This is sound because
    /// FanOut only ever sits over plain predicate disjunction (spec §4.3,
    /// scenario S5): the branches are filters re-evaluating the same row,
    /// not consumers of relationships the original `Node` carried.
    /// Produce `count` independent copies of this change, each carrying its
    /// own full relationship data (unlike [`shallow_clone`](Self::shallow_clone),
    /// which drops it). Delegates to [`Node::replay`] for the `Add`/`Remove`
    /// cases, where the relationship factories actually live.
    pub fn replay(self, count: usize) -> IvmResult<Vec<Change>> {
        match self {
            Change::Add { node } => Ok(node.replay(count)?.into_iter().map(Change::add).collect()),
            Change::Remove { node } => {
                Ok(node.replay(count)?.into_iter().map(Change::remove).collect())
            }
            Change::Edit { old_row, row } => {
                Ok((0..count).map(|_| Change::edit(old_row.clone(), row.clone())).collect())
            }
            Change::Child {
                row,
                relationship,
                change,
            } => Ok(change
                .replay(count)?
                .into_iter()
                .map(|c| Change::child(row.clone(), relationship.clone(), c))
                .collect()),
        }
    }

    pub fn shallow_clone(&self) -> Change {
        match self {
            Change::Add { node } => Change::add(Node::leaf(node.row.clone())),
            Change::Remove { node } => Change::remove(Node::leaf(node.row.clone())),
            Change::Edit { old_row, row } => Change::edit(old_row.clone(), row.clone()),
            Change::Child {
                row,
                relationship,
                change,
            } => Change::child(row.clone(), relationship.clone(), change.shallow_clone()),
        }
    }
}
