//! Nodes: a row plus its lazy child-relationship streams (spec §3 "Node",
//! §9 design note "Node relationships").

use std::collections::HashMap;

use ivm_errors::IvmResult;

use crate::row::Row;

/// A lazily-produced, single-shot sequence of [`Node`]s.
pub type NodeStream = Box<dyn Iterator<Item = Node>>;

/// A thunk that, when called, produces the children of a relationship. Each
/// factory may be called at most once — calling it borrows from (and may
/// mutate) the producing operator's state, so a second call would observe a
/// state the first call already advanced past. In a GC'd host language the
/// factory would close over the producing operator directly; here it closes
/// over an
/// `Rc<RefCell<Operator>>` so there's no borrow-checker lifetime to thread
/// through `Node`. Fallible because materializing it means issuing a fresh
/// fetch against the child input, which can fail the same way any other
/// fetch can (e.g. a type mismatch during ordering comparison).
pub type RelationshipFactory = Box<dyn FnOnce() -> IvmResult<NodeStream>>;

/// A row together with a mapping from relationship name to a lazy sequence
/// of child nodes.
pub struct Node {
    pub row: Row,
    relationships: HashMap<String, RelationshipFactory>,
}

impl Node {
    /// A node with no relationships (a leaf row, or a row whose
    /// relationships the caller doesn't care about).
    pub fn leaf(row: Row) -> Self {
        Node {
            row,
            relationships: HashMap::new(),
        }
    }

    pub fn with_relationship(
        mut self,
        name: impl Into<String>,
        factory: RelationshipFactory,
    ) -> Self {
        self.relationships.insert(name.into(), factory);
        self
    }

    /// Take and consume a single relationship's stream. Returns `None` if
    /// there is no relationship by that name, or it has already been taken.
    pub fn take_relationship(&mut self, name: &str) -> Option<IvmResult<NodeStream>> {
        self.relationships.remove(name).map(|factory| factory())
    }

    pub fn relationship_names(&self) -> impl Iterator<Item = &str> {
        self.relationships.keys().map(|s| s.as_str())
    }

    /// Fully iterate (and discard) every relationship stream that hasn't
    /// already been taken, releasing any iterator state it held. `cleanup`
    /// always drains (spec §5 "Lazy sequences").
    pub fn drain(self) -> IvmResult<()> {
        let Node { relationships, .. } = self;
        for (_, factory) in relationships {
            for child in factory()? {
                child.drain()?;
            }
        }
        Ok(())
    }

    /// Produce `count` independent copies of this node, each with its own
    /// fresh, once-callable relationship factories. Every relationship's
    /// underlying stream is resolved exactly once here (its `FnOnce`
    /// factory is consumed), then redistributed so each copy gets its own
    /// children, recursively replayed the same way. Used where a single
    /// upstream node must reach several downstream consumers that each
    /// need to read its relationships independently (a broadcast point,
    /// not a simple row fan-out).
    ///
    /// `count == 0` drains the node instead of producing copies — nobody
    /// downstream is going to read it.
    pub fn replay(self, count: usize) -> IvmResult<Vec<Node>> {
        let Node { row, relationships } = self;
        if count == 0 {
            for (_, factory) in relationships {
                for child in factory()? {
                    child.drain()?;
                }
            }
            return Ok(Vec::new());
        }
        let mut per_copy: Vec<HashMap<String, RelationshipFactory>> =
            (0..count).map(|_| HashMap::new()).collect();
        for (name, factory) in relationships {
            let children: Vec<Node> = factory()?.collect();
            let mut per_copy_children: Vec<Vec<Node>> =
                (0..count).map(|_| Vec::with_capacity(children.len())).collect();
            for child in children {
                for (i, copy) in child.replay(count)?.into_iter().enumerate() {
                    per_copy_children[i].push(copy);
                }
            }
            for (i, children_for_copy) in per_copy_children.into_iter().enumerate() {
                per_copy[i].insert(
                    name.clone(),
                    Box::new(move || Ok(Box::new(children_for_copy.into_iter()) as NodeStream))
                        as RelationshipFactory,
                );
            }
        }
        Ok(per_copy
            .into_iter()
            .map(|relationships| Node {
                row: row.clone(),
                relationships,
            })
            .collect())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("row", &self.row)
            .field(
                "relationships",
                &self.relationships.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(id: &str) -> Row {
        Row::new([("id".to_string(), Value::from(id))])
    }

    #[test]
    fn take_relationship_consumes_it_once() {
        let mut node = Node::leaf(row("i1")).with_relationship(
            "comments",
            Box::new(|| Ok(Box::new(std::iter::once(Node::leaf(row("c1")))) as NodeStream)),
        );
        assert!(node.take_relationship("comments").is_some());
        assert!(node.take_relationship("comments").is_none());
    }

    #[test]
    fn drain_consumes_unread_relationships() {
        let node = Node::leaf(row("i1")).with_relationship(
            "comments",
            Box::new(|| Ok(Box::new(std::iter::once(Node::leaf(row("c1")))) as NodeStream)),
        );
        node.drain().unwrap();
    }
}
