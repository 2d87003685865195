//! Source and Connection (spec §4.1).
//!
//! Grounded on `readyset-dataflow`'s base-table handling (`ops/mod.rs`
//! `MockGraph::add_base`): a table's row set lives in one shared place and
//! every downstream view is a thin cursor over it. Here the shared place is
//! [`SourceInner`] and the cursor is [`Connection`].

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use ivm_errors::{IvmError, IvmResult};

use crate::change::Change;
use crate::node::{Node, NodeStream};
use crate::operator::{InputSlot, WeakLink};
use crate::request::{FetchRequest, StartBasis};
use crate::row::Row;
use crate::schema::Schema;
use crate::value::compare_values;

/// Compare two rows by an ordering key, column by column, applying each
/// column's direction. Shared between sorting a connection's full result set
/// and seeking to a `FetchRequest::start` position within it.
fn compare_row(
    ordering: &[crate::schema::OrderColumn],
    a: &Row,
    b: &Row,
) -> IvmResult<Ordering> {
    for order in ordering {
        let cmp = compare_values("Source", &a.get(&order.column), &b.get(&order.column))?;
        let cmp = match order.direction {
            crate::schema::Direction::Asc => cmp,
            crate::schema::Direction::Desc => cmp.reverse(),
        };
        if cmp != Ordering::Equal {
            return Ok(cmp);
        }
    }
    Ok(Ordering::Equal)
}

fn pk_of(row: &Row, primary_key: &[String]) -> String {
    ivm_storage::encode_tuple(
        &row.key_values(primary_key)
            .iter()
            .map(|v| v.to_json())
            .collect::<Vec<_>>(),
    )
}

/// A single table's row set. Mutated only through [`SourceInner::apply`],
/// which commits the change and notifies every live connection before
/// returning — so a re-entrant `fetch` issued by a downstream operator
/// during that notification already observes the post-change state (spec
/// §4.1 "Overlay"; §5 "Overlays and re-entrancy"). There's no separate
/// overlay record to install and tear down: because the row set is a plain
/// in-memory map mutated synchronously, committing before notifying gives
/// the same externally observable ordering the overlay design note
/// describes, without the bookkeeping (see `DESIGN.md`).
pub struct SourceInner {
    pub schema: Rc<Schema>,
    rows: BTreeMap<String, Row>,
    connections: Vec<(WeakLink, InputSlot)>,
}

impl SourceInner {
    pub fn new(schema: Rc<Schema>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(SourceInner {
            schema,
            rows: BTreeMap::new(),
            connections: Vec::new(),
        }))
    }

    pub fn register_connection(&mut self, output: WeakLink, at: InputSlot) {
        self.connections.push((output, at));
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Apply an `add`/`remove`/`edit` mutation and notify every connection
    /// in the order they were created (spec §5 "Ordering guarantees").
    pub fn apply(this: &Rc<RefCell<Self>>, change: SourceMutation) -> IvmResult<()> {
        let notifications = {
            let mut inner = this.borrow_mut();
            inner.commit(change)?
        };
        let connections = this.borrow().connections.clone();
        for (output, at) in connections {
            if let Some(link) = output.upgrade() {
                for notification in &notifications {
                    link.borrow_mut().push(at, notification.shallow_clone())?;
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, change: SourceMutation) -> IvmResult<Vec<Change>> {
        let pk = &self.schema.primary_key;
        match change {
            SourceMutation::Add(row) => {
                let key = pk_of(&row, pk);
                if self.rows.contains_key(&key) {
                    return Err(IvmError::invariant(
                        "Source",
                        format!("add of row already present under primary key {key}"),
                    ));
                }
                self.rows.insert(key.clone(), row.clone());
                tracing::debug!(source = %self.schema.table_name, key, "add");
                Ok(vec![Change::add(Node::leaf(row))])
            }
            SourceMutation::Remove(row) => {
                let key = pk_of(&row, pk);
                if self.rows.remove(&key).is_none() {
                    return Err(IvmError::invariant(
                        "Source",
                        format!("remove of row absent under primary key {key}"),
                    ));
                }
                tracing::debug!(source = %self.schema.table_name, key, "remove");
                Ok(vec![Change::remove(Node::leaf(row))])
            }
            SourceMutation::Edit { old_row, row } => {
                let old_key = pk_of(&old_row, pk);
                let new_key = pk_of(&row, pk);
                if old_key != new_key {
                    self.rows.remove(&old_key).ok_or_else(|| {
                        IvmError::invariant(
                            "Source",
                            format!("edit of row absent under primary key {old_key}"),
                        )
                    })?;
                    self.rows.insert(new_key.clone(), row.clone());
                    tracing::debug!(
                        source = %self.schema.table_name,
                        old_key,
                        new_key,
                        "edit (key change)"
                    );
                    Ok(vec![
                        Change::remove(Node::leaf(old_row)),
                        Change::add(Node::leaf(row)),
                    ])
                } else {
                    self.rows.insert(old_key.clone(), row.clone());
                    tracing::debug!(source = %self.schema.table_name, key = old_key, "edit");
                    Ok(vec![Change::edit(old_row, row)])
                }
            }
        }
    }

    fn matching_rows(
        &self,
        connection: &Connection,
        request: &FetchRequest,
    ) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .rows
            .values()
            .filter(|r| connection.filter.as_ref().map_or(true, |f| f(r)))
            .filter(|r| request.matches(r))
            .cloned()
            .collect();

        let ordering = connection.schema.full_ordering_key();
        rows.sort_by(|a, b| compare_row(&ordering, a, b).unwrap_or(Ordering::Equal));

        if request.reverse {
            rows.reverse();
        }

        // A `start` row absent from the result set (e.g. it was just
        // removed, or never matched the connection's filter) seeks to the
        // row that would sort immediately after it rather than erroring —
        // there's no row identity left to fail an invariant against.
        if let Some(start) = &request.start {
            let pos = rows
                .iter()
                .position(|r| {
                    let cmp = compare_row(&ordering, r, &start.row).unwrap_or(Ordering::Equal);
                    let cmp = if request.reverse { cmp.reverse() } else { cmp };
                    match start.basis {
                        StartBasis::At => cmp != Ordering::Less,
                        StartBasis::After => cmp == Ordering::Greater,
                    }
                })
                .unwrap_or(rows.len());
            rows = rows.split_off(pos);
        }

        rows
    }
}

/// The mutation shape accepted by `Source::push` (spec §4.1 "Public
/// operations").
pub enum SourceMutation {
    Add(Row),
    Remove(Row),
    Edit { old_row: Row, row: Row },
}

/// A per-ordering view of a source (spec GLOSSARY "Connection").
pub struct Connection {
    source: Rc<RefCell<SourceInner>>,
    pub schema: Rc<Schema>,
    filter: Option<Rc<dyn Fn(&Row) -> bool>>,
    output: Option<WeakLink>,
}

impl Connection {
    pub fn new(
        source: Rc<RefCell<SourceInner>>,
        schema: Rc<Schema>,
        filter: Option<Rc<dyn Fn(&Row) -> bool>>,
    ) -> Self {
        Connection {
            source,
            schema,
            filter,
            output: None,
        }
    }

    pub fn fetch(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        let rows = self.source.borrow().matching_rows(self, request);
        Ok(Box::new(rows.into_iter().map(Node::leaf)))
    }

    pub fn cleanup(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        // A Source holds no per-connection storage to release; cleanup
        // yields the same rows as fetch purely so callers can verify the
        // cleanup-emptiness invariant uniformly across operator kinds.
        self.fetch(request)
    }

    pub fn push(&mut self, _from: InputSlot, _change: Change) -> IvmResult<()> {
        Err(IvmError::invariant(
            "Source",
            "connections do not receive push; mutate via SourceInner::apply",
        ))
    }

    pub fn get_schema(&self) -> Rc<Schema> {
        self.schema.clone()
    }

    pub fn set_output(&mut self, output: WeakLink, at: InputSlot) {
        self.output = Some(output.clone());
        self.source.borrow_mut().register_connection(output, at);
    }

    pub fn destroy(&mut self) -> IvmResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType, OrderColumn};
    use crate::value::Value;

    fn issue_schema() -> Rc<Schema> {
        Rc::new(Schema::new(
            "issue",
            vec![Column::new("id", ColumnType::String)],
            vec!["id".to_string()],
            vec![OrderColumn::asc("id")],
        ))
    }

    fn row(id: &str) -> Row {
        Row::new([("id".to_string(), Value::from(id))])
    }

    #[test]
    fn add_then_fetch_sees_the_row() {
        let schema = issue_schema();
        let source = SourceInner::new(schema.clone());
        SourceInner::apply(&source, SourceMutation::Add(row("i1"))).unwrap();
        let connection = Connection::new(source, schema, None);
        let results: Vec<_> = connection.fetch(&FetchRequest::new()).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].row.get("id"), Value::from("i1"));
    }

    #[test]
    fn duplicate_add_is_an_invariant_violation() {
        let schema = issue_schema();
        let source = SourceInner::new(schema);
        SourceInner::apply(&source, SourceMutation::Add(row("i1"))).unwrap();
        let err = SourceInner::apply(&source, SourceMutation::Add(row("i1"))).unwrap_err();
        assert!(!err.is_tolerated());
    }
}
