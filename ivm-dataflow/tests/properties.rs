//! Property tests for the invariants in spec §8, run over small randomized
//! inputs with `test_strategy`/`proptest` (teacher: `dataflow-state`'s
//! `PointKey` proptests, `readyset-data::DfValue`'s `Arbitrary` impl).

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use ivm_dataflow::ops::join::{CHILD_SLOT, PARENT_SLOT};
use ivm_dataflow::prelude::*;
use ivm_storage::MemoryStorage;
use test_strategy::{proptest, Arbitrary};

fn id_schema(table: &str) -> Rc<Schema> {
    Rc::new(Schema::new(
        table,
        vec![Column::new("id", ColumnType::Number)],
        vec!["id".to_string()],
        vec![OrderColumn::asc("id")],
    ))
}

fn row_with_id(id: u8) -> Row {
    Row::new([("id".to_string(), Value::from(id as f64))])
}

fn source(schema: Rc<Schema>) -> (Rc<RefCell<SourceInner>>, Link) {
    let inner = SourceInner::new(schema.clone());
    let connection = Connection::new(inner.clone(), schema, None);
    (inner, link(Operator::Source(connection)))
}

fn fetch_ids(root: &Link) -> Vec<f64> {
    root.borrow()
        .fetch(&FetchRequest::new())
        .unwrap()
        .map(|n| match n.row.get("id") {
            Value::Number(n) => n,
            other => panic!("expected a number id, got {other:?}"),
        })
        .collect()
}

#[derive(Debug, Clone, Arbitrary)]
struct IdSet {
    #[strategy(proptest::collection::btree_set(0u8..40, 0..10))]
    ids: BTreeSet<u8>,
}

#[proptest]
fn fetch_is_consistent_across_repeated_calls(ids: IdSet) {
    let schema = id_schema("t");
    let (source_inner, root) = source(schema);
    for id in &ids.ids {
        SourceInner::apply(&source_inner, SourceMutation::Add(row_with_id(*id))).unwrap();
    }
    assert_eq!(fetch_ids(&root), fetch_ids(&root));
}

#[proptest]
fn fetch_results_are_sorted_by_ordering_key_then_primary_key(ids: IdSet) {
    let schema = id_schema("t");
    let (source_inner, root) = source(schema);
    for id in &ids.ids {
        SourceInner::apply(&source_inner, SourceMutation::Add(row_with_id(*id))).unwrap();
    }
    let fetched = fetch_ids(&root);
    let mut sorted = fetched.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(fetched, sorted);
}

#[proptest]
fn push_add_then_remove_restores_prior_state(ids: IdSet) {
    let schema = id_schema("t");
    let (source_inner, root) = source(schema);
    for id in &ids.ids {
        SourceInner::apply(&source_inner, SourceMutation::Add(row_with_id(*id))).unwrap();
    }
    let before_count = source_inner.borrow().row_count();
    let before_fetch = fetch_ids(&root);

    let fresh_id = ids.ids.iter().max().copied().unwrap_or(0).wrapping_add(1);
    let row = row_with_id(fresh_id);
    SourceInner::apply(&source_inner, SourceMutation::Add(row.clone())).unwrap();
    SourceInner::apply(&source_inner, SourceMutation::Remove(row)).unwrap();

    assert_eq!(source_inner.borrow().row_count(), before_count);
    assert_eq!(fetch_ids(&root), before_fetch);
}

/// A parent x child Join feeding an Exists: after one `fetch` followed by
/// `cleanup` with no intervening push, every key-set and size-cache entry
/// both operators wrote is gone (spec §8 invariant 2).
#[derive(Debug, Clone, Arbitrary)]
struct JoinShape {
    #[strategy(proptest::collection::btree_set(0u8..10, 1..6))]
    parent_ids: BTreeSet<u8>,
    #[strategy(proptest::collection::vec((0u8..10, 0u8..10), 0..10))]
    children: Vec<(u8, u8)>,
}

#[proptest]
fn cleanup_empties_join_and_exists_storage(shape: JoinShape) {
    let parent_schema = id_schema("parent");
    let child_schema = Rc::new(Schema::new(
        "child",
        vec![
            Column::new("id", ColumnType::Number),
            Column::new("parentID", ColumnType::Number),
        ],
        vec!["id".to_string()],
        vec![OrderColumn::asc("id")],
    ));
    let (parent_source, parent_link) = source(parent_schema.clone());
    let (child_source, child_link) = source(child_schema.clone());
    for id in &shape.parent_ids {
        SourceInner::apply(&parent_source, SourceMutation::Add(row_with_id(*id))).unwrap();
    }
    for (i, (child_id, parent_id)) in shape.children.iter().enumerate() {
        // child ids must be unique; derive one from the loop index.
        let row = Row::new([
            ("id".to_string(), Value::from((*child_id as f64) + i as f64 * 100.0)),
            ("parentID".to_string(), Value::from(*parent_id as f64)),
        ]);
        SourceInner::apply(&child_source, SourceMutation::Add(row)).unwrap();
    }

    let join_storage = Rc::new(RefCell::new(MemoryStorage::new()));
    let join_schema = Rc::new(
        (*parent_schema)
            .clone()
            .with_relationship("children", child_schema),
    );
    let join = Join::new(
        parent_link.clone(),
        child_link.clone(),
        vec!["id".to_string()],
        vec!["parentID".to_string()],
        "children",
        join_storage.clone(),
        join_schema.clone(),
    );
    let join_link = link(Operator::Join(join));
    parent_link
        .borrow_mut()
        .set_output(Rc::downgrade(&join_link), PARENT_SLOT);
    child_link
        .borrow_mut()
        .set_output(Rc::downgrade(&join_link), CHILD_SLOT);

    let exists_storage = Rc::new(RefCell::new(MemoryStorage::new()));
    let exists = Exists::new(
        join_link.clone(),
        "children",
        false,
        vec![],
        exists_storage.clone(),
        join_schema,
    );
    let exists_link = link(Operator::Exists(exists));
    join_link
        .borrow_mut()
        .set_output(Rc::downgrade(&exists_link), 0);

    for node in exists_link.borrow().fetch(&FetchRequest::new()).unwrap() {
        node.drain().unwrap();
    }
    for node in exists_link.borrow().cleanup(&FetchRequest::new()).unwrap() {
        node.drain().unwrap();
    }

    assert!(join_storage.borrow().is_empty());
    assert!(exists_storage.borrow().is_empty());
}

/// spec §8 invariant 5: `FanOut -> identity Filter -> FanIn` reproduces a
/// bare source's single-push output exactly.
#[proptest]
fn fanout_identity_fanin_matches_bare_source(id: u8) {
    let schema = id_schema("t");

    let (bare_source, bare_root) = source(schema.clone());
    let bare_catch = link(Operator::Catch(Catch::new(schema.clone())));
    bare_root
        .borrow_mut()
        .set_output(Rc::downgrade(&bare_catch), 0);

    let (fanned_source, fanned_root) = source(schema.clone());
    let fanout = FanOut::new(fanned_root.clone());
    let fanout_link = link(Operator::FanOut(fanout));
    fanned_root
        .borrow_mut()
        .set_output(Rc::downgrade(&fanout_link), 0);

    let identity = Filter::new(fanout_link.clone(), Rc::new(|_: &Row| true));
    let identity_link = link(Operator::Filter(identity));
    let fanin = FanIn::new(vec![identity_link.clone()], vec!["id".to_string()]);
    let fanin_link = link(Operator::FanIn(fanin));
    if let Operator::FanOut(fo) = &mut *fanout_link.borrow_mut() {
        fo.add_branch(Rc::downgrade(&identity_link));
        fo.set_fan_in(Rc::downgrade(&fanin_link));
    }
    identity_link
        .borrow_mut()
        .set_output(Rc::downgrade(&fanin_link), 0);
    let fanned_catch = link(Operator::Catch(Catch::new(schema)));
    fanin_link
        .borrow_mut()
        .set_output(Rc::downgrade(&fanned_catch), 0);

    let row = row_with_id(id);
    SourceInner::apply(&bare_source, SourceMutation::Add(row.clone())).unwrap();
    SourceInner::apply(&fanned_source, SourceMutation::Add(row)).unwrap();

    let bare_changes = match &mut *bare_catch.borrow_mut() {
        Operator::Catch(c) => c.take(),
        _ => unreachable!(),
    };
    let fanned_changes = match &mut *fanned_catch.borrow_mut() {
        Operator::Catch(c) => c.take(),
        _ => unreachable!(),
    };

    assert_eq!(bare_changes.len(), 1);
    assert_eq!(fanned_changes.len(), 1);
    assert_eq!(bare_changes[0].row().get("id"), fanned_changes[0].row().get("id"));
    assert_eq!(bare_changes[0].is_add(), fanned_changes[0].is_add());
}
