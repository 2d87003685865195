//! Row-level predicate filtering (spec §4.2).

use std::rc::Rc;

use ivm_errors::IvmResult;

use crate::change::Change;
use crate::node::NodeStream;
use crate::operator::{InputSlot, Link, OutputSlot, WeakLink};
use crate::request::FetchRequest;
use crate::row::Row;
use crate::schema::Schema;

/// A single predicate stage. Several `Filter`s chained input-to-output form
/// the "filter pipeline" of spec §4.2: because each stage only drops rows
/// (never transforms or buffers them), the chain never materializes an
/// intermediate row set between stages.
pub struct Filter {
    input: Link,
    predicate: Rc<dyn Fn(&Row) -> bool>,
    output: Option<OutputSlot>,
}

impl Filter {
    pub fn new(input: Link, predicate: Rc<dyn Fn(&Row) -> bool>) -> Self {
        Filter {
            input,
            predicate,
            output: None,
        }
    }

    pub fn fetch(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        let predicate = self.predicate.clone();
        let upstream = self.input.borrow().fetch(request)?;
        Ok(Box::new(upstream.filter(move |node| predicate(&node.row))))
    }

    pub fn cleanup(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        let predicate = self.predicate.clone();
        let upstream = self.input.borrow().cleanup(request)?;
        Ok(Box::new(upstream.filter(move |node| predicate(&node.row))))
    }

    pub fn push(&mut self, _from: InputSlot, change: Change) -> IvmResult<()> {
        if let Some(change) = transform(self.predicate.as_ref(), change) {
            self.emit(change)?;
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
        self.input.borrow().get_schema()
    }

    pub fn set_output(&mut self, output: WeakLink, at: InputSlot) {
        self.output = Some(OutputSlot::new(output, at));
    }

    pub fn destroy(&mut self) -> IvmResult<()> {
        self.input.borrow_mut().destroy()
    }
}

/// The push decision table from spec §4.2, factored out of [`Filter::push`]
/// so it can be exercised without a graph: `None` means drop.
fn transform(predicate: &dyn Fn(&Row) -> bool, change: Change) -> Option<Change> {
    match change {
        Change::Add { node } => predicate(&node.row).then(|| Change::Add { node }),
        Change::Remove { node } => predicate(&node.row).then(|| Change::Remove { node }),
        Change::Edit { old_row, row } => {
            match (predicate(&old_row), predicate(&row)) {
                (true, true) => Some(Change::edit(old_row, row)),
                (false, true) => Some(Change::add(crate::node::Node::leaf(row))),
                (true, false) => Some(Change::remove(crate::node::Node::leaf(old_row))),
                (false, false) => None,
            }
        }
        Change::Child {
            row,
            relationship,
            change,
        } => predicate(&row).then(|| Change::Child {
            row,
            relationship,
            change,
        }),
    }
}
