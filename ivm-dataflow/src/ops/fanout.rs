//! FanOut: the broadcasting half of disjunction (spec §4.3).

use std::cell::Cell;
use std::rc::Rc;

use ivm_errors::IvmResult;

use crate::change::Change;
use crate::node::NodeStream;
use crate::operator::{ChangeKind, InputSlot, Link, Operator, WeakLink};
use crate::request::FetchRequest;
use crate::schema::Schema;

/// One input, N branch outputs. `fetch`/`cleanup` pass straight through to
/// `input` — every branch pulls the same upstream sequence independently,
/// and FanIn is what later deduplicates across branches. `push` is the
/// direction this operator actually fans out in: broadcast a row-only copy
/// to every branch, then tell `fan_in` which upstream change type just
/// finished broadcasting so it knows which merge rule to apply.
pub struct FanOut {
    input: Link,
    outputs: Vec<WeakLink>,
    fan_in: Option<WeakLink>,
    destroy_count: Cell<usize>,
}

impl FanOut {
    pub fn new(input: Link) -> Self {
        FanOut {
            input,
            outputs: Vec::new(),
            fan_in: None,
            destroy_count: Cell::new(0),
        }
    }

    pub fn add_branch(&mut self, branch: WeakLink) {
        self.outputs.push(branch);
    }

    pub fn set_fan_in(&mut self, fan_in: WeakLink) {
        self.fan_in = Some(fan_in);
    }

    pub fn fetch(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        self.input.borrow().fetch(request)
    }

    pub fn cleanup(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        self.input.borrow().cleanup(request)
    }

    pub fn push(&mut self, _from: InputSlot, change: Change) -> IvmResult<()> {
        let kind = ChangeKind::of(&change);
        let live: Vec<Link> = self.outputs.iter().filter_map(|b| b.upgrade()).collect();
        // A branch may itself consume relationship data on push (an Exists
        // combined via OR, say), so each branch needs the real change, not
        // a row-only copy — only the later FanIn merge can afford to drop
        // relationships. `replay` hands each branch its own independent
        // copy since `Node`'s relationship factories are single-shot.
        let copies = change.replay(live.len())?;
        for (link, copy) in live.into_iter().zip(copies) {
            // Every branch is an ordinary single-input operator with this
            // FanOut as its sole input: slot 0.
            link.borrow_mut().push(0, copy)?;
        }
        if let Some(fan_in) = self.fan_in.as_ref().and_then(|f| f.upgrade()) {
            if let Operator::FanIn(fan_in) = &mut *fan_in.borrow_mut() {
                fan_in.broadcast_finished(kind)?;
            }
        }
        Ok(())
    }

    pub fn get_schema(&self) -> Rc<Schema> {
        self.input.borrow().get_schema()
    }

    /// FanOut has no single downstream of its own; branches reach it
    /// through `input`, not `output`. Kept for dispatch uniformity.
    pub fn set_output(&mut self, _output: WeakLink, _at: InputSlot) {}

    /// Idempotent once per branch, not once overall: each branch owns a
    /// strong reference to this FanOut and calls destroy independently when
    /// it tears down, so the real input is only destroyed once every branch
    /// has released it (spec §5 "Cancellation").
    pub fn destroy(&mut self) -> IvmResult<()> {
        let count = self.destroy_count.get() + 1;
        self.destroy_count.set(count);
        if count > self.outputs.len().max(1) {
            return Err(ivm_errors::IvmError::DestroyMisuse {
                outputs: self.outputs.len(),
                call: count,
            });
        }
        if count == self.outputs.len().max(1) {
            self.input.borrow_mut().destroy()?;
        }
        Ok(())
    }
}
