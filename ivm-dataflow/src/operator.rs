//! The closed operator type and its shared dispatch (spec §9 "Operator
//! polymorphism": "model operators as a variant type... avoid inheritance").
//!
//! Grounded on `readyset-dataflow`'s [`NodeOperator`] enum and its
//! `impl_ingredient_fn_mut!`/`impl_ingredient_fn_ref!` macros
//! (`readyset-dataflow/src/ops/mod.rs`): a closed sum of concrete operator
//! structs, each implementing the same set of inherent methods, dispatched
//! through the enum without a vtable or inheritance.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ivm_errors::IvmResult;

use crate::change::Change;
use crate::node::NodeStream;
use crate::ops::exists::Exists;
use crate::ops::fanin::FanIn;
use crate::ops::fanout::FanOut;
use crate::ops::filter::Filter;
use crate::ops::join::Join;
use crate::request::FetchRequest;
use crate::schema::Schema;
use crate::sink::Catch;
use crate::source::Connection;

/// An operator owns its input: destroying the operator destroys what it
/// points to (spec §3 "Lifetimes"). Strong by default.
pub type Link = Rc<RefCell<Operator>>;

/// A non-owning reference used purely to forward derived pushes downstream,
/// so the graph never forms an `Rc` cycle between an operator and its
/// output. FanOut additionally uses this for each of its N branch heads.
pub type WeakLink = Weak<RefCell<Operator>>;

pub fn link(operator: Operator) -> Link {
    Rc::new(RefCell::new(operator))
}

/// Which of a multi-input operator's inputs a push arrived from, mirroring
/// `readyset-dataflow`'s `on_input(from: LocalNodeIndex, ...)` (`ops/mod.rs`).
/// Single-input operators (Filter, FanOut, Exists) ignore it; Join uses it
/// to tell its parent input from its child input, and FanIn uses it to tell
/// branches apart (though its merge doesn't currently need to).
pub type InputSlot = usize;

/// A downstream target plus which of its inputs we occupy. Every operator
/// with exactly one consumer stores one of these (or several, for FanOut's
/// branches) instead of a bare `WeakLink`, so a dead target is silently
/// skipped and a live one is pushed to at the right slot.
#[derive(Clone)]
pub struct OutputSlot {
    link: WeakLink,
    at: InputSlot,
}

impl OutputSlot {
    pub fn new(link: WeakLink, at: InputSlot) -> Self {
        OutputSlot { link, at }
    }

    pub fn push(&self, change: Change) -> IvmResult<()> {
        if let Some(link) = self.link.upgrade() {
            link.borrow_mut().push(self.at, change)?;
        }
        Ok(())
    }
}

/// The upstream change type that initiated a FanOut broadcast, passed to
/// FanIn so it knows which merge rule to apply (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Remove,
    Edit,
    Child,
}

impl ChangeKind {
    pub fn of(change: &Change) -> Self {
        match change {
            Change::Add { .. } => ChangeKind::Add,
            Change::Remove { .. } => ChangeKind::Remove,
            Change::Edit { .. } => ChangeKind::Edit,
            Change::Child { .. } => ChangeKind::Child,
        }
    }
}

pub enum Operator {
    Source(Connection),
    Filter(Filter),
    FanOut(FanOut),
    FanIn(FanIn),
    Join(Join),
    Exists(Exists),
    Catch(Catch),
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Source(_) => write!(f, "Source"),
            Operator::Filter(_) => write!(f, "Filter"),
            Operator::FanOut(_) => write!(f, "FanOut"),
            Operator::FanIn(_) => write!(f, "FanIn"),
            Operator::Join(_) => write!(f, "Join"),
            Operator::Exists(_) => write!(f, "Exists"),
            Operator::Catch(_) => write!(f, "Catch"),
        }
    }
}

macro_rules! dispatch_mut {
    ($self:ident, $fn:ident, $( $arg:ident ),*) => {
        match $self {
            Operator::Source(i) => i.$fn($($arg),*),
            Operator::Filter(i) => i.$fn($($arg),*),
            Operator::FanOut(i) => i.$fn($($arg),*),
            Operator::FanIn(i) => i.$fn($($arg),*),
            Operator::Join(i) => i.$fn($($arg),*),
            Operator::Exists(i) => i.$fn($($arg),*),
            Operator::Catch(i) => i.$fn($($arg),*),
        }
    };
}

macro_rules! dispatch_ref {
    ($self:ident, $fn:ident, $( $arg:ident ),*) => {
        match $self {
            Operator::Source(i) => i.$fn($($arg),*),
            Operator::Filter(i) => i.$fn($($arg),*),
            Operator::FanOut(i) => i.$fn($($arg),*),
            Operator::FanIn(i) => i.$fn($($arg),*),
            Operator::Join(i) => i.$fn($($arg),*),
            Operator::Exists(i) => i.$fn($($arg),*),
            Operator::Catch(i) => i.$fn($($arg),*),
        }
    };
}

impl Operator {
    #[tracing::instrument(level = "trace", skip_all, fields(operator = %self))]
    pub fn fetch(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        dispatch_ref!(self, fetch, request)
    }

    /// Same traversal as `fetch`, but releasing rather than acquiring state.
    /// Returns the sequence undrained, exactly like `fetch`, so a composite
    /// operator (Filter, Join) can wrap its input's cleanup stream the same
    /// way it wraps a fetch stream. A caller tearing down a subscription at
    /// the root must fully drain what this returns — see
    /// [`Self::tear_down`].
    #[tracing::instrument(level = "trace", skip_all, fields(operator = %self))]
    pub fn cleanup(&self, request: &FetchRequest) -> IvmResult<NodeStream> {
        dispatch_ref!(self, cleanup, request)
    }

    /// Run `cleanup` to completion, discarding its results. The entry point
    /// a subscription uses to tear itself down (spec §5 "Cancellation").
    pub fn tear_down(&self, request: &FetchRequest) -> IvmResult<()> {
        for node in self.cleanup(request)? {
            node.drain()?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(operator = %self))]
    pub fn push(&mut self, from: InputSlot, change: Change) -> IvmResult<()> {
        dispatch_mut!(self, push, from, change)
    }

    pub fn get_schema(&self) -> Rc<Schema> {
        dispatch_ref!(self, get_schema,)
    }

    pub fn set_output(&mut self, output: WeakLink, at: InputSlot) {
        dispatch_mut!(self, set_output, output, at)
    }

    pub fn destroy(&mut self) -> IvmResult<()> {
        dispatch_mut!(self, destroy,)
    }
}
