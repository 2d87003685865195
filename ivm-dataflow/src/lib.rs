//! The IVM operator graph: the data model, the `Operator` enum and its
//! `fetch`/`cleanup`/`push` contract, and the concrete operators that
//! implement Source, Filter, FanOut/FanIn, Join, and Exists/NotExists.

pub mod change;
pub mod node;
pub mod operator;
pub mod ops;
pub mod request;
pub mod row;
pub mod schema;
pub mod sink;
pub mod source;
pub mod value;

pub mod prelude {
    pub use crate::change::Change;
    pub use crate::node::{Node, NodeStream, RelationshipFactory};
    pub use crate::operator::{link, ChangeKind, InputSlot, Link, Operator, OutputSlot, WeakLink};
    pub use crate::ops::exists::Exists;
    pub use crate::ops::fanin::FanIn;
    pub use crate::ops::fanout::FanOut;
    pub use crate::ops::filter::Filter;
    pub use crate::ops::join::Join;
    pub use crate::request::{FetchRequest, StartBasis, StartPosition};
    pub use crate::row::Row;
    pub use crate::schema::{Column, ColumnType, Direction, OrderColumn, Relationship, Schema};
    pub use crate::sink::{ArrayView, Catch, MaterializedRow};
    pub use crate::source::{Connection, SourceInner, SourceMutation};
    pub use crate::value::{compare_values, Value};
}
