//! Concrete operator implementations dispatched through [`crate::operator::Operator`].

pub mod exists;
pub mod fanin;
pub mod fanout;
pub mod filter;
pub mod join;
