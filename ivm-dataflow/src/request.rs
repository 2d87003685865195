//! Fetch requests (spec §3 "FetchRequest", §6 `fetch`).

use std::collections::BTreeMap;

use crate::row::Row;
use crate::value::Value;

/// Whether a start row marks the first row to include (`At`) or the first
/// row after which results should resume (`After`, for pagination).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBasis {
    At,
    After,
}

#[derive(Debug, Clone)]
pub struct StartPosition {
    pub row: Row,
    pub basis: StartBasis,
}

impl StartPosition {
    pub fn at(row: Row) -> Self {
        StartPosition {
            row,
            basis: StartBasis::At,
        }
    }

    pub fn after(row: Row) -> Self {
        StartPosition {
            row,
            basis: StartBasis::After,
        }
    }
}

/// A request for a slice of an operator's result set: an optional exact-match
/// constraint, an optional cursor to resume from, and a direction to walk
/// the ordering key in.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub constraint: Option<BTreeMap<String, Value>>,
    pub start: Option<StartPosition>,
    pub reverse: bool,
}

impl FetchRequest {
    pub fn new() -> Self {
        FetchRequest::default()
    }

    pub fn with_constraint(mut self, constraint: BTreeMap<String, Value>) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = Some(start);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.constraint
            .as_ref()
            .map(|c| row.matches_constraint(c))
            .unwrap_or(true)
    }
}
