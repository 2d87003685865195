//! Operator schemas (spec §3 "Ordering", §6 `getSchema`).

use std::rc::Rc;

/// The declared type of a column. Only used to diagnose [`TypeMismatch`]
/// errors during ordering comparisons, not to validate row contents
/// eagerly.
///
/// [`TypeMismatch`]: ivm_errors::IvmError::TypeMismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Column {
            name: name.into(),
            col_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderColumn {
    pub column: String,
    pub direction: Direction,
}

impl OrderColumn {
    pub fn asc(column: impl Into<String>) -> Self {
        OrderColumn {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        OrderColumn {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: String,
    pub schema: Rc<Schema>,
}

/// Describes an operator's result rows: their column types, primary key,
/// ordering key, and the names/schemas of any relationships. Propagated
/// downstream unchanged except where an operator narrows it (Filter) or
/// extends it with a relationship (Join).
#[derive(Debug, Clone)]
pub struct Schema {
    pub table_name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub ordering_key: Vec<OrderColumn>,
    pub relationships: Vec<Relationship>,
    pub is_hidden: bool,
}

impl Schema {
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<Column>,
        primary_key: Vec<String>,
        ordering_key: Vec<OrderColumn>,
    ) -> Self {
        Schema {
            table_name: table_name.into(),
            columns,
            primary_key,
            ordering_key,
            relationships: Vec::new(),
            is_hidden: false,
        }
    }

    pub fn with_relationship(mut self, name: impl Into<String>, schema: Rc<Schema>) -> Self {
        self.relationships.push(Relationship {
            name: name.into(),
            schema,
        });
        self
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Ordering key with the primary key appended as a final tie-breaker,
    /// per spec §3 ("ties are broken by primary key") and §5.
    pub fn full_ordering_key(&self) -> Vec<OrderColumn> {
        let mut key = self.ordering_key.clone();
        for pk_col in &self.primary_key {
            if !key.iter().any(|o| &o.column == pk_col) {
                key.push(OrderColumn::asc(pk_col.clone()));
            }
        }
        key
    }
}
