use std::collections::BTreeMap;

use serde::Serialize;

use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ValueKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Column name → typed value.
pub type Row = BTreeMap<String, Value>;

/// Tabular result handed to the presentation layer.
///
/// `columns` carries the display order; each row maps every column name to
/// a value (possibly `Value::Null`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    /// Store revision the table was computed against.
    pub revision: u64,
}

impl ResultTable {
    pub fn new(columns: Vec<Column>, revision: u64) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            revision,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Value at (`row`, `column`); `None` when out of range or unknown.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// All values of one column in row order.
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        self.rows.iter().filter_map(|r| r.get(column)).collect()
    }
}
