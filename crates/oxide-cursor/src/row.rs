//! Result rows and column metadata.

use std::ops::Index;

use oxide_sql_core::{FromSqlValue, SqlValue, ValueError};
use serde::Serialize;

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    /// Creates a row from column values.
    #[must_use]
    pub const fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Reads column `index` as `T`.
    pub fn get<T: FromSqlValue>(&self, index: usize) -> Result<T, ValueError> {
        let value = self.values.get(index).ok_or(ValueError::OutOfRange {
            index,
            len: self.values.len(),
        })?;
        T::from_sql_value(value)
    }

    /// Column values in order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consumes the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<SqlValue>> for Row {
    fn from(values: Vec<SqlValue>) -> Self {
        Self::new(values)
    }
}

impl Index<usize> for Row {
    type Output = SqlValue;

    fn index(&self, index: usize) -> &SqlValue {
        &self.values[index]
    }
}

/// A result column of the executing statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    /// Column name as reported by the engine.
    pub name: String,
    /// Declared type, when the column maps to a table column.
    pub decltype: Option<String>,
}
