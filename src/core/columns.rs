use std::collections::HashMap;

use serde_json::Value;

use super::{Column, RowError};

/// Positions of the named columns of one query result.
///
/// The column set depends on the grouping dimensions requested, so an index is
/// only valid for the result it was built from.
#[derive(Debug, Clone, Default)]
pub struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    pub fn build<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let positions = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| (name.to_string(), index))
            .collect();
        ColumnIndex { positions }
    }

    pub fn from_columns(columns: &[Column]) -> Self {
        Self::build(columns.iter().map(|column| column.name.as_str()))
    }

    pub fn position(&self, name: &str) -> Result<usize, RowError> {
        self.positions
            .get(name)
            .copied()
            .ok_or_else(|| RowError::MissingColumn(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Value of column `name` in `row`. A row shorter than the column set is
    /// reported the same way as an absent column.
    pub fn cell<'r>(&self, row: &'r [Value], name: &str) -> Result<&'r Value, RowError> {
        let position = self.position(name)?;
        row.get(position)
            .ok_or_else(|| RowError::MissingColumn(name.to_string()))
    }
}
