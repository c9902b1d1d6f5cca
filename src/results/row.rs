use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::types::{OutFormat, RowValues};

/// Column names of a result, shared by every row it produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns {
    names: Vec<String>,
    // Internal cache for faster column lookups
    index: HashMap<String, usize>,
}

impl Columns {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a column by name. Exact match first, then ASCII case-insensitive
    /// (Oracle reports unquoted identifiers in upper case).
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        if let Some(&idx) = self.index.get(name) {
            return Some(idx);
        }
        self.names.iter().position(|col| col.eq_ignore_ascii_case(name))
    }
}

/// A row from a database query result
///
/// This struct represents a single row from a database query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// The column names for this row (shared across all rows in a result set)
    pub columns: Arc<Columns>,
    /// The values for this row
    pub values: Vec<RowValues>,
}

impl Row {
    #[must_use]
    pub fn new(columns: Arc<Columns>, values: Vec<RowValues>) -> Self {
        Self { columns, values }
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.columns
            .position(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render as a JSON array or a JSON object keyed by column name.
    #[must_use]
    pub fn to_json(&self, format: OutFormat) -> JsonValue {
        match format {
            OutFormat::Array => JsonValue::Array(self.values.iter().map(RowValues::to_json).collect()),
            OutFormat::Object => {
                let mut map = Map::with_capacity(self.values.len());
                for (name, value) in self.columns.names().iter().zip(&self.values) {
                    map.insert(name.clone(), value.to_json());
                }
                JsonValue::Object(map)
            }
        }
    }
}
