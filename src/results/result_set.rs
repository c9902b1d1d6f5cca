use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use super::row::{Columns, Row};
use crate::types::{OutFormat, RowValues};

/// Output bind values of a statement or procedure call, in bind order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutBinds(pub Vec<(String, RowValues)>);

impl OutBinds {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RowValues> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, name: impl Into<String>, value: RowValues) {
        self.0.push((name.into(), value));
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect::<Map<_, _>>(),
        )
    }
}

/// Outcome of one statement.
///
/// Queries fill `rows` (and `columns`), DML fills `rows_affected`, procedure
/// calls fill `out_binds`. A statement can fill more than one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    pub columns: Option<Arc<Columns>>,
    pub rows: Option<Vec<Row>>,
    pub rows_affected: Option<u64>,
    pub out_binds: OutBinds,
}

impl ExecResult {
    /// Result of a query.
    #[must_use]
    pub fn with_rows(columns: Arc<Columns>, rows: Vec<Vec<RowValues>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect();
        Self {
            columns: Some(columns),
            rows: Some(rows),
            ..Self::default()
        }
    }

    /// Result of a DML statement.
    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected: Some(rows_affected),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_out_binds(out_binds: OutBinds) -> Self {
        Self {
            out_binds,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        self.rows.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn to_json(&self, format: OutFormat) -> JsonValue {
        let mut map = Map::new();
        if let Some(rows) = &self.rows {
            map.insert(
                "rows".into(),
                JsonValue::Array(rows.iter().map(|r| r.to_json(format)).collect()),
            );
        }
        if let Some(n) = self.rows_affected {
            map.insert("rowsAffected".into(), JsonValue::from(n));
        }
        if !self.out_binds.is_empty() {
            map.insert("outBinds".into(), self.out_binds.to_json());
        }
        JsonValue::Object(map)
    }
}
