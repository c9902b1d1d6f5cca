use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::DriverError;
use crate::types::{BindDirection, BindValue, Binds, RowValues};

/// Binds converted to rusqlite values, ready to attach to a statement.
#[derive(Debug, Clone)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Convert a bind set. `SQLite` has IN binds only.
    ///
    /// # Errors
    /// Returns a driver error for OUT/IN OUT binds, unresolved primary-key
    /// placeholders, expressions and unread large objects.
    pub fn convert(binds: &Binds) -> Result<Self, DriverError> {
        Ok(match binds {
            Binds::Positional(values) => {
                Params::Positional(values.iter().map(bind_to_value).collect::<Result<_, _>>()?)
            }
            Binds::Named(pairs) => Params::Named(
                pairs
                    .iter()
                    .map(|(name, bind)| Ok((name.clone(), bind_to_value(bind)?)))
                    .collect::<Result<_, DriverError>>()?,
            ),
        })
    }

    /// Attach to `stmt`. Positional values must match the placeholder count;
    /// named values must each have a placeholder.
    ///
    /// # Errors
    /// Returns a driver error on a count mismatch or unknown name.
    pub fn bind(&self, stmt: &mut Statement<'_>) -> Result<(), DriverError> {
        match self {
            Params::Positional(values) => {
                let expected = stmt.parameter_count();
                if expected != values.len() {
                    return Err(DriverError::new(format!(
                        "statement expects {expected} bind value(s), got {}",
                        values.len()
                    )));
                }
                for (i, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(i + 1, value)?;
                }
            }
            Params::Named(pairs) => {
                for (name, value) in pairs {
                    let placeholder = if name.starts_with([':', '@', '$']) {
                        name.clone()
                    } else {
                        format!(":{name}")
                    };
                    let index = stmt.parameter_index(&placeholder)?.ok_or_else(|| {
                        DriverError::new(format!("no placeholder named {placeholder}"))
                    })?;
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
        }
        Ok(())
    }
}

fn bind_to_value(bind: &BindValue) -> Result<Value, DriverError> {
    match bind {
        BindValue::Value(value) => row_value_to_sqlite(value),
        BindValue::Param(param) if param.dir == BindDirection::In => param
            .value
            .as_ref()
            .map_or(Ok(Value::Null), row_value_to_sqlite),
        BindValue::Param(param) => Err(DriverError::new(format!(
            "sqlite does not support {:?} binds",
            param.dir
        ))),
        BindValue::PrimaryKey => Err(DriverError::new("unresolved primary key placeholder")),
        BindValue::Expression { expression, .. } => Err(DriverError::new(format!(
            "bind expression {expression} is only valid for procedure arguments"
        ))),
    }
}

fn row_value_to_sqlite(value: &RowValues) -> Result<Value, DriverError> {
    Ok(match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(json) => Value::Text(json.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
        RowValues::Lob(_) => {
            return Err(DriverError::new("large object handles cannot be bound"));
        }
    })
}
