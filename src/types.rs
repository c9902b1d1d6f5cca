use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::DalError;
use crate::lob::LobHandle;

/// Values that can be stored in a database row or used as bind values.
///
/// ```rust
/// use sql_dal::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
    /// Unread large object; becomes `Text`/`Blob` once resolved.
    Lob(LobHandle),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    /// Integer view that also accepts whole floats (drivers disagree on NUMBER mapping).
    #[must_use]
    pub fn as_i64_lossy(&self) -> Option<i64> {
        match self {
            RowValues::Int(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            RowValues::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            RowValues::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_lob(&self) -> Option<&LobHandle> {
        if let RowValues::Lob(lob) = self {
            Some(lob)
        } else {
            None
        }
    }

    /// JSON rendering used by the dynamic call surface.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            RowValues::Int(i) => JsonValue::from(*i),
            RowValues::Float(f) => JsonValue::from(*f),
            RowValues::Text(s) => JsonValue::String(s.clone()),
            RowValues::Bool(b) => JsonValue::Bool(*b),
            RowValues::Timestamp(dt) => JsonValue::String(dt.format("%F %T%.f").to_string()),
            RowValues::Null => JsonValue::Null,
            RowValues::JSON(v) => v.clone(),
            RowValues::Blob(bytes) => JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect()),
            RowValues::Lob(lob) => serde_json::json!({ "lob": lob.kind().to_string() }),
        }
    }

    /// Inverse of [`RowValues::to_json`] for scalar inputs.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => RowValues::Null,
            JsonValue::Bool(b) => RowValues::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => RowValues::Int(i),
                None => RowValues::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => RowValues::Text(s.clone()),
            other => RowValues::JSON(other.clone()),
        }
    }
}

impl From<i64> for RowValues {
    fn from(value: i64) -> Self {
        RowValues::Int(value)
    }
}

impl From<f64> for RowValues {
    fn from(value: f64) -> Self {
        RowValues::Float(value)
    }
}

impl From<bool> for RowValues {
    fn from(value: bool) -> Self {
        RowValues::Bool(value)
    }
}

impl From<&str> for RowValues {
    fn from(value: &str) -> Self {
        RowValues::Text(value.to_owned())
    }
}

impl From<String> for RowValues {
    fn from(value: String) -> Self {
        RowValues::Text(value)
    }
}

/// Bind direction constants, passed through to the driver unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindDirection {
    #[default]
    In,
    Out,
    InOut,
}

/// Bind data-type constants, passed through to the driver unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    String,
    Number,
    Date,
    Cursor,
    Buffer,
    Clob,
    Blob,
}

/// A bind with an explicit direction and/or type (`{ dir, type, val, maxSize }`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BindParam {
    pub value: Option<RowValues>,
    pub dir: BindDirection,
    pub db_type: Option<DbType>,
    pub max_size: Option<usize>,
}

impl BindParam {
    #[must_use]
    pub fn out(db_type: DbType) -> Self {
        Self {
            value: None,
            dir: BindDirection::Out,
            db_type: Some(db_type),
            max_size: None,
        }
    }

    #[must_use]
    pub fn in_out(value: impl Into<RowValues>, db_type: DbType) -> Self {
        Self {
            value: Some(value.into()),
            dir: BindDirection::InOut,
            db_type: Some(db_type),
            max_size: None,
        }
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }
}

/// One bind slot.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    /// Plain IN value.
    Value(RowValues),
    /// Directed/typed parameter.
    Param(BindParam),
    /// Placeholder replaced by the next sequence value in `insert_returning_id_sql`.
    PrimaryKey,
    /// Procedure argument wrapped in a SQL expression, e.g. `To_Date(?, 'yyyymmdd')`;
    /// every `?` in `expression` is replaced with the bind placeholder.
    Expression { expression: String, value: RowValues },
}

impl BindValue {
    #[must_use]
    pub fn expression(expression: impl Into<String>, value: impl Into<RowValues>) -> Self {
        BindValue::Expression {
            expression: expression.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        matches!(self, BindValue::PrimaryKey)
    }

    #[must_use]
    pub fn direction(&self) -> BindDirection {
        match self {
            BindValue::Param(p) => p.dir,
            _ => BindDirection::In,
        }
    }
}

impl From<RowValues> for BindValue {
    fn from(value: RowValues) -> Self {
        BindValue::Value(value)
    }
}

macro_rules! bind_value_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for BindValue {
            fn from(value: $ty) -> Self {
                BindValue::Value(RowValues::from(value))
            }
        })*
    };
}

bind_value_from!(i64, f64, bool, &str, String);

/// Bind set for one statement: positional (`:0`, `?`) or named (`:name`).
#[derive(Debug, Clone, PartialEq)]
pub enum Binds {
    Positional(Vec<BindValue>),
    Named(Vec<(String, BindValue)>),
}

impl Default for Binds {
    fn default() -> Self {
        Binds::Positional(Vec::new())
    }
}

impl Binds {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn positional(values: Vec<BindValue>) -> Self {
        Binds::Positional(values)
    }

    #[must_use]
    pub fn named<K: Into<String>>(pairs: impl IntoIterator<Item = (K, BindValue)>) -> Self {
        Binds::Named(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Binds::Positional(v) => v.len(),
            Binds::Named(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = &BindValue> + '_> {
        match self {
            Binds::Positional(v) => Box::new(v.iter()),
            Binds::Named(v) => Box::new(v.iter().map(|(_, b)| b)),
        }
    }

    pub fn values_mut(&mut self) -> Box<dyn Iterator<Item = &mut BindValue> + '_> {
        match self {
            Binds::Positional(v) => Box::new(v.iter_mut()),
            Binds::Named(v) => Box::new(v.iter_mut().map(|(_, b)| b)),
        }
    }
}

impl From<Vec<RowValues>> for Binds {
    fn from(values: Vec<RowValues>) -> Self {
        Binds::Positional(values.into_iter().map(BindValue::Value).collect())
    }
}

/// One `(sql, binds)` unit of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlBind {
    pub sql: String,
    pub binds: Binds,
}

impl SqlBind {
    #[must_use]
    pub fn new(sql: impl Into<String>, binds: Binds) -> Self {
        Self {
            sql: sql.into(),
            binds,
        }
    }
}

impl<S: Into<String>> From<(S, Binds)> for SqlBind {
    fn from((sql, binds): (S, Binds)) -> Self {
        SqlBind::new(sql, binds)
    }
}

/// Row shape requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Deserialize)]
#[serde(try_from = "String")]
pub enum OutFormat {
    Array,
    #[default]
    Object,
}

impl FromStr for OutFormat {
    type Err = DalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "array" | "out_format_array" => Ok(OutFormat::Array),
            "object" | "out_format_object" => Ok(OutFormat::Object),
            other => Err(DalError::UnsupportedOutputFormat(other.to_owned())),
        }
    }
}

impl TryFrom<String> for OutFormat {
    type Error = DalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for OutFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutFormat::Array => "array",
            OutFormat::Object => "object",
        })
    }
}
