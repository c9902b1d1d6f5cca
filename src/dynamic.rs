//! JSON call surface: operations addressed by name with loosely shaped
//! arguments, for callers that speak JSON rather than Rust types.
//!
//! ```rust,no_run
//! # #[cfg(feature = "sqlite")]
//! # async fn demo(dal: sql_dal::sqlite::SqliteDal) -> Result<(), sql_dal::DalError> {
//! use serde_json::json;
//!
//! let rows = dal
//!     .call("selectAllRowsSql", &[json!("SELECT id FROM t WHERE x = :x"), json!({"x": 1}), json!({"limit": 10})])
//!     .await?;
//! let same = dal
//!     .call("selectAllRowsSql", &[json!({"sql": "SELECT id FROM t WHERE x = :x", "bind": {"x": 1}, "opt": {"limit": 10}})])
//!     .await?;
//! assert_eq!(rows, same);
//! # Ok(())
//! # }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::args::{NormalizedArgs, normalize, spec_for};
use crate::builder::{Filter, TableQuery};
use crate::dal::Dal;
use crate::driver::DriverPool;
use crate::error::{DalError, ErrorContext};
use crate::options::{QueryOptions, SessionContext};
use crate::types::{BindDirection, BindParam, BindValue, Binds, DbType, OutFormat, RowValues, SqlBind};

/// `opt` argument of the JSON surface.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CallOptions {
    out_format: Option<String>,
    limit: Option<usize>,
    page: Option<usize>,
    total_count: bool,
    fetch_clobs: bool,
    dbms_output: bool,
    batch_size: Option<usize>,
    session_ctx: Option<JsonSessionCtx>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonSessionCtx {
    ctx_procedure_name: String,
    ctx_attribute: String,
    ctx_value: String,
}

impl CallOptions {
    fn parse(args: &NormalizedArgs) -> Result<Self, DalError> {
        match args.get("opt") {
            Some(opt) => Self::deserialize(opt)
                .map_err(|e| DalError::InvalidArgument(format!("opt: {e}"))),
            None => Ok(Self::default()),
        }
    }

    fn out_format(&self, default: OutFormat) -> Result<OutFormat, DalError> {
        self.out_format
            .as_deref()
            .map_or(Ok(default), str::parse::<OutFormat>)
    }

    fn into_query_options<'c, C>(self) -> Result<QueryOptions<'c, C>, DalError> {
        let mut opts = QueryOptions::new()
            .total_count(self.total_count)
            .fetch_clobs(self.fetch_clobs)
            .dbms_output(self.dbms_output);
        if let Some(format) = &self.out_format {
            opts = opts.out_format(format.parse()?);
        }
        opts.limit = self.limit;
        opts.page = self.page;
        opts.batch_size = self.batch_size;
        opts.session_ctx = self.session_ctx.map(|ctx| {
            SessionContext::new(ctx.ctx_procedure_name).attribute(ctx.ctx_attribute, ctx.ctx_value)
        });
        Ok(opts)
    }
}

impl<P: DriverPool> Dal<P> {
    /// Run `operation` with JSON arguments in either the positional or the
    /// single-object form and render its result as JSON.
    ///
    /// Rows follow `outFormat`; `runProcedure` yields its out binds plus
    /// `dbmsOutput`; `executeTransaction` takes `[sql, bind]` pairs or
    /// `{sql, bind}` objects.
    ///
    /// # Errors
    /// `InvalidArgument` for unknown operations or malformed arguments, plus
    /// whatever the operation itself returns.
    pub async fn call(&self, operation: &str, args: &[Value]) -> Result<Value, DalError> {
        let spec = spec_for(operation)
            .ok_or_else(|| DalError::InvalidArgument(format!("unknown operation {operation}")))?;
        let mut args = normalize(args, spec)
            .map_err(|e| e.with_context(ErrorContext::tag(operation)))?;
        let call_opts = CallOptions::parse(&args)?;
        let format = call_opts.out_format(self.config().out_format)?;
        let opts = call_opts.into_query_options::<P::Conn>()?;
        debug!(operation, "dynamic call");

        match operation {
            "getDbConnection" => Err(DalError::InvalidArgument(
                "getDbConnection hands out a live connection; use Dal::get_db_connection".into(),
            )),
            "querySql" => {
                let (sql, binds) = sql_and_binds(&mut args)?;
                Ok(self.query_sql(&sql, binds, opts).await?.to_json(format))
            }
            "selectOneRowSql" => {
                let (sql, binds) = sql_and_binds(&mut args)?;
                Ok(self.select_one_row_sql(&sql, binds, opts).await?.to_json(format))
            }
            "selectOneValueSql" => {
                let (sql, binds) = sql_and_binds(&mut args)?;
                Ok(self.select_one_value_sql(&sql, binds, opts).await?.to_json())
            }
            "selectAllRowsSql" => {
                let (sql, binds) = sql_and_binds(&mut args)?;
                let rows = self.select_all_rows_sql(&sql, binds, opts).await?;
                Ok(Value::Array(rows.iter().map(|r| r.to_json(format)).collect()))
            }
            "selectOneClobValueSql" => {
                let (sql, binds) = sql_and_binds(&mut args)?;
                Ok(self
                    .select_one_clob_value_sql(&sql, binds, opts)
                    .await?
                    .map_or(Value::Null, Value::String))
            }
            "insertReturningIdSql" => {
                let (sql, binds) = sql_and_binds(&mut args)?;
                let sequence = args.str("sequence")?.to_owned();
                Ok(self
                    .insert_returning_id_sql(&sql, binds, &sequence, opts)
                    .await?
                    .to_json())
            }
            "executeTransaction" => {
                let statements = transaction_statements(args.take("sqlBindArray"))?;
                let results = self.execute_transaction(statements, opts).await?;
                Ok(Value::Array(results.iter().map(|r| r.to_json(format)).collect()))
            }
            "runProcedure" => {
                let name = args.str("procName")?.to_owned();
                let binds = binds_from_json(args.take("bind"))?;
                let result = self.run_procedure(&name, binds, opts).await?;
                let mut out = Map::new();
                if let Some(text) = result.dbms_output {
                    out.insert("dbmsOutput".into(), Value::String(text));
                }
                for (name, value) in &result.out_binds.0 {
                    out.insert(name.clone(), value.to_json());
                }
                Ok(Value::Object(out))
            }
            "selectOneRow" => {
                let query = table_query(&mut args, "fields")?;
                Ok(self.select_one_row(query, opts).await?.to_json(format))
            }
            "selectOneValue" => {
                let query = table_query(&mut args, "field")?;
                Ok(self.select_one_value(query, opts).await?.to_json())
            }
            "selectOneClobValue" => {
                let query = table_query(&mut args, "field")?;
                Ok(self
                    .select_one_clob_value(query, opts)
                    .await?
                    .map_or(Value::Null, Value::String))
            }
            "selectAllRows" => {
                let query = table_query(&mut args, "fields")?;
                let rows = self.select_all_rows(query, opts).await?;
                Ok(Value::Array(rows.iter().map(|r| r.to_json(format)).collect()))
            }
            "insert" => {
                let table = args.str("tbl")?.to_owned();
                let values = bind_pairs(args.take("data"))?;
                Ok(self.insert(&table, values, opts).await?.to_json(format))
            }
            "update" => {
                let table = args.str("tbl")?.to_owned();
                let values = value_pairs(args.take("data"))?;
                let filter = filter_from_json(args.take("where"))?;
                Ok(self.update(&table, values, filter, opts).await?.to_json(format))
            }
            "del" => {
                let table = args.str("tbl")?.to_owned();
                let filter = filter_from_json(args.take("where"))?;
                Ok(self.del(&table, filter, opts).await?.to_json(format))
            }
            "insertReturningId" => {
                let table = args.str("tbl")?.to_owned();
                let sequence = args.str("sequence")?.to_owned();
                let values = bind_pairs(args.take("data"))?;
                Ok(self
                    .insert_returning_id(&table, values, &sequence, opts)
                    .await?
                    .to_json())
            }
            other => Err(DalError::Unimplemented(format!("operation {other}"))),
        }
    }
}

fn sql_and_binds(args: &mut NormalizedArgs) -> Result<(String, Binds), DalError> {
    let sql = args.str("sql")?.to_owned();
    let binds = binds_from_json(args.take("bind"))?;
    Ok((sql, binds))
}

fn table_query(args: &mut NormalizedArgs, fields_key: &str) -> Result<TableQuery, DalError> {
    let mut query = TableQuery::new(args.str("tbl")?);
    query.fields = match args.take(fields_key) {
        Some(Value::String(field)) => vec![field],
        Some(Value::Array(items)) => strings(items, fields_key)?,
        _ => Vec::new(),
    };
    query.filter = filter_from_json(args.take("where"))?;
    query.order = match args.take("order") {
        Some(Value::String(order)) => order.split(',').map(|s| s.trim().to_owned()).collect(),
        Some(Value::Array(items)) => strings(items, "order")?,
        _ => Vec::new(),
    };
    Ok(query)
}

fn strings(items: Vec<Value>, what: &str) -> Result<Vec<String>, DalError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(DalError::InvalidArgument(format!(
                "{what} entries must be strings, got {other}"
            ))),
        })
        .collect()
}

/// Object: named binds. Array: positional binds. Absent: no binds.
pub(crate) fn binds_from_json(value: Option<Value>) -> Result<Binds, DalError> {
    match value {
        None => Ok(Binds::none()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(bind_value_from_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Binds::Positional),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| bind_value_from_json(v).map(|b| (k, b)))
            .collect::<Result<Vec<_>, _>>()
            .map(Binds::Named),
        Some(other) => Err(DalError::InvalidArgument(format!(
            "bind must be an object or an array, got {other}"
        ))),
    }
}

/// One bind slot:
/// `{type: "pk"}`, `{fn, bind}` / `{expression, value}`, `{dir, type, val, maxSize}`
/// or a plain value.
pub(crate) fn bind_value_from_json(value: Value) -> Result<BindValue, DalError> {
    let Value::Object(mut map) = value else {
        return Ok(BindValue::Value(RowValues::from_json(&value)));
    };
    if map.get("type").and_then(Value::as_str) == Some("pk") {
        return Ok(BindValue::PrimaryKey);
    }
    for (expr_key, value_key) in [("fn", "bind"), ("expression", "value")] {
        if let Some(Value::String(expression)) = map.get(expr_key) {
            let expression = expression.clone();
            let value = map.remove(value_key).unwrap_or(Value::Null);
            return Ok(BindValue::Expression {
                expression,
                value: RowValues::from_json(&value),
            });
        }
    }
    if map.contains_key("dir") || map.contains_key("type") || map.contains_key("val") {
        let dir = match map.get("dir") {
            Some(dir) => bind_direction(dir)?,
            None => BindDirection::In,
        };
        let db_type = map.get("type").map(db_type).transpose()?;
        let max_size = match map.get("maxSize") {
            Some(size) => Some(
                size.as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| DalError::InvalidArgument(format!("maxSize {size} is not a size")))?,
            ),
            None => None,
        };
        return Ok(BindValue::Param(BindParam {
            value: map.get("val").map(RowValues::from_json),
            dir,
            db_type,
            max_size,
        }));
    }
    Ok(BindValue::Value(RowValues::JSON(Value::Object(map))))
}

// numeric forms are the oracledb driver constants
fn bind_direction(value: &Value) -> Result<BindDirection, DalError> {
    let dir = match value {
        Value::Number(n) => match n.as_u64() {
            Some(3001) => Some(BindDirection::In),
            Some(3002) => Some(BindDirection::InOut),
            Some(3003) => Some(BindDirection::Out),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().trim_start_matches("bind_") {
            "in" => Some(BindDirection::In),
            "inout" => Some(BindDirection::InOut),
            "out" => Some(BindDirection::Out),
            _ => None,
        },
        _ => None,
    };
    dir.ok_or_else(|| DalError::InvalidArgument(format!("unknown bind direction {value}")))
}

fn db_type(value: &Value) -> Result<DbType, DalError> {
    let ty = match value {
        Value::Number(n) => match n.as_u64() {
            Some(2001) => Some(DbType::String),
            Some(2002) => Some(DbType::Number),
            Some(2003) => Some(DbType::Date),
            Some(2004) => Some(DbType::Cursor),
            Some(2005) => Some(DbType::Buffer),
            Some(2006) => Some(DbType::Clob),
            Some(2007) => Some(DbType::Blob),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "string" => Some(DbType::String),
            "number" => Some(DbType::Number),
            "date" => Some(DbType::Date),
            "cursor" => Some(DbType::Cursor),
            "buffer" => Some(DbType::Buffer),
            "clob" => Some(DbType::Clob),
            "blob" => Some(DbType::Blob),
            _ => None,
        },
        _ => None,
    };
    ty.ok_or_else(|| DalError::InvalidArgument(format!("unknown bind type {value}")))
}

fn bind_pairs(data: Option<Value>) -> Result<Vec<(String, BindValue)>, DalError> {
    match data {
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| bind_value_from_json(v).map(|b| (k, b)))
            .collect(),
        _ => Err(DalError::InvalidArgument("data must be an object".into())),
    }
}

fn value_pairs(data: Option<Value>) -> Result<Vec<(String, RowValues)>, DalError> {
    bind_pairs(data)?
        .into_iter()
        .map(|(k, b)| match b {
            BindValue::Value(v) => Ok((k, v)),
            other => Err(DalError::InvalidArgument(format!(
                "column {k}: {other:?} cannot be used as an update value"
            ))),
        })
        .collect()
}

/// `{col: value}` is an equality filter; `[clause, [binds]]` or
/// `[clause, b1, b2, ...]` is a raw clause with `?` placeholders.
pub(crate) fn filter_from_json(value: Option<Value>) -> Result<Filter, DalError> {
    match value {
        None => Ok(Filter::All),
        Some(Value::Object(map)) => Ok(Filter::Eq(
            map.into_iter()
                .map(|(k, v)| (k, RowValues::from_json(&v)))
                .collect(),
        )),
        Some(Value::Array(items)) => {
            let mut items = items.into_iter();
            let clause = match items.next() {
                None => return Ok(Filter::All),
                Some(Value::String(clause)) => clause,
                Some(other) => {
                    return Err(DalError::InvalidArgument(format!(
                        "where clause must be a string, got {other}"
                    )));
                }
            };
            let rest: Vec<Value> = items.collect();
            let binds = match rest.as_slice() {
                [Value::Array(binds)] => binds.iter().map(RowValues::from_json).collect(),
                _ => rest.iter().map(RowValues::from_json).collect(),
            };
            Ok(Filter::Raw { clause, binds })
        }
        Some(other) => Err(DalError::InvalidArgument(format!(
            "where must be an object or an array, got {other}"
        ))),
    }
}

fn transaction_statements(value: Option<Value>) -> Result<Vec<SqlBind>, DalError> {
    let Some(Value::Array(items)) = value else {
        return Err(DalError::InvalidArgument("sqlBindArray must be an array".into()));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let (sql, bind) = match item {
                Value::Array(pair) => {
                    let mut pair = pair.into_iter();
                    (pair.next(), pair.next())
                }
                Value::Object(mut obj) => (obj.remove("sql"), obj.remove("bind")),
                _ => (None, None),
            };
            match sql {
                Some(Value::String(sql)) => Ok(SqlBind::new(sql, binds_from_json(bind.filter(|b| !b.is_null()))?)),
                _ => Err(DalError::InvalidArgument(format!(
                    "sqlBindArray[{i}] must be [sql, bind] or {{sql, bind}}"
                ))),
            }
        })
        .collect()
}
