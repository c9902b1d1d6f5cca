//! Statement Executor: single statements on a leased connection.
//!
//! Every operation that acquires its own connection releases it before
//! returning, on success and on failure. A connection passed in through
//! [`QueryOptions::connection`] is used as-is and left checked out.

use tracing::debug;

use crate::dal::Dal;
use crate::driver::{DriverConnection, DriverPool};
use crate::error::{DalError, ErrorContext, ResultExt};
use crate::lob::LobHandle;
use crate::options::QueryOptions;
use crate::results::{ExecResult, Row};
use crate::types::{BindValue, Binds, OutFormat, RowValues};

fn context(tag: &str, sql: &str, binds: &Binds) -> ErrorContext {
    ErrorContext::tag(tag).with_sql(sql).with_binds(binds)
}

impl<P: DriverPool> Dal<P> {
    /// Execute any statement (DDL, DML or query) and return its raw result.
    ///
    /// # Errors
    /// Acquisition errors, or the driver error annotated with the SQL and binds.
    pub async fn query_sql(
        &self,
        sql: &str,
        binds: Binds,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<ExecResult, DalError> {
        let exec_opts = self.gateway().exec_options(opts.out_format);
        let mut lease = self
            .gateway()
            .lease(opts.connection, opts.session_ctx.as_ref())
            .await
            .with_context(|| ErrorContext::tag("querySql").with_sql(sql))?;

        debug!(sql, binds = ?binds, "querySql");
        match lease.conn().execute(sql, &binds, &exec_opts).await {
            Ok(result) => {
                lease
                    .release()
                    .await
                    .with_context(|| ErrorContext::tag("querySql release"))?;
                Ok(result)
            }
            Err(err) => {
                lease.release_quietly("querySql").await;
                Err(DalError::from(err).with_context(context("querySql", sql, &binds)))
            }
        }
    }

    /// Exactly one row, through the cursor path.
    ///
    /// # Errors
    /// `UnexpectedRowCount` unless the query yields exactly one row.
    pub async fn select_one_row_sql(
        &self,
        sql: &str,
        binds: Binds,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<Row, DalError> {
        let debug_binds = binds.clone();
        let rows = self.select_all_rows_sql(sql, binds, opts).await?;
        exactly_one(rows).with_context(|| context("selectOneRowSql", sql, &debug_binds))
    }

    /// The single value of a one-row, one-column query.
    ///
    /// # Errors
    /// `UnexpectedRowCount` (including zero rows) or `UnexpectedColumnCount`.
    pub async fn select_one_value_sql(
        &self,
        sql: &str,
        binds: Binds,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<RowValues, DalError> {
        let debug_binds = binds.clone();
        let row = self.select_one_row_sql(sql, binds, opts).await?;
        if row.len() != 1 {
            return Err(DalError::UnexpectedColumnCount {
                expected: 1,
                actual: row.len(),
            }
            .with_context(context("selectOneValueSql", sql, &debug_binds)));
        }
        Ok(row.values.into_iter().next().unwrap_or(RowValues::Null))
    }

    /// First column of the first row, with a large object read to the end.
    /// `None` when the query yields no rows or a NULL.
    ///
    /// # Errors
    /// Driver or LOB read errors, annotated with the SQL and binds.
    pub async fn select_one_clob_value_sql(
        &self,
        sql: &str,
        binds: Binds,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<Option<String>, DalError> {
        let exec_opts = self
            .gateway()
            .exec_options(Some(OutFormat::Array));
        let mut lease = self
            .gateway()
            .lease(opts.connection, opts.session_ctx.as_ref())
            .await
            .with_context(|| ErrorContext::tag("selectOneClobValueSql").with_sql(sql))?;

        let result = match lease.conn().execute(sql, &binds, &exec_opts).await {
            Ok(result) => result,
            Err(err) => {
                lease.release_quietly("selectOneClobValueSql execute").await;
                return Err(
                    DalError::from(err).with_context(context("selectOneClobValueSql", sql, &binds))
                );
            }
        };

        let first = result
            .rows()
            .first()
            .and_then(|row| row.get_by_index(0))
            .cloned();
        // LOB locators are only readable while the connection is still held
        let value = match first {
            Some(RowValues::Lob(lob)) => match read_clob(&lob).await {
                Ok(text) => Some(text),
                Err(err) => {
                    lease.release_quietly("selectOneClobValueSql fetchLob").await;
                    return Err(err.with_context(context("selectOneClobValueSql", sql, &binds)));
                }
            },
            Some(other) => scalar_text(other),
            None => None,
        };

        lease
            .release()
            .await
            .with_context(|| ErrorContext::tag("selectOneClobValueSql release"))?;
        Ok(value)
    }

    /// Insert a row whose key comes from `sequence`.
    ///
    /// `binds` must hold exactly one [`BindValue::PrimaryKey`]. The next sequence
    /// value is fetched on the same connection, substituted for the placeholder
    /// and returned once the insert reports exactly one affected row.
    ///
    /// # Errors
    /// `InvalidArgument` for a missing or repeated placeholder; driver errors
    /// annotated with the substituted binds; `UnexpectedRowCount` if the
    /// sequence query or the insert touches anything but one row.
    pub async fn insert_returning_id_sql(
        &self,
        sql: &str,
        mut binds: Binds,
        sequence: &str,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<RowValues, DalError> {
        let placeholders = binds.values().filter(|b| b.is_primary_key()).count();
        if placeholders != 1 {
            return Err(DalError::InvalidArgument(format!(
                "binds must contain exactly one primary-key placeholder, found {placeholders}"
            ))
            .with_context(context("insertReturningIdSql", sql, &binds)));
        }
        let seq_sql = self
            .dialect()
            .next_sequence_sql(sequence)
            .with_context(|| ErrorContext::tag("insertReturningIdSql").with_extra("sequence", sequence))?;

        let exec_opts = self.gateway().exec_options(Some(OutFormat::Array));
        let mut lease = self
            .gateway()
            .lease(opts.connection, opts.session_ctx.as_ref())
            .await
            .with_context(|| ErrorContext::tag("insertReturningIdSql").with_sql(sql))?;

        let seq_ctx = || {
            ErrorContext::tag("insertReturningIdSql sequence")
                .with_sql(seq_sql.as_str())
                .with_extra("sequence", sequence)
        };
        let seq_result = match lease.conn().execute(&seq_sql, &Binds::none(), &exec_opts).await {
            Ok(result) => result,
            Err(err) => {
                lease.release_quietly("insertReturningIdSql sequence").await;
                return Err(DalError::from(err).with_context(seq_ctx()));
            }
        };
        let Some(id) = seq_result
            .rows()
            .first()
            .and_then(|row| row.get_by_index(0))
            .cloned()
        else {
            lease.release_quietly("insertReturningIdSql sequence").await;
            return Err(DalError::UnexpectedRowCount {
                expected: 1,
                actual: 0,
            }
            .with_context(seq_ctx()));
        };

        for bind in binds.values_mut() {
            if bind.is_primary_key() {
                *bind = BindValue::Value(id.clone());
            }
        }
        debug!(sql, binds = ?binds, "insertReturningIdSql");

        let affected = match lease.conn().execute(sql, &binds, &exec_opts).await {
            Ok(result) => result.rows_affected.unwrap_or(0),
            Err(err) => {
                lease.release_quietly("insertReturningIdSql insert").await;
                return Err(DalError::from(err).with_context(context("insertReturningIdSql", sql, &binds)));
            }
        };

        lease
            .release()
            .await
            .with_context(|| ErrorContext::tag("insertReturningIdSql release"))?;

        if affected != 1 {
            return Err(DalError::UnexpectedRowCount {
                expected: 1,
                actual: usize::try_from(affected).unwrap_or(usize::MAX),
            }
            .with_context(context("insertReturningIdSql", sql, &binds)));
        }
        Ok(id)
    }
}

pub(crate) fn exactly_one(rows: Vec<Row>) -> Result<Row, DalError> {
    let actual = rows.len();
    let mut rows = rows.into_iter();
    match (rows.next(), actual) {
        (Some(row), 1) => Ok(row),
        _ => Err(DalError::UnexpectedRowCount {
            expected: 1,
            actual,
        }),
    }
}

async fn read_clob(lob: &LobHandle) -> Result<String, DalError> {
    match lob.materialize().await? {
        RowValues::Text(text) => Ok(text),
        RowValues::Blob(bytes) => String::from_utf8(bytes).map_err(|e| {
            DalError::Lob(crate::error::DriverError::new(format!(
                "large object is not valid utf-8: {e}"
            )))
        }),
        other => Ok(scalar_text(other).unwrap_or_default()),
    }
}

fn scalar_text(value: RowValues) -> Option<String> {
    match value {
        RowValues::Null => None,
        RowValues::Text(text) => Some(text),
        RowValues::Blob(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        other => Some(match other.to_json() {
            serde_json::Value::String(s) => s,
            json => json.to_string(),
        }),
    }
}
