use std::sync::Arc;

use async_trait::async_trait;
use bb8::PooledConnection;
use tracing::debug;

use crate::driver::{DriverConnection, ExecOptions};
use crate::error::DriverError;
use crate::results::ExecResult;
use crate::types::Binds;

use super::config::{SharedSqliteConnection, SqliteManager};
use super::cursor::SqliteCursor;
use super::params::Params;
use super::query::execute_statement;

/// Run `func` against the shared connection on the blocking pool.
pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, DriverError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, DriverError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| DriverError::new(format!("sqlite worker join error: {e}")))?
}

/// One pooled connection.
///
/// In auto-commit mode every statement stands alone. With auto-commit off the
/// first statement opens a transaction that stays open until
/// [`commit`](DriverConnection::commit) or [`rollback`](DriverConnection::rollback).
pub struct SqliteConnection {
    conn: PooledConnection<'static, SqliteManager>,
    auto_commit: bool,
}

impl SqliteConnection {
    pub(crate) fn new(conn: PooledConnection<'static, SqliteManager>) -> Self {
        Self {
            conn,
            auto_commit: true,
        }
    }

    fn handle(&self) -> SharedSqliteConnection {
        Arc::clone(&*self.conn)
    }

    async fn end_transaction(&self, statement: &'static str) -> Result<(), DriverError> {
        run_blocking(self.handle(), move |c| {
            if !c.is_autocommit() {
                c.execute_batch(statement)?;
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    type Cursor = SqliteCursor;

    async fn execute(
        &mut self,
        sql: &str,
        binds: &Binds,
        opts: &ExecOptions,
    ) -> Result<ExecResult, DriverError> {
        let params = Params::convert(binds)?;
        let sql = sql.to_owned();
        let manual = !self.auto_commit;
        let max_rows = opts.max_rows;
        run_blocking(self.handle(), move |c| {
            if manual && c.is_autocommit() {
                c.execute_batch("BEGIN")?;
            }
            let result = execute_statement(c, &sql, &params, max_rows)?;
            // an auto-commit statement seals work left open by manual mode
            if !manual && !c.is_autocommit() {
                c.execute_batch("COMMIT")?;
            }
            Ok(result)
        })
        .await
    }

    async fn open_cursor(
        &mut self,
        sql: &str,
        binds: &Binds,
        _opts: &ExecOptions,
    ) -> Result<SqliteCursor, DriverError> {
        let params = Params::convert(binds)?;
        SqliteCursor::open(self.handle(), sql.to_owned(), params, !self.auto_commit).await
    }

    fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.end_transaction("ROLLBACK").await
    }

    async fn release(self) -> Result<(), DriverError> {
        // uncommitted work never survives a trip back to the pool
        if !self.auto_commit {
            debug!("rolling back open sqlite transaction before release");
        }
        self.end_transaction("ROLLBACK").await?;
        drop(self.conn);
        Ok(())
    }
}
