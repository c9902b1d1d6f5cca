use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool, RunError};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::DalConfig;
use crate::dal::Dal;
use crate::dialect::Dialect;
use crate::driver::{DriverConnection, DriverPool, PoolStatus};
use crate::error::{DalError, DriverError, ErrorContext, ResultExt};

use super::connection::{SqliteConnection, run_blocking};

/// A rusqlite connection shared between async callers and blocking workers.
pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_CHECKOUT_TIMEOUT: Duration = Duration::from_millis(100);

/// bb8 manager for `SQLite` database files.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
}

impl SqliteManager {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = DriverError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        async move {
            tokio::task::spawn_blocking(move || -> Result<SharedSqliteConnection, DriverError> {
                let conn = rusqlite::Connection::open(&path)?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                Ok(Arc::new(Mutex::new(conn)))
            })
            .await
            .map_err(|e| DriverError::new(format!("sqlite connect join error: {e}")))?
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(handle, |c| {
                c.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await
        }
    }

    // a connection still locked by a cursor worker or left inside a
    // transaction must not be handed out again
    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        match conn.try_lock() {
            Ok(guard) => !guard.is_autocommit(),
            Err(_) => true,
        }
    }
}

/// Driver pool over [`SqliteManager`].
pub struct SqlitePool {
    pool: Pool<SqliteManager>,
    pool_max: u32,
    pool_min: u32,
    closed: AtomicBool,
}

impl SqlitePool {
    /// Build the bb8 pool described by `config.connection`.
    ///
    /// # Errors
    /// Returns the driver error of the first connection attempt.
    pub async fn new(config: &DalConfig) -> Result<Self, DriverError> {
        let conn = &config.connection;
        let checkout_timeout =
            Duration::from_millis(config.get_conn_wait_max_time).max(MIN_CHECKOUT_TIMEOUT);
        let pool = Pool::builder()
            .max_size(conn.pool_max)
            .min_idle(Some(conn.pool_min))
            .idle_timeout(Some(Duration::from_secs(conn.pool_timeout.max(1))))
            .connection_timeout(checkout_timeout)
            .build(SqliteManager::new(conn.connect_string.clone()))
            .await?;
        Ok(Self {
            pool,
            pool_max: conn.pool_max,
            pool_min: conn.pool_min,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl DriverPool for SqlitePool {
    type Conn = SqliteConnection;

    async fn get_connection(&self) -> Result<SqliteConnection, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::new("sqlite pool is closed"));
        }
        match self.pool.get_owned().await {
            Ok(conn) => Ok(SqliteConnection::new(conn)),
            // the gateway backs off and retries on this class
            Err(RunError::TimedOut) => Err(DriverError::session_limit(
                "timed out waiting for a pooled sqlite connection",
            )),
            Err(RunError::User(err)) => Err(err),
        }
    }

    fn status(&self) -> PoolStatus {
        let state = self.pool.state();
        PoolStatus {
            connections_in_use: state.connections.saturating_sub(state.idle_connections),
            connections_open: state.connections,
            pool_max: self.pool_max,
            pool_min: self.pool_min,
        }
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::Release);
        info!(open = self.pool.state().connections, "sqlite pool closed to new checkouts");
        Ok(())
    }
}

impl Dal<SqlitePool> {
    /// Open a `SQLite` pool on `config.connection.connectString` (a file path)
    /// and wrap it.
    ///
    /// ```rust,no_run
    /// # async fn demo() -> Result<(), sql_dal::DalError> {
    /// use sql_dal::prelude::*;
    ///
    /// let cfg = DalConfig::builder("/tmp/app.db").pool_size(1, 4).finish()?;
    /// let dal = Dal::new_sqlite(cfg).await?;
    /// dal.query_sql("CREATE TABLE IF NOT EXISTS t (id INTEGER)", Binds::none(), QueryOptions::new())
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// `Config` for an invalid configuration, or the driver error of the
    /// initial connection test.
    pub async fn new_sqlite(config: DalConfig) -> Result<Self, DalError> {
        config.validate()?;
        let pool = SqlitePool::new(&config)
            .await
            .with_context(|| {
                ErrorContext::tag("createPool")
                    .with_extra("path", config.connection.connect_string.as_str())
            })?;

        // smoke test
        let conn = pool
            .get_connection()
            .await
            .with_context(|| ErrorContext::tag("createPool smoke test"))?;
        conn.release().await?;

        Dal::new(pool, config)
    }
}
