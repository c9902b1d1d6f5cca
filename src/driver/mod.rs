//! Capability interface the orchestration core is written against.
//!
//! A backend implements [`DriverPool`], [`DriverConnection`] and [`DriverCursor`]
//! (plus [`LobStream`](crate::lob::LobStream) for large objects). Everything above
//! this module is backend-agnostic.

use std::sync::Arc;

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::DriverError;
use crate::results::{Columns, ExecResult};
use crate::types::{Binds, OutFormat, RowValues};

/// Snapshot of the driver pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub connections_in_use: u32,
    pub connections_open: u32,
    pub pool_max: u32,
    pub pool_min: u32,
}

impl PoolStatus {
    /// Fraction of `pool_max` currently checked out.
    #[must_use]
    pub fn usage(&self) -> f64 {
        if self.pool_max == 0 {
            return 1.0;
        }
        f64::from(self.connections_in_use) / f64::from(self.pool_max)
    }
}

/// Per-statement execution options handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    pub out_format: OutFormat,
    /// Upper bound on rows returned by a non-cursor query.
    pub max_rows: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            out_format: OutFormat::Object,
            max_rows: 10_000,
        }
    }
}

impl ExecOptions {
    #[must_use]
    pub fn new(out_format: OutFormat, max_rows: usize) -> Self {
        Self {
            out_format,
            max_rows,
        }
    }

    #[must_use]
    pub fn with_out_format(mut self, out_format: OutFormat) -> Self {
        self.out_format = out_format;
        self
    }
}

#[async_trait]
pub trait DriverPool: Send + Sync + 'static {
    type Conn: DriverConnection;

    /// Check out one connection.
    async fn get_connection(&self) -> Result<Self::Conn, DriverError>;

    fn status(&self) -> PoolStatus;

    fn dialect(&self) -> Dialect;

    /// Tear the pool down; outstanding connections are closed when returned.
    async fn close(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait DriverConnection: Send + 'static {
    type Cursor: DriverCursor;

    async fn execute(
        &mut self,
        sql: &str,
        binds: &Binds,
        opts: &ExecOptions,
    ) -> Result<ExecResult, DriverError>;

    /// Execute a query and leave its rows on the server behind a cursor.
    async fn open_cursor(
        &mut self,
        sql: &str,
        binds: &Binds,
        opts: &ExecOptions,
    ) -> Result<Self::Cursor, DriverError>;

    fn set_auto_commit(&mut self, auto_commit: bool);

    fn auto_commit(&self) -> bool;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Hand the connection back to its pool.
    async fn release(self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait DriverCursor: Send + 'static {
    fn columns(&self) -> Arc<Columns>;

    /// Fetch up to `n` rows. A short batch means the cursor is exhausted.
    async fn get_rows(&mut self, n: usize) -> Result<Vec<Vec<RowValues>>, DriverError>;

    async fn close(self) -> Result<(), DriverError>;
}
