use std::sync::Arc;

use tracing::info;

use crate::builder::{BasicSqlBuilder, SqlBuilder};
use crate::config::DalConfig;
use crate::dialect::Dialect;
use crate::driver::{DriverConnection, DriverPool, PoolStatus};
use crate::error::{DalError, ErrorContext, ResultExt};
use crate::options::{AcquireFailure, AcquireOptions};
use crate::pool::{AcquireSample, Gateway};

/// Data access layer over one driver pool.
///
/// Cloning is cheap; clones share the pool, the configuration and the
/// statistics.
pub struct Dal<P: DriverPool> {
    inner: Arc<DalInner<P>>,
}

struct DalInner<P: DriverPool> {
    gateway: Gateway<P>,
    builder: Arc<dyn SqlBuilder>,
}

impl<P: DriverPool> Clone for Dal<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: DriverPool> Dal<P> {
    /// Wrap an already created driver pool.
    ///
    /// # Errors
    /// Returns `DalError::Config` if `config` does not validate.
    pub fn new(pool: P, config: DalConfig) -> Result<Self, DalError> {
        Self::with_sql_builder(pool, config, Arc::new(BasicSqlBuilder))
    }

    /// Like [`Dal::new`], with a custom builder behind the table-descriptor operations.
    ///
    /// # Errors
    /// Returns `DalError::Config` if `config` does not validate.
    pub fn with_sql_builder(
        pool: P,
        config: DalConfig,
        builder: Arc<dyn SqlBuilder>,
    ) -> Result<Self, DalError> {
        config.validate()?;
        info!(
            dialect = %pool.dialect(),
            pool_max = config.connection.pool_max,
            pool_min = config.connection.pool_min,
            "data access layer ready"
        );
        Ok(Self {
            inner: Arc::new(DalInner {
                gateway: Gateway::new(pool, Arc::new(config)),
                builder,
            }),
        })
    }

    pub(crate) fn gateway(&self) -> &Gateway<P> {
        &self.inner.gateway
    }

    pub(crate) fn sql_builder(&self) -> &dyn SqlBuilder {
        self.inner.builder.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &DalConfig {
        self.gateway().config()
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.gateway().pool().dialect()
    }

    #[must_use]
    pub fn pool(&self) -> &P {
        self.gateway().pool()
    }

    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.gateway().status()
    }

    /// Acquisition samples recorded so far (empty unless `gatherStats`).
    #[must_use]
    pub fn stats(&self) -> Vec<AcquireSample> {
        self.gateway().stats()
    }

    /// Check out a connection for caller-managed reuse.
    ///
    /// Pass it to later calls through [`QueryOptions::connection`](crate::options::QueryOptions::connection)
    /// and hand it back with [`Dal::release`].
    ///
    /// # Errors
    /// See [`Gateway::acquire`]; on session-setup failure the open connection is
    /// inside the returned [`AcquireFailure`].
    pub async fn get_db_connection(
        &self,
        opts: AcquireOptions,
    ) -> Result<P::Conn, AcquireFailure<P::Conn>> {
        self.gateway().acquire(opts.session_ctx.as_ref()).await
    }

    /// Return a connection obtained from [`Dal::get_db_connection`].
    ///
    /// # Errors
    /// Returns the driver's release error.
    pub async fn release(&self, conn: P::Conn) -> Result<(), DalError> {
        conn.release()
            .await
            .with_context(|| ErrorContext::tag("release"))
    }

    /// Tear down the pool.
    ///
    /// # Errors
    /// Returns the driver's close error.
    pub async fn close(&self) -> Result<(), DalError> {
        info!(dialect = %self.dialect(), "closing connection pool");
        self.gateway().close().await
    }

    /// Major version from `dbVer`, validated at construction.
    pub(crate) fn db_major_version(&self) -> Result<u32, DalError> {
        self.config().db_major_version()
    }
}
