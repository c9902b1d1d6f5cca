//! Connection Pool Gateway: acquisition with saturation backoff, session setup
//! and usage statistics over a [`DriverPool`].

mod lease;
mod stats;

pub(crate) use lease::Lease;
pub use stats::AcquireSample;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::DalConfig;
use crate::driver::{DriverConnection, DriverPool, ExecOptions, PoolStatus};
use crate::error::{DalError, ErrorContext};
use crate::options::{AcquireFailure, SessionContext};
use crate::types::{BindValue, Binds, OutFormat};
use stats::Stats;

// Saturation thresholds for load shedding before the driver is even asked.
const SHED_USAGE: f64 = 0.8;
const FULL_POOL_SHED_PROBES: u32 = 3;

pub struct Gateway<P: DriverPool> {
    pool: P,
    config: Arc<DalConfig>,
    stats: Stats,
}

impl<P: DriverPool> Gateway<P> {
    pub fn new(pool: P, config: Arc<DalConfig>) -> Self {
        let stats = Stats::new(config.gather_stats);
        Self {
            pool,
            config,
            stats,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn config(&self) -> &DalConfig {
        &self.config
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub fn stats(&self) -> Vec<AcquireSample> {
        self.stats.snapshot()
    }

    /// Driver options for one statement, with an optional per-call output format.
    pub(crate) fn exec_options(&self, out_format: Option<OutFormat>) -> ExecOptions {
        ExecOptions::new(
            out_format.unwrap_or(self.config.out_format),
            self.config.max_rows,
        )
    }

    /// Check out a connection and prepare its session.
    ///
    /// When the session setup fails the open connection is handed back inside
    /// the failure; it is not released here.
    ///
    /// # Errors
    /// `PoolExhausted`, `AcquireTimeout` or a driver error without a connection;
    /// `SessionSetup` with the connection attached.
    pub async fn acquire(
        &self,
        session_ctx: Option<&SessionContext>,
    ) -> Result<P::Conn, AcquireFailure<P::Conn>> {
        let mut conn = self
            .checkout()
            .await
            .map_err(AcquireFailure::without_connection)?;
        match self.prepare_session(&mut conn, session_ctx).await {
            Ok(()) => Ok(conn),
            Err(error) => Err(AcquireFailure {
                error,
                connection: Some(conn),
            }),
        }
    }

    /// Connection for one internal operation: the caller's own connection when
    /// supplied, otherwise a freshly acquired one that the operation releases.
    pub(crate) async fn lease<'c>(
        &self,
        supplied: Option<&'c mut P::Conn>,
        session_ctx: Option<&SessionContext>,
    ) -> Result<Lease<'c, P::Conn>, DalError> {
        if let Some(conn) = supplied {
            if let Some(ctx) = session_ctx {
                self.apply_session_context(conn, ctx).await?;
            }
            return Ok(Lease::Borrowed(conn));
        }
        match self.acquire(session_ctx).await {
            Ok(conn) => Ok(Lease::Owned(conn)),
            Err(AcquireFailure { error, connection }) => {
                if let Some(conn) = connection {
                    Lease::Owned(conn).release_quietly("session setup").await;
                }
                Err(error)
            }
        }
    }

    async fn checkout(&self) -> Result<P::Conn, DalError> {
        let deadline = self.config.acquire_deadline();
        let (conn, sample) = timeout(deadline, self.probe())
            .await
            .map_err(|_| DalError::AcquireTimeout {
                seconds: deadline.as_secs(),
            })??;
        debug!(
            probes = sample.probes,
            wait_ms = delay_ms(sample.wait),
            "acquired connection"
        );
        self.stats.record(sample);
        Ok(conn)
    }

    async fn probe(&self) -> Result<(P::Conn, AcquireSample), DalError> {
        let max_probes = self.config.get_conn_max_probes;
        let mut probes: u32 = 0;
        let mut total_wait = Duration::ZERO;

        loop {
            probes += 1;
            let status = self.pool.status();
            let usage = status.usage();

            if probes < max_probes && should_shed(usage, probes) {
                let delay = self.backoff_delay();
                warn!(
                    probes,
                    in_use = status.connections_in_use,
                    pool_max = status.pool_max,
                    delay_ms = delay_ms(delay),
                    "pool saturated, backing off"
                );
                sleep(delay).await;
                total_wait += delay;
                continue;
            }

            match self.pool.get_connection().await {
                Ok(conn) => {
                    return Ok((
                        conn,
                        AcquireSample {
                            probes,
                            wait: total_wait,
                        },
                    ));
                }
                Err(err) if err.is_session_limit() => {
                    if probes >= max_probes {
                        warn!(probes, error = %err, "giving up on connection acquisition");
                        return Err(DalError::PoolExhausted { probes, total_wait });
                    }
                    let delay = self.backoff_delay();
                    warn!(
                        probes,
                        delay_ms = delay_ms(delay),
                        error = %err,
                        "database refused a session, retrying"
                    );
                    sleep(delay).await;
                    total_wait += delay;
                }
                Err(err) => {
                    return Err(DalError::from(err).with_context(ErrorContext::tag("getDbConnection")));
                }
            }
        }
    }

    // ThreadRng is !Send; keep it out of the async state machine.
    fn backoff_delay(&self) -> Duration {
        let (min, max) = self.config.backoff_range();
        let millis = rand::thread_rng().gen_range(delay_ms(min)..=delay_ms(max));
        Duration::from_millis(millis)
    }

    pub(crate) async fn prepare_session(
        &self,
        conn: &mut P::Conn,
        session_ctx: Option<&SessionContext>,
    ) -> Result<(), DalError> {
        self.apply_session_parameters(conn).await?;
        if let Some(ctx) = session_ctx {
            self.apply_session_context(conn, ctx).await?;
        }
        Ok(())
    }

    async fn apply_session_parameters(&self, conn: &mut P::Conn) -> Result<(), DalError> {
        if self.config.nls_session_parameters.is_empty() {
            return Ok(());
        }
        let dialect = self.pool.dialect();
        let statements = self
            .config
            .nls_session_parameters
            .iter()
            .map(|(name, value)| dialect.session_parameter_sql(name, value))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DalError::SessionSetup {
                statements: Vec::new(),
                source: Box::new(err),
            })?;

        let opts = self.exec_options(None);
        for sql in &statements {
            if let Err(err) = conn.execute(sql, &Binds::none(), &opts).await {
                return Err(DalError::SessionSetup {
                    statements: statements.clone(),
                    source: Box::new(
                        DalError::from(err)
                            .with_context(ErrorContext::tag("setSessionParameters").with_sql(sql)),
                    ),
                });
            }
        }
        debug!(count = statements.len(), "session parameters applied");
        Ok(())
    }

    async fn apply_session_context(
        &self,
        conn: &mut P::Conn,
        ctx: &SessionContext,
    ) -> Result<(), DalError> {
        let sql = self
            .pool
            .dialect()
            .session_context_sql(&ctx.procedure)
            .map_err(|err| DalError::SessionSetup {
                statements: Vec::new(),
                source: Box::new(err),
            })?;
        let statements = vec![sql.clone(); ctx.attributes.len()];
        let opts = self.exec_options(None);

        for (name, value) in &ctx.attributes {
            let binds = Binds::named([
                ("name", BindValue::from(name.as_str())),
                ("value", BindValue::from(value.as_str())),
            ]);
            if let Err(err) = conn.execute(&sql, &binds, &opts).await {
                return Err(DalError::SessionSetup {
                    statements,
                    source: Box::new(DalError::from(err).with_context(
                        ErrorContext::tag("setSessionContext")
                            .with_sql(sql.as_str())
                            .with_binds(&binds),
                    )),
                });
            }
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<(), DalError> {
        self.pool.close().await.map_err(DalError::from)
    }
}

/// Load shedding: back off on the first probe when the pool is nearly full,
/// and on the first probes while it is completely full.
fn should_shed(usage: f64, probes: u32) -> bool {
    (probes == 1 && usage > SHED_USAGE && usage < 1.0)
        || (usage >= 1.0 && probes < FULL_POOL_SHED_PROBES)
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
