//! Scriptable in-memory driver for exercising the orchestration layer without
//! a database.

pub mod mock;

pub use mock::{MockConnection, MockCursor, MockPool, MockResponse, clob, failing_lob};

use crate::config::DalConfig;

/// Configuration with millisecond backoff, suitable for tests.
#[must_use]
pub fn fast_config(pool_min: u32, pool_max: u32) -> DalConfig {
    let mut cfg = DalConfig::default();
    cfg.connection.connect_string = "mock".into();
    cfg.connection.pool_min = pool_min;
    cfg.connection.pool_max = pool_max;
    cfg.get_conn_wait_min_time = 1;
    cfg.get_conn_wait_max_time = 3;
    cfg.get_conn_max_probes = 5;
    cfg.pool_fetch_timeout = 5;
    cfg
}
