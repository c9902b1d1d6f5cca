//! Pool configuration, built once and shared read-only.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::DalError;
use crate::types::OutFormat;

/// Secret that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Connection descriptor handed to the driver pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub user: String,
    pub password: Password,
    /// Driver connect string; for `SQLite` this is the database path.
    pub connect_string: String,
    pub pool_max: u32,
    pub pool_min: u32,
    /// Seconds an idle connection may stay open.
    pub pool_timeout: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: Password::default(),
            connect_string: String::new(),
            pool_max: 4,
            pool_min: 0,
            pool_timeout: 60,
        }
    }
}

/// Settings for one pool and every operation issued through it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DalConfig {
    pub connection: ConnectionConfig,
    /// Row cap for queries executed without a cursor.
    pub max_rows: usize,
    pub get_conn_max_probes: u32,
    /// Lower bound of the acquisition backoff, in milliseconds.
    pub get_conn_wait_min_time: u64,
    /// Upper bound of the acquisition backoff, in milliseconds.
    pub get_conn_wait_max_time: u64,
    /// Overall deadline for one acquisition, in seconds.
    pub pool_fetch_timeout: u64,
    pub gather_stats: bool,
    /// Applied to every connection right after checkout, in key order.
    pub nls_session_parameters: BTreeMap<String, String>,
    pub out_format: OutFormat,
    #[serde(deserialize_with = "string_or_number")]
    pub db_ver: String,
    /// Rows pulled per cursor fetch.
    pub batch_size: usize,
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            max_rows: 10_000,
            get_conn_max_probes: 30,
            get_conn_wait_min_time: 1_000,
            get_conn_wait_max_time: 4_000,
            pool_fetch_timeout: 60,
            gather_stats: false,
            nls_session_parameters: BTreeMap::new(),
            out_format: OutFormat::Object,
            db_ver: "11".to_owned(),
            batch_size: 50,
        }
    }
}

impl DalConfig {
    #[must_use]
    pub fn builder(connect_string: impl Into<String>) -> DalConfigBuilder {
        DalConfigBuilder::new(connect_string)
    }

    /// Parse the JSON configuration shape (`{ connection: {...}, maxRows, ... }`) and validate it.
    ///
    /// # Errors
    /// Returns `DalError::Config` for malformed JSON or values that fail [`DalConfig::validate`],
    /// and `DalError::UnsupportedOutputFormat` for an unknown `outFormat`.
    pub fn from_json_str(json: &str) -> Result<Self, DalError> {
        let cfg: DalConfig = serde_json::from_str(json).map_err(|e| {
            // serde renders the TryFrom error; surface the dedicated variant for it
            let msg = e.to_string();
            if msg.contains("not supported for outFormat") {
                let value = msg
                    .split('`')
                    .nth(1)
                    .unwrap_or_default()
                    .to_owned();
                DalError::UnsupportedOutputFormat(value)
            } else {
                DalError::Config(msg)
            }
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns `DalError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<(), DalError> {
        if self.connection.connect_string.trim().is_empty() {
            return Err(DalError::Config("connection.connectString is empty".into()));
        }
        if self.connection.pool_max == 0 {
            return Err(DalError::Config("connection.poolMax must be at least 1".into()));
        }
        if self.connection.pool_min > self.connection.pool_max {
            return Err(DalError::Config(format!(
                "connection.poolMin ({}) exceeds poolMax ({})",
                self.connection.pool_min, self.connection.pool_max
            )));
        }
        if self.get_conn_max_probes == 0 {
            return Err(DalError::Config("getConnMaxProbes must be at least 1".into()));
        }
        if self.get_conn_wait_min_time > self.get_conn_wait_max_time {
            return Err(DalError::Config(format!(
                "getConnWaitMinTime ({}) exceeds getConnWaitMaxTime ({})",
                self.get_conn_wait_min_time, self.get_conn_wait_max_time
            )));
        }
        if self.batch_size == 0 {
            return Err(DalError::Config("batchSize must be at least 1".into()));
        }
        if self.max_rows == 0 {
            return Err(DalError::Config("maxRows must be at least 1".into()));
        }
        self.db_major_version()?;
        Ok(())
    }

    /// Major version from `dbVer` (`"12.1.0.2"` gives 12).
    ///
    /// # Errors
    /// Returns `DalError::Config` if `dbVer` does not start with a number.
    pub fn db_major_version(&self) -> Result<u32, DalError> {
        let digits: String = self
            .db_ver
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits
            .parse()
            .map_err(|_| DalError::Config(format!("dbVer `{}` is not a version number", self.db_ver)))
    }

    #[must_use]
    pub fn backoff_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.get_conn_wait_min_time),
            Duration::from_millis(self.get_conn_wait_max_time),
        )
    }

    #[must_use]
    pub fn acquire_deadline(&self) -> Duration {
        Duration::from_secs(self.pool_fetch_timeout)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(u64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

/// Fluent builder for [`DalConfig`].
#[derive(Debug, Clone)]
pub struct DalConfigBuilder {
    cfg: DalConfig,
}

impl DalConfigBuilder {
    #[must_use]
    pub fn new(connect_string: impl Into<String>) -> Self {
        let mut cfg = DalConfig::default();
        cfg.connection.connect_string = connect_string.into();
        Self { cfg }
    }

    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.cfg.connection.user = user.into();
        self.cfg.connection.password = Password::new(password);
        self
    }

    #[must_use]
    pub fn pool_size(mut self, min: u32, max: u32) -> Self {
        self.cfg.connection.pool_min = min;
        self.cfg.connection.pool_max = max;
        self
    }

    #[must_use]
    pub fn pool_timeout(mut self, seconds: u64) -> Self {
        self.cfg.connection.pool_timeout = seconds;
        self
    }

    #[must_use]
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.cfg.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn max_probes(mut self, probes: u32) -> Self {
        self.cfg.get_conn_max_probes = probes;
        self
    }

    /// Backoff bounds in milliseconds.
    #[must_use]
    pub fn backoff_ms(mut self, min: u64, max: u64) -> Self {
        self.cfg.get_conn_wait_min_time = min;
        self.cfg.get_conn_wait_max_time = max;
        self
    }

    #[must_use]
    pub fn pool_fetch_timeout(mut self, seconds: u64) -> Self {
        self.cfg.pool_fetch_timeout = seconds;
        self
    }

    #[must_use]
    pub fn gather_stats(mut self, gather: bool) -> Self {
        self.cfg.gather_stats = gather;
        self
    }

    #[must_use]
    pub fn session_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cfg
            .nls_session_parameters
            .insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn out_format(mut self, out_format: OutFormat) -> Self {
        self.cfg.out_format = out_format;
        self
    }

    #[must_use]
    pub fn db_ver(mut self, db_ver: impl Into<String>) -> Self {
        self.cfg.db_ver = db_ver.into();
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.cfg.batch_size = batch_size;
        self
    }

    /// # Errors
    /// Returns `DalError::Config` if the assembled configuration is invalid.
    pub fn finish(self) -> Result<DalConfig, DalError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
