use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::Binds;

/// Broad classes of driver failures the orchestration layer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The database (or the pool in front of it) refuses new sessions right now.
    SessionLimit,
    /// A referenced table, view, sequence or procedure does not exist.
    ObjectNotFound,
    /// Anything else.
    Other,
}

/// Failure reported by the underlying database driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    /// Vendor error code when the driver exposes one (`ORA-00942`, `SQLITE_BUSY`, ...).
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Other,
            code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn session_limit(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::SessionLimit,
            ..Self::new(message)
        }
    }

    #[must_use]
    pub fn object_not_found(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::ObjectNotFound,
            ..Self::new(message)
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// True when retrying after a pause may succeed.
    #[must_use]
    pub fn is_session_limit(&self) -> bool {
        self.kind == DriverErrorKind::SessionLimit
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// Which cursor step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPhase {
    Open,
    Fetch,
    Close,
}

impl fmt::Display for CursorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CursorPhase::Open => "open",
            CursorPhase::Fetch => "fetch",
            CursorPhase::Close => "close",
        })
    }
}

/// Debug annotation attached to an error as it crosses a component boundary.
///
/// `Display` shows the call-site tag and SQL text only. Bind values stay out of
/// rendered messages and are reachable through [`ErrorContext::binds`] or `Debug`.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub tag: Option<String>,
    pub sql: Option<String>,
    pub binds: Option<Binds>,
    pub extra: Vec<(String, String)>,
}

impl ErrorContext {
    #[must_use]
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    #[must_use]
    pub fn with_binds(mut self, binds: &Binds) -> Self {
        self.binds = Some(binds.clone());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn binds(&self) -> Option<&Binds> {
        self.binds.as_ref()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        let mut sep = "";
        if let Some(tag) = &self.tag {
            write!(f, "{tag}")?;
            sep = "; ";
        }
        if let Some(sql) = &self.sql {
            write!(f, "{sep}sql: {sql}")?;
            sep = "; ";
        }
        for (key, value) in &self.extra {
            write!(f, "{sep}{key}: {value}")?;
            sep = "; ";
        }
        f.write_str("]")
    }
}

#[derive(Debug, Error)]
pub enum DalError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("connection pool exhausted after {probes} probe(s), waited {total_wait:?}")]
    PoolExhausted { probes: u32, total_wait: Duration },

    #[error("timed out after {seconds}s waiting for a pooled connection")]
    AcquireTimeout { seconds: u64 },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("wrong number of rows returned from database: expected {expected}, got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("wrong number of columns returned from database: expected {expected}, got {actual}")]
    UnexpectedColumnCount { expected: usize, actual: usize },

    #[error("transaction failed at statement {statement_index}: {source}{}", rollback_note(.rollback))]
    TransactionFailed {
        statement_index: usize,
        #[source]
        source: Box<DalError>,
        rollback: Option<Box<DalError>>,
    },

    #[error("cursor {phase} failed: {source}")]
    Cursor {
        phase: CursorPhase,
        #[source]
        source: DriverError,
    },

    #[error("large object read failed: {0}")]
    Lob(#[source] DriverError),

    #[error("session setup failed after {} statement(s): {source}", .statements.len())]
    SessionSetup {
        statements: Vec<String>,
        #[source]
        source: Box<DalError>,
    },

    #[error("value `{0}` is not supported for outFormat (supported values: array, object)")]
    UnsupportedOutputFormat(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("{source} {context}")]
    WithContext {
        context: ErrorContext,
        #[source]
        source: Box<DalError>,
    },
}

fn rollback_note(rollback: &Option<Box<DalError>>) -> String {
    match rollback {
        Some(err) => format!(" (rollback also failed: {err})"),
        None => String::new(),
    }
}

impl DalError {
    /// Layer a debug annotation on top of this error; earlier annotations are kept.
    #[must_use]
    pub fn with_context(self, context: ErrorContext) -> Self {
        DalError::WithContext {
            context,
            source: Box::new(self),
        }
    }

    /// The error underneath all context layers.
    #[must_use]
    pub fn kind(&self) -> &DalError {
        let mut err = self;
        while let DalError::WithContext { source, .. } = err {
            err = source;
        }
        err
    }

    /// Context layers, outermost first.
    #[must_use]
    pub fn contexts(&self) -> Vec<&ErrorContext> {
        let mut out = Vec::new();
        let mut err = self;
        while let DalError::WithContext { context, source } = err {
            out.push(context);
            err = source;
        }
        out
    }

    /// The driver failure at the root of this error, if any.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self.kind() {
            DalError::Driver(err) | DalError::Lob(err) => Some(err),
            DalError::Cursor { source, .. } => Some(source),
            DalError::TransactionFailed { source, .. } | DalError::SessionSetup { source, .. } => {
                source.driver_error()
            }
            _ => None,
        }
    }

    /// Rollback failure compounded into a failed transaction.
    #[must_use]
    pub fn rollback_error(&self) -> Option<&DalError> {
        match self.kind() {
            DalError::TransactionFailed { rollback, .. } => rollback.as_deref(),
            _ => None,
        }
    }
}

/// Attach context while converting into [`DalError`].
pub trait ResultExt<T> {
    /// # Errors
    /// Returns the original error wrapped with the context built by `context`.
    fn with_context<F>(self, context: F) -> Result<T, DalError>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<DalError>,
{
    fn with_context<F>(self, context: F) -> Result<T, DalError>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|err| err.into().with_context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BindValue, Binds, RowValues};

    #[test]
    fn contexts_accumulate_and_kind_peels_them() {
        let err = DalError::from(DriverError::object_not_found("table missing").with_code("ORA-00942"))
            .with_context(ErrorContext::tag("inner").with_sql("select * from nope"))
            .with_context(ErrorContext::tag("outer"));

        assert!(matches!(err.kind(), DalError::Driver(_)));
        let tags: Vec<_> = err
            .contexts()
            .iter()
            .filter_map(|c| c.tag.clone())
            .collect();
        assert_eq!(tags, vec!["outer".to_string(), "inner".to_string()]);
        assert_eq!(
            err.driver_error().map(|e| e.code.as_deref()),
            Some(Some("ORA-00942"))
        );
    }

    #[test]
    fn display_hides_bind_values() {
        let binds = Binds::positional(vec![BindValue::from("s3cr3t")]);
        let err = DalError::from(DriverError::new("boom")).with_context(
            ErrorContext::tag("querySql")
                .with_sql("select :0 from dual")
                .with_binds(&binds),
        );
        let rendered = err.to_string();
        assert!(rendered.contains("select :0 from dual"));
        assert!(!rendered.contains("s3cr3t"));

        let ctx = err.contexts()[0];
        assert_eq!(
            ctx.binds(),
            Some(&Binds::positional(vec![BindValue::Value(RowValues::Text(
                "s3cr3t".into()
            ))]))
        );
    }

    #[test]
    fn transaction_failure_keeps_rollback_outcome() {
        let err = DalError::TransactionFailed {
            statement_index: 1,
            source: Box::new(DriverError::new("insert failed").into()),
            rollback: Some(Box::new(DriverError::new("rollback failed").into())),
        };
        assert!(err.to_string().contains("rollback also failed"));
        assert!(err.rollback_error().is_some());
        assert_eq!(err.driver_error().map(|e| e.message.as_str()), Some("insert failed"));
    }
}
