//! Per-call options.

use std::fmt;

use crate::error::DalError;
use crate::types::OutFormat;

/// Session-context attributes set through one procedure call per attribute,
/// `procedure(:name, :value)`, right after a connection is acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub procedure: String,
    pub attributes: Vec<(String, String)>,
}

impl SessionContext {
    #[must_use]
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }
}

/// Options for one operation.
///
/// With `connection` set the operation runs on the caller's connection and
/// leaves it checked out; otherwise a connection is acquired and released
/// inside the call.
pub struct QueryOptions<'c, C> {
    /// Overrides the pool-wide `outFormat`.
    pub out_format: Option<OutFormat>,
    pub limit: Option<usize>,
    /// 1-based; only meaningful with `limit`.
    pub page: Option<usize>,
    pub total_count: bool,
    /// Inline large objects into `Text`/`Blob` values.
    pub fetch_clobs: bool,
    pub connection: Option<&'c mut C>,
    pub session_ctx: Option<SessionContext>,
    /// Capture server-side line output of a procedure call.
    pub dbms_output: bool,
    /// Overrides the pool-wide cursor batch size.
    pub batch_size: Option<usize>,
}

impl<C> Default for QueryOptions<'_, C> {
    fn default() -> Self {
        Self {
            out_format: None,
            limit: None,
            page: None,
            total_count: false,
            fetch_clobs: false,
            connection: None,
            session_ctx: None,
            dbms_output: false,
            batch_size: None,
        }
    }
}

impl<C> fmt::Debug for QueryOptions<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("out_format", &self.out_format)
            .field("limit", &self.limit)
            .field("page", &self.page)
            .field("total_count", &self.total_count)
            .field("fetch_clobs", &self.fetch_clobs)
            .field("reuse_connection", &self.connection.is_some())
            .field("session_ctx", &self.session_ctx)
            .field("dbms_output", &self.dbms_output)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl<'c, C> QueryOptions<'c, C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn out_format(mut self, out_format: OutFormat) -> Self {
        self.out_format = Some(out_format);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn total_count(mut self, total_count: bool) -> Self {
        self.total_count = total_count;
        self
    }

    #[must_use]
    pub fn fetch_clobs(mut self, fetch_clobs: bool) -> Self {
        self.fetch_clobs = fetch_clobs;
        self
    }

    /// Run on a connection the caller already holds.
    #[must_use]
    pub fn connection(mut self, connection: &'c mut C) -> Self {
        self.connection = Some(connection);
        self
    }

    #[must_use]
    pub fn session_ctx(mut self, ctx: SessionContext) -> Self {
        self.session_ctx = Some(ctx);
        self
    }

    #[must_use]
    pub fn dbms_output(mut self, dbms_output: bool) -> Self {
        self.dbms_output = dbms_output;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Drop the pagination hints (they were already applied to the SQL text).
    #[must_use]
    pub(crate) fn without_paging(mut self) -> Self {
        self.limit = None;
        self.page = None;
        self.total_count = false;
        self
    }
}

/// Options for [`Dal::get_db_connection`](crate::dal::Dal::get_db_connection).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquireOptions {
    pub session_ctx: Option<SessionContext>,
}

/// Session setup failed on a connection that was checked out successfully.
/// The caller owns `connection` and decides whether to use or release it.
pub struct AcquireFailure<C> {
    pub error: DalError,
    pub connection: Option<C>,
}

impl<C> AcquireFailure<C> {
    /// Failure before any connection was checked out.
    #[must_use]
    pub fn without_connection(error: DalError) -> Self {
        Self {
            error,
            connection: None,
        }
    }
}

impl<C> fmt::Debug for AcquireFailure<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireFailure")
            .field("error", &self.error)
            .field("has_connection", &self.connection.is_some())
            .finish()
    }
}

impl<C> fmt::Display for AcquireFailure<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<C> std::error::Error for AcquireFailure<C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
