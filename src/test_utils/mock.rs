use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::driver::{DriverConnection, DriverCursor, DriverPool, ExecOptions, PoolStatus};
use crate::error::DriverError;
use crate::lob::{ChunkedLob, LobEvent, LobHandle, LobKind, LobStream};
use crate::results::{Columns, ExecResult, OutBinds};
use crate::types::{Binds, RowValues};

/// Scripted outcome of a statement.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<RowValues>>,
    },
    Affected(u64),
    OutBinds(Vec<(String, RowValues)>),
    Error(DriverError),
}

impl MockResponse {
    #[must_use]
    pub fn rows(columns: &[&str], rows: Vec<Vec<RowValues>>) -> Self {
        MockResponse::Rows {
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            rows,
        }
    }
}

/// CLOB value backed by an in-memory stream.
#[must_use]
pub fn clob(text: &str) -> RowValues {
    RowValues::Lob(LobHandle::new(
        LobKind::Clob,
        Box::new(ChunkedLob::new(text.as_bytes().to_vec(), 4)),
    ))
}

struct FailingLob;

#[async_trait]
impl LobStream for FailingLob {
    async fn next_event(&mut self) -> LobEvent {
        LobEvent::Error(DriverError::new("lob read failed"))
    }
}

/// CLOB value whose read always fails.
#[must_use]
pub fn failing_lob() -> RowValues {
    RowValues::Lob(LobHandle::new(LobKind::Clob, Box::new(FailingLob)))
}

#[derive(Default)]
struct Inner {
    rules: Vec<(String, VecDeque<MockResponse>)>,
    executed: Vec<String>,
    binds: Vec<Binds>,
    events: Vec<String>,
    fetch_sizes: Vec<usize>,
    acquire_failures: VecDeque<DriverError>,
    acquired: u32,
    released: u32,
    leaked: u32,
    in_use: u32,
    peak: u32,
    external_in_use: u32,
    commits: u32,
    rollbacks: u32,
    fail_commit: Option<DriverError>,
    fail_rollback: Option<DriverError>,
    fail_cursor_close: Option<DriverError>,
    fail_fetch: Option<(usize, DriverError)>,
    fail_release: Option<DriverError>,
    closed: bool,
}

impl Inner {
    fn respond(&mut self, sql: &str) -> Option<MockResponse> {
        let (_, queue) = self.rules.iter_mut().find(|(pattern, _)| sql.contains(pattern.as_str()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[derive(Default)]
struct MockState {
    inner: Mutex<Inner>,
}

impl MockState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`DriverPool`] that answers statements from scripted rules and
/// records everything it is asked to do.
///
/// Rules match by substring, first rule wins. A rule with several responses
/// hands them out in order and repeats the last one. Unmatched statements
/// succeed with an empty result.
#[derive(Clone)]
pub struct MockPool {
    state: Arc<MockState>,
    dialect: Dialect,
    pool_min: u32,
    pool_max: u32,
}

impl MockPool {
    #[must_use]
    pub fn new(pool_min: u32, pool_max: u32) -> Self {
        Self {
            state: Arc::default(),
            dialect: Dialect::Oracle,
            pool_min,
            pool_max,
        }
    }

    #[must_use]
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn when(&self, pattern: &str, responses: impl IntoIterator<Item = MockResponse>) -> &Self {
        self.state
            .lock()
            .rules
            .push((pattern.to_owned(), responses.into_iter().collect()));
        self
    }

    /// Make the next `get_connection` calls fail, one error per call.
    pub fn fail_acquire(&self, errors: impl IntoIterator<Item = DriverError>) {
        self.state.lock().acquire_failures.extend(errors);
    }

    pub fn fail_commit(&self, err: DriverError) {
        self.state.lock().fail_commit = Some(err);
    }

    pub fn fail_rollback(&self, err: DriverError) {
        self.state.lock().fail_rollback = Some(err);
    }

    pub fn fail_cursor_close(&self, err: DriverError) {
        self.state.lock().fail_cursor_close = Some(err);
    }

    /// Let the first `after` fetches on each cursor succeed, then fail.
    pub fn fail_fetch(&self, after: usize, err: DriverError) {
        self.state.lock().fail_fetch = Some((after, err));
    }

    pub fn fail_release(&self, err: DriverError) {
        self.state.lock().fail_release = Some(err);
    }

    /// Pretend `n` connections are checked out by someone else.
    pub fn set_external_in_use(&self, n: u32) {
        self.state.lock().external_in_use = n;
    }

    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    #[must_use]
    pub fn executed_binds(&self) -> Vec<Binds> {
        self.state.lock().binds.clone()
    }

    /// `execute:<sql>`, `open_cursor:<sql>`, `cursor_close`, `commit`,
    /// `rollback`, `release` in call order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }

    #[must_use]
    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.state.lock().fetch_sizes.clone()
    }

    #[must_use]
    pub fn acquired(&self) -> u32 {
        self.state.lock().acquired
    }

    #[must_use]
    pub fn released(&self) -> u32 {
        self.state.lock().released
    }

    /// Connections dropped without being released.
    #[must_use]
    pub fn leaked(&self) -> u32 {
        self.state.lock().leaked
    }

    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.state.lock().in_use
    }

    #[must_use]
    pub fn commits(&self) -> u32 {
        self.state.lock().commits
    }

    #[must_use]
    pub fn rollbacks(&self) -> u32 {
        self.state.lock().rollbacks
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl DriverPool for MockPool {
    type Conn = MockConnection;

    async fn get_connection(&self) -> Result<MockConnection, DriverError> {
        let mut inner = self.state.lock();
        if inner.closed {
            return Err(DriverError::new("pool is closed"));
        }
        if let Some(err) = inner.acquire_failures.pop_front() {
            return Err(err);
        }
        if inner.in_use + inner.external_in_use >= self.pool_max {
            return Err(DriverError::session_limit("all pooled connections are in use"));
        }
        inner.acquired += 1;
        inner.in_use += 1;
        inner.peak = inner.peak.max(inner.in_use);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            auto_commit: true,
            released: false,
        })
    }

    fn status(&self) -> PoolStatus {
        let inner = self.state.lock();
        let in_use = inner.in_use + inner.external_in_use;
        PoolStatus {
            connections_in_use: in_use,
            connections_open: self.pool_min.max(inner.peak).max(in_use),
            pool_max: self.pool_max,
            pool_min: self.pool_min,
        }
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
    auto_commit: bool,
    released: bool,
}

impl std::fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnection")
            .field("auto_commit", &self.auto_commit)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    type Cursor = MockCursor;

    async fn execute(
        &mut self,
        sql: &str,
        binds: &Binds,
        opts: &ExecOptions,
    ) -> Result<ExecResult, DriverError> {
        let mut inner = self.state.lock();
        inner.executed.push(sql.to_owned());
        inner.binds.push(binds.clone());
        inner.events.push(format!("execute:{sql}"));
        match inner.respond(sql) {
            None => Ok(ExecResult::default()),
            Some(MockResponse::Rows { columns, mut rows }) => {
                rows.truncate(opts.max_rows);
                Ok(ExecResult::with_rows(Arc::new(Columns::new(columns)), rows))
            }
            Some(MockResponse::Affected(n)) => Ok(ExecResult::affected(n)),
            Some(MockResponse::OutBinds(values)) => Ok(ExecResult::with_out_binds(OutBinds(values))),
            Some(MockResponse::Error(err)) => Err(err),
        }
    }

    async fn open_cursor(
        &mut self,
        sql: &str,
        binds: &Binds,
        _opts: &ExecOptions,
    ) -> Result<MockCursor, DriverError> {
        let mut inner = self.state.lock();
        inner.executed.push(sql.to_owned());
        inner.binds.push(binds.clone());
        inner.events.push(format!("open_cursor:{sql}"));
        let (columns, rows) = match inner.respond(sql) {
            Some(MockResponse::Rows { columns, rows }) => (columns, rows),
            Some(MockResponse::Error(err)) => return Err(err),
            _ => (Vec::new(), Vec::new()),
        };
        Ok(MockCursor {
            state: Arc::clone(&self.state),
            columns: Arc::new(Columns::new(columns)),
            rows: rows.into(),
            fetches: 0,
        })
    }

    fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        let mut inner = self.state.lock();
        inner.events.push("commit".into());
        if let Some(err) = inner.fail_commit.clone() {
            return Err(err);
        }
        inner.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        let mut inner = self.state.lock();
        inner.events.push("rollback".into());
        if let Some(err) = inner.fail_rollback.clone() {
            return Err(err);
        }
        inner.rollbacks += 1;
        Ok(())
    }

    async fn release(mut self) -> Result<(), DriverError> {
        self.released = true;
        let mut inner = self.state.lock();
        inner.events.push("release".into());
        inner.released += 1;
        inner.in_use = inner.in_use.saturating_sub(1);
        match inner.fail_release.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.released {
            let mut inner = self.state.lock();
            inner.leaked += 1;
            inner.in_use = inner.in_use.saturating_sub(1);
        }
    }
}

pub struct MockCursor {
    state: Arc<MockState>,
    columns: Arc<Columns>,
    rows: VecDeque<Vec<RowValues>>,
    fetches: usize,
}

#[async_trait]
impl DriverCursor for MockCursor {
    fn columns(&self) -> Arc<Columns> {
        Arc::clone(&self.columns)
    }

    async fn get_rows(&mut self, n: usize) -> Result<Vec<Vec<RowValues>>, DriverError> {
        let mut inner = self.state.lock();
        inner.fetch_sizes.push(n);
        if let Some((after, err)) = &inner.fail_fetch {
            if self.fetches >= *after {
                return Err(err.clone());
            }
        }
        drop(inner);
        self.fetches += 1;
        let take = n.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    async fn close(self) -> Result<(), DriverError> {
        let mut inner = self.state.lock();
        inner.events.push("cursor_close".into());
        match inner.fail_cursor_close.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
