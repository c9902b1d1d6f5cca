use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::driver::DriverCursor;
use crate::error::DriverError;
use crate::results::Columns;
use crate::types::RowValues;

use super::config::SharedSqliteConnection;
use super::params::Params;
use super::query::extract_row;

type Batch = Result<Vec<Vec<RowValues>>, DriverError>;

enum Command {
    Fetch {
        n: usize,
        respond_to: oneshot::Sender<Batch>,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
}

/// Cursor over a prepared `SQLite` statement.
///
/// rusqlite's `Rows` borrows its statement, which borrows the connection, so
/// the whole chain lives on a dedicated thread that holds the connection lock
/// until the cursor is closed. Batches are requested over a channel.
pub struct SqliteCursor {
    columns: Arc<Columns>,
    sender: mpsc::Sender<Command>,
}

fn worker_gone() -> DriverError {
    DriverError::new("sqlite cursor worker terminated")
}

impl SqliteCursor {
    pub(crate) async fn open(
        conn: SharedSqliteConnection,
        sql: String,
        params: Params,
        begin: bool,
    ) -> Result<Self, DriverError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("sqlite-cursor".into())
            .spawn(move || run_cursor(&conn, &sql, &params, begin, ready_tx, &receiver))
            .map_err(|e| DriverError::new(format!("failed to spawn sqlite cursor thread: {e}")))?;

        let columns = ready_rx.await.map_err(|_| worker_gone())??;
        Ok(Self { columns, sender })
    }
}

fn run_cursor(
    conn: &SharedSqliteConnection,
    sql: &str,
    params: &Params,
    begin: bool,
    ready: oneshot::Sender<Result<Arc<Columns>, DriverError>>,
    receiver: &mpsc::Receiver<Command>,
) {
    let guard = conn.blocking_lock();
    if begin && guard.is_autocommit() {
        if let Err(e) = guard.execute_batch("BEGIN") {
            let _ = ready.send(Err(e.into()));
            return;
        }
    }
    let mut stmt = match guard.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };
    if let Err(e) = params.bind(&mut stmt) {
        let _ = ready.send(Err(e));
        return;
    }
    let columns = Arc::new(Columns::new(
        stmt.column_names().into_iter().map(str::to_owned).collect(),
    ));
    let width = columns.len();
    let mut rows = stmt.raw_query();
    if ready.send(Ok(columns)).is_err() {
        return;
    }

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Fetch { n, respond_to } => {
                let mut batch = Vec::with_capacity(n);
                let outcome = loop {
                    if batch.len() >= n {
                        break Ok(batch);
                    }
                    match rows.next() {
                        Ok(Some(row)) => match extract_row(row, width) {
                            Ok(values) => batch.push(values),
                            Err(e) => break Err(e),
                        },
                        Ok(None) => break Ok(batch),
                        Err(e) => break Err(e.into()),
                    }
                };
                let _ = respond_to.send(outcome);
            }
            Command::Close { respond_to } => {
                drop(rows);
                drop(stmt);
                drop(guard);
                let _ = respond_to.send(());
                return;
            }
        }
    }
    debug!("sqlite cursor dropped without close");
}

#[async_trait]
impl DriverCursor for SqliteCursor {
    fn columns(&self) -> Arc<Columns> {
        Arc::clone(&self.columns)
    }

    async fn get_rows(&mut self, n: usize) -> Result<Vec<Vec<RowValues>>, DriverError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(Command::Fetch { n, respond_to })
            .map_err(|_| worker_gone())?;
        response.await.map_err(|_| worker_gone())?
    }

    async fn close(self) -> Result<(), DriverError> {
        let (respond_to, response) = oneshot::channel();
        if self.sender.send(Command::Close { respond_to }).is_err() {
            // worker already exited and dropped its statement
            return Ok(());
        }
        response.await.map_err(|_| worker_gone())
    }
}
