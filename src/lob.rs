//! Large-object handles and their streaming reads.
//!
//! A driver hands out a [`LobHandle`] in place of a value that is too large to
//! return inline. Reading it drains the underlying [`LobStream`] until one of
//! its terminal events: `Close` resolves the value, `Error` fails the read.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{DalError, DriverError};
use crate::types::RowValues;

/// Character or binary large object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    Clob,
    Blob,
}

impl fmt::Display for LobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LobKind::Clob => "clob",
            LobKind::Blob => "blob",
        })
    }
}

/// Event emitted by a large-object stream.
#[derive(Debug)]
pub enum LobEvent {
    Data(Vec<u8>),
    Close,
    Error(DriverError),
}

/// Readable large-object stream exposed by a driver.
#[async_trait]
pub trait LobStream: Send {
    async fn next_event(&mut self) -> LobEvent;
}

/// Shareable handle to an unread large object. A handle can be read once.
#[derive(Clone)]
pub struct LobHandle {
    kind: LobKind,
    stream: Arc<Mutex<Option<Box<dyn LobStream>>>>,
}

impl LobHandle {
    #[must_use]
    pub fn new(kind: LobKind, stream: Box<dyn LobStream>) -> Self {
        Self {
            kind,
            stream: Arc::new(Mutex::new(Some(stream))),
        }
    }

    #[must_use]
    pub fn kind(&self) -> LobKind {
        self.kind
    }

    /// Drain the stream and return its bytes.
    ///
    /// # Errors
    /// Returns `DalError::Lob` if the stream reports an error or was already consumed.
    pub async fn read_to_end(&self) -> Result<Vec<u8>, DalError> {
        let mut guard = self.stream.lock().await;
        let mut stream = guard
            .take()
            .ok_or_else(|| DalError::Lob(DriverError::new("large object already consumed")))?;
        drop(guard);

        let mut out = Vec::new();
        loop {
            match stream.next_event().await {
                LobEvent::Data(chunk) => out.extend_from_slice(&chunk),
                LobEvent::Close => return Ok(out),
                LobEvent::Error(err) => return Err(DalError::Lob(err)),
            }
        }
    }

    /// Read the object and return the materialized value: `Text` for CLOBs, `Blob` otherwise.
    ///
    /// # Errors
    /// Returns `DalError::Lob` if the read fails or a CLOB is not valid UTF-8.
    pub async fn materialize(&self) -> Result<RowValues, DalError> {
        let bytes = self.read_to_end().await?;
        match self.kind {
            LobKind::Clob => String::from_utf8(bytes).map(RowValues::Text).map_err(|e| {
                DalError::Lob(DriverError::new(format!("clob is not valid utf-8: {e}")))
            }),
            LobKind::Blob => Ok(RowValues::Blob(bytes)),
        }
    }
}

impl fmt::Debug for LobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LobHandle").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl PartialEq for LobHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.stream, &other.stream)
    }
}

/// Stream over bytes already held in memory, emitted in fixed-size chunks.
pub struct ChunkedLob {
    data: Vec<u8>,
    pos: usize,
    chunk_size: usize,
}

impl ChunkedLob {
    #[must_use]
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl LobStream for ChunkedLob {
    async fn next_event(&mut self) -> LobEvent {
        if self.pos >= self.data.len() {
            return LobEvent::Close;
        }
        let end = (self.pos + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        LobEvent::Data(chunk)
    }
}
