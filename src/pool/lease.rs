use tracing::warn;

use crate::driver::DriverConnection;
use crate::error::DalError;

/// A connection held for the duration of one operation.
///
/// `Owned` connections were acquired by the operation and must go back to the
/// pool before it returns. `Borrowed` ones belong to the caller and are never
/// released here.
pub(crate) enum Lease<'c, C> {
    Owned(C),
    Borrowed(&'c mut C),
}

impl<C: DriverConnection> Lease<'_, C> {
    pub(crate) fn conn(&mut self) -> &mut C {
        match self {
            Lease::Owned(conn) => conn,
            Lease::Borrowed(conn) => conn,
        }
    }

    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Lease::Owned(_))
    }

    /// Return an owned connection to the pool.
    pub(crate) async fn release(self) -> Result<(), DalError> {
        match self {
            Lease::Owned(conn) => conn.release().await.map_err(DalError::from),
            Lease::Borrowed(_) => Ok(()),
        }
    }

    /// Release after an earlier failure; a release error is logged and dropped
    /// so that it never masks the error being reported.
    pub(crate) async fn release_quietly(self, tag: &str) {
        if let Err(err) = self.release().await {
            warn!(tag, error = %err, "best-effort connection release failed");
        }
    }
}
