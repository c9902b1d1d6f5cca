//! Transaction Coordinator: an ordered list of statements on one connection,
//! committed together or rolled back together.

use tracing::{debug, warn};

use crate::dal::Dal;
use crate::driver::{DriverConnection, DriverPool};
use crate::error::{DalError, ErrorContext, ResultExt};
use crate::options::QueryOptions;
use crate::pool::Lease;
use crate::results::ExecResult;
use crate::types::SqlBind;

impl<P: DriverPool> Dal<P> {
    /// Run `statements` in order inside one transaction.
    ///
    /// Auto-commit is switched off for the duration and restored afterwards. On
    /// the first failure the transaction is rolled back and the error names the
    /// failing statement; a failed rollback is attached to it rather than
    /// replacing it. A caller-supplied connection is committed before this
    /// returns and stays checked out.
    ///
    /// # Errors
    /// `TransactionFailed` for a statement failure, the driver error for a
    /// failed commit, or an acquisition error.
    pub async fn execute_transaction(
        &self,
        statements: Vec<SqlBind>,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<Vec<ExecResult>, DalError> {
        let exec_opts = self.gateway().exec_options(opts.out_format);
        let mut lease = self
            .gateway()
            .lease(opts.connection, opts.session_ctx.as_ref())
            .await
            .with_context(|| ErrorContext::tag("executeTransaction"))?;

        let was_auto = lease.conn().auto_commit();
        lease.conn().set_auto_commit(false);
        debug!(statements = statements.len(), owned = lease.is_owned(), "transaction started");

        let mut results = Vec::with_capacity(statements.len());
        for (index, stmt) in statements.iter().enumerate() {
            debug!(index, sql = %stmt.sql, "transaction statement");
            match lease.conn().execute(&stmt.sql, &stmt.binds, &exec_opts).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    let source = DalError::from(err).with_context(
                        ErrorContext::tag("executeTransaction")
                            .with_sql(stmt.sql.as_str())
                            .with_binds(&stmt.binds),
                    );
                    let rollback = roll_back(&mut lease).await;
                    finish(lease, was_auto).await;
                    return Err(DalError::TransactionFailed {
                        statement_index: index,
                        source: Box::new(source),
                        rollback: rollback.map(Box::new),
                    });
                }
            }
        }

        if let Err(err) = lease.conn().commit().await {
            warn!(error = %err, "transaction commit failed");
            finish(lease, was_auto).await;
            return Err(DalError::from(err).with_context(ErrorContext::tag("executeTransaction commit")));
        }
        debug!(statements = results.len(), "transaction committed");

        lease.conn().set_auto_commit(was_auto);
        lease
            .release()
            .await
            .with_context(|| ErrorContext::tag("executeTransaction release"))?;
        Ok(results)
    }
}

async fn roll_back<C: DriverConnection>(lease: &mut Lease<'_, C>) -> Option<DalError> {
    match lease.conn().rollback().await {
        Ok(()) => {
            debug!("transaction rolled back");
            None
        }
        Err(err) => {
            warn!(error = %err, "transaction rollback failed");
            Some(DalError::from(err).with_context(ErrorContext::tag("executeTransaction rollback")))
        }
    }
}

// restore the caller-visible auto-commit mode and give back an owned connection
async fn finish<C: DriverConnection>(mut lease: Lease<'_, C>, was_auto: bool) {
    lease.conn().set_auto_commit(was_auto);
    lease.release_quietly("executeTransaction").await;
}
