//! Result Set Streamer: drains a server-side cursor in fixed-size batches.

use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::{debug, warn};

use crate::dal::Dal;
use crate::driver::{DriverConnection, DriverCursor, DriverPool};
use crate::error::{CursorPhase, DalError, ErrorContext, ResultExt};
use crate::options::QueryOptions;
use crate::pagination::{PageRequest, paginate};
use crate::results::{Columns, Row};
use crate::types::{Binds, RowValues};

impl<P: DriverPool> Dal<P> {
    /// All rows of a query, read through a cursor `batchSize` rows at a time.
    ///
    /// With `limit` set the query is first rewritten to return only the
    /// requested page. With `fetch_clobs` every large object is read and
    /// replaced by its `Text`/`Blob` value before the connection goes back.
    /// The cursor is always closed before the connection is released.
    ///
    /// # Errors
    /// `Cursor` naming the failed phase, `Lob` for a failed inline read,
    /// `InvalidArgument` for bad paging or batch size, acquisition errors.
    pub async fn select_all_rows_sql(
        &self,
        sql: &str,
        binds: Binds,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<Vec<Row>, DalError> {
        let context = |sql: &str, binds: &Binds| {
            ErrorContext::tag("selectAllRowsSql")
                .with_sql(sql)
                .with_binds(binds)
        };

        let sql = match opts.limit {
            Some(limit) => {
                let req = PageRequest::new(limit)
                    .page(opts.page.unwrap_or(1))
                    .total_count(opts.total_count);
                let style = self.dialect().pagination_style(self.db_major_version()?);
                paginate(sql, style, &req).with_context(|| context(sql, &binds))?
            }
            None => sql.to_owned(),
        };
        let batch_size = opts.batch_size.unwrap_or(self.config().batch_size);
        if batch_size == 0 {
            return Err(DalError::InvalidArgument("batchSize must be at least 1".into())
                .with_context(context(&sql, &binds)));
        }

        let exec_opts = self.gateway().exec_options(opts.out_format);
        let mut lease = self
            .gateway()
            .lease(opts.connection, opts.session_ctx.as_ref())
            .await
            .with_context(|| ErrorContext::tag("selectAllRowsSql").with_sql(sql.as_str()))?;

        let mut cursor = match lease.conn().open_cursor(&sql, &binds, &exec_opts).await {
            Ok(cursor) => cursor,
            Err(source) => {
                lease.release_quietly("selectAllRowsSql open").await;
                return Err(DalError::Cursor {
                    phase: CursorPhase::Open,
                    source,
                }
                .with_context(context(&sql, &binds)));
            }
        };

        let columns = cursor.columns();
        let drained = drain(&mut cursor, &columns, batch_size, opts.fetch_clobs).await;

        // close before release, whatever the drain produced
        let closed = cursor.close().await;
        match (drained, closed) {
            (Ok(rows), Ok(())) => {
                lease
                    .release()
                    .await
                    .with_context(|| ErrorContext::tag("selectAllRowsSql release"))?;
                debug!(rows = rows.len(), batch_size, "cursor drained");
                Ok(rows)
            }
            (Ok(_), Err(source)) => {
                lease.release_quietly("selectAllRowsSql close").await;
                Err(DalError::Cursor {
                    phase: CursorPhase::Close,
                    source,
                }
                .with_context(context(&sql, &binds)))
            }
            (Err(err), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "cursor close failed after an earlier error");
                }
                lease.release_quietly("selectAllRowsSql fetch").await;
                Err(err.with_context(context(&sql, &binds)))
            }
        }
    }
}

async fn drain<K: DriverCursor>(
    cursor: &mut K,
    columns: &Arc<Columns>,
    batch_size: usize,
    fetch_clobs: bool,
) -> Result<Vec<Row>, DalError> {
    let mut rows = Vec::new();
    loop {
        let batch = cursor
            .get_rows(batch_size)
            .await
            .map_err(|source| DalError::Cursor {
                phase: CursorPhase::Fetch,
                source,
            })?;
        let fetched = batch.len();
        let batch = if fetch_clobs {
            inline_lobs(batch).await?
        } else {
            batch
        };
        rows.extend(
            batch
                .into_iter()
                .map(|values| Row::new(Arc::clone(columns), values)),
        );
        if fetched < batch_size {
            return Ok(rows);
        }
    }
}

/// Replace every large-object handle in a batch by its content; reads run
/// concurrently and the first failure fails the batch.
async fn inline_lobs(batch: Vec<Vec<RowValues>>) -> Result<Vec<Vec<RowValues>>, DalError> {
    try_join_all(batch.into_iter().map(|values| async move {
        try_join_all(values.into_iter().map(|value| async move {
            match value {
                RowValues::Lob(lob) => lob.materialize().await,
                other => Ok(other),
            }
        }))
        .await
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lob::{ChunkedLob, LobHandle, LobKind};

    #[tokio::test]
    async fn inline_lobs_leaves_scalars_alone() {
        let clob = LobHandle::new(LobKind::Clob, Box::new(ChunkedLob::new(b"hello".to_vec(), 2)));
        let batch = vec![vec![RowValues::Int(1), RowValues::Lob(clob)]];
        let out = inline_lobs(batch).await.unwrap();
        assert_eq!(out, vec![vec![RowValues::Int(1), RowValues::Text("hello".into())]]);
    }
}
