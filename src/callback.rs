//! Callback form of the async operations.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::DalError;

/// Drive `future` on the tokio runtime and hand its outcome to `callback`.
///
/// The callback receives exactly the `Result` an `.await` would have produced.
/// The future must own what it borrows, so clone the [`Dal`](crate::dal::Dal)
/// into it:
///
/// ```rust,no_run
/// # #[cfg(feature = "sqlite")]
/// # async fn demo(dal: sql_dal::sqlite::SqliteDal) {
/// use sql_dal::prelude::*;
///
/// let dal2 = dal.clone();
/// let handle = sql_dal::callback::nodeify(
///     async move {
///         dal2.select_one_value_sql("SELECT 1", Binds::none(), QueryOptions::new())
///             .await
///     },
///     |result| match result {
///         Ok(value) => println!("got {value:?}"),
///         Err(err) => eprintln!("failed: {err}"),
///     },
/// );
/// handle.await.ok();
/// # }
/// ```
pub fn nodeify<T, F, C>(future: F, callback: C) -> JoinHandle<()>
where
    F: Future<Output = Result<T, DalError>> + Send + 'static,
    T: Send + 'static,
    C: FnOnce(Result<T, DalError>) + Send + 'static,
{
    tokio::spawn(async move {
        callback(future.await);
    })
}
