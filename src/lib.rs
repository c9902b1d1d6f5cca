//! Data access layer over a pooled SQL database.
//!
//! [`Dal`] wraps a driver pool and offers promise-style operations on top of it:
//! connection acquisition with saturation backoff, single statements with row
//! cardinality checks, transactions, paginated cursor streaming with large
//! object inlining, stored procedure calls with line output, and table-level
//! helpers built on a pluggable [`SqlBuilder`]. Every failure surfaces as a
//! [`DalError`] carrying the SQL and binds of the failed call.
//!
//! The orchestration is written against the capability traits in [`driver`].
//! A `SQLite` backend ships behind the default `sqlite` feature.
//!
//! ```rust,no_run
//! use sql_dal::prelude::*;
//!
//! # #[cfg(feature = "sqlite")]
//! # async fn demo() -> Result<(), DalError> {
//! let cfg = DalConfig::builder("/tmp/people.db").pool_size(1, 4).finish()?;
//! let dal = Dal::new_sqlite(cfg).await?;
//!
//! dal.query_sql(
//!     "CREATE TABLE IF NOT EXISTS person (id INTEGER PRIMARY KEY, name TEXT)",
//!     Binds::none(),
//!     QueryOptions::new(),
//! )
//! .await?;
//! let rows = dal
//!     .select_all_rows_sql("SELECT id, name FROM person", Binds::none(), QueryOptions::new().limit(10))
//!     .await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod builder;
pub mod callback;
pub mod config;
pub mod dal;
pub mod dialect;
pub mod driver;
pub mod dynamic;
pub mod error;
pub mod lob;
pub mod options;
pub mod pagination;
pub mod pool;
pub mod prelude;
pub mod procedure;
pub mod results;
pub mod types;

mod executor;
mod streamer;
mod transaction;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use builder::{BasicSqlBuilder, Filter, SqlBuilder, TableQuery};
pub use config::{ConnectionConfig, DalConfig};
pub use dal::Dal;
pub use dialect::Dialect;
pub use error::{DalError, DriverError, DriverErrorKind, ErrorContext};
pub use options::{AcquireFailure, AcquireOptions, QueryOptions, SessionContext};
pub use procedure::ProcedureResult;
pub use results::{ExecResult, Row};
pub use types::{BindParam, BindValue, Binds, OutFormat, RowValues, SqlBind};
