//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types so that a single
//! `use sql_dal::prelude::*;` covers everyday use.

pub use crate::builder::{Filter, SqlBuilder, TableQuery};
pub use crate::config::DalConfig;
pub use crate::dal::Dal;
pub use crate::dialect::Dialect;
pub use crate::error::{DalError, ErrorContext, ResultExt};
pub use crate::options::{AcquireOptions, QueryOptions, SessionContext};
pub use crate::results::{ExecResult, Row};
pub use crate::types::{
    BindDirection, BindParam, BindValue, Binds, DbType, OutFormat, RowValues, SqlBind,
};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteDal;
