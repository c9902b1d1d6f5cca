// SQLite backend - rusqlite connections pooled by bb8
//
// - config: connection manager, pool and `Dal` construction
// - connection: statement execution and transaction control on one connection
// - cursor: worker-thread cursors fetched in batches
// - params: bind conversion into rusqlite values
// - query: statement execution and value extraction

pub mod config;
pub mod connection;
pub mod cursor;
pub mod params;
pub mod query;

pub use config::{SharedSqliteConnection, SqliteManager, SqlitePool};
pub use connection::SqliteConnection;
pub use cursor::SqliteCursor;

/// Data access layer over a `SQLite` pool.
pub type SqliteDal = crate::dal::Dal<SqlitePool>;
