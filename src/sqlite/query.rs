use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};

use crate::error::DriverError;
use crate::lob::{ChunkedLob, LobHandle, LobKind};
use crate::results::{Columns, ExecResult};
use crate::types::RowValues;

use super::params::Params;

const BLOB_CHUNK: usize = 8 * 1024;

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        let code = err.sqlite_error_code();
        let mut out = if message.contains("no such table") || message.contains("no such view") {
            DriverError::object_not_found(message)
        } else if code == Some(ErrorCode::DatabaseBusy) {
            DriverError::session_limit(message)
        } else {
            DriverError::new(message)
        };
        if let Some(code) = code {
            out = out.with_code(format!("{code:?}"));
        }
        out
    }
}

/// Execute one statement to completion.
///
/// Statements without result columns report `rows_affected`. Queries return at
/// most `max_rows` rows; data-changing statements with a `RETURNING` clause are
/// still stepped to the end and also report `rows_affected`.
pub(crate) fn execute_statement(
    conn: &Connection,
    sql: &str,
    params: &Params,
    max_rows: usize,
) -> Result<ExecResult, DriverError> {
    let mut stmt = conn.prepare(sql)?;
    params.bind(&mut stmt)?;

    let width = stmt.column_count();
    if width == 0 {
        let affected = stmt.raw_execute()?;
        return Ok(ExecResult::affected(affected as u64));
    }

    let columns = Arc::new(Columns::new(
        stmt.column_names().into_iter().map(str::to_owned).collect(),
    ));
    let readonly = stmt.readonly();
    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        if out.len() < max_rows {
            out.push(extract_row(row, width)?);
        } else if readonly {
            break;
        }
    }
    drop(rows);

    let mut result = ExecResult::with_rows(columns, out);
    if !readonly {
        result.rows_affected = Some(conn.changes());
    }
    Ok(result)
}

pub(crate) fn extract_row(row: &rusqlite::Row<'_>, width: usize) -> Result<Vec<RowValues>, DriverError> {
    (0..width)
        .map(|i| Ok(extract_value(row.get_ref(i)?)))
        .collect()
}

fn extract_value(value: ValueRef<'_>) -> RowValues {
    match value {
        ValueRef::Null => RowValues::Null,
        ValueRef::Integer(i) => RowValues::Int(i),
        ValueRef::Real(f) => RowValues::Float(f),
        ValueRef::Text(bytes) => RowValues::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => RowValues::Lob(LobHandle::new(
            LobKind::Blob,
            Box::new(ChunkedLob::new(bytes.to_vec(), BLOB_CHUNK)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Binds;

    fn db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO t (name) VALUES ('a'), ('b'), ('c');",
        )
        .unwrap();
        conn
    }

    fn none() -> Params {
        Params::convert(&Binds::none()).unwrap()
    }

    #[test]
    fn dml_reports_rows_affected() {
        let conn = db();
        let result = execute_statement(&conn, "DELETE FROM t WHERE id > 1", &none(), 10).unwrap();
        assert_eq!(result.rows_affected, Some(2));
        assert!(result.rows.is_none());
    }

    #[test]
    fn queries_stop_at_max_rows() {
        let conn = db();
        let result = execute_statement(&conn, "SELECT id, name FROM t ORDER BY id", &none(), 2).unwrap();
        assert_eq!(result.rows().len(), 2);
        assert_eq!(result.rows()[1].get("name"), Some(&RowValues::Text("b".into())));
        assert_eq!(result.rows_affected, None);
    }

    #[test]
    fn returning_clause_reports_rows_and_changes() {
        let conn = db();
        let result = execute_statement(
            &conn,
            "UPDATE t SET name = name || '!' RETURNING id",
            &none(),
            1,
        )
        .unwrap();
        assert_eq!(result.rows().len(), 1);
        assert_eq!(result.rows_affected, Some(3));
    }

    #[test]
    fn missing_table_is_object_not_found() {
        let conn = db();
        let err = execute_statement(&conn, "SELECT * FROM nope", &none(), 10).unwrap_err();
        assert_eq!(err.kind, crate::error::DriverErrorKind::ObjectNotFound);
    }

    #[test]
    fn blobs_come_back_as_lob_handles() {
        let conn = db();
        let result = execute_statement(&conn, "SELECT x'0102'", &none(), 1).unwrap();
        assert!(result.rows()[0].get_by_index(0).unwrap().as_lob().is_some());
    }
}
