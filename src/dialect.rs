//! SQL text that differs between database families.

use std::fmt;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::Deserialize;

use crate::error::DalError;

/// Database family behind a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Oracle,
    Sqlite,
}

/// How a page of rows is carved out of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `OFFSET n ROWS FETCH NEXT m ROWS ONLY` (Oracle 12c and later).
    OffsetFetch,
    /// `rownum`-bounded subquery with a `rowid` tiebreaker (older Oracle).
    RowNum,
    /// `LIMIT m OFFSET n`.
    LimitOffset,
}

// schema.package.object, each part a plain identifier
static OBJECT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$#]*(\.[A-Za-z_][A-Za-z0-9_$#]*){0,2}$")
        .expect("static regex")
});

static PARAM_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex")
});

/// Reject anything that is not a (possibly qualified) identifier before it is
/// spliced into SQL text.
///
/// # Errors
/// Returns `DalError::InvalidArgument` for anything else.
pub fn check_object_name<'a>(what: &str, name: &'a str) -> Result<&'a str, DalError> {
    if OBJECT_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(DalError::InvalidArgument(format!(
            "{what} `{name}` is not a valid identifier"
        )))
    }
}

impl Dialect {
    /// `db_major` is the major version from the configuration (`dbVer`).
    #[must_use]
    pub fn pagination_style(self, db_major: u32) -> PaginationStyle {
        match self {
            Dialect::Oracle if db_major >= 12 => PaginationStyle::OffsetFetch,
            Dialect::Oracle => PaginationStyle::RowNum,
            Dialect::Sqlite => PaginationStyle::LimitOffset,
        }
    }

    /// Statement applying one session parameter.
    ///
    /// # Errors
    /// Returns `DalError::InvalidArgument` if `name` is not a plain identifier.
    pub fn session_parameter_sql(self, name: &str, value: &str) -> Result<String, DalError> {
        if !PARAM_NAME.is_match(name) {
            return Err(DalError::InvalidArgument(format!(
                "session parameter `{name}` is not a valid identifier"
            )));
        }
        let quoted = value.replace('\'', "''");
        Ok(match self {
            Dialect::Oracle => format!("ALTER SESSION SET {name} = '{quoted}'"),
            Dialect::Sqlite => format!("PRAGMA {name} = '{quoted}'"),
        })
    }

    /// Single-row query yielding the next value of `sequence`.
    ///
    /// `SQLite` has no sequences; a one-row counter table with a `next_val`
    /// column stands in for one.
    ///
    /// # Errors
    /// Returns `DalError::InvalidArgument` for a malformed sequence name.
    pub fn next_sequence_sql(self, sequence: &str) -> Result<String, DalError> {
        let sequence = check_object_name("sequence", sequence)?;
        Ok(match self {
            Dialect::Oracle => format!("SELECT {sequence}.NEXTVAL FROM dual"),
            Dialect::Sqlite => {
                format!("UPDATE {sequence} SET next_val = next_val + 1 RETURNING next_val")
            }
        })
    }

    /// Anonymous block calling `procedure` with the given argument expressions.
    ///
    /// # Errors
    /// `Unimplemented` where the database has no stored procedures,
    /// `InvalidArgument` for a malformed name.
    pub fn procedure_call_sql(self, procedure: &str, args: &[String]) -> Result<String, DalError> {
        self.require_procedures("stored procedures")?;
        let procedure = check_object_name("procedure", procedure)?;
        Ok(format!("BEGIN {procedure}({}); END;", args.join(", ")))
    }

    /// Call setting one session-context attribute; binds `:name` and `:value`.
    ///
    /// # Errors
    /// Same as [`Dialect::procedure_call_sql`].
    pub fn session_context_sql(self, procedure: &str) -> Result<String, DalError> {
        self.procedure_call_sql(procedure, &[":name".to_owned(), ":value".to_owned()])
    }

    /// # Errors
    /// `Unimplemented` where the database has no server-side line output.
    pub fn enable_output_sql(self) -> Result<&'static str, DalError> {
        self.require_procedures("line output")?;
        Ok("BEGIN DBMS_OUTPUT.ENABLE(NULL); END;")
    }

    /// Fetches one buffered line into `:ln`; `:st` is 1 once the buffer is empty.
    ///
    /// # Errors
    /// `Unimplemented` where the database has no server-side line output.
    pub fn get_line_sql(self) -> Result<&'static str, DalError> {
        self.require_procedures("line output")?;
        Ok("BEGIN DBMS_OUTPUT.GET_LINE(:ln, :st); END;")
    }

    fn require_procedures(self, feature: &str) -> Result<(), DalError> {
        match self {
            Dialect::Oracle => Ok(()),
            Dialect::Sqlite => Err(DalError::Unimplemented(format!("{feature} on sqlite"))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Oracle => "oracle",
            Dialect::Sqlite => "sqlite",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_style_follows_major_version() {
        assert_eq!(Dialect::Oracle.pagination_style(11), PaginationStyle::RowNum);
        assert_eq!(Dialect::Oracle.pagination_style(12), PaginationStyle::OffsetFetch);
        assert_eq!(Dialect::Oracle.pagination_style(19), PaginationStyle::OffsetFetch);
        assert_eq!(Dialect::Sqlite.pagination_style(3), PaginationStyle::LimitOffset);
    }

    #[test]
    fn session_parameter_values_are_quoted() {
        let sql = Dialect::Oracle
            .session_parameter_sql("NLS_DATE_FORMAT", "YYYY-MM-DD'T'HH24")
            .unwrap();
        assert_eq!(sql, "ALTER SESSION SET NLS_DATE_FORMAT = 'YYYY-MM-DD''T''HH24'");
        assert!(Dialect::Oracle.session_parameter_sql("x; drop", "1").is_err());
    }

    #[test]
    fn sequence_and_procedure_names_are_checked() {
        assert_eq!(
            Dialect::Oracle.next_sequence_sql("app.seq_users").unwrap(),
            "SELECT app.seq_users.NEXTVAL FROM dual"
        );
        assert!(Dialect::Oracle.next_sequence_sql("seq; --").is_err());
        assert_eq!(
            Dialect::Oracle
                .procedure_call_sql("pkg.proc", &[":a".into(), "To_Date(:b, 'yyyymmdd')".into()])
                .unwrap(),
            "BEGIN pkg.proc(:a, To_Date(:b, 'yyyymmdd')); END;"
        );
    }

    #[test]
    fn sqlite_has_no_procedures() {
        assert!(matches!(
            Dialect::Sqlite.procedure_call_sql("p", &[]),
            Err(DalError::Unimplemented(_))
        ));
        assert!(matches!(Dialect::Sqlite.get_line_sql(), Err(DalError::Unimplemented(_))));
    }
}
