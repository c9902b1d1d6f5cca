//! Rewrites a query so that it returns one page of rows.

use std::sync::LazyLock;

use regex::Regex;

use crate::dialect::PaginationStyle;
use crate::error::DalError;

static SELECT_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\s*select\s+[a-z0-9_\s\.,\*]+?)\s+from\s+").expect("static regex")
});

static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)order\s+by\s+[a-z0-9_,\s\.]+").expect("static regex"));

static TIEBREAKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(rowid|id)\b").expect("static regex"));

/// Column added by [`inject_total_count`].
pub const TOTAL_COUNT_COLUMN: &str = "cnt__";

/// One page of a result: `limit` rows starting at 1-based `page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub page: usize,
    /// Add a window-count column holding the size of the whole result.
    pub total_count: bool,
}

impl PageRequest {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            page: 1,
            total_count: false,
        }
    }

    #[must_use]
    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn total_count(mut self, total_count: bool) -> Self {
        self.total_count = total_count;
        self
    }

    fn offset(&self) -> Result<usize, DalError> {
        if self.limit == 0 {
            return Err(DalError::InvalidArgument("limit must be at least 1".into()));
        }
        if self.page == 0 {
            return Err(DalError::InvalidArgument("page numbers start at 1".into()));
        }
        (self.page - 1)
            .checked_mul(self.limit)
            .ok_or_else(|| DalError::InvalidArgument("page offset overflows".into()))
    }
}

/// Apply `req` to `sql` in the given style.
///
/// # Errors
/// Returns `DalError::InvalidArgument` for a zero limit or page, or when a total
/// count is requested for a query whose select list cannot be located.
pub fn paginate(sql: &str, style: PaginationStyle, req: &PageRequest) -> Result<String, DalError> {
    let offset = req.offset()?;
    let limit = req.limit;
    let page = req.page;

    let base = if req.total_count {
        inject_total_count(sql)?
    } else {
        sql.to_owned()
    };

    Ok(match style {
        PaginationStyle::OffsetFetch => {
            format!("{base}\nOFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY")
        }
        PaginationStyle::LimitOffset => format!("{base}\nLIMIT {limit} OFFSET {offset}"),
        PaginationStyle::RowNum => {
            let ordered = with_rowid_tiebreaker(&base);
            format!(
                "SELECT * FROM (\nSELECT a.*, rownum r__\nFROM (\n{ordered}\n) a\n\
                 WHERE rownum < (({page} * {limit}) + 1 )\n)\n\
                 WHERE r__ >= ((({page} -1) * {limit}) + 1)"
            )
        }
    })
}

/// Add `COUNT(1) OVER () AS cnt__` to the select list.
///
/// # Errors
/// Returns `DalError::InvalidArgument` if the query does not start with a plain
/// `SELECT <columns> FROM`.
pub fn inject_total_count(sql: &str) -> Result<String, DalError> {
    let select_list = SELECT_LIST
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            DalError::InvalidArgument(
                "totalCount needs a query starting with a plain SELECT <columns> FROM".into(),
            )
        })?;
    let end = select_list.end();
    Ok(format!(
        "{}, COUNT(1) OVER () AS {TOTAL_COUNT_COLUMN}{}",
        &sql[..end],
        &sql[end..]
    ))
}

// rownum paging is only stable under a total order
fn with_rowid_tiebreaker(sql: &str) -> String {
    match ORDER_BY.find(sql) {
        Some(order) if TIEBREAKER.is_match(order.as_str()) => sql.to_owned(),
        Some(order) => {
            let clause = order.as_str();
            let trimmed = clause.trim_end();
            let trailing = &clause[trimmed.len()..];
            format!(
                "{}{trimmed}, rowid{trailing}{}",
                &sql[..order.start()],
                &sql[order.end()..]
            )
        }
        None => format!("{sql} ORDER BY rowid"),
    }
}
