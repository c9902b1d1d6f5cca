//! SQL builder seam behind the table-descriptor operations.
//!
//! [`SqlBuilder`] turns a table name, field list, filter and paging hints into
//! SQL text plus binds. The data access layer only consumes its output; a
//! caller can plug in their own through [`Dal::with_sql_builder`].

use crate::dal::Dal;
use crate::dialect::{PaginationStyle, check_object_name};
use crate::driver::DriverPool;
use crate::error::{DalError, ErrorContext, ResultExt};
use crate::options::QueryOptions;
use crate::pagination::{PageRequest, paginate};
use crate::results::{ExecResult, Row};
use crate::types::{BindValue, Binds, RowValues};

/// SQL text with the binds it expects.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltSql {
    pub sql: String,
    pub binds: Binds,
}

/// Row filter of a table-descriptor operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// No `WHERE` clause.
    #[default]
    All,
    /// `col1 = v1 AND col2 = v2 ...`
    Eq(Vec<(String, RowValues)>),
    /// Literal clause with `?` placeholders, bound in order.
    Raw { clause: String, binds: Vec<RowValues> },
}

impl Filter {
    #[must_use]
    pub fn eq<K: Into<String>>(pairs: impl IntoIterator<Item = (K, RowValues)>) -> Self {
        Filter::Eq(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    #[must_use]
    pub fn raw(clause: impl Into<String>, binds: Vec<RowValues>) -> Self {
        Filter::Raw {
            clause: clause.into(),
            binds,
        }
    }
}

/// Descriptor of a `SELECT` against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    pub table: String,
    /// Empty selects every column.
    pub fields: Vec<String>,
    pub filter: Filter,
    /// `column` or `column ASC|DESC`.
    pub order: Vec<String>,
    /// Filled from the call options before the builder runs.
    pub page: Option<PageRequest>,
    pub pagination: PaginationStyle,
}

impl TableQuery {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            filter: Filter::All,
            order: Vec::new(),
            page: None,
            pagination: PaginationStyle::LimitOffset,
        }
    }

    #[must_use]
    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn order<S: Into<String>>(mut self, order: impl IntoIterator<Item = S>) -> Self {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }
}

/// Pure translation from table descriptors to SQL.
pub trait SqlBuilder: Send + Sync {
    /// # Errors
    /// `InvalidArgument` for malformed identifiers or filters.
    fn select(&self, query: &TableQuery) -> Result<BuiltSql, DalError>;

    /// # Errors
    /// `InvalidArgument` for malformed identifiers or an empty value list.
    fn insert(&self, table: &str, values: &[(String, BindValue)]) -> Result<BuiltSql, DalError>;

    /// # Errors
    /// `InvalidArgument` for malformed identifiers, filters or an empty value list.
    fn update(
        &self,
        table: &str,
        values: &[(String, RowValues)],
        filter: &Filter,
    ) -> Result<BuiltSql, DalError>;

    /// # Errors
    /// `InvalidArgument` for malformed identifiers or filters.
    fn delete(&self, table: &str, filter: &Filter) -> Result<BuiltSql, DalError>;
}

/// Default builder: named binds (`:w0...` for filters, `:v0...` for values).
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicSqlBuilder;

impl SqlBuilder for BasicSqlBuilder {
    fn select(&self, query: &TableQuery) -> Result<BuiltSql, DalError> {
        let table = check_object_name("table", &query.table)?;
        let fields = if query.fields.is_empty() {
            "*".to_owned()
        } else {
            query
                .fields
                .iter()
                .map(|f| check_object_name("field", f))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };
        let mut binds = Vec::new();
        let mut sql = format!("SELECT {fields} FROM {table}");
        sql.push_str(&where_clause(&query.filter, &mut binds)?);
        if !query.order.is_empty() {
            let order = query
                .order
                .iter()
                .map(|o| order_term(o))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        if let Some(page) = &query.page {
            sql = paginate(&sql, query.pagination, page)?;
        }
        Ok(BuiltSql {
            sql,
            binds: Binds::Named(binds),
        })
    }

    fn insert(&self, table: &str, values: &[(String, BindValue)]) -> Result<BuiltSql, DalError> {
        let table = check_object_name("table", table)?;
        if values.is_empty() {
            return Err(DalError::InvalidArgument(format!("insert into {table} without values")));
        }
        let mut columns = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        let mut binds = Vec::with_capacity(values.len());
        for (i, (column, value)) in values.iter().enumerate() {
            columns.push(check_object_name("column", column)?);
            let key = format!("v{i}");
            match value {
                BindValue::Expression { expression, value } => {
                    placeholders.push(expression.replace('?', &format!(":{key}")));
                    binds.push((key, BindValue::Value(value.clone())));
                }
                other => {
                    placeholders.push(format!(":{key}"));
                    binds.push((key, other.clone()));
                }
            }
        }
        Ok(BuiltSql {
            sql: format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ),
            binds: Binds::Named(binds),
        })
    }

    fn update(
        &self,
        table: &str,
        values: &[(String, RowValues)],
        filter: &Filter,
    ) -> Result<BuiltSql, DalError> {
        let table = check_object_name("table", table)?;
        if values.is_empty() {
            return Err(DalError::InvalidArgument(format!("update of {table} without values")));
        }
        let mut binds = Vec::with_capacity(values.len());
        let mut sets = Vec::with_capacity(values.len());
        for (i, (column, value)) in values.iter().enumerate() {
            let column = check_object_name("column", column)?;
            sets.push(format!("{column} = :v{i}"));
            binds.push((format!("v{i}"), BindValue::Value(value.clone())));
        }
        let mut sql = format!("UPDATE {table} SET {}", sets.join(", "));
        sql.push_str(&where_clause(filter, &mut binds)?);
        Ok(BuiltSql {
            sql,
            binds: Binds::Named(binds),
        })
    }

    fn delete(&self, table: &str, filter: &Filter) -> Result<BuiltSql, DalError> {
        let table = check_object_name("table", table)?;
        let mut binds = Vec::new();
        let mut sql = format!("DELETE FROM {table}");
        sql.push_str(&where_clause(filter, &mut binds)?);
        Ok(BuiltSql {
            sql,
            binds: Binds::Named(binds),
        })
    }
}

fn where_clause(filter: &Filter, binds: &mut Vec<(String, BindValue)>) -> Result<String, DalError> {
    match filter {
        Filter::All => Ok(String::new()),
        Filter::Eq(pairs) if pairs.is_empty() => Ok(String::new()),
        Filter::Eq(pairs) => {
            let mut terms = Vec::with_capacity(pairs.len());
            for (i, (column, value)) in pairs.iter().enumerate() {
                let column = check_object_name("column", column)?;
                if value.is_null() {
                    terms.push(format!("{column} IS NULL"));
                } else {
                    terms.push(format!("{column} = :w{i}"));
                    binds.push((format!("w{i}"), BindValue::Value(value.clone())));
                }
            }
            Ok(format!(" WHERE {}", terms.join(" AND ")))
        }
        Filter::Raw { clause, binds: values } => {
            let (clause, count) = name_placeholders(clause, "w");
            if count != values.len() {
                return Err(DalError::InvalidArgument(format!(
                    "filter has {count} placeholder(s) but {} bind value(s)",
                    values.len()
                )));
            }
            binds.extend(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (format!("w{i}"), BindValue::Value(v.clone()))),
            );
            Ok(format!(" WHERE {clause}"))
        }
    }
}

fn order_term(term: &str) -> Result<String, DalError> {
    let mut parts = term.split_whitespace();
    let column = parts
        .next()
        .ok_or_else(|| DalError::InvalidArgument("empty order term".into()))?;
    let column = check_object_name("order column", column)?;
    match (parts.next(), parts.next()) {
        (None, _) => Ok(column.to_owned()),
        (Some(dir), None) if dir.eq_ignore_ascii_case("asc") || dir.eq_ignore_ascii_case("desc") => {
            Ok(format!("{column} {}", dir.to_ascii_uppercase()))
        }
        _ => Err(DalError::InvalidArgument(format!("order term `{term}` is not `column [ASC|DESC]`"))),
    }
}

#[derive(Clone, Copy)]
enum ScanState {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

/// Replace each bare `?` with `:{prefix}N`, leaving quoted text and comments
/// alone. Returns the rewritten clause and the number of placeholders.
fn name_placeholders(clause: &str, prefix: &str) -> (String, usize) {
    let mut out = String::with_capacity(clause.len() + 8);
    let mut state = ScanState::Normal;
    let mut count = 0;
    let mut chars = clause.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            ScanState::Normal => match c {
                '?' => {
                    out.push_str(&format!(":{prefix}{count}"));
                    count += 1;
                    continue;
                }
                '\'' => state = ScanState::SingleQuoted,
                '"' => state = ScanState::DoubleQuoted,
                '-' if chars.peek() == Some(&'-') => state = ScanState::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    out.push(c);
                    if let Some(star) = chars.next() {
                        out.push(star);
                    }
                    state = ScanState::BlockComment;
                    continue;
                }
                _ => {}
            },
            // a doubled quote re-enters the quoted state on the next char
            ScanState::SingleQuoted if c == '\'' => state = ScanState::Normal,
            ScanState::DoubleQuoted if c == '"' => state = ScanState::Normal,
            ScanState::LineComment if c == '\n' => state = ScanState::Normal,
            ScanState::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                out.push(c);
                if let Some(slash) = chars.next() {
                    out.push(slash);
                }
                state = ScanState::Normal;
                continue;
            }
            _ => {}
        }
        out.push(c);
    }
    (out, count)
}

impl<P: DriverPool> Dal<P> {
    fn table_query(&self, mut query: TableQuery, opts: &QueryOptions<'_, P::Conn>) -> Result<BuiltSql, DalError> {
        query.pagination = self.dialect().pagination_style(self.db_major_version()?);
        query.page = opts.limit.map(|limit| {
            PageRequest::new(limit)
                .page(opts.page.unwrap_or(1))
                .total_count(opts.total_count)
        });
        self.sql_builder()
            .select(&query)
            .with_context(|| ErrorContext::tag("sqlBuilder select").with_extra("table", query.table.as_str()))
    }

    /// Exactly one row of a table.
    ///
    /// # Errors
    /// See [`Dal::select_one_row_sql`].
    pub async fn select_one_row(
        &self,
        query: TableQuery,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<Row, DalError> {
        let built = self.table_query(query, &opts)?;
        self.select_one_row_sql(&built.sql, built.binds, opts.without_paging())
            .await
    }

    /// # Errors
    /// See [`Dal::select_one_value_sql`].
    pub async fn select_one_value(
        &self,
        query: TableQuery,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<RowValues, DalError> {
        let built = self.table_query(query, &opts)?;
        self.select_one_value_sql(&built.sql, built.binds, opts.without_paging())
            .await
    }

    /// # Errors
    /// See [`Dal::select_one_clob_value_sql`].
    pub async fn select_one_clob_value(
        &self,
        query: TableQuery,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<Option<String>, DalError> {
        let built = self.table_query(query, &opts)?;
        self.select_one_clob_value_sql(&built.sql, built.binds, opts.without_paging())
            .await
    }

    /// Rows of a table; `limit`/`page`/`total_count` are handed to the builder.
    ///
    /// # Errors
    /// See [`Dal::select_all_rows_sql`].
    pub async fn select_all_rows(
        &self,
        query: TableQuery,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<Vec<Row>, DalError> {
        let built = self.table_query(query, &opts)?;
        self.select_all_rows_sql(&built.sql, built.binds, opts.without_paging())
            .await
    }

    /// # Errors
    /// Builder errors, or see [`Dal::query_sql`].
    pub async fn insert(
        &self,
        table: &str,
        values: Vec<(String, BindValue)>,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<ExecResult, DalError> {
        let built = self
            .sql_builder()
            .insert(table, &values)
            .with_context(|| ErrorContext::tag("sqlBuilder insert").with_extra("table", table))?;
        self.query_sql(&built.sql, built.binds, opts).await
    }

    /// # Errors
    /// Builder errors, or see [`Dal::query_sql`].
    pub async fn update(
        &self,
        table: &str,
        values: Vec<(String, RowValues)>,
        filter: Filter,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<ExecResult, DalError> {
        let built = self
            .sql_builder()
            .update(table, &values, &filter)
            .with_context(|| ErrorContext::tag("sqlBuilder update").with_extra("table", table))?;
        self.query_sql(&built.sql, built.binds, opts).await
    }

    /// # Errors
    /// Builder errors, or see [`Dal::query_sql`].
    pub async fn del(
        &self,
        table: &str,
        filter: Filter,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<ExecResult, DalError> {
        let built = self
            .sql_builder()
            .delete(table, &filter)
            .with_context(|| ErrorContext::tag("sqlBuilder delete").with_extra("table", table))?;
        self.query_sql(&built.sql, built.binds, opts).await
    }

    /// Insert a row keyed by the next value of `sequence`; one of `values`
    /// must be [`BindValue::PrimaryKey`].
    ///
    /// # Errors
    /// Builder errors, or see [`Dal::insert_returning_id_sql`].
    pub async fn insert_returning_id(
        &self,
        table: &str,
        values: Vec<(String, BindValue)>,
        sequence: &str,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<RowValues, DalError> {
        let built = self
            .sql_builder()
            .insert(table, &values)
            .with_context(|| ErrorContext::tag("sqlBuilder insert").with_extra("table", table))?;
        self.insert_returning_id_sql(&built.sql, built.binds, sequence, opts)
            .await
    }
}
