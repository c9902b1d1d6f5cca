//! Procedure Runner: stored-procedure calls with optional line-output capture.

use tracing::debug;

use crate::dal::Dal;
use crate::driver::{DriverConnection, DriverPool, ExecOptions};
use crate::error::{DalError, ErrorContext, ResultExt};
use crate::options::QueryOptions;
use crate::pool::Lease;
use crate::results::OutBinds;
use crate::types::{BindParam, BindValue, Binds, DbType, OutFormat};

// DBMS_OUTPUT.GET_LINE's own line limit
const MAX_LINE_SIZE: usize = 32_767;

/// Outcome of [`Dal::run_procedure`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureResult {
    pub out_binds: OutBinds,
    /// Captured server output, lines joined with `\n`; set only when requested.
    pub dbms_output: Option<String>,
}

impl<P: DriverPool> Dal<P> {
    /// Call stored procedure `name` with one argument per bind.
    ///
    /// Named binds become `:name` arguments and positional binds `:0`, `:1`, ...
    /// An [`BindValue::Expression`] wraps its placeholder, so
    /// `("d", expression("To_Date(?, 'yyyymmdd')", "20240101"))` passes
    /// `To_Date(:d, 'yyyymmdd')`.
    ///
    /// # Errors
    /// `Unimplemented` on databases without procedures, driver errors annotated
    /// with the call text and binds, acquisition errors.
    pub async fn run_procedure(
        &self,
        name: &str,
        binds: Binds,
        opts: QueryOptions<'_, P::Conn>,
    ) -> Result<ProcedureResult, DalError> {
        let (args, binds) = procedure_args(binds);
        let dialect = self.dialect();
        let sql = dialect
            .procedure_call_sql(name, &args)
            .with_context(|| ErrorContext::tag("runProcedure").with_extra("procedure", name))?;
        let output_sql = if opts.dbms_output {
            let enable = dialect
                .enable_output_sql()
                .with_context(|| ErrorContext::tag("runProcedure").with_extra("procedure", name))?;
            Some((enable, dialect.get_line_sql()?))
        } else {
            None
        };

        let exec_opts = self.gateway().exec_options(Some(OutFormat::Object));
        let mut lease = self
            .gateway()
            .lease(opts.connection, opts.session_ctx.as_ref())
            .await
            .with_context(|| ErrorContext::tag("runProcedure").with_sql(sql.as_str()))?;

        if let Some((enable, _)) = output_sql {
            if let Err(err) = lease.conn().execute(enable, &Binds::none(), &exec_opts).await {
                lease.release_quietly("runProcedure enableOutput").await;
                return Err(DalError::from(err)
                    .with_context(ErrorContext::tag("runProcedure enableOutput").with_sql(enable)));
            }
        }

        debug!(sql = %sql, binds = ?binds, "runProcedure");
        let out_binds = match lease.conn().execute(&sql, &binds, &exec_opts).await {
            Ok(result) => result.out_binds,
            Err(err) => {
                lease.release_quietly("runProcedure").await;
                return Err(DalError::from(err).with_context(
                    ErrorContext::tag("runProcedure")
                        .with_sql(sql.as_str())
                        .with_binds(&binds),
                ));
            }
        };

        let dbms_output = match output_sql {
            Some((_, get_line)) => match read_lines(&mut lease, get_line).await {
                Ok(text) => Some(text),
                Err(err) => {
                    lease.release_quietly("runProcedure getLine").await;
                    return Err(err);
                }
            },
            None => None,
        };

        lease
            .release()
            .await
            .with_context(|| ErrorContext::tag("runProcedure release"))?;
        Ok(ProcedureResult {
            out_binds,
            dbms_output,
        })
    }
}

/// Argument expressions for the call text, plus the binds with expression
/// wrappers reduced to their values.
fn procedure_args(binds: Binds) -> (Vec<String>, Binds) {
    let placeholder = |key: &str, bind: BindValue| match bind {
        BindValue::Expression { expression, value } => {
            (expression.replace('?', &format!(":{key}")), BindValue::Value(value))
        }
        other => (format!(":{key}"), other),
    };
    match binds {
        Binds::Named(pairs) => {
            let (args, pairs): (Vec<String>, Vec<_>) = pairs
                .into_iter()
                .map(|(key, bind)| {
                    let (arg, bind) = placeholder(&key, bind);
                    (arg, (key, bind))
                })
                .unzip();
            (args, Binds::Named(pairs))
        }
        Binds::Positional(values) => {
            let (args, values): (Vec<String>, Vec<_>) = values
                .into_iter()
                .enumerate()
                .map(|(i, bind)| placeholder(&i.to_string(), bind))
                .unzip();
            (args, Binds::Positional(values))
        }
    }
}

/// Pull buffered output lines until the status bind reports the buffer empty.
async fn read_lines<C: DriverConnection>(
    lease: &mut Lease<'_, C>,
    get_line: &str,
) -> Result<String, DalError> {
    let binds = Binds::named([
        (
            "ln",
            BindValue::Param(BindParam::out(DbType::String).with_max_size(MAX_LINE_SIZE)),
        ),
        ("st", BindValue::Param(BindParam::out(DbType::Number))),
    ]);
    let exec_opts = ExecOptions::default();
    let mut lines = Vec::new();
    loop {
        let result = lease
            .conn()
            .execute(get_line, &binds, &exec_opts)
            .await
            .with_context(|| ErrorContext::tag("runProcedure getLine").with_sql(get_line))?;
        let status = result.out_binds.get("st").and_then(|v| v.as_i64_lossy());
        if status != Some(0) {
            break;
        }
        let line = result
            .out_binds
            .get("ln")
            .and_then(|v| v.as_text())
            .unwrap_or_default();
        lines.push(line.to_owned());
    }
    debug!(lines = lines.len(), "line output captured");
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowValues;

    #[test]
    fn expression_binds_wrap_their_placeholder() {
        let binds = Binds::named([
            ("id", BindValue::from(7_i64)),
            ("d", BindValue::expression("To_Date(?, 'yyyymmdd')", "20240101")),
        ]);
        let (args, binds) = procedure_args(binds);
        assert_eq!(args, vec![":id", "To_Date(:d, 'yyyymmdd')"]);
        assert_eq!(
            binds,
            Binds::named([
                ("id", BindValue::from(7_i64)),
                ("d", BindValue::Value(RowValues::Text("20240101".into()))),
            ])
        );
    }

    #[test]
    fn positional_binds_are_numbered() {
        let (args, _) = procedure_args(Binds::positional(vec![
            BindValue::from("a"),
            BindValue::from("b"),
        ]));
        assert_eq!(args, vec![":0", ":1"]);
    }
}
