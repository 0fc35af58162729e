use super::statement::{SqlStatement, check_relations};
use super::types::ExecutionResult;
use crate::dataset::DatasetHandle;
use crate::error::{QueryError, Result};
use polars::prelude::*;
use polars::sql::SQLContext;
use serde_json::Value;
use sqlparser::ast::{
    Expr as SqlExpr, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, Query, Select,
    SelectItem, SetExpr, Statement, TableFactor, VisitMut as _, VisitorMut, visit_expressions,
    visit_expressions_mut,
};
use std::ops::ControlFlow;

/// Non-null column counted in place of `COUNT(*)`.
const ROW_MARKER: &str = "__dataset_query_row";

fn execution_error(err: PolarsError) -> QueryError {
    QueryError::Execution(err.to_string())
}

fn is_count_star(expr: &SqlExpr) -> bool {
    let SqlExpr::Function(function) = expr else {
        return false;
    };
    if !function.name.to_string().eq_ignore_ascii_case("count") {
        return false;
    }
    match &function.args {
        FunctionArguments::List(list) => {
            list.duplicate_treatment.is_none()
                && matches!(
                    list.args.as_slice(),
                    [] | [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)]
                )
        }
        FunctionArguments::None | FunctionArguments::Subquery(_) => false,
    }
}

fn mentions_count_star(expr: &SqlExpr) -> bool {
    visit_expressions(expr, |e| {
        if is_count_star(e) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .is_break()
}

fn reads_table_directly(select: &Select, table_name: &str) -> bool {
    match select.from.as_slice() {
        [from] if from.joins.is_empty() => matches!(
            &from.relation,
            TableFactor::Table { name, args: None, .. }
                if name.0.last().is_some_and(|ident| ident.value.eq_ignore_ascii_case(table_name))
        ),
        _ => false,
    }
}

fn count_marker(expr: &mut SqlExpr) -> bool {
    let mut rewritten = false;
    let flow = visit_expressions_mut(expr, |e| {
        if is_count_star(e)
            && let SqlExpr::Function(function) = e
            && let FunctionArguments::List(list) = &mut function.args
        {
            list.args = vec![FunctionArg::Unnamed(FunctionArgExpr::Expr(
                SqlExpr::Identifier(Ident::with_quote('"', ROW_MARKER)),
            ))];
            rewritten = true;
        }
        ControlFlow::<()>::Continue(())
    });
    flow.is_continue() && rewritten
}

/// Rewrites `COUNT(*)` into a count over [`ROW_MARKER`].
///
/// The engine evaluates a bare `COUNT(*)` without a GROUP BY once per row
/// instead of once per table; counting a real non-null column aggregates.
/// Only SELECTs reading the table directly carry the marker column.
/// Unnamed projections that used it are named `count`.
struct CountRows<'a> {
    table_name: &'a str,
    rewritten: bool,
}

impl CountRows<'_> {
    fn rewrite_body(&mut self, body: &mut SetExpr) {
        match body {
            SetExpr::Select(select) if reads_table_directly(select, self.table_name) => {
                for item in &mut select.projection {
                    match item {
                        SelectItem::UnnamedExpr(expr) if mentions_count_star(expr) => {
                            let mut expr = expr.clone();
                            self.rewritten |= count_marker(&mut expr);
                            *item = SelectItem::ExprWithAlias {
                                expr,
                                alias: Ident::with_quote('"', "count"),
                            };
                        }
                        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                            self.rewritten |= count_marker(expr);
                        }
                        _ => {}
                    }
                }
                if let Some(having) = &mut select.having {
                    self.rewritten |= count_marker(having);
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.rewrite_body(left);
                self.rewrite_body(right);
            }
            _ => {}
        }
    }
}

impl VisitorMut for CountRows<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<()> {
        self.rewrite_body(&mut query.body);
        ControlFlow::Continue(())
    }
}

/// Returns whether any `COUNT(*)` was rewritten.
fn count_rows_by_marker(ast: &mut Statement, table_name: &str) -> bool {
    let mut count_rows = CountRows {
        table_name,
        rewritten: false,
    };
    match ast.visit(&mut count_rows) {
        ControlFlow::Continue(()) | ControlFlow::Break(()) => count_rows.rewritten,
    }
}

/// Parse the statement and refuse anything that reads outside its table.
fn read_only_query(statement: &SqlStatement) -> Result<Statement> {
    let (_, ast) = SqlStatement::parse(statement.sql(), statement.table_name())
        .map_err(QueryError::Execution)?;
    check_relations(&ast, statement.table_name()).map_err(QueryError::Execution)?;
    Ok(ast)
}

/// Run `statement` against the loaded table.
///
/// Only read queries over the statement's own table (and its CTEs) run;
/// table functions such as `read_csv(...)` and other tables are refused
/// before the engine sees the query.
///
/// Paging is applied to the lazy plan the statement produced, so `offset`
/// and `limit` act on the ordered, aggregated result. `limit == Some(0)`
/// yields an empty result.
///
/// CPU-bound; callers on the async runtime run it inline.
///
/// # Errors
///
/// Returns [`QueryError::Execution`] with the parser's or engine's message
/// on syntax errors, disallowed table sources, unknown columns or type
/// mismatches.
pub fn execute(
    statement: &SqlStatement,
    dataset: &DatasetHandle,
    limit: Option<usize>,
    offset: Option<usize>,
) -> Result<ExecutionResult> {
    let mut ast = read_only_query(statement)?;
    let counts_rows = count_rows_by_marker(&mut ast, statement.table_name());

    let mut table = dataset.frame().clone().lazy();
    let rewritten;
    let sql = if counts_rows {
        table = table.with_row_index(ROW_MARKER, None);
        rewritten = ast.to_string();
        tracing::trace!(sql = %rewritten, "Counting rows through marker column");
        rewritten.as_str()
    } else {
        statement.sql()
    };

    let mut ctx = SQLContext::new();
    ctx.register(statement.table_name(), table);

    let mut plan = ctx.execute(sql).map_err(execution_error)?;
    if limit.is_some() || offset.is_some() {
        let start = offset.map_or(0, |o| i64::try_from(o).unwrap_or(i64::MAX));
        let len = limit.map_or(IdxSize::MAX, |l| IdxSize::try_from(l).unwrap_or(IdxSize::MAX));
        plan = plan.slice(start, len);
    }

    let mut frame = plan.collect().map_err(execution_error)?;
    if counts_rows && frame.get_column_index(ROW_MARKER).is_some() {
        frame = frame.drop(ROW_MARKER).map_err(execution_error)?;
    }
    tracing::debug!(rows = frame.height(), sql = statement.sql(), "Query executed");
    to_execution_result(&frame)
}

fn to_execution_result(frame: &DataFrame) -> Result<ExecutionResult> {
    let columns = frame
        .get_column_names()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    let series: Vec<&Series> = frame
        .get_columns()
        .iter()
        .map(Column::as_materialized_series)
        .collect();

    let mut rows = Vec::with_capacity(frame.height());
    for idx in 0..frame.height() {
        let row = series
            .iter()
            .map(|s| s.get(idx).map(json_value))
            .collect::<PolarsResult<Vec<_>>>()
            .map_err(execution_error)?;
        rows.push(row);
    }

    Ok(ExecutionResult {
        columns,
        row_count: rows.len(),
        rows,
    })
}

fn float(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn json_value(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_owned()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(v) => v.into(),
        AnyValue::Int16(v) => v.into(),
        AnyValue::Int32(v) => v.into(),
        AnyValue::Int64(v) => v.into(),
        AnyValue::UInt8(v) => v.into(),
        AnyValue::UInt16(v) => v.into(),
        AnyValue::UInt32(v) => v.into(),
        AnyValue::UInt64(v) => v.into(),
        AnyValue::Float32(v) => float(f64::from(v)),
        AnyValue::Float64(v) => float(v),
        decimal @ AnyValue::Decimal(..) => {
            let text = decimal.to_string();
            text.parse::<f64>().map_or(Value::String(text), float)
        }
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn five_rows() -> DatasetHandle {
        let frame = df!(
            "title" => &["a", "b", "c", "d", "e"],
            "score" => &[5i64, 3, 4, 1, 2],
            "active" => &[Some(true), None, Some(false), Some(true), Some(true)]
        )
        .expect("frame");
        DatasetHandle::from_frame("five", frame).expect("handle")
    }

    fn run(sql: &str, limit: Option<usize>, offset: Option<usize>) -> Result<ExecutionResult> {
        execute(&SqlStatement::from_user(sql, "dataset"), &five_rows(), limit, offset)
    }

    #[test]
    fn test_paging_applies_after_ordering() -> Result<()> {
        let result = run("SELECT title, score FROM dataset ORDER BY score DESC", Some(2), Some(1))?;
        assert_eq!(result.columns, vec!["title", "score"]);
        assert_eq!(
            result.rows,
            vec![vec![json!("c"), json!(4)], vec![json!("b"), json!(3)]]
        );
        assert_eq!(result.row_count, 2);
        Ok(())
    }

    #[test]
    fn test_paging_without_ordering_uses_table_order() -> Result<()> {
        let result = run("SELECT title FROM dataset", Some(2), Some(1))?;
        assert_eq!(result.rows, vec![vec![json!("b")], vec![json!("c")]]);
        Ok(())
    }

    #[test]
    fn test_limit_zero_returns_no_rows() -> Result<()> {
        let result = run("SELECT * FROM dataset", Some(0), None)?;
        assert_eq!(result.row_count, 0);
        assert!(result.rows.is_empty());
        assert_eq!(result.columns, vec!["title", "score", "active"]);
        Ok(())
    }

    #[test]
    fn test_offset_past_end_is_empty() -> Result<()> {
        let result = run("SELECT * FROM dataset", None, Some(10))?;
        assert_eq!(result.row_count, 0);
        Ok(())
    }

    #[test]
    fn test_scalar_conversion() -> Result<()> {
        let result = run("SELECT title, score, active FROM dataset", Some(2), None)?;
        assert_eq!(result.rows[0], vec![json!("a"), json!(5), json!(true)]);
        assert_eq!(result.rows[1], vec![json!("b"), json!(3), Value::Null]);
        Ok(())
    }

    #[test]
    fn test_unknown_column_is_execution_error() {
        let err = run("SELECT nonexistent_col FROM dataset", None, None).expect_err("bad column");
        assert!(matches!(&err, QueryError::Execution(msg) if msg.contains("nonexistent_col")));
    }

    #[test]
    fn test_count_star_aggregates_to_one_row() -> Result<()> {
        let result = run("SELECT COUNT(*) FROM dataset", None, None)?;
        assert_eq!(result.columns, vec!["count"]);
        assert_eq!(result.rows, vec![vec![json!(5)]]);

        let result = run("SELECT COUNT(*) AS n FROM dataset WHERE score > 2", None, None)?;
        assert_eq!(result.columns, vec!["n"]);
        assert_eq!(result.rows, vec![vec![json!(3)]]);
        Ok(())
    }

    #[test]
    fn test_count_star_per_group() -> Result<()> {
        let result = run(
            "SELECT active, COUNT(*) AS n FROM dataset WHERE active IS NOT NULL \
             GROUP BY active ORDER BY n DESC",
            None,
            None,
        )?;
        assert_eq!(
            result.rows,
            vec![vec![json!(true), json!(3)], vec![json!(false), json!(1)]]
        );

        Ok(())
    }

    #[test]
    fn test_count_star_rewrite_leaves_other_counts_alone() -> Result<()> {
        let statement = SqlStatement::from_user(
            "SELECT COUNT(*) + 1, COUNT(DISTINCT title), COUNT(score) FROM dataset",
            "dataset",
        );
        let mut ast = read_only_query(&statement)?;
        assert!(count_rows_by_marker(&mut ast, "dataset"));
        let sql = ast.to_string();
        assert!(sql.contains(&format!("COUNT(\"{ROW_MARKER}\") + 1 AS \"count\"")), "{sql}");
        assert!(sql.contains("COUNT(DISTINCT title)"), "{sql}");
        assert!(sql.contains("COUNT(score)"), "{sql}");

        let statement = SqlStatement::from_user(
            "WITH best AS (SELECT title FROM dataset) SELECT COUNT(*) FROM best",
            "dataset",
        );
        let mut ast = read_only_query(&statement)?;
        assert!(!count_rows_by_marker(&mut ast, "dataset"), "CTE rows carry no marker");
        Ok(())
    }

    #[test]
    fn test_other_table_sources_are_refused() {
        for sql in [
            "SELECT * FROM read_csv('/etc/passwd')",
            "SELECT * FROM read_parquet('/tmp/secret.parquet')",
            "SELECT * FROM restaurants",
        ] {
            let err = run(sql, None, None).expect_err(sql);
            assert!(matches!(&err, QueryError::Execution(msg) if !msg.is_empty()), "{err}");
        }
        let err = run("DROP TABLE dataset", None, None).expect_err("not a query");
        assert!(matches!(err, QueryError::Execution(_)));
    }

    #[test]
    fn test_syntax_error_is_execution_error() {
        let err = run("SELEC title FROM dataset", None, None).expect_err("bad syntax");
        assert!(matches!(err, QueryError::Execution(_)));
    }
}
