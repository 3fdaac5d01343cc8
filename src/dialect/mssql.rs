//! Microsoft SQL Server
//!
//! SQL Server has no boolean type: predicates are turned into `0`/`1` values when projected
//! and compared to `1` when used as conditions.

use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::{ast, dialect::MsSqlDialect};

use super::{carried_columns, Dialect, Materialization, Statement};
use crate::{
    namer,
    sql::{self, expr, SelectBuilder},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MsSql;

impl Dialect for MsSql {
    type D = MsSqlDialect;

    fn dialect(&self) -> Self::D {
        MsSqlDialect {}
    }

    fn name(&self) -> &'static str {
        "mssql"
    }

    fn boolean(&self, b: bool) -> ast::Expr {
        expr::number(if b { 1 } else { 0 })
    }

    fn date(&self, date: NaiveDate) -> ast::Expr {
        expr::string(date.format("%Y%m%d").to_string())
    }

    fn date_time(&self, date_time: NaiveDateTime) -> ast::Expr {
        expr::string(date_time.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    /// Null predicates stay null
    fn predicate_to_value(&self, predicate: ast::Expr) -> ast::Expr {
        expr::case(
            vec![
                (predicate.clone(), expr::number(1)),
                (expr::not(predicate), expr::number(0)),
            ],
            None,
        )
    }

    fn value_to_predicate(&self, value: ast::Expr) -> ast::Expr {
        expr::eq(value, expr::number(1))
    }

    fn date_difference_days(&self, start: ast::Expr, end: ast::Expr) -> ast::Expr {
        expr::function("DATEDIFF", vec![expr::keyword("day"), start, end])
    }

    fn date_add_days(&self, date: ast::Expr, days: ast::Expr) -> ast::Expr {
        expr::function("DATEADD", vec![expr::keyword("day"), days, date])
    }

    fn truncate_to_month(&self, date: ast::Expr) -> ast::Expr {
        expr::function(
            "DATEFROMPARTS",
            vec![
                expr::function("YEAR", vec![date.clone()]),
                expr::function("MONTH", vec![date]),
                expr::number(1),
            ],
        )
    }

    fn truncate_to_year(&self, date: ast::Expr) -> ast::Expr {
        expr::function(
            "DATEFROMPARTS",
            vec![
                expr::function("YEAR", vec![date]),
                expr::number(1),
                expr::number(1),
            ],
        )
    }

    fn split_codes(
        &self,
        base: ast::Query,
        columns: &[ast::Ident],
        code: &ast::Ident,
    ) -> ast::Query {
        let b = self.ident("b");
        let c = self.ident("c");
        let trimmed = expr::function(
            "LTRIM",
            vec![expr::function(
                "RTRIM",
                vec![expr::column(&c, &ast::Ident::new("value"))],
            )],
        );
        let stripped = expr::case(
            vec![(
                expr::eq(
                    expr::function("RIGHT", vec![trimmed.clone(), expr::number(1)]),
                    expr::collate(expr::string("X"), "Latin1_General_BIN"),
                ),
                expr::function(
                    "LEFT",
                    vec![
                        trimmed.clone(),
                        expr::binary(
                            expr::function("LEN", vec![trimmed.clone()]),
                            ast::BinaryOperator::Minus,
                            expr::number(1),
                        ),
                    ],
                ),
            )],
            Some(trimmed),
        );
        let codes = sql::table_function(
            "STRING_SPLIT",
            vec![
                expr::function(
                    "REPLACE",
                    vec![
                        expr::column(&b, code),
                        expr::string("||"),
                        expr::string(","),
                    ],
                ),
                expr::string(","),
            ],
            false,
            sql::alias(c),
        );
        SelectBuilder::new(sql::derived(base, b.clone()))
            .join(codes, ast::JoinOperator::CrossApply)
            .projection(
                carried_columns(&b, columns)
                    .into_iter()
                    .chain([sql::aliased(stripped, code.clone())])
                    .collect(),
            )
            .build()
    }

    /// `SELECT INTO` a session temporary table
    fn materialize(&self, name: &str, query: ast::Query) -> Statement {
        let select_into = SelectBuilder::new(sql::derived(query, self.ident("t")))
            .into_table(self.temp_name(name))
            .build();
        Statement::new(
            name,
            Materialization::TemporaryTable,
            ast::Statement::Query(Box::new(select_into)),
        )
    }

    /// Names starting with `#` are session temporary tables
    fn temp_object_prefix(&self) -> String {
        format!("#{}", namer::run_prefix())
    }

    fn limit(&self, mut query: ast::Query, n: u64) -> ast::Query {
        if let ast::SetExpr::Select(select) = query.body.as_mut() {
            select.top = Some(ast::Top {
                with_ties: false,
                percent: false,
                quantity: Some(ast::TopQuantity::Constant(n)),
            });
        }
        query
    }
}
