//! SQLite
//!
//! Dates are stored as ISO formatted text and booleans as integers.

use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::{ast, dialect::SQLiteDialect};

use super::{carried_columns, Dialect, Materialization, Statement};
use crate::sql::{self, expr, SelectBuilder};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Sqlite;

impl Dialect for Sqlite {
    type D = SQLiteDialect;

    fn dialect(&self) -> Self::D {
        SQLiteDialect {}
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn boolean(&self, b: bool) -> ast::Expr {
        expr::number(if b { 1 } else { 0 })
    }

    fn date(&self, date: NaiveDate) -> ast::Expr {
        expr::string(date.format("%Y-%m-%d").to_string())
    }

    fn date_time(&self, date_time: NaiveDateTime) -> ast::Expr {
        expr::string(date_time.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    fn date_difference_days(&self, start: ast::Expr, end: ast::Expr) -> ast::Expr {
        expr::cast(
            expr::binary(
                expr::function("julianday", vec![end]),
                ast::BinaryOperator::Minus,
                expr::function("julianday", vec![start]),
            ),
            ast::DataType::Integer(None),
        )
    }

    /// Uses a `NNN days` modifier
    fn date_add_days(&self, date: ast::Expr, days: ast::Expr) -> ast::Expr {
        let modifier = match days {
            ast::Expr::Value(ast::Value::Number(n, _)) => expr::string(format!("{n} days")),
            days => expr::binary(
                expr::cast(days, ast::DataType::Text),
                ast::BinaryOperator::StringConcat,
                expr::string(" days"),
            ),
        };
        expr::function("date", vec![date, modifier])
    }

    fn truncate_to_month(&self, date: ast::Expr) -> ast::Expr {
        expr::function("date", vec![date, expr::string("start of month")])
    }

    fn truncate_to_year(&self, date: ast::Expr) -> ast::Expr {
        expr::function("date", vec![date, expr::string("start of year")])
    }

    /// A recursive common table expression consuming one code at a time
    fn split_codes(
        &self,
        base: ast::Query,
        columns: &[ast::Ident],
        code: &ast::Ident,
    ) -> ast::Query {
        let b = self.ident("b");
        let split = self.ident("split");
        let split_code = self.ident("split_code");
        let rest = self.ident("split_rest");
        let raw = expr::column(&b, code);
        let carried = || columns.iter().map(|c| sql::unnamed(expr::identifier(c)));
        let separator = || {
            expr::function(
                "INSTR",
                vec![expr::identifier(&rest), expr::string(",")],
            )
        };
        let anchor = SelectBuilder::new(sql::table(ast::ObjectName(vec![b.clone()]), None))
            .projection(
                carried_columns(&b, columns)
                    .into_iter()
                    .chain([
                        sql::unnamed(expr::null()),
                        sql::unnamed(expr::binary(
                            expr::function(
                                "REPLACE",
                                vec![raw.clone(), expr::string("||"), expr::string(",")],
                            ),
                            ast::BinaryOperator::StringConcat,
                            expr::string(","),
                        )),
                    ])
                    .collect(),
            )
            .filter(expr::is_not_null(raw))
            .build();
        let step = SelectBuilder::new(sql::table(ast::ObjectName(vec![split.clone()]), None))
            .projection(
                carried()
                    .chain([
                        sql::unnamed(expr::function(
                            "TRIM",
                            vec![expr::function(
                                "SUBSTR",
                                vec![
                                    expr::identifier(&rest),
                                    expr::number(1),
                                    expr::binary(
                                        separator(),
                                        ast::BinaryOperator::Minus,
                                        expr::number(1),
                                    ),
                                ],
                            )],
                        )),
                        sql::unnamed(expr::function(
                            "SUBSTR",
                            vec![
                                expr::identifier(&rest),
                                expr::binary(
                                    separator(),
                                    ast::BinaryOperator::Plus,
                                    expr::number(1),
                                ),
                            ],
                        )),
                    ])
                    .collect(),
            )
            .filter(expr::binary(
                expr::identifier(&rest),
                ast::BinaryOperator::NotEq,
                expr::string(""),
            ))
            .build();
        let split_code_expr = expr::identifier(&split_code);
        let stripped = expr::case(
            vec![(
                expr::eq(
                    expr::function("SUBSTR", vec![split_code_expr.clone(), expr::number(-1)]),
                    expr::string("X"),
                ),
                expr::function(
                    "SUBSTR",
                    vec![
                        split_code_expr.clone(),
                        expr::number(1),
                        expr::binary(
                            expr::function("LENGTH", vec![split_code_expr.clone()]),
                            ast::BinaryOperator::Minus,
                            expr::number(1),
                        ),
                    ],
                ),
            )],
            Some(split_code_expr.clone()),
        );
        let split_columns = columns
            .iter()
            .cloned()
            .chain([split_code, rest])
            .collect();
        sql::with(
            true,
            vec![
                sql::cte(b, vec![], base),
                sql::cte(
                    split.clone(),
                    split_columns,
                    sql::union(anchor, [step], true),
                ),
            ],
            SelectBuilder::new(sql::table(ast::ObjectName(vec![split]), None))
                .projection(
                    carried()
                        .chain([sql::aliased(stripped, code.clone())])
                        .collect(),
                )
                .filter(expr::is_not_null(split_code_expr))
                .build(),
        )
    }

    fn materialize(&self, name: &str, query: ast::Query) -> Statement {
        Statement::new(
            name,
            Materialization::TemporaryTable,
            sql::create_table_as(self.temp_name(name), true, query),
        )
    }
}
