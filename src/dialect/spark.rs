//! Spark SQL, as run by Databricks
//!
//! Intermediate results are temporary views: Spark inlines them in the queries using them
//! and they disappear with the session.

use sqlparser::{ast, dialect::HiveDialect};

use super::{carried_columns, Dialect, Materialization, Statement};
use crate::sql::{self, expr, SelectBuilder};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Spark;

impl Dialect for Spark {
    type D = HiveDialect;

    fn dialect(&self) -> Self::D {
        HiveDialect {}
    }

    fn name(&self) -> &'static str {
        "spark"
    }

    fn quote(&self) -> char {
        '`'
    }

    /// `datediff` takes its arguments in the order (end, start)
    fn date_difference_days(&self, start: ast::Expr, end: ast::Expr) -> ast::Expr {
        expr::function("datediff", vec![end, start])
    }

    /// `date_add` only takes integer numbers of days
    fn date_add_days(&self, date: ast::Expr, days: ast::Expr) -> ast::Expr {
        let days = if expr::is_literal(&days) {
            days
        } else {
            expr::cast(days, ast::DataType::Int(None))
        };
        expr::function(
            "date_add",
            vec![expr::cast(date, ast::DataType::Date), days],
        )
    }

    fn truncate_to_month(&self, date: ast::Expr) -> ast::Expr {
        expr::cast(
            expr::function("date_trunc", vec![expr::string("MONTH"), date]),
            ast::DataType::Date,
        )
    }

    fn truncate_to_year(&self, date: ast::Expr) -> ast::Expr {
        expr::cast(
            expr::function("date_trunc", vec![expr::string("YEAR"), date]),
            ast::DataType::Date,
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
        let raw = self.ident("raw_code");
        let stripped = expr::function(
            "regexp_replace",
            vec![
                expr::function("trim", vec![expr::column(&c, &raw)]),
                expr::string("X$"),
                expr::string(""),
            ],
        );
        let codes = ast::LateralView {
            lateral_view: expr::function(
                "explode",
                vec![expr::function(
                    "split",
                    vec![expr::column(&b, code), expr::string(r",|\\|\\|")],
                )],
            ),
            lateral_view_name: ast::ObjectName(vec![c]),
            lateral_col_alias: vec![raw],
            outer: false,
        };
        SelectBuilder::new(sql::derived(base, b.clone()))
            .lateral_view(codes)
            .projection(
                carried_columns(&b, columns)
                    .into_iter()
                    .chain([sql::aliased(stripped, code.clone())])
                    .collect(),
            )
            .build()
    }

    fn materialize(&self, name: &str, query: ast::Query) -> Statement {
        Statement::new(
            name,
            Materialization::View,
            sql::create_view_as(self.temp_name(name), true, query),
        )
    }
}
