//! PostgreSQL

use sqlparser::{ast, dialect::PostgreSqlDialect};

use super::{carried_columns, Dialect, Materialization, Statement};
use crate::sql::{self, expr, SelectBuilder};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PostgreSql;

impl Dialect for PostgreSql {
    type D = PostgreSqlDialect;

    fn dialect(&self) -> Self::D {
        PostgreSqlDialect {}
    }

    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn date_difference_days(&self, start: ast::Expr, end: ast::Expr) -> ast::Expr {
        expr::nested(expr::binary(
            expr::cast(end, ast::DataType::Date),
            ast::BinaryOperator::Minus,
            expr::cast(start, ast::DataType::Date),
        ))
    }

    fn date_add_days(&self, date: ast::Expr, days: ast::Expr) -> ast::Expr {
        let days = if expr::is_literal(&days) {
            days
        } else {
            expr::cast(days, ast::DataType::Integer(None))
        };
        expr::nested(expr::binary(
            expr::cast(date, ast::DataType::Date),
            ast::BinaryOperator::Plus,
            days,
        ))
    }

    fn truncate_to_month(&self, date: ast::Expr) -> ast::Expr {
        expr::cast(
            expr::function("date_trunc", vec![expr::string("month"), date]),
            ast::DataType::Date,
        )
    }

    fn truncate_to_year(&self, date: ast::Expr) -> ast::Expr {
        expr::cast(
            expr::function("date_trunc", vec![expr::string("year"), date]),
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
                expr::function("btrim", vec![expr::column(&c, &raw)]),
                expr::string("X$"),
                expr::string(""),
            ],
        );
        let codes = sql::table_function(
            "regexp_split_to_table",
            vec![expr::column(&b, code), expr::string(r",|\|\|")],
            true,
            ast::TableAlias {
                name: c,
                columns: vec![raw],
            },
        );
        SelectBuilder::new(sql::derived(base, b.clone()))
            .join(codes, ast::JoinOperator::CrossJoin)
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
            Materialization::TemporaryTable,
            sql::create_table_as(self.temp_name(name), true, query),
        )
    }
}
