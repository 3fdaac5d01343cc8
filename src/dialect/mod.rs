//! # SQL dialects
//!
//! A [Dialect] holds:
//!     - a method to provide a `sqlparser` dialect, used to check generated SQL
//!     - the constructs varying from one database engine to another: quoting, booleans,
//!       date arithmetic, code splitting, materialization of intermediate results and paging
//!
//! Each engine has its own struct: [Spark], [MsSql], [PostgreSql] and [Sqlite].

pub mod mssql;
pub mod postgresql;
pub mod spark;
pub mod sqlite;

use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::{ast, dialect, parser::Parser, parser::ParserError};
use std::fmt;

pub use mssql::MsSql;
pub use postgresql::PostgreSql;
pub use spark::Spark;
pub use sqlite::Sqlite;

use crate::{
    data_type::Value,
    namer,
    sql::{self, expr},
};

/// How an intermediate result is stored
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Materialization {
    /// A view, evaluated lazily and dropped with the session
    View,
    /// A temporary table, to be dropped after use
    TemporaryTable,
}

/// A statement creating a named intermediate result
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Statement {
    name: String,
    materialization: Materialization,
    statement: ast::Statement,
}

impl Statement {
    pub fn new<S: Into<String>>(
        name: S,
        materialization: Materialization,
        statement: ast::Statement,
    ) -> Self {
        Statement {
            name: name.into(),
            materialization,
            statement,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn materialization(&self) -> Materialization {
        self.materialization
    }

    pub fn statement(&self) -> &ast::Statement {
        &self.statement
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.statement)
    }
}

/// The constructs of an SQL engine
pub trait Dialect: fmt::Debug + Clone {
    type D: dialect::Dialect;

    /// The dialect used to parse SQL
    fn dialect(&self) -> Self::D;

    fn name(&self) -> &'static str;

    fn quote(&self) -> char {
        '"'
    }

    /// A quoted identifier
    fn ident(&self, name: &str) -> ast::Ident {
        ast::Ident::with_quote(self.quote(), name)
    }

    /// A possibly schema qualified object name
    fn object_name(&self, name: &str) -> ast::ObjectName {
        ast::ObjectName(name.split('.').map(|part| self.ident(part)).collect())
    }

    /// Temporary objects are named without quotes, their names are generated
    fn temp_name(&self, name: &str) -> ast::ObjectName {
        ast::ObjectName(vec![ast::Ident::new(name)])
    }

    fn boolean(&self, b: bool) -> ast::Expr {
        expr::boolean(b)
    }

    fn date(&self, date: NaiveDate) -> ast::Expr {
        expr::cast(
            expr::string(date.format("%Y-%m-%d").to_string()),
            ast::DataType::Date,
        )
    }

    fn date_time(&self, date_time: NaiveDateTime) -> ast::Expr {
        expr::cast(
            expr::string(date_time.format("%Y-%m-%d %H:%M:%S").to_string()),
            ast::DataType::Timestamp(None, ast::TimezoneInfo::None),
        )
    }

    fn value(&self, value: &Value) -> ast::Expr {
        match value {
            Value::Null => expr::null(),
            Value::Boolean(b) => self.boolean(*b),
            Value::Integer(i) => expr::number(i),
            Value::Float(f) => expr::number(f),
            Value::Text(t) => expr::string(t.clone()),
            Value::Date(d) => self.date(*d),
            Value::DateTime(dt) => self.date_time(*dt),
        }
    }

    /// A boolean value usable in a projection, from a predicate
    fn predicate_to_value(&self, predicate: ast::Expr) -> ast::Expr {
        predicate
    }

    /// A predicate usable in a `WHERE` or `CASE WHEN`, from a boolean value
    fn value_to_predicate(&self, value: ast::Expr) -> ast::Expr {
        value
    }

    /// Days from `start` to `end`
    fn date_difference_days(&self, start: ast::Expr, end: ast::Expr) -> ast::Expr;

    fn date_add_days(&self, date: ast::Expr, days: ast::Expr) -> ast::Expr;

    fn truncate_to_month(&self, date: ast::Expr) -> ast::Expr;

    fn truncate_to_year(&self, date: ast::Expr) -> ast::Expr;

    fn round_to_multiple(&self, value: ast::Expr, multiple: i64) -> ast::Expr {
        expr::cast(
            expr::binary(
                expr::function(
                    "ROUND",
                    vec![
                        expr::binary(
                            value,
                            ast::BinaryOperator::Divide,
                            expr::number(format!("{multiple}.0")),
                        ),
                        expr::number(0),
                    ],
                ),
                ast::BinaryOperator::Multiply,
                expr::number(multiple),
            ),
            ast::DataType::Integer(None),
        )
    }

    fn null_if_equals(&self, value: ast::Expr, equal_to: &Value) -> ast::Expr {
        expr::function("NULLIF", vec![value, self.value(equal_to)])
    }

    /// Rows of `base` with one row per code held in the `code` column.
    ///
    /// Codes are separated by `,` or `||`, trimmed and stripped of one trailing upper-case `X`.
    /// The other `columns` are carried over, null codes produce no row.
    fn split_codes(
        &self,
        base: ast::Query,
        columns: &[ast::Ident],
        code: &ast::Ident,
    ) -> ast::Query;

    /// Create an intermediate result from a query
    fn materialize(&self, name: &str, query: ast::Query) -> Statement;

    fn needs_teardown(&self, statement: &Statement) -> bool {
        statement.materialization() == Materialization::TemporaryTable
    }

    /// The statement dropping an intermediate result, if any is needed
    fn teardown(&self, statement: &Statement) -> Option<ast::Statement> {
        self.needs_teardown(statement)
            .then(|| sql::drop_table(self.temp_name(statement.name())))
    }

    /// A prefix for the temporary objects of a run
    fn temp_object_prefix(&self) -> String {
        namer::run_prefix()
    }

    /// Restrict a query to its first `n` rows
    fn limit(&self, query: ast::Query, n: u64) -> ast::Query {
        ast::Query {
            limit: Some(expr::number(n)),
            ..query
        }
    }

    /// Parse SQL with this dialect
    fn parse(&self, sql: &str) -> Result<Vec<ast::Statement>, ParserError> {
        Parser::parse_sql(&self.dialect(), sql)
    }

    /// Parse a single `SELECT` query
    fn parse_query(&self, sql: &str) -> Result<ast::Query, ParserError> {
        let mut statements = self.parse(sql)?;
        match (statements.pop(), statements.is_empty()) {
            (Some(ast::Statement::Query(query)), true) => Ok(*query),
            _ => Err(ParserError::ParserError(format!(
                "expected a single query, got: {sql}"
            ))),
        }
    }
}

/// Qualified projection of the carried over columns of a code split
fn carried_columns(qualifier: &ast::Ident, columns: &[ast::Ident]) -> Vec<ast::SelectItem> {
    columns
        .iter()
        .map(|column| sql::aliased(expr::column(qualifier, column), column.clone()))
        .collect()
}
