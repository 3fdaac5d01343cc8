//! Expression builders
//!
//! Constructors for the [ast::Expr] values the compiler emits. Compound operands are wrapped
//! in [ast::Expr::Nested] so the SQL printed by `sqlparser` keeps the structure it was built with.

use sqlparser::ast;
use std::fmt;

/// A column of a relation
pub fn column(qualifier: &ast::Ident, name: &ast::Ident) -> ast::Expr {
    ast::Expr::CompoundIdentifier(vec![qualifier.clone(), name.clone()])
}

pub fn identifier(name: &ast::Ident) -> ast::Expr {
    ast::Expr::Identifier(name.clone())
}

pub fn number<N: fmt::Display>(n: N) -> ast::Expr {
    ast::Expr::Value(ast::Value::Number(n.to_string(), false))
}

pub fn string<S: Into<String>>(s: S) -> ast::Expr {
    ast::Expr::Value(ast::Value::SingleQuotedString(s.into()))
}

pub fn boolean(b: bool) -> ast::Expr {
    ast::Expr::Value(ast::Value::Boolean(b))
}

pub fn null() -> ast::Expr {
    ast::Expr::Value(ast::Value::Null)
}

/// An unquoted keyword used as a function argument, e.g. `day` in `DATEDIFF(day, a, b)`
pub fn keyword(keyword: &str) -> ast::Expr {
    ast::Expr::Identifier(ast::Ident::new(keyword))
}

pub fn is_literal(expr: &ast::Expr) -> bool {
    matches!(expr, ast::Expr::Value(_))
}

fn arguments(args: Vec<ast::FunctionArgExpr>) -> ast::FunctionArguments {
    ast::FunctionArguments::List(ast::FunctionArgumentList {
        duplicate_treatment: None,
        args: args.into_iter().map(ast::FunctionArg::Unnamed).collect(),
        clauses: vec![],
    })
}

fn call(name: &str, args: Vec<ast::FunctionArgExpr>, over: Option<ast::WindowType>) -> ast::Expr {
    ast::Expr::Function(ast::Function {
        name: ast::ObjectName(vec![ast::Ident::new(name)]),
        args: arguments(args),
        filter: None,
        null_treatment: None,
        over,
        within_group: vec![],
    })
}

/// A function call, the name is printed as given
pub fn function(name: &str, args: Vec<ast::Expr>) -> ast::Expr {
    call(
        name,
        args.into_iter().map(ast::FunctionArgExpr::Expr).collect(),
        None,
    )
}

/// `COUNT(*)`
pub fn count_all() -> ast::Expr {
    call("COUNT", vec![ast::FunctionArgExpr::Wildcard], None)
}

/// `ROW_NUMBER() OVER (PARTITION BY .. ORDER BY ..)`
pub fn row_number(partition_by: Vec<ast::Expr>, order_by: Vec<ast::OrderByExpr>) -> ast::Expr {
    call(
        "ROW_NUMBER",
        vec![],
        Some(ast::WindowType::WindowSpec(ast::WindowSpec {
            window_name: None,
            partition_by,
            order_by,
            window_frame: None,
        })),
    )
}

/// Parenthesize compound operands
fn operand(expr: ast::Expr) -> Box<ast::Expr> {
    Box::new(match expr {
        expr @ (ast::Expr::BinaryOp { .. }
        | ast::Expr::UnaryOp { .. }
        | ast::Expr::IsNull(_)
        | ast::Expr::IsNotNull(_)
        | ast::Expr::InList { .. }) => ast::Expr::Nested(Box::new(expr)),
        expr => expr,
    })
}

pub fn nested(expr: ast::Expr) -> ast::Expr {
    ast::Expr::Nested(Box::new(expr))
}

pub fn binary(left: ast::Expr, op: ast::BinaryOperator, right: ast::Expr) -> ast::Expr {
    ast::Expr::BinaryOp {
        left: operand(left),
        op,
        right: operand(right),
    }
}

pub fn eq(left: ast::Expr, right: ast::Expr) -> ast::Expr {
    binary(left, ast::BinaryOperator::Eq, right)
}

pub fn and(left: ast::Expr, right: ast::Expr) -> ast::Expr {
    binary(left, ast::BinaryOperator::And, right)
}

pub fn or(left: ast::Expr, right: ast::Expr) -> ast::Expr {
    binary(left, ast::BinaryOperator::Or, right)
}

pub fn not(expr: ast::Expr) -> ast::Expr {
    ast::Expr::UnaryOp {
        op: ast::UnaryOperator::Not,
        expr: operand(expr),
    }
}

pub fn is_null(expr: ast::Expr) -> ast::Expr {
    ast::Expr::IsNull(operand(expr))
}

pub fn is_not_null(expr: ast::Expr) -> ast::Expr {
    ast::Expr::IsNotNull(operand(expr))
}

pub fn in_list(expr: ast::Expr, list: Vec<ast::Expr>, negated: bool) -> ast::Expr {
    ast::Expr::InList {
        expr: operand(expr),
        list,
        negated,
    }
}

pub fn exists(subquery: ast::Query, negated: bool) -> ast::Expr {
    ast::Expr::Exists {
        subquery: Box::new(subquery),
        negated,
    }
}

pub fn case(conditions: Vec<(ast::Expr, ast::Expr)>, else_result: Option<ast::Expr>) -> ast::Expr {
    let (conditions, results): (Vec<_>, Vec<_>) = conditions.into_iter().unzip();
    ast::Expr::Case {
        operand: None,
        conditions,
        results,
        else_result: else_result.map(Box::new),
    }
}

pub fn cast(expr: ast::Expr, data_type: ast::DataType) -> ast::Expr {
    ast::Expr::Cast {
        kind: ast::CastKind::Cast,
        expr: Box::new(expr),
        data_type,
        format: None,
    }
}

pub fn collate(expr: ast::Expr, collation: &str) -> ast::Expr {
    ast::Expr::Collate {
        expr: Box::new(expr),
        collation: ast::ObjectName(vec![ast::Ident::new(collation)]),
    }
}

/// Conjunction of all the expressions, `None` when there are none
pub fn all<I: IntoIterator<Item = ast::Expr>>(exprs: I) -> Option<ast::Expr> {
    exprs.into_iter().reduce(and)
}

pub fn order_by(expr: ast::Expr, asc: bool) -> ast::OrderByExpr {
    ast::OrderByExpr {
        expr,
        asc: Some(asc),
        nulls_first: None,
    }
}
