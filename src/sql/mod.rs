//! # SQL building blocks
//!
//! Builders for the `sqlparser` AST. The compiler assembles [ast::Query] values with
//! [SelectBuilder] and the functions below, the dialects wrap them into [ast::Statement]s,
//! and `sqlparser` prints them.
//!
//! Have a look at: https://docs.rs/sqlparser/latest/sqlparser/ast/struct.Query.html
//! Also this can help: https://www.postgresql.org/docs/current/sql-select.html
//!

pub mod expr;

use sqlparser::ast;

/// A query from a set expression
pub fn query(body: ast::SetExpr) -> ast::Query {
    ast::Query {
        with: None,
        body: Box::new(body),
        order_by: vec![],
        limit: None,
        limit_by: vec![],
        offset: None,
        fetch: None,
        locks: vec![],
        for_clause: None,
    }
}

/// Prefix a query with common table expressions
pub fn with(recursive: bool, cte_tables: Vec<ast::Cte>, mut query: ast::Query) -> ast::Query {
    query.with = (!cte_tables.is_empty()).then_some(ast::With {
        recursive,
        cte_tables,
    });
    query
}

pub fn cte(name: ast::Ident, columns: Vec<ast::Ident>, query: ast::Query) -> ast::Cte {
    ast::Cte {
        alias: ast::TableAlias { name, columns },
        query: Box::new(query),
        from: None,
        materialized: None,
    }
}

/// The body of a query usable as a member of a set operation
fn set_expr(query: ast::Query) -> ast::SetExpr {
    if query.with.is_none() && query.order_by.is_empty() && query.limit.is_none() {
        *query.body
    } else {
        ast::SetExpr::Query(Box::new(query))
    }
}

/// `UNION` (or `UNION ALL`) of queries
pub fn union<I>(first: ast::Query, rest: I, all: bool) -> ast::Query
where
    I: IntoIterator<Item = ast::Query>,
{
    let set_quantifier = if all {
        ast::SetQuantifier::All
    } else {
        ast::SetQuantifier::None
    };
    query(
        rest.into_iter()
            .fold(set_expr(first), |left, right| ast::SetExpr::SetOperation {
                op: ast::SetOperator::Union,
                set_quantifier,
                left: Box::new(left),
                right: Box::new(set_expr(right)),
            }),
    )
}

pub fn alias(name: ast::Ident) -> ast::TableAlias {
    ast::TableAlias {
        name,
        columns: vec![],
    }
}

/// A table or view
pub fn table(name: ast::ObjectName, alias: Option<ast::Ident>) -> ast::TableFactor {
    ast::TableFactor::Table {
        name,
        alias: alias.map(self::alias),
        args: None,
        with_hints: vec![],
        version: None,
        partitions: vec![],
    }
}

/// A subquery in a `FROM` clause
pub fn derived(subquery: ast::Query, alias: ast::Ident) -> ast::TableFactor {
    ast::TableFactor::Derived {
        lateral: false,
        subquery: Box::new(subquery),
        alias: Some(self::alias(alias)),
    }
}

/// A set returning function in a `FROM` clause
pub fn table_function(
    name: &str,
    args: Vec<ast::Expr>,
    lateral: bool,
    alias: ast::TableAlias,
) -> ast::TableFactor {
    ast::TableFactor::Function {
        lateral,
        name: ast::ObjectName(vec![ast::Ident::new(name)]),
        args: args
            .into_iter()
            .map(|arg| ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(arg)))
            .collect(),
        alias: Some(alias),
    }
}

pub fn aliased(expr: ast::Expr, alias: ast::Ident) -> ast::SelectItem {
    ast::SelectItem::ExprWithAlias { expr, alias }
}

pub fn unnamed(expr: ast::Expr) -> ast::SelectItem {
    ast::SelectItem::UnnamedExpr(expr)
}

pub fn wildcard() -> ast::SelectItem {
    ast::SelectItem::Wildcard(ast::WildcardAdditionalOptions::default())
}

/// Builds a `SELECT` reading one relation and its joins
#[derive(Clone, Debug, PartialEq)]
pub struct SelectBuilder {
    select: ast::Select,
    order_by: Vec<ast::OrderByExpr>,
}

impl SelectBuilder {
    /// A `SELECT *` from a relation
    pub fn new(relation: ast::TableFactor) -> Self {
        SelectBuilder {
            select: ast::Select {
                distinct: None,
                top: None,
                projection: vec![wildcard()],
                into: None,
                from: vec![ast::TableWithJoins {
                    relation,
                    joins: vec![],
                }],
                lateral_views: vec![],
                selection: None,
                group_by: ast::GroupByExpr::Expressions(vec![]),
                cluster_by: vec![],
                distribute_by: vec![],
                sort_by: vec![],
                having: None,
                named_window: vec![],
                qualify: None,
                window_before_qualify: false,
                value_table_mode: None,
                connect_by: None,
            },
            order_by: vec![],
        }
    }

    pub fn projection(mut self, projection: Vec<ast::SelectItem>) -> Self {
        self.select.projection = projection;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.select.distinct = Some(ast::Distinct::Distinct);
        self
    }

    pub fn join(mut self, relation: ast::TableFactor, join_operator: ast::JoinOperator) -> Self {
        if let Some(from) = self.select.from.first_mut() {
            from.joins.push(ast::Join {
                relation,
                join_operator,
            });
        }
        self
    }

    pub fn left_join(self, relation: ast::TableFactor, on: ast::Expr) -> Self {
        self.join(
            relation,
            ast::JoinOperator::LeftOuter(ast::JoinConstraint::On(on)),
        )
    }

    pub fn lateral_view(mut self, lateral_view: ast::LateralView) -> Self {
        self.select.lateral_views.push(lateral_view);
        self
    }

    /// `SELECT .. INTO name`
    pub fn into_table(mut self, name: ast::ObjectName) -> Self {
        self.select.into = Some(ast::SelectInto {
            temporary: false,
            unlogged: false,
            table: false,
            name,
        });
        self
    }

    /// Add a condition, in conjunction with any existing one
    pub fn filter(mut self, condition: ast::Expr) -> Self {
        self.select.selection = Some(match self.select.selection.take() {
            Some(selection) => expr::and(selection, condition),
            None => condition,
        });
        self
    }

    pub fn group_by(mut self, group_by: Vec<ast::Expr>) -> Self {
        self.select.group_by = ast::GroupByExpr::Expressions(group_by);
        self
    }

    pub fn order_by(mut self, order_by: Vec<ast::OrderByExpr>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn build(self) -> ast::Query {
        let SelectBuilder { select, order_by } = self;
        ast::Query {
            order_by,
            ..query(ast::SetExpr::Select(Box::new(select)))
        }
    }
}

/// `CREATE [TEMPORARY] TABLE name AS query`
pub fn create_table_as(
    name: ast::ObjectName,
    temporary: bool,
    query: ast::Query,
) -> ast::Statement {
    ast::Statement::CreateTable {
        or_replace: false,
        temporary,
        external: false,
        global: None,
        if_not_exists: false,
        transient: false,
        name,
        columns: vec![],
        constraints: vec![],
        hive_distribution: ast::HiveDistributionStyle::NONE,
        hive_formats: None,
        table_properties: vec![],
        with_options: vec![],
        file_format: None,
        location: None,
        query: Some(Box::new(query)),
        without_rowid: false,
        like: None,
        clone: None,
        engine: None,
        comment: None,
        auto_increment_offset: None,
        default_charset: None,
        collation: None,
        on_commit: None,
        on_cluster: None,
        order_by: None,
        partition_by: None,
        cluster_by: None,
        options: None,
        strict: false,
    }
}

/// `CREATE [TEMPORARY] VIEW name AS query`
pub fn create_view_as(name: ast::ObjectName, temporary: bool, query: ast::Query) -> ast::Statement {
    ast::Statement::CreateView {
        or_replace: false,
        materialized: false,
        name,
        columns: vec![],
        query: Box::new(query),
        options: ast::CreateTableOptions::None,
        cluster_by: vec![],
        with_no_schema_binding: false,
        if_not_exists: false,
        temporary,
    }
}

pub fn drop_table(name: ast::ObjectName) -> ast::Statement {
    ast::Statement::Drop {
        object_type: ast::ObjectType::Table,
        if_exists: false,
        names: vec![name],
        cascade: false,
        restrict: false,
        purge: false,
        temporary: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::{dialect::GenericDialect, parser::Parser};

    fn ident(s: &str) -> ast::Ident {
        ast::Ident::with_quote('"', s)
    }

    fn object_name(s: &str) -> ast::ObjectName {
        ast::ObjectName(vec![ast::Ident::new(s)])
    }

    #[test]
    fn test_query_display() {
        let t = ident("t");
        let s = ident("s");
        let patient_id = ident("patient_id");
        let inner =
            SelectBuilder::new(table(ast::ObjectName(vec![ident("CodedEvent")]), None)).build();
        let query = SelectBuilder::new(derived(inner, t.clone()))
            .projection(vec![
                aliased(expr::column(&t, &patient_id), patient_id.clone()),
                aliased(expr::count_all(), ident("value")),
            ])
            .left_join(
                table(ast::ObjectName(vec![s.clone()]), None),
                expr::eq(expr::column(&s, &patient_id), expr::column(&t, &patient_id)),
            )
            .filter(expr::is_not_null(expr::column(&s, &patient_id)))
            .group_by(vec![expr::column(&t, &patient_id)])
            .build();
        println!("{query}");
        assert_eq!(
            query.to_string(),
            r#"SELECT "t"."patient_id" AS "patient_id", COUNT(*) AS "value" FROM (SELECT * FROM "CodedEvent") AS "t" LEFT JOIN "s" ON "s"."patient_id" = "t"."patient_id" WHERE "s"."patient_id" IS NOT NULL GROUP BY "t"."patient_id""#
        );
        assert!(Parser::parse_sql(&GenericDialect {}, &query.to_string()).is_ok());
    }

    #[test]
    fn test_union_and_ordering() {
        let member = |name: &str| {
            SelectBuilder::new(table(ast::ObjectName(vec![ident(name)]), None))
                .projection(vec![unnamed(expr::identifier(&ident("patient_id")))])
                .distinct()
                .build()
        };
        let union_query = union(member("a"), [member("b")], false);
        let query = SelectBuilder::new(derived(union_query, ident("u")))
            .order_by(vec![expr::order_by(
                expr::column(&ident("u"), &ident("patient_id")),
                true,
            )])
            .build();
        assert_eq!(
            query.to_string(),
            r#"SELECT * FROM (SELECT DISTINCT "patient_id" FROM "a" UNION SELECT DISTINCT "patient_id" FROM "b") AS "u" ORDER BY "u"."patient_id" ASC"#
        );
        assert!(Parser::parse_sql(&GenericDialect {}, &query.to_string()).is_ok());
        assert_eq!(
            union(member("a"), Vec::new(), true).to_string(),
            r#"SELECT DISTINCT "patient_id" FROM "a""#
        );
    }

    #[test]
    fn test_statements() {
        let select = SelectBuilder::new(table(object_name("t"), None)).build();
        assert_eq!(
            create_table_as(object_name("tmp_x"), true, select.clone()).to_string(),
            "CREATE TEMPORARY TABLE tmp_x AS SELECT * FROM t"
        );
        assert_eq!(
            create_view_as(object_name("tmp_x"), true, select).to_string(),
            "CREATE TEMPORARY VIEW tmp_x AS SELECT * FROM t"
        );
        assert_eq!(drop_table(object_name("tmp_x")).to_string(), "DROP TABLE tmp_x");
    }

    #[test]
    fn test_recursive_with() {
        let numbers = ident("numbers");
        let n = ident("n");
        let anchor = SelectBuilder::new(table(object_name("t"), None))
            .projection(vec![unnamed(expr::number(1))])
            .build();
        let step = SelectBuilder::new(table(ast::ObjectName(vec![numbers.clone()]), None))
            .projection(vec![unnamed(expr::binary(
                expr::identifier(&n),
                ast::BinaryOperator::Plus,
                expr::number(1),
            ))])
            .filter(expr::binary(expr::identifier(&n), ast::BinaryOperator::Lt, expr::number(3)))
            .build();
        let recursive = with(
            true,
            vec![cte(numbers.clone(), vec![n.clone()], union(anchor, [step], true))],
            SelectBuilder::new(table(ast::ObjectName(vec![numbers]), None)).build(),
        );
        assert_eq!(
            recursive.to_string(),
            r#"WITH RECURSIVE "numbers" ("n") AS (SELECT 1 FROM t UNION ALL SELECT "n" + 1 FROM "numbers" WHERE "n" < 3) SELECT * FROM "numbers""#
        );
        assert!(Parser::parse_sql(&GenericDialect {}, &recursive.to_string()).is_ok());
    }
}
