//! # Query compiler
//!
//! Turns a [Dataset] into a [Plan]: the ordered statements materializing, for a given
//! [Backend] and [Dialect], every intermediate result needed to compute one row per patient.
//!
//! Stages are created bottom-up and shared between outputs using equal sub-definitions:
//!     - a frame stage holds the filtered rows of a table, named by logical columns
//!     - a row stage keeps one row per patient of a sorted frame
//!     - an aggregate stage holds one value per patient of a frame
//!     - the population stage lists the patients satisfying the population predicate
//!     - the results stage joins every output to the population, `patient_id` first
//!
//! Rows are picked with `ROW_NUMBER()` over a total order: the sort keys (nulls as the
//! smallest values, except an open `date_end` which is the largest), the table tie-breakers,
//! then the highest source row id.
//!

pub mod plan;

use sqlparser::ast;
use std::{collections::HashMap, error, fmt, iter, result};

pub use plan::{Plan, Stage};

use crate::{
    backend::{self, Backend, Normalizer, Source, Table, TieBreaker},
    data_type::{self, DataType, DataTyped, Value},
    dialect::Dialect,
    frame::{
        self, Aggregate, ColumnRef, Dataset, EventFrame, FrameColumn, Operand, Operator,
        PatientFrame, Position, Predicate, Series, Truncation, PATIENT_ID, POPULATION,
    },
    namer::{self, Namer},
    sql::{self, expr, SelectBuilder},
};

/// The source row identifier carried by frame stages
pub const SOURCE_ROW_ID: &str = "source_row_id";
const ROW_NUM: &str = "row_num";
const VALUE: &str = "value";
const DATE_START: &str = "date_start";
const DATE_END: &str = "date_end";

// Error management

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Definition(frame::Error),
    UnknownTable(String),
    UnknownColumn(String),
    InvalidExpression(String),
    Other(String),
}

impl Error {
    pub fn unknown_table(output: impl fmt::Display, desc: impl fmt::Display) -> Error {
        Error::UnknownTable(format!("{}: {}", output, desc))
    }
    pub fn unknown_column(output: impl fmt::Display, desc: impl fmt::Display) -> Error {
        Error::UnknownColumn(format!("{}: {}", output, desc))
    }
    pub fn invalid_expression(output: impl fmt::Display, desc: impl fmt::Display) -> Error {
        Error::InvalidExpression(format!("{}: {}", output, desc))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Definition(err) => write!(f, "{}", err),
            Error::UnknownTable(desc) => writeln!(f, "UnknownTable: {}", desc),
            Error::UnknownColumn(desc) => writeln!(f, "UnknownColumn: {}", desc),
            Error::InvalidExpression(desc) => writeln!(f, "InvalidExpression: {}", desc),
            Error::Other(err) => writeln!(f, "{}", err),
        }
    }
}

impl error::Error for Error {}

impl From<frame::Error> for Error {
    fn from(err: frame::Error) -> Self {
        Error::Definition(err)
    }
}

impl From<backend::Error> for Error {
    fn from(err: backend::Error) -> Self {
        match err {
            backend::Error::UnknownTable(desc) => Error::UnknownTable(desc),
            backend::Error::UnknownColumn(desc) => Error::UnknownColumn(desc),
            err => Error::Other(err.to_string()),
        }
    }
}

impl From<data_type::Error> for Error {
    fn from(err: data_type::Error) -> Self {
        Error::InvalidExpression(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// A compiled series
#[derive(Clone, Debug)]
struct Compiled {
    expr: ast::Expr,
    /// `None` for a null literal
    data_type: Option<DataType>,
    /// The expression is a predicate rather than a boolean value
    predicate: bool,
}

impl Compiled {
    fn value(expr: ast::Expr, data_type: Option<DataType>) -> Self {
        Compiled {
            expr,
            data_type,
            predicate: false,
        }
    }

    fn predicate(expr: ast::Expr) -> Self {
        Compiled {
            expr,
            data_type: Some(DataType::Boolean),
            predicate: true,
        }
    }
}

/// A query under construction: a root relation and the stages joined to it on `patient_id`
struct Scope {
    from: ast::TableFactor,
    root: ast::Ident,
    joins: Vec<(String, ast::Ident)>,
}

impl Scope {
    /// `from` must be aliased as `root`
    fn new(from: ast::TableFactor, root: ast::Ident) -> Self {
        Scope {
            from,
            root,
            joins: Vec::new(),
        }
    }

    fn select<D: Dialect>(self, dialect: &D) -> SelectBuilder {
        let Scope { from, root, joins } = self;
        let patient_id = dialect.ident(PATIENT_ID);
        joins
            .into_iter()
            .fold(SelectBuilder::new(from), |select, (stage, alias)| {
                let on = expr::eq(
                    expr::column(&alias, &patient_id),
                    expr::column(&root, &patient_id),
                );
                select.left_join(stage_factor(dialect, &stage, alias), on)
            })
    }
}

fn stage_factor<D: Dialect>(dialect: &D, stage: &str, alias: ast::Ident) -> ast::TableFactor {
    sql::table(dialect.temp_name(stage), Some(alias))
}

/// The columns of a frame stage
fn frame_columns(table: &Table) -> Vec<&str> {
    table
        .columns
        .keys()
        .map(String::as_str)
        .chain(table.row_id.as_ref().map(|_| SOURCE_ROW_ID))
        .collect()
}

/// Types that can be compared with each other
fn comparable(left: DataType, right: DataType) -> bool {
    left == right
        || (left.is_temporal() && right.is_temporal())
        || (left.is_numeric() && right.is_numeric())
        || (matches!(left, DataType::Text | DataType::Code)
            && matches!(right, DataType::Text | DataType::Code))
}

fn binary_operator(operator: Operator) -> ast::BinaryOperator {
    match operator {
        Operator::Eq | Operator::In => ast::BinaryOperator::Eq,
        Operator::NotEq | Operator::NotIn => ast::BinaryOperator::NotEq,
        Operator::Lt => ast::BinaryOperator::Lt,
        Operator::LtEq => ast::BinaryOperator::LtEq,
        Operator::Gt => ast::BinaryOperator::Gt,
        Operator::GtEq => ast::BinaryOperator::GtEq,
    }
}

/// Sorting on it first orders nulls as the smallest values, or as the largest ones
fn null_flag(value: ast::Expr, null_largest: bool) -> ast::Expr {
    let (null, not_null) = if null_largest { (1, 0) } else { (0, 1) };
    expr::case(
        vec![(expr::is_null(value), expr::number(null))],
        Some(expr::number(not_null)),
    )
}

/// Compiles datasets for a backend and a dialect
#[derive(Debug)]
pub struct Compiler<'a, D: Dialect> {
    backend: &'a Backend,
    dialect: D,
    /// Names of the materialized stages
    names: Namer,
    /// Aliases of joined stages
    aliases: Namer,
    stages: Vec<Stage>,
    frames: HashMap<EventFrame, String>,
    rows: HashMap<PatientFrame, String>,
    aggregates: HashMap<(EventFrame, Aggregate), (String, DataType)>,
    /// The output being compiled, reported in errors
    output: String,
}

impl<'a, D: Dialect> Compiler<'a, D> {
    /// A compiler naming its temporary objects with a fresh run prefix
    pub fn new(backend: &'a Backend, dialect: D) -> Self {
        let prefix = dialect.temp_object_prefix();
        Compiler::with_prefix(backend, dialect, prefix)
    }

    pub fn with_prefix<S: Into<String>>(backend: &'a Backend, dialect: D, prefix: S) -> Self {
        Compiler {
            backend,
            dialect,
            names: Namer::new(prefix),
            aliases: Namer::default(),
            stages: Vec::new(),
            frames: HashMap::new(),
            rows: HashMap::new(),
            aggregates: HashMap::new(),
            output: String::new(),
        }
    }

    pub fn compile(mut self, dataset: &Dataset) -> Result<Plan> {
        let population = self.population_stage(dataset.population())?;
        let p = self.dialect.ident("p");
        let patient_id = self.dialect.ident(PATIENT_ID);
        let mut scope = Scope::new(stage_factor(&self.dialect, &population, p.clone()), p.clone());
        let mut projection = vec![sql::aliased(expr::column(&p, &patient_id), patient_id)];
        let mut columns = vec![(PATIENT_ID.to_string(), DataType::Integer)];
        for (name, series) in dataset.variables() {
            self.output = name.clone();
            series.check(name)?;
            let compiled = self.series(series, &mut scope)?;
            columns.push((name.clone(), compiled.data_type.unwrap_or(DataType::Text)));
            projection.push(sql::aliased(self.value(compiled), self.dialect.ident(name)));
        }
        let query = scope.select(&self.dialect).projection(projection).build();
        let results = self.materialize(namer::RESULTS, "results".to_string(), query);
        log::info!(
            "Compiled {} outputs into {} {} stages",
            columns.len() - 1,
            self.stages.len(),
            self.dialect.name()
        );
        Ok(Plan::new(self.dialect.name(), self.stages, results, columns))
    }

    fn materialize(&mut self, kind: &str, purpose: String, query: ast::Query) -> String {
        let name = self.names.new_name(kind);
        let statement = self.dialect.materialize(&name, query);
        let teardown = self.dialect.teardown(&statement);
        log::debug!("{}: {}", purpose, statement);
        self.stages.push(Stage::new(purpose, statement, teardown));
        name
    }

    /// Join a stage to a scope once, returning its alias
    fn join(&mut self, scope: &mut Scope, stage: &str) -> ast::Ident {
        if let Some((_, alias)) = scope.joins.iter().find(|(name, _)| name == stage) {
            return alias.clone();
        }
        let alias = self.dialect.ident(&self.aliases.new_name(namer::SERIES));
        scope.joins.push((stage.to_string(), alias.clone()));
        alias
    }

    fn schema_error(&self, err: backend::Error) -> Error {
        match err {
            backend::Error::UnknownTable(desc) => Error::unknown_table(&self.output, desc),
            backend::Error::UnknownColumn(desc) => Error::unknown_column(&self.output, desc),
            err => Error::other(err),
        }
    }

    fn table(&self, name: &str) -> Result<&'a Table> {
        let backend = self.backend;
        backend.table(name).map_err(|err| self.schema_error(err))
    }

    fn column_type(&self, table: &str, column: &str) -> Result<DataType> {
        self.backend
            .resolve(table, column)
            .map(|resolved| resolved.data_type)
            .map_err(|err| self.schema_error(err))
    }

    fn check_source(&self, frame: &EventFrame, column: &ColumnRef) -> Result<()> {
        match &column.table {
            Some(other) if other != frame.table() => {
                Err(frame::Error::mixed_source_table(&self.output, frame.table(), other).into())
            }
            _ => Ok(()),
        }
    }

    /// A literal of the given type
    fn literal(&self, value: &Value, data_type: DataType) -> Result<ast::Expr> {
        value
            .clone()
            .coerce(data_type)
            .map(|value| self.dialect.value(&value))
            .map_err(|err| Error::invalid_expression(&self.output, err.to_string().trim_end()))
    }

    fn value(&self, compiled: Compiled) -> ast::Expr {
        if compiled.predicate {
            self.dialect.predicate_to_value(compiled.expr)
        } else {
            compiled.expr
        }
    }

    fn predicate_of(&self, compiled: Compiled) -> ast::Expr {
        if compiled.predicate {
            compiled.expr
        } else {
            self.dialect.value_to_predicate(compiled.expr)
        }
    }

    /// The physical rows of a table with logical column names, normalized
    fn base(&self, table: &Table, alias: ast::Ident) -> Result<ast::TableFactor> {
        let s = self.dialect.ident("s");
        let split = table.split_column();
        let mut projection = Vec::new();
        let mut carried = Vec::new();
        for (name, column) in &table.columns {
            let physical = expr::column(
                &s,
                &self.dialect.ident(column.source.as_deref().unwrap_or(name)),
            );
            let normalized = match &column.normalizer {
                Some(Normalizer::RoundToMultiple { multiple }) => {
                    self.dialect.round_to_multiple(physical, *multiple)
                }
                Some(Normalizer::NullIfEquals { value }) => {
                    let value = value
                        .clone()
                        .coerce(column.data_type)
                        .unwrap_or_else(|_| value.clone());
                    self.dialect.null_if_equals(physical, &value)
                }
                Some(Normalizer::SplitCodes) | None => physical,
            };
            let alias = self.dialect.ident(name);
            if split != Some(name.as_str()) {
                carried.push(alias.clone());
            }
            projection.push(sql::aliased(normalized, alias));
        }
        if let Some(row_id) = &table.row_id {
            let alias = self.dialect.ident(SOURCE_ROW_ID);
            carried.push(alias.clone());
            projection.push(sql::aliased(
                expr::column(&s, &self.dialect.ident(row_id)),
                alias,
            ));
        }
        let query = SelectBuilder::new(self.source(&table.source, s)?)
            .projection(projection)
            .build();
        let query = match split {
            Some(code) => self
                .dialect
                .split_codes(query, &carried, &self.dialect.ident(code)),
            None => query,
        };
        Ok(sql::derived(query, alias))
    }

    /// A backend table or query, aliased
    fn source(&self, source: &Source, alias: ast::Ident) -> Result<ast::TableFactor> {
        match source {
            Source::Table(name) => Ok(sql::table(self.dialect.object_name(name), Some(alias))),
            Source::Query(query) => {
                let query = self.dialect.parse_query(query).map_err(|err| {
                    Error::other(format!("cannot read the query of a backend table: {err}"))
                })?;
                Ok(sql::derived(query, alias))
            }
        }
    }

    /// The filtered rows of a frame
    fn frame_stage(&mut self, frame: &EventFrame) -> Result<String> {
        let frame = &frame.unsorted();
        if let Some(name) = self.frames.get(frame) {
            return Ok(name.clone());
        }
        let table = self.table(frame.table())?;
        let t = self.dialect.ident("t");
        let mut scope = Scope::new(self.base(table, t.clone())?, t.clone());
        let mut conditions = Vec::new();
        for predicate in frame.filters() {
            conditions.push(self.predicate(frame, predicate, &mut scope)?);
        }
        let projection = frame_columns(table)
            .into_iter()
            .map(|column| {
                let column = self.dialect.ident(column);
                sql::aliased(expr::column(&t, &column), column)
            })
            .collect();
        let mut select = scope.select(&self.dialect).projection(projection);
        if let Some(condition) = expr::all(conditions) {
            select = select.filter(condition);
        }
        let name = self.materialize(namer::FRAME, format!("rows of {frame}"), select.build());
        self.frames.insert(frame.clone(), name.clone());
        Ok(name)
    }

    fn predicate(
        &mut self,
        frame: &EventFrame,
        predicate: &Predicate,
        scope: &mut Scope,
    ) -> Result<ast::Expr> {
        let t = scope.root.clone();
        match predicate {
            Predicate::Compare {
                column,
                operator,
                operand,
            } => {
                self.check_source(frame, column)?;
                let data_type = self.column_type(frame.table(), &column.name)?;
                let left = expr::column(&t, &self.dialect.ident(&column.name));
                self.compare(frame.table(), column, data_type, left, *operator, operand, scope)
            }
            Predicate::DateInRange(date) => {
                self.column_type(frame.table(), DATE_START)?;
                self.column_type(frame.table(), DATE_END)?;
                let date = match date {
                    Operand::Value(value) => self.date_literal(value)?,
                    Operand::Series(series) => self.date(series, scope)?,
                    operand => {
                        return Err(Error::invalid_expression(
                            &self.output,
                            format!("{operand} is not a date"),
                        ))
                    }
                };
                let start = expr::column(&t, &self.dialect.ident(DATE_START));
                let end = expr::column(&t, &self.dialect.ident(DATE_END));
                Ok(expr::and(
                    expr::binary(start, ast::BinaryOperator::LtEq, date.clone()),
                    expr::or(
                        expr::binary(end.clone(), ast::BinaryOperator::Gt, date),
                        expr::is_null(end),
                    ),
                ))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compare(
        &mut self,
        table: &str,
        column: &ColumnRef,
        data_type: DataType,
        left: ast::Expr,
        operator: Operator,
        operand: &Operand,
        scope: &mut Scope,
    ) -> Result<ast::Expr> {
        let membership = matches!(operator, Operator::In | Operator::NotIn);
        let negated = operator == Operator::NotIn;
        match operand {
            Operand::Value(value) if value.is_null() => match operator {
                Operator::Eq | Operator::In => Ok(expr::is_null(left)),
                Operator::NotEq | Operator::NotIn => Ok(expr::is_not_null(left)),
                _ => Err(Error::invalid_expression(
                    &self.output,
                    format!("{column} cannot be compared to null with {operator}"),
                )),
            },
            Operand::Value(value) if membership => {
                self.in_list(left, std::slice::from_ref(value), data_type, negated)
            }
            Operand::Value(value) => Ok(expr::binary(
                left,
                binary_operator(operator),
                self.literal(value, data_type)?,
            )),
            Operand::List(values) if membership => self.in_list(left, values, data_type, negated),
            Operand::Codelist(codelist) if membership => {
                let system = self
                    .table(table)?
                    .column(&column.name)
                    .and_then(|definition| definition.system.as_deref());
                if let Some(system) = system.filter(|system| *system != codelist.system()) {
                    return Err(Error::invalid_expression(
                        &self.output,
                        format!(
                            "{column} holds {system} codes, not {} codes",
                            codelist.system()
                        ),
                    ));
                }
                let codes: Vec<Value> = codelist.codes().iter().map(Value::text).collect();
                self.in_list(left, &codes, data_type, negated)
            }
            Operand::Column(other) if membership => {
                self.column_membership(left, data_type, other, negated)
            }
            Operand::Series(series) => match series.as_ref() {
                Series::Value(value) => self.compare(
                    table,
                    column,
                    data_type,
                    left,
                    operator,
                    &Operand::Value(value.clone()),
                    scope,
                ),
                series => {
                    let compiled = self.series(series, scope)?;
                    if let Some(other) = compiled.data_type {
                        if !comparable(data_type, other) {
                            return Err(Error::invalid_expression(
                                &self.output,
                                format!("{column} is a {data_type}, {series} is a {other}"),
                            ));
                        }
                    }
                    Ok(expr::binary(
                        left,
                        binary_operator(operator),
                        self.value(compiled),
                    ))
                }
            },
            operand => Err(Error::invalid_expression(
                &self.output,
                format!("{column} {operator} {operand} is not a valid test"),
            )),
        }
    }

    fn in_list(
        &self,
        left: ast::Expr,
        values: &[Value],
        data_type: DataType,
        negated: bool,
    ) -> Result<ast::Expr> {
        if values.is_empty() {
            // Nothing is in an empty list
            return Ok(expr::eq(
                expr::number(1),
                expr::number(if negated { 1 } else { 0 }),
            ));
        }
        let list = values
            .iter()
            .map(|value| self.literal(value, data_type))
            .collect::<Result<Vec<_>>>()?;
        Ok(expr::in_list(left, list, negated))
    }

    /// `[NOT] EXISTS` a row of the patient in another frame with the same value
    fn column_membership(
        &mut self,
        left: ast::Expr,
        data_type: DataType,
        other: &FrameColumn,
        negated: bool,
    ) -> Result<ast::Expr> {
        let other_type = self.column_type(other.frame.table(), &other.column)?;
        if !comparable(data_type, other_type) {
            return Err(Error::invalid_expression(
                &self.output,
                format!("{} is a {other_type}, not a {data_type}", other.column),
            ));
        }
        let stage = self.frame_stage(&other.frame)?;
        let qualifier = match &left {
            ast::Expr::CompoundIdentifier(idents) => idents.first().cloned(),
            _ => None,
        };
        let Some(t) = qualifier else {
            return Err(Error::other("membership tests apply to columns"));
        };
        let x = self.dialect.ident("x");
        let patient_id = self.dialect.ident(PATIENT_ID);
        let subquery = SelectBuilder::new(stage_factor(&self.dialect, &stage, x.clone()))
            .filter(expr::eq(
                expr::column(&x, &patient_id),
                expr::column(&t, &patient_id),
            ))
            .filter(expr::eq(
                expr::column(&x, &self.dialect.ident(&other.column)),
                left,
            ))
            .build();
        Ok(expr::exists(subquery, negated))
    }

    fn date_literal(&self, value: &Value) -> Result<ast::Expr> {
        match value {
            Value::Null | Value::DateTime(_) => Ok(self.dialect.value(value)),
            value => self.literal(value, DataType::Date),
        }
    }

    /// A date valued series, text literals are read as dates
    fn date(&mut self, series: &Series, scope: &mut Scope) -> Result<ast::Expr> {
        if let Series::Value(value) = series {
            return self.date_literal(value);
        }
        let compiled = self.series(series, scope)?;
        match compiled.data_type {
            Some(data_type) if !data_type.is_temporal() => Err(Error::invalid_expression(
                &self.output,
                format!("{series} is a {data_type}, not a date"),
            )),
            _ => Ok(compiled.expr),
        }
    }

    /// A boolean series as a predicate
    fn boolean(&mut self, series: &Series, scope: &mut Scope) -> Result<ast::Expr> {
        let compiled = self.series(series, scope)?;
        match compiled.data_type {
            Some(data_type) if data_type != DataType::Boolean => Err(Error::invalid_expression(
                &self.output,
                format!("{series} is a {data_type}, not a boolean"),
            )),
            _ => Ok(self.predicate_of(compiled)),
        }
    }

    fn series(&mut self, series: &Series, scope: &mut Scope) -> Result<Compiled> {
        let patient_id = self.dialect.ident(PATIENT_ID);
        match series {
            Series::Value(value) => Ok(Compiled::value(
                self.dialect.value(value),
                value.data_type(),
            )),
            Series::Select { frame, column } => {
                let data_type = self.column_type(frame.table(), column)?;
                let stage = self.patient_frame_stage(frame)?;
                let alias = self.join(scope, &stage);
                Ok(Compiled::value(
                    expr::column(&alias, &self.dialect.ident(column)),
                    Some(data_type),
                ))
            }
            Series::Unreduced { .. } => Err(frame::Error::frame_not_reduced(&self.output).into()),
            Series::Aggregate { frame, aggregate } => {
                let (stage, data_type) = self.aggregate_stage(frame, aggregate)?;
                let alias = self.join(scope, &stage);
                let value = expr::column(&alias, &self.dialect.ident(VALUE));
                Ok(match aggregate {
                    Aggregate::Exists => {
                        Compiled::predicate(expr::is_not_null(expr::column(&alias, &patient_id)))
                    }
                    Aggregate::Count => Compiled::value(
                        expr::function("COALESCE", vec![value, expr::number(0)]),
                        Some(DataType::Integer),
                    ),
                    _ => Compiled::value(value, Some(data_type)),
                })
            }
            Series::And(left, right) => {
                let left = self.boolean(left, scope)?;
                let right = self.boolean(right, scope)?;
                Ok(Compiled::predicate(expr::and(left, right)))
            }
            Series::Or(left, right) => {
                let left = self.boolean(left, scope)?;
                let right = self.boolean(right, scope)?;
                Ok(Compiled::predicate(expr::or(left, right)))
            }
            Series::Not(series) => Ok(Compiled::predicate(expr::not(self.boolean(series, scope)?))),
            Series::DateAddDays { date, days } => {
                let date = self.date(date, scope)?;
                let days = self.series(days, scope)?;
                match days.data_type {
                    Some(data_type) if data_type != DataType::Integer => {
                        Err(Error::invalid_expression(
                            &self.output,
                            format!("days must be an integer, not a {data_type}"),
                        ))
                    }
                    _ => Ok(Compiled::value(
                        self.dialect.date_add_days(date, days.expr),
                        Some(DataType::Date),
                    )),
                }
            }
            Series::DaysBetween { start, end } => {
                let start = self.date(start, scope)?;
                let end = self.date(end, scope)?;
                Ok(Compiled::value(
                    self.dialect.date_difference_days(start, end),
                    Some(DataType::Integer),
                ))
            }
            Series::Truncate { date, truncation } => {
                let date = self.date(date, scope)?;
                let truncated = match truncation {
                    Truncation::Month => self.dialect.truncate_to_month(date),
                    Truncation::Year => self.dialect.truncate_to_year(date),
                };
                Ok(Compiled::value(truncated, Some(DataType::Date)))
            }
        }
    }

    fn patient_frame_stage(&mut self, frame: &PatientFrame) -> Result<String> {
        match frame {
            PatientFrame::Table(name) => {
                if !self.table(name)?.patient_level {
                    return Err(Error::invalid_expression(
                        &self.output,
                        format!("{name} has several rows per patient, pick one to use it"),
                    ));
                }
                self.frame_stage(&frame::table(name.as_str()))
            }
            PatientFrame::Row { frame, position } => self.row_stage(frame, *position),
        }
    }

    /// One row per patient of a sorted frame
    fn row_stage(&mut self, frame: &EventFrame, position: Position) -> Result<String> {
        let key = PatientFrame::Row {
            frame: frame.clone(),
            position,
        };
        if let Some(name) = self.rows.get(&key) {
            return Ok(name.clone());
        }
        if frame.sort_keys().is_empty() {
            return Err(frame::Error::unsorted_frame(&self.output).into());
        }
        let source = self.frame_stage(frame)?;
        let table = self.table(frame.table())?;
        let order_by = self.row_order(frame, table, position)?;
        let f = self.dialect.ident("f");
        let r = self.dialect.ident("r");
        let row_num = self.dialect.ident(ROW_NUM);
        let patient_id = self.dialect.ident(PATIENT_ID);
        let columns: Vec<ast::Ident> = frame_columns(table)
            .into_iter()
            .map(|column| self.dialect.ident(column))
            .collect();
        let numbered = SelectBuilder::new(stage_factor(&self.dialect, &source, f.clone()))
            .projection(
                columns
                    .iter()
                    .map(|column| sql::aliased(expr::column(&f, column), column.clone()))
                    .chain(iter::once(sql::aliased(
                        expr::row_number(vec![expr::column(&f, &patient_id)], order_by),
                        row_num.clone(),
                    )))
                    .collect(),
            )
            .build();
        let query = SelectBuilder::new(sql::derived(numbered, r.clone()))
            .projection(
                columns
                    .iter()
                    .map(|column| sql::aliased(expr::column(&r, column), column.clone()))
                    .collect(),
            )
            .filter(expr::eq(expr::column(&r, &row_num), expr::number(1)))
            .build();
        let purpose = match position {
            Position::First => format!("first row of {frame}"),
            Position::Last => format!("last row of {frame}"),
        };
        let name = self.materialize(namer::ROW, purpose, query);
        self.rows.insert(key, name.clone());
        Ok(name)
    }

    /// The total order whose first row is kept
    fn row_order(
        &self,
        frame: &EventFrame,
        table: &Table,
        position: Position,
    ) -> Result<Vec<ast::OrderByExpr>> {
        let f = self.dialect.ident("f");
        let column = |name: &str| expr::column(&f, &self.dialect.ident(name));
        let asc = position == Position::First;
        let mut order_by = Vec::new();
        for key in frame.sort_keys() {
            self.check_source(frame, key)?;
            self.column_type(frame.table(), &key.name)?;
            // An open period ends after any other
            let open_end = key.name == DATE_END;
            order_by.push(expr::order_by(null_flag(column(&key.name), open_end), asc));
            order_by.push(expr::order_by(column(&key.name), asc));
        }
        for tie_breaker in &table.tie_breakers {
            order_by.push(match tie_breaker {
                TieBreaker::PreferNotIn { column: name, values } if values.is_empty() => {
                    expr::order_by(null_flag(column(name), false), false)
                }
                TieBreaker::PreferNotIn { column: name, values } => {
                    let data_type = self.column_type(frame.table(), name)?;
                    let list = values
                        .iter()
                        .map(|value| self.literal(value, data_type))
                        .collect::<Result<Vec<_>>>()?;
                    let excluded = expr::or(
                        expr::is_null(column(name)),
                        expr::in_list(column(name), list, false),
                    );
                    expr::order_by(
                        expr::case(vec![(excluded, expr::number(0))], Some(expr::number(1))),
                        false,
                    )
                }
                TieBreaker::Ascending { column: name } => expr::order_by(column(name), true),
                TieBreaker::Descending { column: name } => expr::order_by(column(name), false),
            });
        }
        match &table.row_id {
            Some(_) => {
                order_by.push(expr::order_by(column(SOURCE_ROW_ID), false));
                if let Some(code) = table.split_column() {
                    order_by.push(expr::order_by(column(code), true));
                }
            }
            None => order_by.extend(
                frame_columns(table)
                    .into_iter()
                    .map(|name| expr::order_by(column(name), true)),
            ),
        }
        Ok(order_by)
    }

    /// One value per patient having rows in a frame
    fn aggregate_stage(
        &mut self,
        frame: &EventFrame,
        aggregate: &Aggregate,
    ) -> Result<(String, DataType)> {
        let key = (frame.clone(), aggregate.clone());
        if let Some(found) = self.aggregates.get(&key) {
            return Ok(found.clone());
        }
        let source = self.frame_stage(frame)?;
        let f = self.dialect.ident("f");
        let patient_id = self.dialect.ident(PATIENT_ID);
        let from = SelectBuilder::new(stage_factor(&self.dialect, &source, f.clone()));
        let per_patient = sql::aliased(expr::column(&f, &patient_id), patient_id.clone());
        let reduce = |reduced: ast::Expr| {
            vec![
                per_patient.clone(),
                sql::aliased(reduced, self.dialect.ident(VALUE)),
            ]
        };
        let group_by = vec![expr::column(&f, &patient_id)];
        let (select, data_type) = match aggregate {
            Aggregate::Exists => (
                from.projection(vec![per_patient.clone()]).distinct(),
                DataType::Boolean,
            ),
            Aggregate::Count => (
                from.projection(reduce(expr::count_all())).group_by(group_by),
                DataType::Integer,
            ),
            Aggregate::Sum(column) | Aggregate::Min(column) | Aggregate::Max(column) => {
                let data_type = self.column_type(frame.table(), column)?;
                let function = match aggregate {
                    Aggregate::Sum(_) if !data_type.is_numeric() => {
                        return Err(Error::invalid_expression(
                            &self.output,
                            format!("{column} is a {data_type} and cannot be summed"),
                        ))
                    }
                    Aggregate::Sum(_) => "SUM",
                    Aggregate::Min(_) => "MIN",
                    _ => "MAX",
                };
                let arg = expr::column(&f, &self.dialect.ident(column));
                (
                    from.projection(reduce(expr::function(function, vec![arg])))
                        .group_by(group_by),
                    data_type,
                )
            }
        };
        let name = self.materialize(
            namer::AGGREGATE,
            format!("{frame}.{aggregate}"),
            select.build(),
        );
        self.aggregates.insert(key, (name.clone(), data_type));
        Ok((name, data_type))
    }

    /// The patients satisfying the population predicate
    fn population_stage(&mut self, population: &Series) -> Result<String> {
        self.output = POPULATION.to_string();
        population.check(POPULATION)?;
        let s = self.dialect.ident("s");
        let patient_id = self.dialect.ident(PATIENT_ID);
        // Each patient once, whatever the number of their rows
        let mut universe = population
            .tables()
            .into_iter()
            .map(|name| -> Result<ast::Query> {
                let table = self.table(name)?;
                let physical = table.physical_name(PATIENT_ID).unwrap_or(PATIENT_ID);
                Ok(SelectBuilder::new(self.source(&table.source, s.clone())?)
                    .projection(vec![sql::aliased(
                        expr::column(&s, &self.dialect.ident(physical)),
                        patient_id.clone(),
                    )])
                    .distinct()
                    .build())
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter();
        let first = universe.next().ok_or_else(|| {
            Error::invalid_expression(
                POPULATION,
                "the population must be defined from at least one table",
            )
        })?;
        let u = self.dialect.ident("u");
        let mut scope = Scope::new(
            sql::derived(sql::union(first, universe, false), u.clone()),
            u.clone(),
        );
        let condition = self.boolean(population, &mut scope)?;
        let query = scope
            .select(&self.dialect)
            .projection(vec![sql::aliased(expr::column(&u, &patient_id), patient_id)])
            .filter(condition)
            .build();
        Ok(self.materialize(namer::POPULATION, "population".to_string(), query))
    }
}

/// Compile a dataset with a fresh run prefix
pub fn compile<D: Dialect>(dataset: &Dataset, backend: &Backend, dialect: D) -> Result<Plan> {
    Compiler::new(backend, dialect).compile(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{Ready, With},
        dialect::{MsSql, PostgreSql, Spark, Sqlite},
        frame::{cohort_date_range, codelist, patient_table, table, Condition, Increment},
    };

    const PREFIX: &str = "tmp_test_";

    fn dataset() -> Dataset {
        let registered = table("practice_registrations").date_in_range("2020-01-01");
        Dataset::builder()
            .with((POPULATION, registered.exists_for_patient()))
            .with(("sex", patient_table("patients").get("sex")))
            .with((
                "region",
                registered.latest_on("date_end").get("nuts1_region_name"),
            ))
            .with((
                "asthma_count",
                table("clinical_events")
                    .filter("code", Condition::is_in(codelist(["XaLIG", "XaLIH"], "ctv3")))
                    .count_for_patient(),
            ))
            .try_build()
            .unwrap()
    }

    fn compile_with<D: Dialect>(dataset: &Dataset, dialect: D) -> Result<Plan> {
        let backend = Backend::tpp();
        Compiler::with_prefix(&backend, dialect, PREFIX).compile(dataset)
    }

    #[test]
    fn test_stages() {
        let plan = compile_with(&dataset(), Sqlite).unwrap();
        println!("{plan}");
        let names: Vec<&str> = plan.stages().iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec![
                "tmp_test_frame_0",
                "tmp_test_aggregate_0",
                "tmp_test_population_0",
                "tmp_test_frame_1",
                "tmp_test_row_0",
                "tmp_test_frame_2",
                "tmp_test_aggregate_1",
                "tmp_test_results_0",
            ]
        );
        assert_eq!(plan.results(), "tmp_test_results_0");
        assert_eq!(plan.header(), vec!["patient_id", "sex", "region", "asthma_count"]);
        assert_eq!(
            plan.columns()[3],
            ("asthma_count".to_string(), DataType::Integer)
        );
        assert_eq!(plan.teardown().len(), 8);
        assert_eq!(plan.teardown()[0], "DROP TABLE tmp_test_results_0");
        for stage in plan.stages() {
            assert!(Sqlite.parse(stage.sql()).is_ok(), "{}", stage.sql());
        }
    }

    #[test]
    fn test_postgresql() {
        let plan = compile_with(&dataset(), PostgreSql).unwrap();
        println!("{plan}");
        for stage in plan.stages() {
            assert!(stage.sql().starts_with("CREATE TEMPORARY TABLE"));
            assert!(PostgreSql.parse(stage.sql()).is_ok(), "{}", stage.sql());
        }
        let population = &plan.stages()[2];
        assert!(population.sql().contains(r#"IS NOT NULL"#));
    }

    #[test]
    fn test_determinism() {
        assert_eq!(
            compile_with(&dataset(), Sqlite).unwrap(),
            compile_with(&dataset(), Sqlite).unwrap()
        );
        let backend = Backend::tpp();
        let a = compile(&dataset(), &backend, Sqlite).unwrap();
        let b = compile(&dataset(), &backend, Sqlite).unwrap();
        assert_ne!(a.results(), b.results());
    }

    #[test]
    fn test_ordering() {
        let plan = compile_with(&dataset(), Sqlite).unwrap();
        let row = &plan.stages()[4];
        println!("{}", row.sql());
        assert!(row.sql().contains(
            concat!(
                r#"ROW_NUMBER() OVER (PARTITION BY "f"."patient_id" ORDER BY "#,
                r#"CASE WHEN "f"."date_end" IS NULL THEN 1 ELSE 0 END DESC, "#,
                r#""f"."date_end" DESC, "f"."source_row_id" DESC)"#,
            )
        ));
        let address = Dataset::builder()
            .with((POPULATION, table("patient_address").exists_for_patient()))
            .with((
                "imd",
                table("patient_address").as_of("2021-06-01").get("imd_rounded"),
            ))
            .try_build()
            .unwrap();
        let plan = compile_with(&address, Sqlite).unwrap();
        let row = plan
            .stages()
            .iter()
            .find(|stage| stage.name().contains("row"))
            .unwrap();
        println!("{}", row.sql());
        assert!(row.sql().contains(
            concat!(
                r#"CASE WHEN ("f"."msoa_code" IS NULL) OR ("f"."msoa_code" IN ('NPC', '')) "#,
                r#"THEN 0 ELSE 1 END DESC, "f"."source_row_id" DESC"#,
            )
        ));
    }

    #[test]
    fn test_population_patients_once() {
        let plan = compile_with(&dataset(), Sqlite).unwrap();
        let population = &plan.stages()[2];
        println!("{}", population.sql());
        assert!(population.sql().contains(concat!(
            r#"FROM (SELECT DISTINCT "s"."patient_id" AS "patient_id" FROM "#,
            r#"(SELECT RegistrationHistory.Registration_ID AS Registration_ID"#,
        )));
        let events = Dataset::builder()
            .with((
                POPULATION,
                table("clinical_events").exists_for_patient()
                    | table("patients").exists_for_patient(),
            ))
            .try_build()
            .unwrap();
        let plan = compile_with(&events, Sqlite).unwrap();
        let population = plan.stages().iter().find(|stage| stage.name().contains("population"));
        let sql = population.unwrap().sql();
        println!("{sql}");
        assert_eq!(sql.matches("SELECT DISTINCT").count(), 2);
        assert!(sql.contains(" UNION SELECT DISTINCT "));
    }

    #[test]
    fn test_index_date_range() {
        let backend = Backend::tpp();
        let index_dates = cohort_date_range("2021-01-01", "2021-03-04", Increment::Month).unwrap();
        let plans = index_dates
            .iter()
            .enumerate()
            .map(|(i, index_date)| {
                let registered = table("practice_registrations").date_in_range(*index_date);
                let dataset = Dataset::builder()
                    .with((POPULATION, registered.exists_for_patient()))
                    .with(("practice", registered.latest_on("date_end").get("pseudo_id")))
                    .try_build()
                    .unwrap();
                Compiler::with_prefix(&backend, Sqlite, format!("tmp_{i}_"))
                    .compile(&dataset)
                    .unwrap()
            })
            .collect::<Vec<_>>();
        assert_eq!(plans.len(), 3);
        for (i, plan) in plans.iter().enumerate() {
            println!("{plan}");
            assert_eq!(plan.results(), format!("tmp_{i}_results_0"));
            let prefix = format!("tmp_{i}_");
            assert!(plan.stages().iter().all(|stage| stage.name().starts_with(&prefix)));
        }
        assert!(plans[1].stages()[0].sql().contains("'2021-02-01'"));
        assert!(plans[2].stages()[0].sql().contains("'2021-03-01'"));
    }

    #[test]
    fn test_memoization() {
        let events = table("clinical_events").filter("code", Condition::equals("XaLIG"));
        let dataset = Dataset::builder()
            .with((POPULATION, events.exists_for_patient()))
            .with(("first", events.earliest().get("date")))
            .with(("first_value", events.earliest().get("numeric_value")))
            .with(("has", events.exists_for_patient()))
            .try_build()
            .unwrap();
        let plan = compile_with(&dataset, Sqlite).unwrap();
        println!("{plan}");
        // frame, aggregate, population, row, results
        assert_eq!(plan.stages().len(), 5);
    }

    #[test]
    fn test_series_operands() {
        let first_positive = table("sgss_sars_cov_2")
            .filter("positive_result", Condition::equals(true))
            .earliest()
            .get("date");
        let dataset = Dataset::builder()
            .with((POPULATION, table("patients").exists_for_patient()))
            .with((
                "admitted",
                table("hospitalizations")
                    .filter(
                        "date",
                        Condition::between(
                            first_positive.clone(),
                            first_positive.date_add_days(28),
                        ),
                    )
                    .exists_for_patient(),
            ))
            .with((
                "age",
                Series::days_between(patient_table("patients").get("date_of_birth"), "2020-02-01"),
            ))
            .try_build()
            .unwrap();
        for plan in [
            compile_with(&dataset, Sqlite).unwrap(),
            compile_with(&dataset, PostgreSql).unwrap(),
        ] {
            println!("{plan}");
            assert_eq!(plan.columns()[2], ("age".to_string(), DataType::Integer));
        }
        let plan = compile_with(&dataset, Spark).unwrap();
        assert!(plan.teardown().is_empty());
        assert!(plan.stages()[0].sql().starts_with("CREATE TEMPORARY VIEW"));
    }

    #[test]
    fn test_column_membership() {
        let events = table("clinical_events");
        let dataset = Dataset::builder()
            .with((POPULATION, events.exists_for_patient()))
            .with((
                "repeated",
                events
                    .filter(
                        "code",
                        Condition::is_in(
                            events
                                .filter("date", Condition::less_than("2020-01-01"))
                                .column_values("code"),
                        ),
                    )
                    .count_for_patient(),
            ))
            .try_build()
            .unwrap();
        let plan = compile_with(&dataset, Sqlite).unwrap();
        println!("{plan}");
        assert!(plan.stages().iter().any(|stage| stage.sql().contains("EXISTS (SELECT")));
    }

    #[test]
    fn test_mssql_booleans() {
        let plan = compile_with(&dataset(), MsSql).unwrap();
        println!("{plan}");
        let population = &plan.stages()[2];
        assert!(population.sql().starts_with("SELECT * INTO tmp_test_population_0"));
        let dataset = Dataset::builder()
            .with((POPULATION, table("patients").exists_for_patient()))
            .with((
                "died",
                table("patients")
                    .filter("date_of_death", Condition::not_equals(Value::null()))
                    .exists_for_patient(),
            ))
            .try_build()
            .unwrap();
        let plan = compile_with(&dataset, MsSql).unwrap();
        let results = plan.stages().last().unwrap();
        assert!(results.sql().contains("CASE WHEN"));
    }

    #[test]
    fn test_errors() {
        let population = table("patients").exists_for_patient();
        let build = |name: &str, series: Series| {
            Dataset::builder()
                .with((POPULATION, population.clone()))
                .with((name, series))
                .try_build()
                .unwrap()
        };
        let unknown = build("oops", table("clinical_events").sum_for_patient("nope"));
        assert!(matches!(
            compile_with(&unknown, Sqlite),
            Err(Error::UnknownColumn(message)) if message.contains("oops")
        ));
        let unknown = build("oops", table("nope").exists_for_patient());
        assert!(matches!(compile_with(&unknown, Sqlite), Err(Error::UnknownTable(_))));
        let not_patient_level = build("code", patient_table("clinical_events").get("code"));
        assert!(matches!(
            compile_with(&not_patient_level, Sqlite),
            Err(Error::InvalidExpression(_))
        ));
        let not_boolean = build(
            "both",
            table("clinical_events").count_for_patient() & population.clone(),
        );
        assert!(matches!(
            compile_with(&not_boolean, Sqlite),
            Err(Error::InvalidExpression(_))
        ));
        let wrong_system = build(
            "asthma",
            table("clinical_events")
                .filter("code", Condition::is_in(codelist(["J45"], "icd10")))
                .exists_for_patient(),
        );
        assert!(matches!(
            compile_with(&wrong_system, Sqlite),
            Err(Error::InvalidExpression(_))
        ));
        let not_a_date = build(
            "later",
            patient_table("patients").get("sex").date_add_days(3),
        );
        assert!(matches!(
            compile_with(&not_a_date, Sqlite),
            Err(Error::InvalidExpression(_))
        ));
        let constant = Dataset::builder()
            .with((POPULATION, Series::value(true)))
            .try_build()
            .unwrap();
        assert!(matches!(
            compile_with(&constant, Sqlite),
            Err(Error::InvalidExpression(_))
        ));
    }

    #[test]
    fn test_definition_errors() {
        let backend = Backend::tpp();
        let mut compiler = Compiler::with_prefix(&backend, Sqlite, PREFIX);
        compiler.output = "first_event".to_string();
        let unsorted = compiler.row_stage(&table("clinical_events"), Position::First);
        println!("{:?}", unsorted);
        match unsorted {
            Err(Error::Definition(frame::Error::UnsortedFrame(message))) => {
                assert!(message.contains("first_event"))
            }
            other => panic!("unexpected {:?}", other),
        }
        let mixed = compiler.check_source(
            &table("clinical_events"),
            &table("patients").col("sex"),
        );
        assert!(matches!(
            mixed,
            Err(Error::Definition(frame::Error::MixedSourceTable(_)))
        ));
        assert!(compiler.stages.is_empty());
    }
}
