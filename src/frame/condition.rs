//! Row filters
//!
//! A [Condition] lists tests applied to a column, each test becomes a [Predicate] of the
//! filtered frame. Predicates of a frame are combined by conjunction.

use chrono::NaiveDate;
use std::fmt;

use super::{ColumnRef, EventFrame, Result, Series};
use crate::data_type::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
        };
        write!(f, "{symbol}")
    }
}

/// Codes from a given coding system
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Codelist {
    codes: Vec<String>,
    system: String,
}

pub fn codelist<S: Into<String>, I: IntoIterator<Item = S>, T: Into<String>>(
    codes: I,
    system: T,
) -> Codelist {
    Codelist {
        codes: codes.into_iter().map(Into::into).collect(),
        system: system.into(),
    }
}

impl Codelist {
    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn system(&self) -> &str {
        &self.system
    }
}

/// The per-patient values of a column of another frame
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameColumn {
    pub frame: Box<EventFrame>,
    pub column: String,
}

impl FrameColumn {
    pub fn new<S: Into<String>>(frame: EventFrame, column: S) -> Self {
        FrameColumn {
            frame: Box::new(frame),
            column: column.into(),
        }
    }
}

/// What a column is tested against
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    Value(Value),
    List(Vec<Value>),
    Codelist(Codelist),
    /// A patient level value
    Series(Box<Series>),
    Column(FrameColumn),
}

macro_rules! impl_operand_from_value {
    ($($Type:ty),*) => {
        $(
            impl From<$Type> for Operand {
                fn from(value: $Type) -> Self {
                    Operand::Value(value.into())
                }
            }
        )*
    };
}

impl_operand_from_value!(Value, bool, i32, i64, f64, &str, String, NaiveDate);

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Operand::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<Codelist> for Operand {
    fn from(codelist: Codelist) -> Self {
        Operand::Codelist(codelist)
    }
}

impl From<Series> for Operand {
    fn from(series: Series) -> Self {
        Operand::Series(Box::new(series))
    }
}

impl From<FrameColumn> for Operand {
    fn from(column: FrameColumn) -> Self {
        Operand::Column(column)
    }
}

impl Operand {
    fn check(&self, output: &str) -> Result<()> {
        match self {
            Operand::Series(series) => series.check(output),
            Operand::Column(column) => column.frame.check(output),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(value) => write!(f, "{:?}", value.to_string()),
            Operand::List(values) => write!(
                f,
                "[{}]",
                values
                    .iter()
                    .map(|value| format!("{:?}", value.to_string()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Operand::Codelist(codelist) => {
                write!(f, "codelist({}, {})", codelist.codes.join(", "), codelist.system)
            }
            Operand::Series(series) => write!(f, "{}", series),
            Operand::Column(column) => write!(f, "{}.{}", column.frame, column.column),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        operator: Operator,
        operand: Operand,
    },
    /// `date_start <= date AND (date_end > date OR date_end IS NULL)`
    DateInRange(Operand),
}

impl Predicate {
    pub fn compare(column: ColumnRef, operator: Operator, operand: Operand) -> Self {
        Predicate::Compare {
            column,
            operator,
            operand,
        }
    }

    pub fn date_in_range(date: Operand) -> Self {
        Predicate::DateInRange(date)
    }

    pub(crate) fn check(&self, output: &str, table: &str) -> Result<()> {
        match self {
            Predicate::Compare {
                column, operand, ..
            } => {
                column.check(output, table)?;
                operand.check(output)
            }
            Predicate::DateInRange(date) => date.check(output),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare {
                column,
                operator,
                operand,
            } => write!(f, "{} {} {}", column, operator, operand),
            Predicate::DateInRange(date) => write!(f, "date_in_range({})", date),
        }
    }
}

/// Tests a column must pass
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Condition {
    tests: Vec<(Operator, Operand)>,
}

impl Condition {
    pub fn new<O: Into<Operand>>(operator: Operator, operand: O) -> Self {
        Condition {
            tests: vec![(operator, operand.into())],
        }
    }

    pub fn equals<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::Eq, operand)
    }

    pub fn not_equals<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::NotEq, operand)
    }

    pub fn less_than<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::Lt, operand)
    }

    pub fn less_than_or_equals<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::LtEq, operand)
    }

    pub fn greater_than<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::Gt, operand)
    }

    pub fn greater_than_or_equals<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::GtEq, operand)
    }

    pub fn on_or_before<O: Into<Operand>>(operand: O) -> Self {
        Condition::less_than_or_equals(operand)
    }

    pub fn on_or_after<O: Into<Operand>>(operand: O) -> Self {
        Condition::greater_than_or_equals(operand)
    }

    /// Both bounds included
    pub fn between<O: Into<Operand>, P: Into<Operand>>(start: O, end: P) -> Self {
        Condition::greater_than_or_equals(start).and(Condition::less_than_or_equals(end))
    }

    pub fn is_in<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::In, operand)
    }

    pub fn not_in<O: Into<Operand>>(operand: O) -> Self {
        Condition::new(Operator::NotIn, operand)
    }

    pub fn and(mut self, other: Condition) -> Self {
        self.tests.extend(other.tests);
        self
    }

    pub fn tests(&self) -> &[(Operator, Operand)] {
        &self.tests
    }

    pub(crate) fn into_tests(self) -> Vec<(Operator, Operand)> {
        self.tests
    }
}
