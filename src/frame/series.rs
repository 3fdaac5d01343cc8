//! Patient level values
//!
//! A [Series] is one value per patient: a literal, a column of a [PatientFrame], an aggregate
//! of an [EventFrame] or a combination of other series. Boolean series combine with `&`, `|`
//! and `!`, operands are type checked when compiled against a backend.

use chrono::NaiveDate;
use itertools::Itertools;
use std::{fmt, ops};

use super::{Error, EventFrame, PatientFrame, Result};
use crate::data_type::Value;

/// A per-patient aggregation of the rows of a frame
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// `true` if the patient has any row, never null
    Exists,
    /// Number of rows, `0` when there are none
    Count,
    Sum(String),
    Min(String),
    Max(String),
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Exists => write!(f, "exists_for_patient()"),
            Aggregate::Count => write!(f, "count_for_patient()"),
            Aggregate::Sum(column) => write!(f, "sum_for_patient({column})"),
            Aggregate::Min(column) => write!(f, "min_for_patient({column})"),
            Aggregate::Max(column) => write!(f, "max_for_patient({column})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Truncation {
    Month,
    Year,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Series {
    Value(Value),
    Select {
        frame: PatientFrame,
        column: String,
    },
    /// A column of a frame with several rows per patient
    Unreduced {
        frame: EventFrame,
        column: String,
    },
    Aggregate {
        frame: EventFrame,
        aggregate: Aggregate,
    },
    And(Box<Series>, Box<Series>),
    Or(Box<Series>, Box<Series>),
    Not(Box<Series>),
    DateAddDays {
        date: Box<Series>,
        days: Box<Series>,
    },
    DaysBetween {
        start: Box<Series>,
        end: Box<Series>,
    },
    Truncate {
        date: Box<Series>,
        truncation: Truncation,
    },
}

impl Series {
    pub fn value<V: Into<Value>>(value: V) -> Series {
        Series::Value(value.into())
    }

    pub fn aggregate(frame: EventFrame, aggregate: Aggregate) -> Series {
        Series::Aggregate { frame, aggregate }
    }

    pub fn date_add_days<S: Into<Series>>(&self, days: S) -> Series {
        Series::DateAddDays {
            date: Box::new(self.clone()),
            days: Box::new(days.into()),
        }
    }

    /// Days from `start` to `end`
    pub fn days_between<S: Into<Series>, T: Into<Series>>(start: S, end: T) -> Series {
        Series::DaysBetween {
            start: Box::new(start.into()),
            end: Box::new(end.into()),
        }
    }

    /// Days from this date to another
    pub fn days_until<S: Into<Series>>(&self, end: S) -> Series {
        Series::days_between(self.clone(), end)
    }

    pub fn truncate_to_month(&self) -> Series {
        Series::Truncate {
            date: Box::new(self.clone()),
            truncation: Truncation::Month,
        }
    }

    pub fn truncate_to_year(&self) -> Series {
        Series::Truncate {
            date: Box::new(self.clone()),
            truncation: Truncation::Year,
        }
    }

    /// Check the series resolves to one value per patient
    pub(crate) fn check(&self, output: &str) -> Result<()> {
        match self {
            Series::Value(_) => Ok(()),
            Series::Select { frame, .. } => frame.check(output),
            Series::Unreduced { .. } => Err(Error::frame_not_reduced(output)),
            Series::Aggregate { frame, .. } => frame.check(output),
            Series::And(left, right) | Series::Or(left, right) => {
                left.check(output)?;
                right.check(output)
            }
            Series::Not(series) => series.check(output),
            Series::DateAddDays { date, days } => {
                date.check(output)?;
                days.check(output)
            }
            Series::DaysBetween { start, end } => {
                start.check(output)?;
                end.check(output)
            }
            Series::Truncate { date, .. } => date.check(output),
        }
    }

    /// The tables whose patients the series is about
    pub fn tables(&self) -> Vec<&str> {
        let mut tables = Vec::new();
        self.collect_tables(&mut tables);
        tables.into_iter().unique().collect()
    }

    fn collect_tables<'a>(&'a self, tables: &mut Vec<&'a str>) {
        match self {
            Series::Value(_) => {}
            Series::Select { frame, .. } => tables.push(frame.table()),
            Series::Unreduced { frame, .. } | Series::Aggregate { frame, .. } => {
                tables.push(frame.table())
            }
            Series::And(left, right) | Series::Or(left, right) => {
                left.collect_tables(tables);
                right.collect_tables(tables);
            }
            Series::Not(series) => series.collect_tables(tables),
            Series::DateAddDays { date, days } => {
                date.collect_tables(tables);
                days.collect_tables(tables);
            }
            Series::DaysBetween { start, end } => {
                start.collect_tables(tables);
                end.collect_tables(tables);
            }
            Series::Truncate { date, .. } => date.collect_tables(tables),
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Series::Value(value) => write!(f, "{:?}", value.to_string()),
            Series::Select { frame, column } => write!(f, "{frame}.get({column})"),
            Series::Unreduced { frame, column } => write!(f, "{frame}.get({column})"),
            Series::Aggregate { frame, aggregate } => write!(f, "{frame}.{aggregate}"),
            Series::And(left, right) => write!(f, "({left} & {right})"),
            Series::Or(left, right) => write!(f, "({left} | {right})"),
            Series::Not(series) => write!(f, "!{series}"),
            Series::DateAddDays { date, days } => write!(f, "{date}.date_add_days({days})"),
            Series::DaysBetween { start, end } => write!(f, "days_between({start}, {end})"),
            Series::Truncate {
                date,
                truncation: Truncation::Month,
            } => write!(f, "{date}.truncate_to_month()"),
            Series::Truncate {
                date,
                truncation: Truncation::Year,
            } => write!(f, "{date}.truncate_to_year()"),
        }
    }
}

macro_rules! impl_series_from_value {
    ($($Type:ty),*) => {
        $(
            impl From<$Type> for Series {
                fn from(value: $Type) -> Self {
                    Series::Value(value.into())
                }
            }
        )*
    };
}

impl_series_from_value!(Value, bool, i32, i64, f64, &str, String, NaiveDate);

impl ops::BitAnd for Series {
    type Output = Series;

    fn bitand(self, rhs: Self) -> Self::Output {
        Series::And(Box::new(self), Box::new(rhs))
    }
}

impl ops::BitOr for Series {
    type Output = Series;

    fn bitor(self, rhs: Self) -> Self::Output {
        Series::Or(Box::new(self), Box::new(rhs))
    }
}

impl ops::Not for Series {
    type Output = Series;

    fn not(self) -> Self::Output {
        Series::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{patient_table, table, Condition};

    #[test]
    fn test_boolean_operators() {
        let registered = table("practice_registrations")
            .date_in_range("2020-03-01")
            .exists_for_patient();
        let died = patient_table("patients").get("date_of_death");
        let alive = !table("patients").exists_for_patient();
        let population = registered.clone() & (alive | Series::value(true));
        println!("{population}");
        assert!(matches!(population, Series::And(_, _)));
        assert_eq!(
            population.tables(),
            vec!["practice_registrations", "patients"]
        );
        assert!(died.check("died").is_ok());
    }

    #[test]
    fn test_unreduced() {
        let codes = table("clinical_events")
            .filter("code", Condition::is_in(vec!["abc"]))
            .get("code");
        assert!(matches!(
            codes.check("codes"),
            Err(Error::FrameNotReduced(message)) if message.contains("codes")
        ));
        let nested = table("hospitalizations")
            .filter("date", Condition::on_or_after(codes))
            .exists_for_patient();
        assert!(matches!(nested.check("nested"), Err(Error::FrameNotReduced(_))));
    }

    #[test]
    fn test_date_arithmetic() {
        let dob = patient_table("patients").get("date_of_birth");
        let age = Series::days_between(dob.clone(), "2020-01-01");
        let month = dob.truncate_to_month();
        println!("{age}\n{month}");
        assert!(age.check("age").is_ok());
        assert_eq!(dob.days_until("2020-01-01"), age);
    }
}
