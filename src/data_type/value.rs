//! # The values flowing in and out of extractions
//!
//! Values appear as literals in cohort definitions and as cells of extracted rows.
//!

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::{cmp, fmt, hash};

use super::{DataType, DataTyped, Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "Option<Literal>", into = "Option<Literal>")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn null() -> Value {
        Value::Null
    }

    pub fn boolean(b: bool) -> Value {
        Value::Boolean(b)
    }

    pub fn integer(i: i64) -> Value {
        Value::Integer(i)
    }

    pub fn float(f: f64) -> Value {
        Value::Float(f)
    }

    pub fn text<S: Into<String>>(s: S) -> Value {
        Value::Text(s.into())
    }

    pub fn date(d: NaiveDate) -> Value {
        Value::Date(d)
    }

    /// Parse an ISO formatted `YYYY-MM-DD` date
    pub fn parse_date(s: &str) -> Result<Value> {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| Error::invalid_conversion(s, DataType::Date))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness as understood by measures: only non-null true-ish values count
    pub fn is_true(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.,
            _ => false,
        }
    }

    /// Coerce a value returned by a database driver into the declared type
    pub fn coerce(self, data_type: DataType) -> Result<Value> {
        let coerced = match (self, data_type) {
            (Value::Null, _) => Value::Null,
            (Value::Boolean(b), DataType::Boolean) => Value::Boolean(b),
            (Value::Integer(i), DataType::Boolean) => Value::Boolean(i != 0),
            (Value::Text(t), DataType::Boolean) => match t.to_lowercase().as_str() {
                "true" | "t" | "1" => Value::Boolean(true),
                "false" | "f" | "0" => Value::Boolean(false),
                _ => return Err(Error::invalid_conversion(&t, data_type)),
            },
            (Value::Integer(i), DataType::Integer) => Value::Integer(i),
            (Value::Boolean(b), DataType::Integer) => Value::Integer(b as i64),
            (Value::Float(f), DataType::Integer) if f.fract() == 0. => Value::Integer(f as i64),
            (Value::Text(t), DataType::Integer) => t
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| Error::invalid_conversion(&t, data_type))?,
            (Value::Float(f), DataType::Float) => Value::Float(f),
            (Value::Integer(i), DataType::Float) => Value::Float(i as f64),
            (Value::Text(t), DataType::Float) => t
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::invalid_conversion(&t, data_type))?,
            (Value::Text(t), DataType::Text | DataType::Code) => Value::Text(t),
            (value, DataType::Text | DataType::Code) => Value::Text(value.to_string()),
            (Value::Date(d), DataType::Date) => Value::Date(d),
            (Value::DateTime(dt), DataType::Date) => Value::Date(dt.date()),
            (Value::Text(t), DataType::Date) => parse_date_time(&t)
                .map(|dt| dt.date())
                .or_else(|| NaiveDate::parse_from_str(t.trim(), DATE_FORMAT).ok())
                .map(Value::Date)
                .ok_or_else(|| Error::invalid_conversion(&t, data_type))?,
            (Value::DateTime(dt), DataType::DateTime) => Value::DateTime(dt),
            (Value::Date(d), DataType::DateTime) => d
                .and_hms_opt(0, 0, 0)
                .map(Value::DateTime)
                .ok_or_else(|| Error::invalid_conversion(d, data_type))?,
            (Value::Text(t), DataType::DateTime) => parse_date_time(&t)
                .or_else(|| {
                    NaiveDate::parse_from_str(t.trim(), DATE_FORMAT)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(Value::DateTime)
                .ok_or_else(|| Error::invalid_conversion(&t, data_type))?,
            (value, data_type) => return Err(Error::invalid_conversion(value, data_type)),
        };
        Ok(coerced)
    }

    /// Rank of the variant in the total order of values
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Date(_) => 5,
            Value::DateTime(_) => 6,
        }
    }
}

fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s.trim(), format).ok())
}

impl DataTyped for Value {
    fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Float),
            Value::Text(_) => Some(DataType::Text),
            Value::Date(_) => Some(DataType::Date),
            Value::DateTime(_) => Some(DataType::DateTime),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Boolean(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(t) => write!(f, "{t}"),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

// Floats are compared through their bit representation so that values can key memoization tables

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        match (self, other) {
            (Value::Boolean(l), Value::Boolean(r)) => l.cmp(r),
            (Value::Integer(l), Value::Integer(r)) => l.cmp(r),
            (Value::Float(l), Value::Float(r)) => l.total_cmp(r),
            (Value::Text(l), Value::Text(r)) => l.cmp(r),
            (Value::Date(l), Value::Date(r)) => l.cmp(r),
            (Value::DateTime(l), Value::DateTime(r)) => l.cmp(r),
            (l, r) => l.rank().cmp(&r.rank()),
        }
    }
}

impl hash::Hash for Value {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(t) => t.hash(state),
            Value::Date(d) => d.hash(state),
            Value::DateTime(dt) => dt.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// The JSON representation of a non-null value, dates are written as text
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Boolean(b) => Value::Boolean(b),
            Literal::Integer(i) => Value::Integer(i),
            Literal::Float(f) => Value::Float(f),
            Literal::Text(t) => Value::Text(t),
        }
    }
}

impl From<Value> for Option<Literal> {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => None,
            Value::Boolean(b) => Some(Literal::Boolean(b)),
            Value::Integer(i) => Some(Literal::Integer(i)),
            Value::Float(f) => Some(Literal::Float(f)),
            value => Some(Literal::Text(value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_coerce_sqlite_values() {
        assert_eq!(
            Value::integer(1).coerce(DataType::Boolean).unwrap(),
            Value::boolean(true)
        );
        assert_eq!(
            Value::text("2021-03-02").coerce(DataType::Date).unwrap(),
            Value::date(NaiveDate::from_ymd_opt(2021, 3, 2).unwrap())
        );
        assert_eq!(
            Value::text("2001-01-01 00:00:00").coerce(DataType::Date).unwrap(),
            Value::date(NaiveDate::from_ymd_opt(2001, 1, 1).unwrap())
        );
        assert_eq!(
            Value::text("2001-01-01").coerce(DataType::DateTime).unwrap(),
            Value::DateTime(
                NaiveDate::from_ymd_opt(2001, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(Value::integer(34).coerce(DataType::Float).unwrap(), Value::float(34.));
        assert_eq!(Value::null().coerce(DataType::Integer).unwrap(), Value::null());
        assert!(Value::text("abc").coerce(DataType::Integer).is_err());
    }

    #[test]
    fn test_total_order() {
        let mut values = vec![
            Value::text("b"),
            Value::integer(3),
            Value::null(),
            Value::float(0.5),
            Value::text("a"),
            Value::integer(-1),
        ];
        values.sort();
        println!("{values:?}");
        assert_eq!(
            values,
            vec![
                Value::null(),
                Value::integer(-1),
                Value::integer(3),
                Value::float(0.5),
                Value::text("a"),
                Value::text("b"),
            ]
        );
    }

    #[test]
    fn test_hash_floats() {
        let set: HashSet<Value> = [Value::float(1.5), Value::float(1.5), Value::float(2.)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_json() {
        let values: Vec<Value> =
            serde_json::from_str(r#"[null, true, 3, 1.5, "9999-12-31"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::null(),
                Value::boolean(true),
                Value::integer(3),
                Value::float(1.5),
                Value::text("9999-12-31")
            ]
        );
        let date = Value::date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap());
        assert_eq!(serde_json::to_string(&date).unwrap(), r#""2020-02-29""#);
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::boolean(true).is_true());
        assert!(Value::integer(1).is_true());
        assert!(!Value::null().is_true());
        assert!(!Value::text("T").is_true());
    }
}
