//! # Data types of extracted columns
//!
//! Every logical column a backend exposes is declared with one of these types.
//! Drivers return loosely typed database values, the declared type is used to coerce
//! them back (e.g. SQLite stores booleans as integers and dates as text).
//!

pub mod value;

use serde::{Deserialize, Serialize};
use std::{convert::Infallible, error, fmt, result};

pub use value::Value;

// Error management

#[derive(Debug)]
pub enum Error {
    InvalidConversion(String),
    Other(String),
}

impl Error {
    pub fn invalid_conversion(this: impl fmt::Display, that: impl fmt::Display) -> Error {
        Error::InvalidConversion(format!("Cannot convert {} into {}", this, that))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConversion(desc) => writeln!(f, "InvalidConversion: {}", desc),
            Error::Other(err) => writeln!(f, "{}", err),
        }
    }
}

impl error::Error for Error {}

impl From<Infallible> for Error {
    fn from(err: Infallible) -> Self {
        Error::Other(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// The type of a logical column
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Integer,
    Float,
    Text,
    /// A clinical code (CTV3, SNOMED, ICD10...)
    Code,
    Date,
    DateTime,
}

impl DataType {
    /// Dates and date-times can both take part in date arithmetic
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::DateTime)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Code => "code",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
        };
        write!(f, "{name}")
    }
}

/// Something with a type that may only be known once resolved against a backend
pub trait DataTyped {
    fn data_type(&self) -> Option<DataType>;

    fn has_data_type(&self, data_type: DataType) -> bool {
        self.data_type() == Some(data_type)
    }
}
