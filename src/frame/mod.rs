//! # Frame algebra
//!
//! Cohort definitions are written against logical tables:
//!
//! ```
//! use cohortql::frame::table;
//! let registrations = table("practice_registrations").date_in_range("2021-06-25");
//! let population = registrations.exists_for_patient();
//! let region = registrations.latest_on("date_end").get("nuts1_region_name");
//! ```
//!
//! An [EventFrame] holds any number of rows per patient, it is narrowed with filters and
//! reduced to a [PatientFrame] (one row per patient) by sorting and picking a row.
//! Patient level values are [Series], assembled into a [Dataset].
//!

pub mod condition;
pub mod dataset;
pub mod date_range;
pub mod series;

use std::{error, fmt, result};

pub use condition::{codelist, Codelist, Condition, FrameColumn, Operand, Operator, Predicate};
pub use dataset::{Dataset, DatasetBuilder, PATIENT_ID, POPULATION};
pub use date_range::{cohort_date_range, Increment};
pub use series::{Aggregate, Series, Truncation};

// Error management

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    FrameNotReduced(String),
    MixedSourceTable(String),
    UnsortedFrame(String),
    NoPopulationDefined(String),
    InvalidDefinition(String),
    Other(String),
}

impl Error {
    pub fn frame_not_reduced(output: impl fmt::Display) -> Error {
        Error::FrameNotReduced(format!(
            "{} must be reduced to one row per patient before use",
            output
        ))
    }
    pub fn mixed_source_table(
        output: impl fmt::Display,
        table: impl fmt::Display,
        other: impl fmt::Display,
    ) -> Error {
        Error::MixedSourceTable(format!(
            "{} uses a column of {} in a frame of {}",
            output, other, table
        ))
    }
    pub fn unsorted_frame(output: impl fmt::Display) -> Error {
        Error::UnsortedFrame(format!(
            "{} picks the first or last row of an unsorted frame",
            output
        ))
    }
    pub fn no_population_defined() -> Error {
        Error::NoPopulationDefined("A dataset requires a population".to_string())
    }
    pub fn invalid_definition(output: impl fmt::Display, desc: impl fmt::Display) -> Error {
        Error::InvalidDefinition(format!("{}: {}", output, desc))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FrameNotReduced(desc) => writeln!(f, "FrameNotReduced: {}", desc),
            Error::MixedSourceTable(desc) => writeln!(f, "MixedSourceTable: {}", desc),
            Error::UnsortedFrame(desc) => writeln!(f, "UnsortedFrame: {}", desc),
            Error::NoPopulationDefined(desc) => writeln!(f, "NoPopulationDefined: {}", desc),
            Error::InvalidDefinition(desc) => writeln!(f, "InvalidDefinition: {}", desc),
            Error::Other(err) => writeln!(f, "{}", err),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// A logical column, possibly bound to the table it comes from
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new<S: Into<String>>(name: S) -> Self {
        ColumnRef {
            table: None,
            name: name.into(),
        }
    }

    /// Check the column can be read from a table
    fn check(&self, output: &str, table: &str) -> Result<()> {
        match &self.table {
            Some(other) if other != table => {
                Err(Error::mixed_source_table(output, table, other))
            }
            _ => Ok(()),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::new(name)
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::new(name)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Rows of a logical table, any number per patient
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventFrame {
    table: String,
    filters: Vec<Predicate>,
    sort_keys: Vec<ColumnRef>,
}

/// Start a frame from a logical table
pub fn table<S: Into<String>>(name: S) -> EventFrame {
    EventFrame {
        table: name.into(),
        filters: Vec::new(),
        sort_keys: Vec::new(),
    }
}

/// A table holding one row per patient
pub fn patient_table<S: Into<String>>(name: S) -> PatientFrame {
    PatientFrame::Table(name.into())
}

impl EventFrame {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn filters(&self) -> &[Predicate] {
        &self.filters
    }

    pub fn sort_keys(&self) -> &[ColumnRef] {
        &self.sort_keys
    }

    /// A column of this frame's table
    pub fn col<S: Into<String>>(&self, name: S) -> ColumnRef {
        ColumnRef {
            table: Some(self.table.clone()),
            name: name.into(),
        }
    }

    /// The values a column takes for each patient, usable with `is_in` and `not_in`
    pub fn column_values<S: Into<String>>(&self, column: S) -> FrameColumn {
        FrameColumn::new(self.clone(), column)
    }

    /// Keep the rows where the column satisfies every test of the condition
    pub fn filter<C: Into<ColumnRef>>(&self, column: C, condition: Condition) -> EventFrame {
        let column = column.into();
        let mut frame = self.clone();
        frame.filters.extend(
            condition
                .into_tests()
                .into_iter()
                .map(|(operator, operand)| Predicate::compare(column.clone(), operator, operand)),
        );
        frame
    }

    /// Keep the rows whose `date_start`..`date_end` period contains the date
    pub fn date_in_range<O: Into<Operand>>(&self, date: O) -> EventFrame {
        let mut frame = self.clone();
        frame.filters.push(Predicate::date_in_range(date.into()));
        frame
    }

    pub fn sort_by<C: Into<ColumnRef>, I: IntoIterator<Item = C>>(&self, columns: I) -> EventFrame {
        let mut frame = self.clone();
        frame.sort_keys = columns.into_iter().map(Into::into).collect();
        frame
    }

    /// The same rows, in no particular order
    pub fn unsorted(&self) -> EventFrame {
        EventFrame {
            sort_keys: Vec::new(),
            ..self.clone()
        }
    }

    /// The first row per patient, the frame must be sorted
    pub fn first_for_patient(&self) -> PatientFrame {
        PatientFrame::Row {
            frame: self.clone(),
            position: Position::First,
        }
    }

    /// The last row per patient, the frame must be sorted
    pub fn last_for_patient(&self) -> PatientFrame {
        PatientFrame::Row {
            frame: self.clone(),
            position: Position::Last,
        }
    }

    pub fn first_by<C, I>(&self, columns: I) -> PatientFrame
    where
        C: Into<ColumnRef>,
        I: IntoIterator<Item = C>,
    {
        self.sort_by(columns).first_for_patient()
    }

    pub fn last_by<C, I>(&self, columns: I) -> PatientFrame
    where
        C: Into<ColumnRef>,
        I: IntoIterator<Item = C>,
    {
        self.sort_by(columns).last_for_patient()
    }

    pub fn earliest(&self) -> PatientFrame {
        self.first_by(["date"])
    }

    pub fn latest(&self) -> PatientFrame {
        self.last_by(["date"])
    }

    pub fn earliest_on<C: Into<ColumnRef>>(&self, column: C) -> PatientFrame {
        self.first_by([column.into()])
    }

    pub fn latest_on<C: Into<ColumnRef>>(&self, column: C) -> PatientFrame {
        self.last_by([column.into()])
    }

    /// The period containing the date, the latest starting (then ending) one if several do
    pub fn as_of<O: Into<Operand>>(&self, date: O) -> PatientFrame {
        self.date_in_range(date)
            .last_by(["date_start", "date_end"])
    }

    pub fn exists_for_patient(&self) -> Series {
        Series::aggregate(self.clone(), Aggregate::Exists)
    }

    pub fn exists(&self) -> Series {
        self.exists_for_patient()
    }

    pub fn count_for_patient(&self) -> Series {
        Series::aggregate(self.clone(), Aggregate::Count)
    }

    pub fn sum_for_patient<S: Into<String>>(&self, column: S) -> Series {
        Series::aggregate(self.clone(), Aggregate::Sum(column.into()))
    }

    pub fn min_for_patient<S: Into<String>>(&self, column: S) -> Series {
        Series::aggregate(self.clone(), Aggregate::Min(column.into()))
    }

    pub fn max_for_patient<S: Into<String>>(&self, column: S) -> Series {
        Series::aggregate(self.clone(), Aggregate::Max(column.into()))
    }

    /// A column of a frame not reduced to one row per patient: it cannot be output
    pub fn get<S: Into<String>>(&self, column: S) -> Series {
        Series::Unreduced {
            frame: self.clone(),
            column: column.into(),
        }
    }

    /// Check the frame only reads its own table
    pub(crate) fn check(&self, output: &str) -> Result<()> {
        for predicate in &self.filters {
            predicate.check(output, &self.table)?;
        }
        for key in &self.sort_keys {
            key.check(output, &self.table)?;
        }
        Ok(())
    }
}

impl fmt::Display for EventFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table({})", self.table)?;
        for predicate in &self.filters {
            write!(f, ".filter({})", predicate)?;
        }
        if !self.sort_keys.is_empty() {
            write!(
                f,
                ".sort_by({})",
                self.sort_keys
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
        }
        Ok(())
    }
}

/// Which row of a sorted frame to keep
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Position {
    First,
    Last,
}

/// Exactly one row per patient
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatientFrame {
    /// A table the backend declares as patient level
    Table(String),
    Row { frame: EventFrame, position: Position },
}

impl PatientFrame {
    pub fn get<S: Into<String>>(&self, column: S) -> Series {
        Series::Select {
            frame: self.clone(),
            column: column.into(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            PatientFrame::Table(table) => table,
            PatientFrame::Row { frame, .. } => frame.table(),
        }
    }

    pub(crate) fn check(&self, output: &str) -> Result<()> {
        match self {
            PatientFrame::Table(_) => Ok(()),
            PatientFrame::Row { frame, .. } if frame.sort_keys.is_empty() => {
                Err(Error::unsorted_frame(output))
            }
            PatientFrame::Row { frame, .. } => frame.check(output),
        }
    }
}

impl fmt::Display for PatientFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientFrame::Table(table) => write!(f, "patient_table({})", table),
            PatientFrame::Row {
                frame,
                position: Position::First,
            } => write!(f, "{}.first_for_patient()", frame),
            PatientFrame::Row {
                frame,
                position: Position::Last,
            } => write!(f, "{}.last_for_patient()", frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_immutable() {
        let events = table("clinical_events");
        let filtered = events.filter("code", Condition::is_in(codelist(["abc"], "ctv3")));
        assert!(events.filters().is_empty());
        assert_eq!(filtered.filters().len(), 1);
        let sorted = filtered.sort_by(["date"]);
        assert!(filtered.sort_keys().is_empty());
        assert_eq!(sorted.sort_keys(), &[ColumnRef::new("date")]);
        println!("{sorted}");
    }

    #[test]
    fn test_between_expands() {
        let frame = table("clinical_events")
            .filter("date", Condition::between("2020-01-01", "2020-12-31"));
        println!("{frame}");
        let operators: Vec<Operator> = frame
            .filters()
            .iter()
            .filter_map(|predicate| match predicate {
                Predicate::Compare { operator, .. } => Some(*operator),
                _ => None,
            })
            .collect();
        assert_eq!(operators, vec![Operator::GtEq, Operator::LtEq]);
    }

    #[test]
    fn test_structural_equality() {
        let a = table("clinical_events")
            .filter("code", Condition::equals("abc"))
            .earliest();
        let b = table("clinical_events")
            .filter("code", Condition::equals("abc"))
            .first_by(["date"]);
        assert_eq!(a, b);
        assert_ne!(a, table("clinical_events").latest());
    }

    #[test]
    fn test_as_of() {
        let frame = table("patient_address").as_of("2021-06-01");
        let PatientFrame::Row { frame, position } = frame else {
            panic!("as_of picks a row")
        };
        assert_eq!(position, Position::Last);
        assert_eq!(frame.filters().len(), 1);
        assert_eq!(
            frame.sort_keys(),
            &[ColumnRef::new("date_start"), ColumnRef::new("date_end")]
        );
    }

    #[test]
    fn test_mixed_sources() {
        let events = table("clinical_events");
        let addresses = table("patient_address");
        let frame = events.filter(
            addresses.col("date_start"),
            Condition::on_or_after("2020-01-01"),
        );
        assert!(matches!(frame.check("x"), Err(Error::MixedSourceTable(_))));
        let frame = events.filter(events.col("date"), Condition::on_or_after("2020-01-01"));
        assert!(frame.check("x").is_ok());
        assert!(matches!(
            events.first_for_patient().check("x"),
            Err(Error::UnsortedFrame(_))
        ));
    }
}
