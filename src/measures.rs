//! # Measures
//!
//! A [Measure] is a ratio computed over the extracted patients: the number of patients for
//! which the numerator holds over the number for which the denominator holds, for each
//! combination of the `group_by` outputs.
//!
//! The denominator `population` is true for every extracted patient and needs not be
//! among the extracted columns.
//!

use itertools::Itertools;
use std::{collections::BTreeMap, error, fmt, result};

use crate::{data_type::Value, frame::POPULATION};

// Error management

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    UnknownColumn(String),
    Other(String),
}

impl Error {
    pub fn unknown_column(measure: impl fmt::Display, column: impl fmt::Display) -> Error {
        Error::UnknownColumn(format!(
            "Measure {} uses {} which was not extracted",
            measure, column
        ))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownColumn(desc) => writeln!(f, "UnknownColumn: {}", desc),
            Error::Other(err) => writeln!(f, "{}", err),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Measure {
    id: String,
    numerator: String,
    denominator: String,
    group_by: Vec<String>,
}

impl Measure {
    pub fn new<S: Into<String>, T: Into<String>, U: Into<String>, G: Into<String>, I>(
        id: S,
        numerator: T,
        denominator: U,
        group_by: I,
    ) -> Self
    where
        I: IntoIterator<Item = G>,
    {
        Measure {
            id: id.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
            group_by: group_by.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn numerator(&self) -> &str {
        &self.numerator
    }

    pub fn denominator(&self) -> &str {
        &self.denominator
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    /// Output columns: the groups, numerator, denominator and `value`
    pub fn columns(&self) -> Vec<String> {
        self.group_by
            .iter()
            .cloned()
            .chain([
                self.numerator.clone(),
                self.denominator.clone(),
                "value".to_string(),
            ])
            .collect()
    }

    /// Compute the measure over extracted rows
    pub fn calculate<S: AsRef<str>>(
        &self,
        header: &[S],
        rows: &[Vec<Value>],
    ) -> Result<MeasureResult> {
        let index = |column: &str| {
            header
                .iter()
                .position(|name| name.as_ref() == column)
                .ok_or_else(|| Error::unknown_column(&self.id, column))
        };
        let numerator = index(&self.numerator)?;
        let denominator = match index(&self.denominator) {
            Ok(denominator) => Some(denominator),
            Err(_) if self.denominator == POPULATION => None,
            Err(err) => return Err(err),
        };
        let groups = self
            .group_by
            .iter()
            .map(|group| index(group))
            .collect::<Result<Vec<_>>>()?;
        let mut counts: BTreeMap<Vec<Value>, (i64, i64)> = BTreeMap::new();
        for row in rows {
            let key: Vec<Value> = groups.iter().map(|&i| row[i].clone()).collect();
            // Patients without a group do not count
            if key.iter().any(Value::is_null) {
                continue;
            }
            let (n, d) = counts.entry(key).or_default();
            if row[numerator].is_true() {
                *n += 1;
            }
            if denominator.map_or(true, |i| row[i].is_true()) {
                *d += 1;
            }
        }
        let rows = counts
            .into_iter()
            .map(|(key, (n, d))| {
                let value = if d == 0 {
                    Value::null()
                } else {
                    Value::float(n as f64 / d as f64)
                };
                key.into_iter()
                    .chain([Value::integer(n), Value::integer(d), value])
                    .collect()
            })
            .collect();
        log::debug!("Measure {} calculated", self.id);
        Ok(MeasureResult {
            id: self.id.clone(),
            columns: self.columns(),
            rows,
        })
    }
}

/// The table computed for a measure
#[derive(Clone, Debug, PartialEq)]
pub struct MeasureResult {
    pub id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl fmt::Display for MeasureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.columns.join(","))?;
        for row in &self.rows {
            writeln!(f, "{}", row.iter().join(","))?;
        }
        Ok(())
    }
}

/// Compute all the measures over extracted rows
pub fn calculate<S: AsRef<str>>(
    measures: &[Measure],
    header: &[S],
    rows: &[Vec<Value>],
) -> Result<Vec<MeasureResult>> {
    measures
        .iter()
        .map(|measure| measure.calculate(header, rows))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted() -> (Vec<&'static str>, Vec<Vec<Value>>) {
        (
            vec!["patient_id", "practice", "asthma", "asthma_event_code"],
            vec![
                vec![
                    Value::integer(1),
                    Value::integer(1),
                    Value::boolean(true),
                    Value::text("270442000"),
                ],
                vec![
                    Value::integer(2),
                    Value::integer(2),
                    Value::boolean(false),
                    Value::null(),
                ],
                vec![
                    Value::integer(3),
                    Value::integer(2),
                    Value::boolean(true),
                    Value::text("270442000"),
                ],
            ],
        )
    }

    #[test]
    fn test_ratio() {
        let (header, rows) = extracted();
        let measure = Measure::new("asthma", "asthma", POPULATION, ["practice"]);
        let result = measure.calculate(&header, &rows).unwrap();
        println!("{result}");
        assert_eq!(
            result.columns,
            vec!["practice", "asthma", "population", "value"]
        );
        assert_eq!(
            result.rows,
            vec![
                vec![Value::integer(1), Value::integer(1), Value::integer(1), Value::float(1.)],
                vec![Value::integer(2), Value::integer(1), Value::integer(2), Value::float(0.5)],
            ]
        );
    }

    #[test]
    fn test_null_groups_are_skipped() {
        let (header, rows) = extracted();
        let measure = Measure::new("asthma_code", "asthma", POPULATION, ["asthma_event_code"]);
        let result = measure.calculate(&header, &rows).unwrap();
        assert_eq!(
            result.rows,
            vec![vec![
                Value::text("270442000"),
                Value::integer(2),
                Value::integer(2),
                Value::float(1.)
            ]]
        );
    }

    #[test]
    fn test_empty_denominator() {
        let header = vec!["patient_id", "registered", "asthma"];
        let rows = vec![vec![Value::integer(1), Value::boolean(false), Value::boolean(true)]];
        let measure = Measure::new("asthma", "asthma", "registered", Vec::<String>::new());
        let result = measure.calculate(&header, &rows).unwrap();
        assert_eq!(
            result.rows,
            vec![vec![Value::integer(1), Value::integer(0), Value::null()]]
        );
    }

    #[test]
    fn test_unknown_column() {
        let (header, rows) = extracted();
        let measures = [
            Measure::new("asthma", "asthma", POPULATION, ["practice"]),
            Measure::new("copd", "copd", POPULATION, ["practice"]),
        ];
        assert!(matches!(
            calculate(&measures, &header, &rows),
            Err(Error::UnknownColumn(_))
        ));
    }
}
