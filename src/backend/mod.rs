//! # Backend schema registry
//!
//! A [Backend] maps the logical tables and columns cohort definitions are written against
//! to the physical objects of a given database. Columns may be normalized on the way
//! (split code lists, rounding, sentinel removal).
//!
//! Registries are plain configuration data: they can be built in code (see [tpp] and
//! [databricks]) or loaded from JSON with [Backend::from_json].
//!

pub mod databricks;
pub mod tpp;

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, error, fmt, result};

use crate::{
    builder::{Ready, With},
    data_type::{DataType, Value},
};

pub const PATIENT_ID: &str = "patient_id";

// Error management

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    UnknownTable(String),
    UnknownColumn(String),
    InvalidDefinition(String),
    Other(String),
}

impl Error {
    pub fn unknown_table(table: impl fmt::Display) -> Error {
        Error::UnknownTable(format!("Unknown table {}", table))
    }
    pub fn unknown_column(table: impl fmt::Display, column: impl fmt::Display) -> Error {
        Error::UnknownColumn(format!("Unknown column {} in table {}", column, table))
    }
    pub fn invalid_definition(table: impl fmt::Display, desc: impl fmt::Display) -> Error {
        Error::InvalidDefinition(format!("Table {}: {}", table, desc))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownTable(desc) => writeln!(f, "UnknownTable: {}", desc),
            Error::UnknownColumn(desc) => writeln!(f, "UnknownColumn: {}", desc),
            Error::InvalidDefinition(desc) => writeln!(f, "InvalidDefinition: {}", desc),
            Error::Other(err) => writeln!(f, "{}", err),
        }
    }
}

impl error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Where the rows of a logical table come from
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// A physical table, possibly schema qualified (`schema.table`)
    Table(String),
    /// Raw SQL whose output columns are named as the physical columns
    Query(String),
}

/// A transformation applied to the physical value of a column
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalizer {
    /// The physical value holds several codes separated by `,` or `||`,
    /// each produces a row, trimmed and without trailing `X`
    SplitCodes,
    /// Round to the nearest multiple
    RoundToMultiple { multiple: i64 },
    /// The sentinel value becomes null
    NullIfEquals { value: Value },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Physical column name, defaults to the logical name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Coding system of code columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<Normalizer>,
}

impl Column {
    pub fn new(data_type: DataType) -> Self {
        Column {
            source: None,
            data_type,
            system: None,
            normalizer: None,
        }
    }

    pub fn source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn system<S: Into<String>>(mut self, system: S) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }
}

/// Tie-breakers order rows whose sort keys are equal
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TieBreaker {
    /// Rows whose column is null or holds one of the values come last
    PreferNotIn { column: String, values: Vec<Value> },
    Ascending { column: String },
    Descending { column: String },
}

impl TieBreaker {
    pub fn column(&self) -> &str {
        match self {
            TieBreaker::PreferNotIn { column, .. }
            | TieBreaker::Ascending { column }
            | TieBreaker::Descending { column } => column,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub source: Source,
    /// One row per patient
    #[serde(default)]
    pub patient_level: bool,
    /// Physical column identifying source rows, used as last tie-breaker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    pub columns: BTreeMap<String, Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tie_breakers: Vec<TieBreaker>,
}

impl Table {
    pub fn new(source: Source) -> Self {
        Table {
            source,
            patient_level: false,
            row_id: None,
            columns: BTreeMap::new(),
            tie_breakers: Vec::new(),
        }
    }

    pub fn patient_level(mut self) -> Self {
        self.patient_level = true;
        self
    }

    pub fn row_id<S: Into<String>>(mut self, row_id: S) -> Self {
        self.row_id = Some(row_id.into());
        self
    }

    pub fn tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
        self.tie_breakers.push(tie_breaker);
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// The physical name of a logical column
    pub fn physical_name<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.columns
            .get(name)
            .map(|column| column.source.as_deref().unwrap_or(name))
    }

    /// The column whose codes are split into rows, if any
    pub fn split_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, column)| column.normalizer == Some(Normalizer::SplitCodes))
            .map(|(name, _)| name.as_str())
    }

    /// Add `patient_id` and check the table is consistent
    fn learn_patient_join(&mut self, name: &str, patient_join_column: &str) -> Result<()> {
        if !self.columns.contains_key(PATIENT_ID) {
            let column = match &self.source {
                Source::Table(_) => Column::new(DataType::Integer).source(patient_join_column),
                Source::Query(_) => Column::new(DataType::Integer),
            };
            self.columns.insert(PATIENT_ID.to_string(), column);
        }
        let splits = self
            .columns
            .values()
            .filter(|column| column.normalizer == Some(Normalizer::SplitCodes))
            .count();
        if splits > 1 {
            return Err(Error::invalid_definition(
                name,
                "at most one column can split codes",
            ));
        }
        if splits > 0 && self.patient_level {
            return Err(Error::invalid_definition(
                name,
                "a patient level table cannot split codes",
            ));
        }
        for (column_name, column) in &self.columns {
            match &column.normalizer {
                Some(Normalizer::SplitCodes)
                    if !matches!(column.data_type, DataType::Code | DataType::Text) =>
                {
                    return Err(Error::invalid_definition(
                        name,
                        format!("{column_name} must be a code to be split"),
                    ))
                }
                Some(Normalizer::RoundToMultiple { multiple })
                    if !column.data_type.is_numeric() || *multiple <= 0 =>
                {
                    return Err(Error::invalid_definition(
                        name,
                        format!("{column_name} cannot be rounded to a multiple of {multiple}"),
                    ))
                }
                _ => {}
            }
        }
        for tie_breaker in &self.tie_breakers {
            if !self.columns.contains_key(tie_breaker.column()) {
                return Err(Error::unknown_column(name, tie_breaker.column()));
            }
        }
        Ok(())
    }
}

/// A resolved logical column
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved<'a> {
    pub table: &'a Table,
    pub source: &'a Source,
    pub column: &'a str,
    pub data_type: DataType,
    pub normalizer: Option<&'a Normalizer>,
}

/// The schema mapping of a database
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    backend_id: String,
    patient_join_column: String,
    tables: BTreeMap<String, Table>,
}

impl Backend {
    pub fn builder<S: Into<String>, T: Into<String>>(
        backend_id: S,
        patient_join_column: T,
    ) -> BackendBuilder {
        BackendBuilder {
            backend_id: backend_id.into(),
            patient_join_column: patient_join_column.into(),
            tables: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Backend> {
        let backend: Backend = serde_json::from_str(json)?;
        backend
            .tables
            .into_iter()
            .fold(
                Backend::builder(backend.backend_id, backend.patient_join_column),
                |builder, table| builder.with(table),
            )
            .try_build()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn patient_join_column(&self) -> &str {
        &self.patient_join_column
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::unknown_table(name))
    }

    pub fn resolve<'a>(&'a self, table: &str, column: &'a str) -> Result<Resolved<'a>> {
        let t = self.table(table)?;
        let (logical, definition) = t
            .columns
            .get_key_value(column)
            .ok_or_else(|| Error::unknown_column(table, column))?;
        Ok(Resolved {
            table: t,
            source: &t.source,
            column: definition.source.as_deref().unwrap_or(logical.as_str()),
            data_type: definition.data_type,
            normalizer: definition.normalizer.as_ref(),
        })
    }
}

/// Build a [Backend] table by table
#[derive(Clone, Debug)]
pub struct BackendBuilder {
    backend_id: String,
    patient_join_column: String,
    tables: Vec<(String, Table)>,
}

impl<S: Into<String>> With<(S, Table)> for BackendBuilder {
    fn with(mut self, (name, table): (S, Table)) -> Self {
        self.tables.push((name.into(), table));
        self
    }
}

impl<S: Into<String>> With<(S, Column), BackendBuilder> for BackendBuilder {
    /// Add a column to the last table
    fn with(mut self, (name, column): (S, Column)) -> Self {
        if let Some((_, table)) = self.tables.last_mut() {
            table.columns.insert(name.into(), column);
        }
        self
    }
}

impl Ready<Backend> for BackendBuilder {
    type Error = Error;

    fn try_build(self) -> Result<Backend> {
        let mut tables = BTreeMap::new();
        for (name, mut table) in self.tables {
            table.learn_patient_join(&name, &self.patient_join_column)?;
            if tables.insert(name.clone(), table).is_some() {
                return Err(Error::invalid_definition(name, "declared twice"));
            }
        }
        Ok(Backend {
            backend_id: self.backend_id,
            patient_join_column: self.patient_join_column,
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"{
        "backend_id": "test",
        "patient_join_column": "PatientId",
        "tables": {
            "p": {
                "source": {"table": "dbo.Patients"},
                "patient_level": true,
                "columns": {"i1": {"type": "integer"}}
            },
            "e": {
                "source": {"query": "SELECT PatientId AS patient_id, Flag AS b1 FROM Events"},
                "columns": {
                    "b1": {"type": "boolean"},
                    "code": {"source": "Codes", "type": "code", "system": "ctv3", "normalizer": {"kind": "split_codes"}}
                }
            }
        }
    }"#;

    #[test]
    fn test_from_json() {
        let backend = Backend::from_json(REGISTRY).unwrap();
        println!("{}", backend.to_json().unwrap());
        assert_eq!(backend.backend_id(), "test");
        let resolved = backend.resolve("p", "patient_id").unwrap();
        assert_eq!(resolved.column, "PatientId");
        assert_eq!(resolved.source, &Source::Table("dbo.Patients".to_string()));
        let resolved = backend.resolve("e", "patient_id").unwrap();
        assert_eq!(resolved.column, "patient_id");
        let resolved = backend.resolve("e", "code").unwrap();
        assert_eq!(resolved.column, "Codes");
        assert_eq!(resolved.normalizer, Some(&Normalizer::SplitCodes));
        assert_eq!(backend.table("e").unwrap().split_column(), Some("code"));
        assert!(backend.table("p").unwrap().patient_level);
    }

    #[test]
    fn test_unknown() {
        let backend = Backend::from_json(REGISTRY).unwrap();
        assert!(matches!(
            backend.resolve("nope", "i1"),
            Err(Error::UnknownTable(_))
        ));
        assert!(matches!(
            backend.resolve("p", "nope"),
            Err(Error::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_invalid_definitions() {
        let two_splits = Backend::builder("test", "patient_id")
            .with((
                "e",
                Table::new(Source::Table("E".into())),
            ))
            .with(("a", Column::new(DataType::Code).normalizer(Normalizer::SplitCodes)))
            .with(("b", Column::new(DataType::Code).normalizer(Normalizer::SplitCodes)))
            .try_build();
        assert!(matches!(two_splits, Err(Error::InvalidDefinition(_))));
        let bad_tie_breaker = Backend::builder("test", "patient_id")
            .with((
                "e",
                Table::new(Source::Table("E".into())).tie_breaker(TieBreaker::Ascending {
                    column: "missing".into(),
                }),
            ))
            .try_build();
        assert!(matches!(bad_tie_breaker, Err(Error::UnknownColumn(_))));
        let bad_rounding = Backend::builder("test", "patient_id")
            .with(("e", Table::new(Source::Table("E".into()))))
            .with((
                "t",
                Column::new(DataType::Text)
                    .normalizer(Normalizer::RoundToMultiple { multiple: 100 }),
            ))
            .try_build();
        assert!(bad_rounding.is_err());
    }

    #[test]
    fn test_builtin_registries() {
        for backend in [Backend::tpp(), Backend::databricks()] {
            println!("{}", backend.backend_id());
            for (name, table) in backend.tables() {
                assert!(table.column(PATIENT_ID).is_some(), "{name}");
            }
        }
    }
}
