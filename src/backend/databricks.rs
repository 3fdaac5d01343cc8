//! A Databricks (Spark SQL) backend over a research copy of primary care and hospital data.

use super::{Backend, Column, Normalizer, Source, Table};
use crate::{
    builder::{Ready, With},
    data_type::DataType,
};

pub const BACKEND_ID: &str = "databricks";
pub const PATIENT_JOIN_COLUMN: &str = "person_id";

impl Backend {
    /// The Databricks schema mapping
    pub fn databricks() -> Backend {
        Backend::builder(BACKEND_ID, PATIENT_JOIN_COLUMN)
            .with((
                "patients",
                Table::new(Source::Table("research.patients".into())).patient_level(),
            ))
            .with(("sex", Column::new(DataType::Text)))
            .with(("date_of_birth", Column::new(DataType::Date)))
            .with((
                "practice_registrations",
                Table::new(Source::Table("research.registrations".into()))
                    .row_id("registration_id"),
            ))
            .with(("date_start", Column::new(DataType::Date).source("start_date")))
            .with(("date_end", Column::new(DataType::Date).source("end_date")))
            .with(("pseudo_id", Column::new(DataType::Integer).source("practice_id")))
            .with((
                "clinical_events",
                Table::new(Source::Table("research.events".into())).row_id("event_id"),
            ))
            .with(("code", Column::new(DataType::Code).source("ctv3_code").system("ctv3")))
            .with(("date", Column::new(DataType::Date).source("event_date")))
            .with(("numeric_value", Column::new(DataType::Float).source("value")))
            .with((
                "hospitalizations",
                Table::new(Source::Table("research.admissions".into())).row_id("admission_id"),
            ))
            .with(("date", Column::new(DataType::Date).source("admission_date")))
            .with((
                "code",
                Column::new(DataType::Code)
                    .source("diagnoses")
                    .system("icd10")
                    .normalizer(Normalizer::SplitCodes),
            ))
            .build()
    }
}
