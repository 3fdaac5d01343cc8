//! The TPP backend: a SQL Server database of primary care records linked with hospital
//! admissions and national testing data.

use super::{Backend, Column, Normalizer, Source, Table, TieBreaker};
use crate::{
    builder::{Ready, With},
    data_type::{DataType, Value},
};

pub const BACKEND_ID: &str = "tpp";
pub const PATIENT_JOIN_COLUMN: &str = "Patient_ID";

const PRACTICE_REGISTRATIONS: &str = "SELECT \
RegistrationHistory.Registration_ID AS Registration_ID, \
RegistrationHistory.Patient_ID AS patient_id, \
RegistrationHistory.StartDate AS date_start, \
RegistrationHistory.EndDate AS date_end, \
Organisation.Organisation_ID AS pseudo_id, \
Organisation.Region AS nuts1_region_name \
FROM RegistrationHistory \
LEFT OUTER JOIN Organisation ON RegistrationHistory.Organisation_ID = Organisation.Organisation_ID";

const SGSS_SARS_COV_2: &str = "SELECT \
Patient_ID AS patient_id, Result_ID AS result_id, Specimen_Date AS date, 1 AS positive_result \
FROM SGSS_AllTests_Positive \
UNION ALL \
SELECT Patient_ID AS patient_id, Result_ID AS result_id, Specimen_Date AS date, 0 AS positive_result \
FROM SGSS_AllTests_Negative";

impl Backend {
    /// The TPP schema mapping
    pub fn tpp() -> Backend {
        Backend::builder(BACKEND_ID, PATIENT_JOIN_COLUMN)
            .with(("patients", Table::new(Source::Table("Patient".into())).patient_level()))
            .with(("sex", Column::new(DataType::Text).source("Sex")))
            .with(("date_of_birth", Column::new(DataType::Date).source("DateOfBirth")))
            .with((
                "date_of_death",
                Column::new(DataType::Date)
                    .source("DateOfDeath")
                    .normalizer(Normalizer::NullIfEquals {
                        value: Value::text("9999-12-31"),
                    }),
            ))
            .with((
                "practice_registrations",
                Table::new(Source::Query(PRACTICE_REGISTRATIONS.into())).row_id("Registration_ID"),
            ))
            .with(("date_start", Column::new(DataType::Date)))
            .with(("date_end", Column::new(DataType::Date)))
            .with(("pseudo_id", Column::new(DataType::Integer)))
            .with(("nuts1_region_name", Column::new(DataType::Text)))
            .with((
                "clinical_events",
                Table::new(Source::Table("CodedEvent".into())).row_id("CodedEvent_ID"),
            ))
            .with(("code", Column::new(DataType::Code).source("CTV3Code").system("ctv3")))
            .with(("date", Column::new(DataType::Date).source("ConsultationDate")))
            .with(("numeric_value", Column::new(DataType::Float).source("NumericValue")))
            .with((
                "sgss_sars_cov_2",
                Table::new(Source::Query(SGSS_SARS_COV_2.into())),
            ))
            .with(("date", Column::new(DataType::Date)))
            .with(("positive_result", Column::new(DataType::Boolean)))
            .with((
                "hospitalizations",
                Table::new(Source::Table("APCS".into())).row_id("APCS_Ident"),
            ))
            .with(("date", Column::new(DataType::Date).source("Admission_Date")))
            .with((
                "code",
                Column::new(DataType::Code)
                    .source("Der_Diagnosis_All")
                    .system("icd10")
                    .normalizer(Normalizer::SplitCodes),
            ))
            .with((
                "patient_address",
                Table::new(Source::Table("PatientAddress".into()))
                    .row_id("PatientAddress_ID")
                    .tie_breaker(TieBreaker::PreferNotIn {
                        column: "msoa_code".into(),
                        values: vec![Value::text("NPC"), Value::text("")],
                    }),
            ))
            .with(("date_start", Column::new(DataType::Date).source("StartDate")))
            .with(("date_end", Column::new(DataType::Date).source("EndDate")))
            .with((
                "imd_rounded",
                Column::new(DataType::Integer)
                    .source("ImdRankRounded")
                    .normalizer(Normalizer::RoundToMultiple { multiple: 100 }),
            ))
            .with(("msoa_code", Column::new(DataType::Text).source("MSOACode")))
            .build()
    }
}
