//! # Cohortql
//! Compile patient-centric cohort definitions into backend specific SQL extraction plans
//!
//! ## What is Cohortql?
//! A cohort is described with a small algebra over tables of health records: frames of events
//! are filtered, sorted and reduced to one row or one value per patient. A [frame::Dataset] names
//! a population and the series extracted for each of its patients.
//!
//! ### Backends and dialects
//! The same definition runs against different databases. A [backend::Backend] maps logical
//! tables and columns to physical ones, a [dialect::Dialect] knows how each engine spells dates,
//! booleans, temporary objects and paging.
//!
//! ### Staged compilation
//! The [compiler] turns a dataset into a [compiler::Plan]: an ordered list of statements,
//! each materializing an intermediate result once, ending with one row per patient.
//!
//! ### Extraction and measures
//! [io] runs plans on SQLite or PostgreSQL and reads results in batches. [measures] computes
//! ratios over the extracted rows.
//!

pub mod backend;
pub mod builder;
pub mod compiler;
pub mod data_type;
pub mod dialect;
pub mod frame;
pub mod io;
pub mod measures;
pub mod namer;
pub mod setup;
pub mod sql;

pub use backend::Backend;
pub use builder::{Ready, With, WithIterator};
pub use compiler::{compile, Compiler, Plan};
pub use data_type::{DataType, Value};
pub use frame::{cohort_date_range, patient_table, table, Dataset, Increment, Series};
pub use measures::Measure;
/// Expose sqlparser::ast as part of cohortql
pub use sqlparser::{ast, parser};
