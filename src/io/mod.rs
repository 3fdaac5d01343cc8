//! # Running extractions against real databases
//!
//! A [Plan] is executed stage by stage on one [Connection], then its results are read back
//! in bounded batches, ordered by `patient_id`. Intermediate results are dropped once the
//! [Rows] are exhausted or dropped.
//!
//! For now supports:
//! - SQLite using the ["sqlite"] feature (default)
//! - PostgreSQL
//!

pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::{collections::VecDeque, env, error, fmt, num, result, thread, time};

use crate::{
    backend::Backend,
    compiler::{self, Compiler, Plan},
    data_type::{self, Value},
    dialect::Dialect,
    frame::{Dataset, PATIENT_ID},
    sql::{self, expr, SelectBuilder},
};
use sqlparser::ast;

pub const DEFAULT_TIMEOUT: time::Duration = time::Duration::from_secs(20);
pub const DEFAULT_POLL_INTERVAL: time::Duration = time::Duration::from_secs(1);
pub const DEFAULT_BATCH_SIZE: u64 = 32_000;

// Error management

#[derive(Debug)]
pub enum Error {
    Connection(String),
    Execution(String),
    Compilation(String),
    Database(String),
    Other(String),
}

impl Error {
    pub fn connection(elapsed: time::Duration, desc: impl fmt::Display) -> Error {
        Error::Connection(format!(
            "Could not connect after {:.1}s: {}",
            elapsed.as_secs_f64(),
            desc
        ))
    }
    pub fn execution(purpose: impl fmt::Display, desc: impl fmt::Display) -> Error {
        Error::Execution(format!("Failed computing {}: {}", purpose, desc))
    }
    pub fn database(desc: impl fmt::Display) -> Error {
        Error::Database(format!("Database error {}", desc))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(format!("{}", desc))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(desc) => writeln!(f, "Connection: {}", desc),
            Error::Execution(desc) => writeln!(f, "Execution: {}", desc),
            Error::Compilation(desc) => writeln!(f, "Compilation: {}", desc),
            Error::Database(desc) => writeln!(f, "Database: {}", desc),
            Error::Other(desc) => writeln!(f, "{}", desc),
        }
    }
}

impl error::Error for Error {}

impl From<compiler::Error> for Error {
    fn from(err: compiler::Error) -> Self {
        Error::Compilation(err.to_string())
    }
}
impl From<data_type::Error> for Error {
    fn from(err: data_type::Error) -> Self {
        Error::Database(err.to_string())
    }
}
impl From<num::ParseIntError> for Error {
    fn from(err: num::ParseIntError) -> Self {
        Error::Other(err.to_string())
    }
}
impl From<num::ParseFloatError> for Error {
    fn from(err: num::ParseFloatError) -> Self {
        Error::Other(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// A database session able to run the statements of a plan
pub trait Connection {
    /// Run a statement returning no rows
    fn execute(&mut self, sql: &str) -> Result<()>;
    /// Run a query and return all its rows
    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Value>>>;
}

/// How to reach a database and read extractions from it
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    pub url: String,
    /// Give up connecting after this long
    pub timeout: time::Duration,
    /// Wait between connection attempts
    pub poll_interval: time::Duration,
    /// Rows read at once from the results
    pub batch_size: u64,
}

impl ConnectionConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        ConnectionConfig {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, poll_interval: time::Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Read `DATABASE_URL` and, when set, `DATABASE_CONNECTION_TIMEOUT`,
    /// `DATABASE_POLL_INTERVAL` (in seconds) and `DATABASE_BATCH_SIZE`
    pub fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| Error::other("DATABASE_URL must be set to connect to a database"))?;
        let seconds = |var: &str| -> Result<Option<time::Duration>> {
            match env::var(var) {
                Ok(value) => Ok(Some(time::Duration::from_secs_f64(
                    value.trim().parse::<f64>()?.max(0.),
                ))),
                Err(_) => Ok(None),
            }
        };
        let mut config = ConnectionConfig::new(url);
        if let Some(timeout) = seconds("DATABASE_CONNECTION_TIMEOUT")? {
            config = config.timeout(timeout);
        }
        if let Some(poll_interval) = seconds("DATABASE_POLL_INTERVAL")? {
            config = config.poll_interval(poll_interval);
        }
        if let Ok(batch_size) = env::var("DATABASE_BATCH_SIZE") {
            config = config.batch_size(batch_size.trim().parse()?);
        }
        Ok(config)
    }
}

/// Connect, retrying every poll interval until the timeout is reached
pub fn connect_with_retry<C, F>(config: &ConnectionConfig, mut connect: F) -> Result<C>
where
    F: FnMut(&str) -> Result<C>,
{
    let start = time::Instant::now();
    let mut attempts: usize = 0;
    loop {
        match connect(&config.url) {
            Ok(connection) => return Ok(connection),
            Err(err) => {
                attempts += 1;
                let elapsed = start.elapsed();
                if elapsed + config.poll_interval > config.timeout {
                    return Err(Error::connection(elapsed, err.to_string().trim_end()));
                }
                log::info!("Connection attempt {attempts} failed, retrying.");
                thread::sleep(config.poll_interval);
            }
        }
    }
}

/// Drop intermediate results, last created first. Every statement is attempted.
fn teardown<C: Connection + ?Sized>(connection: &mut C, statements: &[&str]) -> Result<()> {
    let mut result = Ok(());
    for sql in statements {
        log::debug!("Teardown: {sql}");
        if let Err(err) = connection.execute(sql) {
            if result.is_ok() {
                result = Err(err);
            }
        }
    }
    result
}

/// Run the stages of a plan and return its rows
pub fn extract<'c, C: Connection + ?Sized, D: Dialect>(
    connection: &'c mut C,
    dialect: D,
    plan: Plan,
    batch_size: u64,
) -> Result<Rows<'c, C, D>> {
    log::info!("Running {} stages on {}", plan.stages().len(), plan.dialect());
    for (executed, stage) in plan.stages().iter().enumerate() {
        log::debug!("{}: {}", stage.purpose(), stage.sql());
        if let Err(err) = connection.execute(stage.sql()) {
            let created: Vec<&str> = plan.stages()[..executed]
                .iter()
                .rev()
                .filter_map(|stage| stage.teardown())
                .collect();
            if let Err(teardown_err) = teardown(&mut *connection, &created) {
                log::warn!("Teardown failed: {teardown_err}");
            }
            return Err(Error::execution(stage.purpose(), err.to_string().trim_end()));
        }
    }
    Ok(Rows {
        connection,
        dialect,
        plan,
        batch_size: batch_size.max(1),
        buffer: VecDeque::new(),
        last: None,
        exhausted: false,
        torn_down: false,
    })
}

/// Compile a dataset and run it
pub fn run<'c, C: Connection + ?Sized, D: Dialect>(
    connection: &'c mut C,
    backend: &Backend,
    dialect: D,
    dataset: &Dataset,
    batch_size: u64,
) -> Result<Rows<'c, C, D>> {
    let plan = Compiler::new(backend, dialect.clone()).compile(dataset)?;
    extract(connection, dialect, plan, batch_size)
}

/// The extracted rows, one per patient in increasing `patient_id` order, read lazily
pub struct Rows<'c, C: Connection + ?Sized, D: Dialect> {
    connection: &'c mut C,
    dialect: D,
    plan: Plan,
    batch_size: u64,
    buffer: VecDeque<Vec<Value>>,
    /// The last `patient_id` read
    last: Option<Value>,
    exhausted: bool,
    torn_down: bool,
}

impl<'c, C: Connection + ?Sized, D: Dialect> Rows<'c, C, D> {
    /// Column names, `patient_id` first
    pub fn header(&self) -> Vec<&str> {
        self.plan.header()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// The query reading the next batch
    fn next_batch(&self) -> ast::Query {
        let r = self.dialect.ident("r");
        let patient_id = expr::column(&r, &self.dialect.ident(PATIENT_ID));
        let mut select = SelectBuilder::new(sql::table(
            self.dialect.temp_name(self.plan.results()),
            Some(r.clone()),
        ))
        .projection(
            self.plan
                .header()
                .into_iter()
                .map(|name| sql::unnamed(expr::column(&r, &self.dialect.ident(name))))
                .collect(),
        )
        .order_by(vec![expr::order_by(patient_id.clone(), true)]);
        if let Some(last) = &self.last {
            select = select.filter(expr::binary(
                patient_id,
                ast::BinaryOperator::Gt,
                self.dialect.value(last),
            ));
        }
        self.dialect.limit(select.build(), self.batch_size)
    }

    fn fetch(&mut self) -> Result<()> {
        let sql = self.next_batch().to_string();
        log::debug!("Fetching: {sql}");
        let rows = self.connection.query(&sql)?;
        if (rows.len() as u64) < self.batch_size {
            self.exhausted = true;
        }
        for row in rows {
            let row = row
                .into_iter()
                .zip(self.plan.columns())
                .map(|(value, (_, data_type))| value.coerce(*data_type))
                .collect::<data_type::Result<Vec<_>>>()?;
            self.last = row.first().cloned();
            self.buffer.push_back(row);
        }
        Ok(())
    }

    /// Drop the intermediate results, only once
    pub fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        teardown(&mut *self.connection, &self.plan.teardown())
    }
}

impl<'c, C: Connection + ?Sized, D: Dialect> Iterator for Rows<'c, C, D> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        match self.buffer.pop_front() {
            Some(row) => Some(Ok(row)),
            None => self.teardown().err().map(Err),
        }
    }
}

impl<'c, C: Connection + ?Sized, D: Dialect> Drop for Rows<'c, C, D> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::warn!("Teardown failed: {err}");
        }
    }
}

impl<'c, C: Connection + ?Sized, D: Dialect> fmt::Debug for Rows<'c, C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("results", &self.plan.results())
            .field("batch_size", &self.batch_size)
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
