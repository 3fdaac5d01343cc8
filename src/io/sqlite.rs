use super::{connect_with_retry, Connection, ConnectionConfig, Error, Result};
use crate::{data_type::Value, dialect::Sqlite};
use rusqlite::{
    self, params_from_iter,
    types::{FromSql, FromSqlResult, Null, ToSql, ToSqlOutput, ValueRef},
};
use std::{fmt, result};

const SCHEME: &str = "sqlite://";

/// Converts sqlite errors to io errors
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::database(err)
    }
}

/// A SQLite database, in a file or in memory
pub struct Database {
    connection: rusqlite::Connection,
}

impl Database {
    /// Open `sqlite://path`, a bare path or `:memory:`
    pub fn open(url: &str) -> Result<Self> {
        let path = url.strip_prefix(SCHEME).unwrap_or(url);
        let connection = if path.is_empty() || path == ":memory:" {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(path)?
        };
        Ok(Database { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        Database::open(":memory:")
    }

    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        connect_with_retry(config, Database::open)
    }

    pub fn dialect(&self) -> Sqlite {
        Sqlite
    }

    /// Insert rows in an existing table
    pub fn insert<S: AsRef<str>>(
        &mut self,
        table: &str,
        columns: &[S],
        rows: &[Vec<Value>],
    ) -> Result<usize> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns
                .iter()
                .map(|column| column.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        let transaction = self.connection.transaction()?;
        let mut inserted = 0;
        {
            let mut statement = transaction.prepare(&sql)?;
            for row in rows {
                inserted += statement.execute(params_from_iter(row.iter()))?;
            }
        }
        transaction.commit()?;
        Ok(inserted)
    }
}

impl Connection for Database {
    fn execute(&mut self, sql: &str) -> Result<()> {
        Ok(self.connection.execute_batch(sql)?)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Value>>> {
        let mut statement = self.connection.prepare(sql)?;
        let column_count = statement.column_count();
        let result: result::Result<Vec<Vec<Value>>, rusqlite::Error> = statement
            .query_map([], |row| (0..column_count).map(|i| row.get(i)).collect())?
            .collect();
        Ok(result?)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.connection.path())
            .finish()
    }
}

/// Implement the conversion of a Value to ToSqlOutput
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Null.to_sql(),
            Value::Boolean(b) => b.to_sql(),
            Value::Integer(i) => i.to_sql(),
            Value::Float(f) => f.to_sql(),
            Value::Text(t) => t.to_sql(),
            Value::Date(d) => d.to_sql(),
            Value::DateTime(dt) => dt.to_sql(),
        }
    }
}

/// Read sql results as value, dates come back as text
impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::null(),
            ValueRef::Integer(i) => Value::integer(i),
            ValueRef::Real(f) => Value::float(f),
            ValueRef::Text(s) => Value::text(String::from_utf8_lossy(s)),
            ValueRef::Blob(b) => Value::text(String::from_utf8_lossy(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() -> Result<()> {
        let mut database = Database::open("sqlite://:memory:")?;
        database.execute("CREATE TABLE events (patient_id INTEGER, date TEXT, value REAL)")?;
        let inserted = database.insert(
            "events",
            &["patient_id", "date", "value"],
            &[
                vec![
                    Value::integer(1),
                    Value::parse_date("2021-01-02").unwrap(),
                    Value::float(1.5),
                ],
                vec![Value::integer(2), Value::null(), Value::null()],
            ],
        )?;
        assert_eq!(inserted, 2);
        let rows =
            database.query("SELECT patient_id, date, value FROM events ORDER BY patient_id")?;
        println!("{:?}", rows);
        assert_eq!(
            rows,
            vec![
                vec![Value::integer(1), Value::text("2021-01-02"), Value::float(1.5)],
                vec![Value::integer(2), Value::null(), Value::null()],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_database_error() {
        let mut database = Database::open_in_memory().unwrap();
        let err = database.query("SELECT * FROM missing").unwrap_err();
        println!("{err}");
        assert!(matches!(err, Error::Database(_)));
    }
}
