//! A PostgreSQL session reached through a `postgres://` url
//!

use super::{connect_with_retry, Connection, ConnectionConfig, Error, Result};
use crate::{data_type::Value, dialect::PostgreSql};
use postgres::{
    self,
    types::{FromSql, Type},
    NoTls,
};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::{error, fmt, result};

/// Converts postgres errors to io errors
impl From<postgres::Error> for Error {
    fn from(err: postgres::Error) -> Self {
        Error::database(err)
    }
}

pub struct Database {
    client: postgres::Client,
}

impl Database {
    pub fn open(url: &str) -> Result<Self> {
        Ok(Database {
            client: postgres::Client::connect(url, NoTls)?,
        })
    }

    /// Connect, waiting for the server to come up
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        connect_with_retry(config, Database::open)
    }

    pub fn dialect(&self) -> PostgreSql {
        PostgreSql
    }
}

impl Connection for Database {
    fn execute(&mut self, sql: &str) -> Result<()> {
        Ok(self.client.batch_execute(sql)?)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Value>>> {
        let rows = self.client.query(sql, &[])?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| Ok(Value::from(row.try_get::<_, SqlValue>(i)?)))
                    .collect::<Result<Vec<Value>>>()
            })
            .collect()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

/// Values as read from PostgreSQL
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(chrono::NaiveDate),
    DateTime(chrono::NaiveDateTime),
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Boolean(b) => Value::Boolean(b),
            SqlValue::Integer(i) => Value::Integer(i),
            SqlValue::Float(f) => Value::Float(f),
            SqlValue::Text(t) => Value::Text(t),
            SqlValue::Date(d) => Value::Date(d),
            SqlValue::DateTime(dt) => Value::DateTime(dt),
        }
    }
}

impl<'a> FromSql<'a> for SqlValue {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> result::Result<Self, Box<dyn error::Error + Sync + Send>> {
        match ty {
            &Type::BOOL => bool::from_sql(ty, raw).map(SqlValue::Boolean),
            &Type::INT2 => i16::from_sql(ty, raw).map(|i| SqlValue::Integer(i as i64)),
            &Type::INT4 => i32::from_sql(ty, raw).map(|i| SqlValue::Integer(i as i64)),
            &Type::INT8 => i64::from_sql(ty, raw).map(SqlValue::Integer),
            &Type::FLOAT4 => f32::from_sql(ty, raw).map(|f| SqlValue::Float(f as f64)),
            &Type::FLOAT8 => f64::from_sql(ty, raw).map(SqlValue::Float),
            &Type::NUMERIC => Decimal::from_sql(ty, raw).map(|d| match d.to_i64() {
                Some(i) if d.fract().is_zero() => SqlValue::Integer(i),
                _ => SqlValue::Float(d.to_f64().unwrap_or_default()),
            }),
            &Type::VARCHAR | &Type::TEXT | &Type::BPCHAR | &Type::NAME => {
                String::from_sql(ty, raw).map(SqlValue::Text)
            }
            &Type::DATE => chrono::NaiveDate::from_sql(ty, raw).map(SqlValue::Date),
            &Type::TIMESTAMP => chrono::NaiveDateTime::from_sql(ty, raw).map(SqlValue::DateTime),
            ty => Err(format!("unsupported column type {ty}").into()),
        }
    }

    fn from_sql_null(_ty: &Type) -> result::Result<Self, Box<dyn error::Error + Sync + Send>> {
        Ok(SqlValue::Null)
    }

    postgres::types::accepts!(
        BOOL, INT2, INT4, INT8, FLOAT4, FLOAT8, NUMERIC, VARCHAR, TEXT, BPCHAR, NAME, DATE,
        TIMESTAMP
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::Backend,
        builder::{Ready, With},
        frame::{patient_table, table, Dataset, POPULATION},
        io::run,
    };

    fn database() -> Database {
        let config = ConnectionConfig::from_env().unwrap();
        Database::connect(&config).unwrap()
    }

    #[ignore]
    #[test]
    fn test_values() -> Result<()> {
        let mut database = database();
        let rows = database.query(
            "SELECT 1::int2, 2::int8, 1.5::numeric, 3::numeric, 'a'::text, DATE '2021-01-02', NULL::int4, TRUE",
        )?;
        println!("{:?}", rows);
        assert_eq!(
            rows[0],
            vec![
                Value::integer(1),
                Value::integer(2),
                Value::float(1.5),
                Value::integer(3),
                Value::text("a"),
                Value::parse_date("2021-01-02").unwrap(),
                Value::null(),
                Value::boolean(true),
            ]
        );
        Ok(())
    }

    const REGISTRY: &str = r#"{
        "backend_id": "test",
        "patient_join_column": "patient_id",
        "tables": {
            "patients": {
                "source": {"table": "patients"},
                "patient_level": true,
                "columns": {"sex": {"type": "text"}, "date_of_birth": {"type": "date"}}
            },
            "events": {
                "source": {"table": "events"},
                "row_id": "event_id",
                "columns": {"code": {"type": "code", "system": "ctv3"}, "date": {"type": "date"}}
            }
        }
    }"#;

    #[ignore]
    #[test]
    fn test_extraction() -> Result<()> {
        let mut database = database();
        database.execute(
            "DROP TABLE IF EXISTS patients; DROP TABLE IF EXISTS events; \
             CREATE TABLE patients (patient_id BIGINT, date_of_birth DATE, sex TEXT); \
             CREATE TABLE events (event_id BIGINT, patient_id BIGINT, code TEXT, date DATE); \
             INSERT INTO patients VALUES (1, '1980-01-01', 'F'), (2, '1990-06-01', 'M'), (3, '2000-01-01', 'F'); \
             INSERT INTO events VALUES (1, 1, 'abc', '2020-01-01'), (2, 1, 'def', '2021-01-01'), (3, 2, 'abc', '2020-06-01');",
        )?;
        let backend = Backend::from_json(REGISTRY).unwrap();
        let dataset = Dataset::builder()
            .with((POPULATION, table("events").exists_for_patient()))
            .with(("sex", patient_table("patients").get("sex")))
            .with(("events", table("events").count_for_patient()))
            .try_build()
            .unwrap();
        let dialect = database.dialect();
        let rows: Vec<Vec<Value>> =
            run(&mut database, &backend, dialect, &dataset, 1)?.collect::<Result<_>>()?;
        for row in &rows {
            println!("{:?}", row);
        }
        assert_eq!(
            rows,
            vec![
                vec![Value::integer(1), Value::text("F"), Value::integer(2)],
                vec![Value::integer(2), Value::text("M"), Value::integer(1)],
            ]
        );
        Ok(())
    }
}
