//! Backend-neutral statement execution.
//!
//! Migration bodies, the ledger and the integrity guard only talk to the store
//! through these traits, so the same code runs against every backend.

use chrono::{DateTime, Utc};
use strata_common::{Error, Result};

use crate::dialect::{Dialect, SqlFragments};

/// A parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamps come back as native values from Postgres and as RFC 3339
    /// text from SQLite.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Result<&Value> {
        self.values
            .get(idx)
            .ok_or_else(|| Error::Database(format!("column {idx} out of range")))
    }

    pub fn i64(&self, idx: usize) -> Result<i64> {
        let value = self.get(idx)?;
        value
            .as_i64()
            .ok_or_else(|| Error::Database(format!("column {idx} is not an integer: {value:?}")))
    }

    pub fn text(&self, idx: usize) -> Result<String> {
        match self.get(idx)? {
            Value::Text(s) => Ok(s.clone()),
            Value::Integer(v) => Ok(v.to_string()),
            Value::Real(v) => Ok(v.to_string()),
            Value::Timestamp(ts) => Ok(ts.to_rfc3339()),
            Value::Null => Err(Error::Database(format!("column {idx} is NULL"))),
        }
    }

    pub fn timestamp(&self, idx: usize) -> Result<DateTime<Utc>> {
        let value = self.get(idx)?;
        value
            .as_timestamp()
            .ok_or_else(|| Error::Database(format!("column {idx} is not a timestamp: {value:?}")))
    }
}

/// Statement execution shared by connections and transactions.
pub trait Executor {
    fn dialect(&self) -> Dialect;

    /// Run one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a parameterless script of one or more statements.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    fn sql(&self) -> &'static dyn SqlFragments {
        self.dialect().sql()
    }

    fn query_opt(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}

/// An open transaction. Dropping it without `commit` rolls back.
pub trait Transaction: Executor {
    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// A store handle able to open transactions.
pub trait Connection: Executor + Send {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>>;

    fn close(self: Box<Self>) -> Result<()>;
}
