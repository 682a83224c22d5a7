use std::path::Path;

use chrono::SecondsFormat;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use strata_common::{Error, Result};
use tracing::info;

use crate::dialect::Dialect;
use crate::executor::{Connection, Executor, Row, Transaction, Value};

/// SQLite backend over a single `rusqlite::Connection`.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening sqlite store at {}", db_path.display());
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Connection(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let conn = rusqlite::Connection::open(db_path)
            .map_err(|e| Error::Connection(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Connection(format!("failed to set pragmas: {e}")))?;

        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| Error::Connection(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Connection(format!("failed to set pragmas: {e}")))?;

        Ok(Self { conn })
    }
}

impl Executor for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        execute(&self.conn, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        query(&self.conn, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch(&self.conn, sql)
    }
}

impl Connection for SqliteConnection {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to start transaction: {e}")))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let SqliteConnection { conn } = *self;
        conn.close()
            .map_err(|(_, e)| Error::Database(format!("failed to close database: {e}")))
    }
}

pub struct SqliteTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl Executor for SqliteTransaction<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        execute(&self.tx, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        query(&self.tx, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch(&self.tx, sql)
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx } = *self;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let SqliteTransaction { tx } = *self;
        tx.rollback()
            .map_err(|e| Error::Database(format!("failed to roll back: {e}")))
    }
}

fn bind(params: &[Value]) -> impl Iterator<Item = SqlValue> + '_ {
    params.iter().map(|value| match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
    })
}

fn convert(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(v),
        SqlValue::Real(v) => Value::Real(v),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Blob(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn execute(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<u64> {
    let changed = conn
        .execute(sql, params_from_iter(bind(params)))
        .map_err(|e| Error::Database(format!("failed to execute statement: {e}")))?;
    Ok(changed as u64)
}

fn query(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
    let columns = stmt.column_count();

    let rows = stmt
        .query_map(params_from_iter(bind(params)), |row| {
            (0..columns)
                .map(|i| row.get::<_, SqlValue>(i).map(convert))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

    rows.map(|row| row.map(Row::new))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read row: {e}")))
}

fn execute_batch(conn: &rusqlite::Connection, sql: &str) -> Result<()> {
    conn.execute_batch(sql)
        .map_err(|e| Error::Database(format!("failed to execute script: {e}")))
}
