use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use postgres::{Client, GenericClient, NoTls};
use strata_common::{Error, Result};
use tracing::info;

use crate::dialect::Dialect;
use crate::executor::{Connection, Executor, Row, Transaction, Value};

/// Postgres backend over a blocking `postgres::Client`.
pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    pub fn connect(params: &str) -> Result<Self> {
        info!("connecting to postgres store");
        let client = Client::connect(params, NoTls)
            .map_err(|e| Error::Connection(format!("failed to connect to postgres: {e}")))?;
        Ok(Self { client })
    }
}

impl Executor for PostgresConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        execute(&mut self.client, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        query(&mut self.client, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch(&mut self.client, sql)
    }
}

impl Connection for PostgresConnection {
    fn begin(&mut self) -> Result<Box<dyn Transaction + '_>> {
        let tx = self
            .client
            .transaction()
            .map_err(|e| Error::Database(format!("failed to start transaction: {e}")))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let PostgresConnection { client } = *self;
        client
            .close()
            .map_err(|e| Error::Database(format!("failed to close connection: {e}")))
    }
}

pub struct PostgresTransaction<'conn> {
    tx: postgres::Transaction<'conn>,
}

impl Executor for PostgresTransaction<'_> {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        execute(&mut self.tx, sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        query(&mut self.tx, sql, params)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        execute_batch(&mut self.tx, sql)
    }
}

impl Transaction for PostgresTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        let PostgresTransaction { tx } = *self;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let PostgresTransaction { tx } = *self;
        tx.rollback()
            .map_err(|e| Error::Database(format!("failed to roll back: {e}")))
    }
}

/// Parameter adapting a `Value` to the type the server inferred for it.
#[derive(Debug)]
struct Param<'a>(&'a Value);

type BoxError = Box<dyn std::error::Error + Sync + Send>;

impl ToSql for Param<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                    v.to_string().to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Real(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Value::Text(s) => {
                if *ty == Type::JSON || *ty == Type::JSONB {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                } else {
                    s.to_sql(ty, out)
                }
            }
            Value::Timestamp(ts) => {
                if *ty == Type::TIMESTAMP {
                    ts.naive_utc().to_sql(ty, out)
                } else {
                    ts.to_sql(ty, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn bind(params: &[Value]) -> Vec<Param<'_>> {
    params.iter().map(Param).collect()
}

fn execute<C: GenericClient>(client: &mut C, sql: &str, params: &[Value]) -> Result<u64> {
    let bound = bind(params);
    let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    client
        .execute(sql, &refs)
        .map_err(|e| Error::Database(format!("failed to execute statement: {e}")))
}

fn query<C: GenericClient>(client: &mut C, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let bound = bind(params);
    let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let rows = client
        .query(sql, &refs)
        .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;
    rows.iter().map(convert_row).collect()
}

fn execute_batch<C: GenericClient>(client: &mut C, sql: &str) -> Result<()> {
    client
        .batch_execute(sql)
        .map_err(|e| Error::Database(format!("failed to execute script: {e}")))
}

fn convert_row(row: &postgres::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let read_err = |e: postgres::Error| {
            Error::Database(format!("failed to read column {}: {e}", column.name()))
        };
        let ty = column.type_();

        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)
                .map_err(read_err)?
                .map(|v| Value::Integer(v.into()))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)
                .map_err(read_err)?
                .map(|v| Value::Integer(v.into()))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)
                .map_err(read_err)?
                .map(|v| Value::Integer(v.into()))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)
                .map_err(read_err)?
                .map(Value::Integer)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx)
                .map_err(read_err)?
                .map(|v| Value::Real(v.into()))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)
                .map_err(read_err)?
                .map(Value::Real)
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(idx)
                .map_err(read_err)?
                .map(Value::Timestamp)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(idx)
                .map_err(read_err)?
                .map(|v| Value::Timestamp(v.and_utc()))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<serde_json::Value>>(idx)
                .map_err(read_err)?
                .map(|v| Value::Text(v.to_string()))
        } else {
            row.try_get::<_, Option<String>>(idx)
                .map_err(read_err)?
                .map(Value::Text)
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(Row::new(values))
}
