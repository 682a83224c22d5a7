use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use strata_common::{Error, Result};
use strata_config::DatabaseConfig;
use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::executor::Connection;
use crate::ledger::VersionLedger;
use crate::log::LogSink;
use crate::registry::{MigrationRegistry, Version};
use crate::runner::{MigrationStatus, Migrator, RunReport};
use crate::sqlite::SqliteConnection;

/// SQLite path that opens a private in-memory store.
pub const MEMORY_PATH: &str = ":memory:";

/// An open store plus the dialect and ledger it was opened with.
pub struct Database {
    conn: Mutex<Option<Box<dyn Connection>>>,
    dialect: Dialect,
    ledger: VersionLedger,
}

impl Database {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let dialect = Dialect::for_driver(&config.driver)?;
        let ledger = VersionLedger::new(&config.ledger_table)?;

        let conn: Box<dyn Connection> = match dialect {
            Dialect::Sqlite if config.path == MEMORY_PATH => Box::new(SqliteConnection::in_memory()?),
            Dialect::Sqlite => Box::new(SqliteConnection::open(Path::new(&config.path))?),
            Dialect::Postgres => connect_postgres(&config.path)?,
        };
        info!("opened {dialect} store");

        Ok(Self::from_connection(conn, ledger))
    }

    /// Private in-memory SQLite store with the default ledger table.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_connection(
            Box::new(SqliteConnection::in_memory()?),
            VersionLedger::new(strata_config::model::DEFAULT_LEDGER_TABLE)?,
        ))
    }

    pub fn from_connection(conn: Box<dyn Connection>, ledger: VersionLedger) -> Self {
        Self {
            dialect: conn.dialect(),
            conn: Mutex::new(Some(conn)),
            ledger,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut dyn Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        match guard.as_mut() {
            Some(conn) => f(&mut **conn),
            None => Err(Error::Closed),
        }
    }

    pub fn migrate(&self, registry: &MigrationRegistry, sink: &dyn LogSink) -> Result<RunReport> {
        self.with_connection(|conn| self.migrator(registry).up(conn, sink))
    }

    pub fn status(&self, registry: &MigrationRegistry) -> Result<MigrationStatus> {
        self.with_connection(|conn| self.migrator(registry).status(conn))
    }

    pub fn current_version(&self) -> Result<Option<Version>> {
        let registry = MigrationRegistry::new();
        self.with_connection(|conn| self.migrator(&registry).current_version(conn))
    }

    pub fn migrator<'r>(&self, registry: &'r MigrationRegistry) -> Migrator<'r> {
        Migrator::new(registry, self.ledger.clone())
    }

    /// Close the connection. Later calls return `Error::Closed`; closing twice
    /// is a no-op.
    pub fn close(&self) -> Result<()> {
        let taken = self.lock()?.take();
        match taken {
            Some(conn) => {
                conn.close()?;
                info!("closed {} store", self.dialect);
            }
            None => debug!("{} store already closed", self.dialect),
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|c| c.is_none()).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Box<dyn Connection>>>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }
}

#[cfg(feature = "postgres")]
fn connect_postgres(params: &str) -> Result<Box<dyn Connection>> {
    Ok(Box::new(crate::pg::PostgresConnection::connect(params)?))
}

#[cfg(not(feature = "postgres"))]
fn connect_postgres(_params: &str) -> Result<Box<dyn Connection>> {
    Err(Error::UnsupportedDialect(
        "postgres (built without the `postgres` feature)".into(),
    ))
}
