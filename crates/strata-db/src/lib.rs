pub mod catalog;
pub mod database;
pub mod dialect;
pub mod executor;
pub mod guard;
pub mod handle;
pub mod ledger;
pub mod log;
#[cfg(feature = "postgres")]
pub mod pg;
pub mod registry;
pub mod runner;
pub mod script;
pub mod sqlite;

pub use database::Database;
pub use dialect::{Dialect, SqlFragments};
pub use executor::{Connection, Executor, Row, Transaction, Value};
pub use guard::IntegrityGuard;
pub use handle::{close, get, init, try_init, try_init_with_report};
pub use ledger::{LedgerEntry, VersionLedger};
pub use log::{LogSink, MemorySink, RunLog, TracingSink};
#[cfg(feature = "postgres")]
pub use pg::PostgresConnection;
pub use registry::{Body, MigrationDefinition, MigrationRegistry, Version};
pub use runner::{MigrationStatus, Migrator, RunReport};
pub use sqlite::SqliteConnection;
