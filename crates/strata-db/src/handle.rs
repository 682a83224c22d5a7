//! Process-wide database handle: opened and migrated once at startup, closed
//! once at shutdown.

use std::sync::{Arc, Mutex, MutexGuard};

use strata_common::{Error, Result};
use strata_config::DatabaseConfig;
use tracing::{debug, info};

use crate::database::Database;
use crate::log::LogSink;
use crate::registry::MigrationRegistry;
use crate::runner::RunReport;

enum HandleState {
    Uninit,
    Open(Arc<Database>),
    Closed,
}

static STATE: Mutex<HandleState> = Mutex::new(HandleState::Uninit);

fn state() -> Result<MutexGuard<'static, HandleState>> {
    STATE
        .lock()
        .map_err(|_| Error::Database("database handle lock poisoned".into()))
}

/// Open the store, apply pending migrations and publish the handle. Later
/// calls return the published handle without migrating again.
pub fn try_init(
    config: &DatabaseConfig,
    registry: &MigrationRegistry,
    sink: &dyn LogSink,
) -> Result<Arc<Database>> {
    try_init_with_report(config, registry, sink).map(|(db, _)| db)
}

/// [`try_init`] that also hands back the startup run's report. The report is
/// `None` when the handle was already published by an earlier call.
pub fn try_init_with_report(
    config: &DatabaseConfig,
    registry: &MigrationRegistry,
    sink: &dyn LogSink,
) -> Result<(Arc<Database>, Option<RunReport>)> {
    let mut state = state()?;
    match &*state {
        HandleState::Open(db) => return Ok((Arc::clone(db), None)),
        HandleState::Closed => return Err(Error::Closed),
        HandleState::Uninit => {}
    }

    let db = Database::open(config)?;
    let report = db.migrate(registry, sink)?;
    debug!(
        "database ready: {} migrations applied in {:?}",
        report.applied.len(),
        report.elapsed
    );

    let db = Arc::new(db);
    *state = HandleState::Open(Arc::clone(&db));
    Ok((db, Some(report)))
}

/// Like [`try_init`], but any failure is reported through `sink.fatal`.
pub fn init(config: &DatabaseConfig, registry: &MigrationRegistry, sink: &dyn LogSink) -> Arc<Database> {
    match try_init(config, registry, sink) {
        Ok(db) => db,
        Err(e @ Error::Migration { .. }) | Err(e @ Error::OutOfOrder { .. }) => {
            sink.fatal(&format!("failed to apply new migrations: {e}"))
        }
        Err(e) => sink.fatal(&format!("failed to open database: {e}")),
    }
}

/// The published handle.
pub fn get() -> Result<Arc<Database>> {
    match &*state()? {
        HandleState::Open(db) => Ok(Arc::clone(db)),
        HandleState::Uninit => Err(Error::NotInitialized),
        HandleState::Closed => Err(Error::Closed),
    }
}

/// Close the published handle. The handle is never reopened afterwards;
/// closing again is a no-op.
pub fn close() -> Result<()> {
    let mut state = state()?;
    match std::mem::replace(&mut *state, HandleState::Closed) {
        HandleState::Open(db) => {
            info!("closing database");
            db.close()
        }
        HandleState::Closed => Ok(()),
        HandleState::Uninit => {
            *state = HandleState::Uninit;
            Err(Error::NotInitialized)
        }
    }
}
