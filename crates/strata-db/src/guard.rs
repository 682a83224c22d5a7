use std::ops::{Deref, DerefMut};

use strata_common::{Error, Result};
use tracing::debug;

use crate::executor::Executor;
use crate::log::LogSink;

/// Relaxes referential-integrity enforcement for the lifetime of a migration
/// run and restores it on drop, whichever way the run exits.
///
/// Only backends that must rebuild tables to alter them (SQLite) toggle
/// anything, and only a state the guard itself changed is restored. Toggle
/// failures are logged and never abort the run.
pub struct IntegrityGuard<'a, C: Executor + ?Sized> {
    conn: &'a mut C,
    sink: &'a dyn LogSink,
    restore: Option<&'static str>,
}

impl<'a, C: Executor + ?Sized> IntegrityGuard<'a, C> {
    pub fn acquire(conn: &'a mut C, sink: &'a dyn LogSink) -> Self {
        let sql = conn.sql();
        let restore = match (
            sql.integrity_state_query(),
            sql.integrity_toggle(false),
            sql.integrity_toggle(true),
        ) {
            (Some(state_query), Some(disable), Some(enable)) => {
                match enforcement_state(conn, state_query) {
                    Ok(false) => {
                        debug!("referential integrity already relaxed");
                        None
                    }
                    Ok(true) => match conn.execute_batch(disable) {
                        Ok(()) => {
                            debug!("referential integrity relaxed for migration run");
                            Some(enable)
                        }
                        Err(e) => {
                            report(sink, "failed to disable referential integrity", e);
                            None
                        }
                    },
                    // prior state unknown: leave enforcement as it is
                    Err(e) => {
                        report(sink, "failed to read referential integrity state", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            conn,
            sink,
            restore,
        }
    }

    /// Whether enforcement will be switched back on when the guard drops.
    pub fn will_restore(&self) -> bool {
        self.restore.is_some()
    }
}

impl<C: Executor + ?Sized> Deref for IntegrityGuard<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
    }
}

impl<C: Executor + ?Sized> DerefMut for IntegrityGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn
    }
}

impl<C: Executor + ?Sized> Drop for IntegrityGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(enable) = self.restore.take() {
            match self.conn.execute_batch(enable) {
                Ok(()) => debug!("referential integrity restored"),
                Err(e) => report(self.sink, "failed to re-enable referential integrity", e),
            }
        }
    }
}

/// Current enforcement state, read through `state_query` (one 0/1 row).
pub fn enforcement_state<C: Executor + ?Sized>(conn: &mut C, state_query: &str) -> Result<bool> {
    let row = conn
        .query_opt(state_query, &[])?
        .ok_or_else(|| Error::Database(format!("{state_query} returned no rows")))?;
    Ok(row.i64(0)? != 0)
}

fn report(sink: &dyn LogSink, context: &str, err: Error) {
    sink.error(&Error::IntegrityToggle(format!("{context}: {err}")).to_string());
}
