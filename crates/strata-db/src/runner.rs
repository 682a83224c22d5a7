//! Ordered, transactional application of pending migrations.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use strata_common::{Error, Result};
use tracing::{debug, warn};

use crate::executor::{Connection, Executor, Transaction};
use crate::guard::IntegrityGuard;
use crate::ledger::{LedgerEntry, VersionLedger};
use crate::log::{LogSink, RunLog};
use crate::registry::{MigrationDefinition, MigrationRegistry, Version};

/// Outcome of an upward run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Whether the ledger table existed before the run.
    pub ledger_existed: bool,
    /// Versions applied by this run, in application order.
    pub applied: Vec<Version>,
    /// Versions that were already in the ledger.
    pub already_applied: usize,
    pub elapsed: Duration,
}

/// Read-only view of ledger versus registry.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<LedgerEntry>,
    pub pending: Vec<Version>,
    /// Ledger versions with no registered definition.
    pub unknown: Vec<Version>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Applies a registry to a store, one transaction per migration.
pub struct Migrator<'r> {
    registry: &'r MigrationRegistry,
    ledger: VersionLedger,
}

impl<'r> Migrator<'r> {
    pub fn new(registry: &'r MigrationRegistry, ledger: VersionLedger) -> Self {
        Self { registry, ledger }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        self.registry
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Apply every pending migration in ascending order.
    pub fn up(&self, conn: &mut dyn Connection, sink: &dyn LogSink) -> Result<RunReport> {
        self.run_up(conn, sink, None)
    }

    /// Apply pending migrations up to and including `target`.
    pub fn up_to(
        &self,
        conn: &mut dyn Connection,
        sink: &dyn LogSink,
        target: &Version,
    ) -> Result<RunReport> {
        self.run_up(conn, sink, Some(target))
    }

    fn run_up(
        &self,
        conn: &mut dyn Connection,
        sink: &dyn LogSink,
        target: Option<&Version>,
    ) -> Result<RunReport> {
        let started = Instant::now();

        // preflight
        let ledger_existed = self.ledger.is_bootstrapped(&mut *conn)?;
        let log = RunLog::new(sink, !ledger_existed);
        let mut conn = IntegrityGuard::acquire(conn, sink);
        self.ledger.provision(&mut *conn)?;

        let applied = self.ledger.applied_versions(&mut *conn)?;
        self.warn_unknown(&applied);

        let pending: Vec<&MigrationDefinition> = self
            .registry
            .ordered_pending(&applied)
            .into_iter()
            .filter(|def| target.is_none_or(|t| def.version <= *t))
            .collect();
        check_order(&pending, &applied)?;

        if pending.is_empty() {
            let current = applied.last().map(|v| v.to_string());
            log.info(&format!(
                "no migrations to run. current version: {}",
                current.as_deref().unwrap_or("none")
            ));
        }

        let mut applied_now = Vec::with_capacity(pending.len());
        for def in pending {
            if let Err(e) = self.apply(&mut *conn, def, &log) {
                log.error(&e.to_string());
                return Err(e);
            }
            applied_now.push(def.version.clone());
        }

        if let Some(last) = applied_now.last() {
            log.info(&format!("successfully migrated database to version: {last}"));
        }

        Ok(RunReport {
            ledger_existed,
            applied: applied_now,
            already_applied: applied.len(),
            elapsed: started.elapsed(),
        })
    }

    fn apply(
        &self,
        conn: &mut dyn Connection,
        def: &MigrationDefinition,
        log: &RunLog<'_>,
    ) -> Result<()> {
        let started = Instant::now();
        let source = def.source_name();
        let fail = |e: Error| Error::migration(&source, e);

        let mut tx = conn.begin().map_err(fail)?;
        let sql = tx.sql();
        let outcome = def
            .up
            .run(tx.as_mut(), sql)
            .and_then(|()| self.ledger.record(tx.as_mut(), &def.version));
        if let Err(e) = outcome {
            discard(tx, &source);
            return Err(fail(e));
        }
        tx.commit().map_err(fail)?;

        log.info(&format!("OK   {source} ({:.2?})", started.elapsed()));
        Ok(())
    }

    /// Roll back the most recently applied migration. Returns the version
    /// rolled back, or `None` when nothing is applied.
    pub fn down(&self, conn: &mut dyn Connection, sink: &dyn LogSink) -> Result<Option<Version>> {
        let log = RunLog::new(sink, false);
        let mut conn = IntegrityGuard::acquire(conn, sink);

        if !self.ledger.is_bootstrapped(&mut *conn)? {
            log.info("no migrations to roll back");
            return Ok(None);
        }
        let Some(latest) = self.ledger.latest(&mut *conn)? else {
            log.info("no migrations to roll back");
            return Ok(None);
        };

        let def = self.definition(&latest)?;
        self.revert(&mut *conn, def, &log)?;
        Ok(Some(latest))
    }

    /// Roll back every applied migration newer than `target`, newest first.
    pub fn down_to(
        &self,
        conn: &mut dyn Connection,
        sink: &dyn LogSink,
        target: &Version,
    ) -> Result<Vec<Version>> {
        let log = RunLog::new(sink, false);
        let mut conn = IntegrityGuard::acquire(conn, sink);

        if !self.ledger.is_bootstrapped(&mut *conn)? {
            return Ok(Vec::new());
        }

        let newer: Vec<Version> = self
            .ledger
            .entries(&mut *conn)?
            .into_iter()
            .rev()
            .map(|entry| entry.version)
            .filter(|version| version > target)
            .collect();

        // resolve every definition before touching anything
        let defs = newer
            .iter()
            .map(|version| self.definition(version))
            .collect::<Result<Vec<_>>>()?;

        for def in defs {
            self.revert(&mut *conn, def, &log)?;
        }
        Ok(newer)
    }

    fn revert(
        &self,
        conn: &mut dyn Connection,
        def: &MigrationDefinition,
        log: &RunLog<'_>,
    ) -> Result<()> {
        let started = Instant::now();
        let source = def.source_name();
        let fail = |e: Error| Error::migration(&source, e);

        if def.down.is_noop() {
            warn!("{source} has no down body; only its ledger entry is removed");
        }

        let mut tx = conn.begin().map_err(fail)?;
        let sql = tx.sql();
        if let Err(e) = def.down.run(tx.as_mut(), sql) {
            discard(tx, &source);
            let e = fail(e);
            log.error(&e.to_string());
            return Err(e);
        }
        if let Err(e) = self.ledger.remove(tx.as_mut(), &def.version) {
            discard(tx, &source);
            return Err(fail(e));
        }
        tx.commit().map_err(fail)?;

        log.info(&format!("OK   rolled back {source} ({:.2?})", started.elapsed()));
        Ok(())
    }

    /// Applied, pending and unknown versions. Never writes, not even the
    /// ledger table.
    pub fn status<E: Executor + ?Sized>(&self, conn: &mut E) -> Result<MigrationStatus> {
        let applied = if self.ledger.is_bootstrapped(conn)? {
            self.ledger.entries(conn)?
        } else {
            Vec::new()
        };
        let applied_versions: BTreeSet<Version> =
            applied.iter().map(|entry| entry.version.clone()).collect();

        let pending = self
            .registry
            .ordered_pending(&applied_versions)
            .into_iter()
            .map(|def| def.version.clone())
            .collect();
        let unknown = applied_versions
            .iter()
            .filter(|version| !self.registry.contains(version))
            .cloned()
            .collect();

        Ok(MigrationStatus {
            applied,
            pending,
            unknown,
        })
    }

    /// Highest applied version, if any.
    pub fn current_version<E: Executor + ?Sized>(&self, conn: &mut E) -> Result<Option<Version>> {
        if !self.ledger.is_bootstrapped(conn)? {
            return Ok(None);
        }
        self.ledger.latest(conn)
    }

    fn definition(&self, version: &Version) -> Result<&MigrationDefinition> {
        self.registry.get(version).ok_or_else(|| {
            Error::InvalidMigration(format!("{version} is applied but not registered"))
        })
    }

    fn warn_unknown(&self, applied: &BTreeSet<Version>) {
        for version in applied.iter().filter(|v| !self.registry.contains(v)) {
            warn!("ledger contains unregistered migration {version}");
        }
    }
}

/// Roll back a failed migration's transaction. A failed rollback is only
/// logged; the store discards the transaction when it is dropped anyway.
fn discard(tx: Box<dyn Transaction + '_>, source: &str) {
    match tx.rollback() {
        Ok(()) => debug!("rolled back {source}"),
        Err(e) => warn!("failed to roll back {source}: {e}"),
    }
}

/// Refuse to apply a version older than one already applied.
fn check_order(pending: &[&MigrationDefinition], applied: &BTreeSet<Version>) -> Result<()> {
    if let (Some(first), Some(newest)) = (pending.first(), applied.last()) {
        if first.version < *newest {
            return Err(Error::OutOfOrder {
                pending: first.version.to_string(),
                applied: newest.to_string(),
            });
        }
    }
    debug!("{} pending migrations", pending.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::executor::Value;
    use crate::log::{Level, MemorySink};
    use crate::registry::Body;
    use crate::sqlite::SqliteConnection;

    fn ledger() -> VersionLedger {
        VersionLedger::new("schema_migrations").unwrap()
    }

    fn create_table(version: &str, table: &str) -> MigrationDefinition {
        MigrationDefinition::new(
            version,
            &format!("create_{table}"),
            Body::Sql(format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY);")),
            Body::Sql(format!("DROP TABLE {table};")),
        )
        .unwrap()
    }

    fn failing(version: &str) -> MigrationDefinition {
        MigrationDefinition::new(
            version,
            "broken",
            Body::code(|tx, _| {
                tx.execute_batch("CREATE TABLE partial (id INTEGER);")?;
                tx.execute("INSERT INTO partial (id) VALUES (1)", &[])?;
                Err(Error::Other("body failed".into()))
            }),
            Body::Noop,
        )
        .unwrap()
    }

    fn table_exists(conn: &mut SqliteConnection, table: &str) -> bool {
        conn.query_opt(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::from(table)],
        )
        .unwrap()
        .is_some()
    }

    fn versions(list: &[Version]) -> Vec<&str> {
        list.iter().map(|v| v.as_str()).collect()
    }

    #[test]
    fn applies_pending_in_order_and_records_each() {
        let mut registry = MigrationRegistry::new();
        registry.register(create_table("3", "c")).unwrap();
        registry.register(create_table("1", "a")).unwrap();
        registry.register(create_table("2", "b")).unwrap();

        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());

        let report = migrator.up(&mut conn, &sink).unwrap();
        assert!(!report.ledger_existed);
        assert_eq!(versions(&report.applied), vec!["1", "2", "3"]);
        assert_eq!(report.already_applied, 0);
        for table in ["a", "b", "c"] {
            assert!(table_exists(&mut conn, table));
        }
    }

    #[test]
    fn second_run_is_a_no_op() {
        let registry = MigrationRegistry::new()
            .with(create_table("1", "a"))
            .unwrap();
        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());

        migrator.up(&mut conn, &sink).unwrap();
        let second = migrator.up(&mut conn, &sink).unwrap();

        assert!(second.ledger_existed);
        assert!(second.applied.is_empty());
        assert_eq!(second.already_applied, 1);
        assert!(sink.contains(Level::Info, "no migrations to run. current version: 1"));
    }

    #[test]
    fn failed_body_rolls_back_and_stops() {
        let mut registry = MigrationRegistry::new();
        registry.register(create_table("1", "a")).unwrap();
        registry.register(failing("2")).unwrap();
        registry.register(create_table("3", "c")).unwrap();

        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());

        let err = migrator.up(&mut conn, &sink).unwrap_err();
        assert!(matches!(err, Error::Migration { ref version, .. } if version == "2_broken"));

        let applied = migrator.ledger().applied_versions(&mut conn).unwrap();
        let applied: Vec<&str> = applied.iter().map(|v| v.as_str()).collect();
        assert_eq!(applied, vec!["1"]);
        assert!(!table_exists(&mut conn, "partial"));
        assert!(!table_exists(&mut conn, "c"));
        assert!(sink.contains(Level::Error, "body failed"));
        assert!(crate::guard::enforcement_state(&mut conn, "PRAGMA foreign_keys").unwrap());
    }

    #[test]
    fn fresh_install_suppresses_info() {
        let registry = MigrationRegistry::new()
            .with(create_table("1", "a"))
            .unwrap();
        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        Migrator::new(&registry, ledger())
            .up(&mut conn, &sink)
            .unwrap();

        assert!(sink.messages(Level::Info).is_empty());
    }

    #[test]
    fn incremental_upgrade_logs_each_migration() {
        let mut registry = MigrationRegistry::new();
        registry.register(create_table("1", "a")).unwrap();
        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        Migrator::new(&registry, ledger())
            .up(&mut conn, &sink)
            .unwrap();

        registry.register(create_table("2", "b")).unwrap();
        Migrator::new(&registry, ledger())
            .up(&mut conn, &sink)
            .unwrap();

        assert!(sink.contains(Level::Info, "OK   2_create_b"));
        assert!(sink.contains(Level::Info, "successfully migrated database to version: 2"));
    }

    #[test]
    fn older_pending_version_is_refused() {
        let mut registry = MigrationRegistry::new();
        registry.register(create_table("1", "a")).unwrap();
        registry.register(create_table("3", "c")).unwrap();
        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        Migrator::new(&registry, ledger())
            .up(&mut conn, &sink)
            .unwrap();

        registry.register(create_table("2", "b")).unwrap();
        let err = Migrator::new(&registry, ledger())
            .up(&mut conn, &sink)
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { ref pending, ref applied } if pending == "2" && applied == "3"));
        assert!(!table_exists(&mut conn, "b"));
    }

    #[test]
    fn up_to_stops_at_target() {
        let mut registry = MigrationRegistry::new();
        for (v, t) in [("1", "a"), ("2", "b"), ("3", "c")] {
            registry.register(create_table(v, t)).unwrap();
        }
        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());

        let report = migrator
            .up_to(&mut conn, &sink, &Version::parse("2").unwrap())
            .unwrap();
        assert_eq!(versions(&report.applied), vec!["1", "2"]);
        assert!(!table_exists(&mut conn, "c"));
    }

    #[test]
    fn down_reverts_latest_only() {
        let mut registry = MigrationRegistry::new();
        registry.register(create_table("1", "a")).unwrap();
        registry.register(create_table("2", "b")).unwrap();
        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());
        migrator.up(&mut conn, &sink).unwrap();

        let reverted = migrator.down(&mut conn, &sink).unwrap();
        assert_eq!(reverted.as_ref().map(|v| v.as_str()), Some("2"));
        assert!(!table_exists(&mut conn, "b"));
        assert!(table_exists(&mut conn, "a"));
        assert_eq!(
            migrator.current_version(&mut conn).unwrap().map(|v| v.to_string()),
            Some("1".to_string())
        );
    }

    #[test]
    fn down_on_empty_store_does_nothing() {
        let registry = MigrationRegistry::new();
        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let reverted = Migrator::new(&registry, ledger())
            .down(&mut conn, &sink)
            .unwrap();
        assert!(reverted.is_none());
    }

    #[test]
    fn down_to_reverts_newest_first() {
        let order = Arc::new(AtomicUsize::new(0));
        let mut registry = MigrationRegistry::new();
        registry.register(create_table("1", "a")).unwrap();
        for (version, expected) in [("2", 1), ("3", 0)] {
            let order = Arc::clone(&order);
            registry
                .register(
                    MigrationDefinition::new(
                        version,
                        "tracked",
                        Body::Noop,
                        Body::code(move |_, _| {
                            let seen = order.fetch_add(1, Ordering::SeqCst);
                            assert_eq!(seen, expected);
                            Ok(())
                        }),
                    )
                    .unwrap(),
                )
                .unwrap();
        }

        let sink = MemorySink::new();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());
        migrator.up(&mut conn, &sink).unwrap();

        let reverted = migrator
            .down_to(&mut conn, &sink, &Version::parse("1").unwrap())
            .unwrap();
        assert_eq!(versions(&reverted), vec!["3", "2"]);
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn status_reports_without_writing() {
        let mut registry = MigrationRegistry::new();
        registry.register(create_table("1", "a")).unwrap();
        registry.register(create_table("2", "b")).unwrap();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());

        let status = migrator.status(&mut conn).unwrap();
        assert!(status.applied.is_empty());
        assert_eq!(versions(&status.pending), vec!["1", "2"]);
        assert!(!migrator.ledger().is_bootstrapped(&mut conn).unwrap());

        migrator
            .up_to(&mut conn, &MemorySink::new(), &Version::parse("1").unwrap())
            .unwrap();
        let status = migrator.status(&mut conn).unwrap();
        assert_eq!(status.applied.len(), 1);
        assert_eq!(versions(&status.pending), vec!["2"]);
        assert!(!status.is_up_to_date());
    }

    #[test]
    fn status_lists_unregistered_ledger_rows() {
        let registry = MigrationRegistry::new()
            .with(create_table("1", "a"))
            .unwrap();
        let mut conn = SqliteConnection::in_memory().unwrap();
        let migrator = Migrator::new(&registry, ledger());
        migrator.up(&mut conn, &MemorySink::new()).unwrap();
        migrator
            .ledger()
            .record(&mut conn, &Version::parse("0_legacy").unwrap())
            .unwrap();

        let status = migrator.status(&mut conn).unwrap();
        assert_eq!(versions(&status.unknown), vec!["0_legacy"]);
        assert!(status.is_up_to_date());
    }
}
