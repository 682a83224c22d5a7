use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_common::{Error, Result};

use crate::dialect::validate_identifier;
use crate::executor::{Executor, Value};
use crate::registry::Version;

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub version: Version,
    pub applied_at: DateTime<Utc>,
}

/// Persisted record of applied migration versions.
#[derive(Debug, Clone)]
pub struct VersionLedger {
    table: String,
}

impl VersionLedger {
    /// The name is stored lowercased: unquoted identifiers fold to lowercase
    /// on Postgres, and catalog lookups compare the stored name verbatim.
    pub fn new(table: &str) -> Result<Self> {
        validate_identifier(table)?;
        Ok(Self {
            table: table.to_ascii_lowercase(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the ledger table exists. Only informs log verbosity.
    pub fn is_bootstrapped<E: Executor + ?Sized>(&self, conn: &mut E) -> Result<bool> {
        let sql = conn.sql().table_exists_query();
        let row = conn.query_opt(sql, &[Value::from(self.table.as_str())])?;
        Ok(row.is_some())
    }

    /// Create the ledger table if it is missing.
    pub fn provision<E: Executor + ?Sized>(&self, conn: &mut E) -> Result<()> {
        let ddl = conn.sql().ledger_table_ddl(&self.table);
        conn.execute_batch(&ddl)
            .map_err(|e| Error::Database(format!("failed to provision ledger {}: {e}", self.table)))
    }

    pub fn applied_versions<E: Executor + ?Sized>(&self, conn: &mut E) -> Result<BTreeSet<Version>> {
        Ok(self
            .entries(conn)?
            .into_iter()
            .map(|entry| entry.version)
            .collect())
    }

    /// All entries, ascending by version.
    pub fn entries<E: Executor + ?Sized>(&self, conn: &mut E) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT version, applied_at FROM {} ORDER BY version ASC",
            self.table
        );
        let mut entries = conn
            .query(&sql, &[])?
            .into_iter()
            .map(|row| {
                Ok(LedgerEntry {
                    version: Version::parse(&row.text(0)?)?,
                    applied_at: row.timestamp(1)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        // collation on the server may not match byte order
        entries.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(entries)
    }

    pub fn latest<E: Executor + ?Sized>(&self, conn: &mut E) -> Result<Option<Version>> {
        Ok(self.entries(conn)?.pop().map(|entry| entry.version))
    }

    /// Insert an entry. Must run in the same transaction as the migration body.
    pub fn record<E: Executor + ?Sized>(&self, tx: &mut E, version: &Version) -> Result<()> {
        let sql = tx.sql();
        let stmt = format!(
            "INSERT INTO {} (version, applied_at) VALUES ({}, {})",
            self.table,
            sql.placeholder(1),
            sql.placeholder(2)
        );
        tx.execute(&stmt, &[Value::from(version.as_str()), Value::from(Utc::now())])
            .map_err(|e| Error::Database(format!("failed to record {version}: {e}")))?;
        Ok(())
    }

    /// Delete an entry. Used only by explicit rollback.
    pub fn remove<E: Executor + ?Sized>(&self, tx: &mut E, version: &Version) -> Result<()> {
        let stmt = format!(
            "DELETE FROM {} WHERE version = {}",
            self.table,
            tx.sql().placeholder(1)
        );
        let removed = tx.execute(&stmt, &[Value::from(version.as_str())])?;
        if removed == 0 {
            return Err(Error::Database(format!("{version} is not in the ledger")));
        }
        Ok(())
    }
}
