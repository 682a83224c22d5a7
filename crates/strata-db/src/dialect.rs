//! SQL dialect selection and the per-backend fragment table.
//!
//! Migration bodies receive a `&dyn SqlFragments` and build their
//! backend-divergent statements from it, so one logical migration serves
//! every supported backend and the version sequence stays single-stranded.

use std::fmt;

use serde::Serialize;
use strata_common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Resolve the configured driver name. Unknown names are fatal at startup.
    pub fn for_driver(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite3" | "sqlite" => Ok(Dialect::Sqlite),
            "pgx" | "postgres" | "postgresql" => Ok(Dialect::Postgres),
            _ => Err(Error::UnsupportedDialect(name.to_string())),
        }
    }

    pub fn sql(self) -> &'static dyn SqlFragments {
        match self {
            Dialect::Sqlite => &SqliteFragments,
            Dialect::Postgres => &PostgresFragments,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => f.write_str("sqlite"),
            Dialect::Postgres => f.write_str("postgres"),
        }
    }
}

/// Backend-divergent SQL text.
pub trait SqlFragments: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Positional parameter marker, 1-based.
    fn placeholder(&self, n: usize) -> String;

    /// Query returning a row when the table named by parameter 1 exists.
    fn table_exists_query(&self) -> &'static str;

    fn ledger_table_ddl(&self, table: &str) -> String;

    /// Column type used for JSON documents.
    fn json_column_type(&self) -> &'static str;

    /// Aggregate building a JSON object from grouped `key`/`value` pairs.
    fn json_object_agg(&self, key: &str, value: &str) -> String;

    /// Wrap a JSON expression so it compares by value against a literal.
    fn json_comparable(&self, expr: &str) -> String;

    /// Query returning a single 0/1 row with the current referential-integrity
    /// state, or `None` when the backend never needs toggling.
    fn integrity_state_query(&self) -> Option<&'static str>;

    /// Statement switching referential-integrity enforcement.
    fn integrity_toggle(&self, enabled: bool) -> Option<&'static str>;

    fn add_column(&self, table: &str, column: &str, decl: &str) -> String {
        format!("ALTER TABLE {table} ADD COLUMN {column} {decl}")
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {table} DROP COLUMN {column}")
    }
}

pub struct SqliteFragments;

impl SqlFragments for SqliteFragments {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn placeholder(&self, n: usize) -> String {
        format!("?{n}")
    }

    fn table_exists_query(&self) -> &'static str {
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1"
    }

    fn ledger_table_ddl(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL
            )"
        )
    }

    fn json_column_type(&self) -> &'static str {
        "JSONB"
    }

    fn json_object_agg(&self, key: &str, value: &str) -> String {
        format!("json_group_object({key}, {value})")
    }

    fn json_comparable(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn integrity_state_query(&self) -> Option<&'static str> {
        Some("PRAGMA foreign_keys")
    }

    fn integrity_toggle(&self, enabled: bool) -> Option<&'static str> {
        if enabled {
            Some("PRAGMA foreign_keys=on")
        } else {
            Some("PRAGMA foreign_keys=off")
        }
    }
}

pub struct PostgresFragments;

impl SqlFragments for PostgresFragments {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn table_exists_query(&self) -> &'static str {
        "SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1::text"
    }

    fn ledger_table_ddl(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                version TEXT PRIMARY KEY NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL
            )"
        )
    }

    fn json_column_type(&self) -> &'static str {
        "JSONB"
    }

    fn json_object_agg(&self, key: &str, value: &str) -> String {
        format!("json_object_agg({key}, {value})")
    }

    fn json_comparable(&self, expr: &str) -> String {
        format!("to_jsonb({expr})")
    }

    fn integrity_state_query(&self) -> Option<&'static str> {
        None
    }

    fn integrity_toggle(&self, _enabled: bool) -> Option<&'static str> {
        None
    }
}

/// Check that `name` can be spliced into SQL as a bare identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid SQL identifier: {name:?}")))
    }
}
