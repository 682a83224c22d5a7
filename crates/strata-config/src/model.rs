use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DRIVER: &str = "sqlite3";
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Driver name: `sqlite3`/`sqlite` or `pgx`/`postgres`/`postgresql`.
    pub driver: String,
    /// File path for SQLite, connection string for Postgres.
    pub path: String,
    pub ledger_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            path: default_db_path().to_string_lossy().into_owned(),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// `~/.strata/data/strata.db`, falling back to the working directory when no
/// home directory is known.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".strata")
        .join("data")
        .join("strata.db")
}
