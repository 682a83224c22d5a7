use std::path::{Path, PathBuf};

use strata_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const ENV_DRIVER: &str = "STRATA_DB_DRIVER";
pub const ENV_PATH: &str = "STRATA_DB_PATH";
pub const ENV_LEDGER_TABLE: &str = "STRATA_DB_LEDGER_TABLE";

/// Reads `AppConfig` from a YAML or TOML file and applies environment
/// overrides on top.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `~/.strata/config.yml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".strata")
            .join("config.yml")
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied in both cases.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let mut config = if path.exists() {
            info!("loading config from {}", path.display());
            Self::parse_file(path)?
        } else {
            debug!("no config at {}, using defaults", path.display());
            AppConfig::default()
        };
        Self::apply_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Apply `STRATA_DB_*` overrides. `lookup` is injected so tests do not
    /// have to touch the process environment.
    pub fn apply_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(driver) = non_empty(ENV_DRIVER) {
            config.database.driver = driver;
        }
        if let Some(path) = non_empty(ENV_PATH) {
            config.database.path = path;
        }
        if let Some(table) = non_empty(ENV_LEDGER_TABLE) {
            config.database.ledger_table = table;
        }
    }
}
