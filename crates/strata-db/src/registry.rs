//! Migration definitions and the version-ordered registry that owns them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use strata_common::{Error, Result};
use tracing::debug;

use crate::dialect::SqlFragments;
use crate::executor::Transaction;
use crate::script::SqlScript;

/// Migration identifier. Ordered as text, so fixed-width timestamps such as
/// `20231208182311` sort in application order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(String);

impl Version {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidMigration("empty version".into()));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidMigration(format!(
                "version {raw:?} may only contain ASCII letters, digits and '_'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Procedure run inside the migration transaction.
pub type MigrationFn =
    dyn Fn(&mut dyn Transaction, &dyn SqlFragments) -> Result<()> + Send + Sync;

/// One direction of a migration.
#[derive(Clone)]
pub enum Body {
    Code(Arc<MigrationFn>),
    Sql(String),
    /// Deliberately does nothing.
    Noop,
}

impl Body {
    pub fn code<F>(f: F) -> Self
    where
        F: Fn(&mut dyn Transaction, &dyn SqlFragments) -> Result<()> + Send + Sync + 'static,
    {
        Body::Code(Arc::new(f))
    }

    pub fn run(&self, tx: &mut dyn Transaction, sql: &dyn SqlFragments) -> Result<()> {
        match self {
            Body::Code(f) => f(tx, sql),
            Body::Sql(script) if script.trim().is_empty() => Ok(()),
            Body::Sql(script) => tx.execute_batch(script),
            Body::Noop => Ok(()),
        }
    }

    pub fn is_noop(&self) -> bool {
        match self {
            Body::Noop => true,
            Body::Sql(script) => script.trim().is_empty(),
            Body::Code(_) => false,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Code(_) => f.write_str("Body::Code(..)"),
            Body::Sql(script) => f.debug_tuple("Body::Sql").field(script).finish(),
            Body::Noop => f.write_str("Body::Noop"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationDefinition {
    pub version: Version,
    pub name: String,
    pub up: Body,
    pub down: Body,
}

impl MigrationDefinition {
    pub fn new(version: &str, name: &str, up: Body, down: Body) -> Result<Self> {
        Ok(Self {
            version: Version::parse(version)?,
            name: name.to_string(),
            up,
            down,
        })
    }

    /// Migration written as a script with `-- +migrate Up` / `-- +migrate Down`
    /// sections.
    pub fn from_script(version: &str, name: &str, script: &str) -> Result<Self> {
        let parsed = SqlScript::parse(script)
            .map_err(|e| Error::InvalidMigration(format!("{version}_{name}: {e}")))?;
        Self::new(version, name, Body::Sql(parsed.up), Body::Sql(parsed.down))
    }

    /// `{version}_{name}`, the identity the migration is known by on disk.
    pub fn source_name(&self) -> String {
        if self.name.is_empty() {
            self.version.to_string()
        } else {
            format!("{}_{}", self.version, self.name)
        }
    }
}

/// The complete, deduplicated, version-ordered migration set.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<Version, MigrationDefinition>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: MigrationDefinition) -> Result<()> {
        if self.migrations.contains_key(&def.version) {
            return Err(Error::DuplicateVersion(def.version.to_string()));
        }
        debug!("registered migration {}", def.source_name());
        self.migrations.insert(def.version.clone(), def);
        Ok(())
    }

    /// Builder form of `register`.
    pub fn with(mut self, def: MigrationDefinition) -> Result<Self> {
        self.register(def)?;
        Ok(self)
    }

    pub fn register_script(&mut self, version: &str, name: &str, script: &str) -> Result<()> {
        self.register(MigrationDefinition::from_script(version, name, script)?)
    }

    /// Register every `<version>_<name>.sql` file in `dir`. Other files are
    /// ignored.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "sql") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    Error::InvalidMigration(format!("invalid file name: {}", path.display()))
                })?;
            let (version, name) = stem.split_once('_').unwrap_or((stem, ""));
            let script = std::fs::read_to_string(&path)?;
            self.register_script(version, name, &script)?;
            loaded += 1;
        }
        debug!("loaded {loaded} migration scripts from {}", dir.display());
        Ok(loaded)
    }

    pub fn get(&self, version: &Version) -> Option<&MigrationDefinition> {
        self.migrations.get(version)
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.migrations.contains_key(version)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// All definitions, ascending by version.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationDefinition> {
        self.migrations.values()
    }

    pub fn versions(&self) -> Vec<Version> {
        self.migrations.keys().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Version> {
        self.migrations.keys().next_back()
    }

    /// Definitions not in `applied`, ascending by version.
    pub fn ordered_pending(&self, applied: &BTreeSet<Version>) -> Vec<&MigrationDefinition> {
        self.migrations
            .values()
            .filter(|def| !applied.contains(&def.version))
            .collect()
    }
}
