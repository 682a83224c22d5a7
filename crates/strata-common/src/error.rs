use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unsupported database driver: {0}")]
    UnsupportedDialect(String),

    #[error("duplicate migration version: {0}")]
    DuplicateVersion(String),

    #[error("invalid migration: {0}")]
    InvalidMigration(String),

    #[error("migration {pending} is older than applied version {applied}")]
    OutOfOrder { pending: String, applied: String },

    #[error("migration {version} failed: {message}")]
    Migration { version: String, message: String },

    #[error("integrity toggle failed: {0}")]
    IntegrityToggle(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("database handle is not initialized")]
    NotInitialized,

    #[error("database handle is closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a failure raised while applying or rolling back `version`.
    pub fn migration(version: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Error::Migration {
            version: version.into(),
            message: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::UnsupportedDialect("mysql".into());
        assert_eq!(e.to_string(), "unsupported database driver: mysql");

        let e = Error::DuplicateVersion("20200101000000".into());
        assert_eq!(e.to_string(), "duplicate migration version: 20200101000000");

        let e = Error::Other("misc".into());
        assert_eq!(e.to_string(), "misc");
    }

    #[test]
    fn migration_error_names_version() {
        let e = Error::migration("20231208182311", "no such table: album");
        assert_eq!(
            e.to_string(),
            "migration 20231208182311 failed: no such table: album"
        );
    }

    #[test]
    fn out_of_order_names_both_versions() {
        let e = Error::OutOfOrder {
            pending: "2".into(),
            applied: "3".into(),
        };
        assert_eq!(e.to_string(), "migration 2 is older than applied version 3");
    }
}
