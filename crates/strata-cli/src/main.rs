mod logging;
mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strata_config::{ConfigLoader, DatabaseConfig};
use strata_db::{
    Database, LogSink, MigrationRegistry, RunReport, TracingSink, Version, catalog,
};
use tracing::debug;

#[derive(Parser)]
#[command(name = "strata", version)]
#[command(about = "Versioned schema migrations for SQLite and Postgres stores")]
struct Cli {
    /// Config file (.yml, .yaml or .toml)
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Directory of additional `<version>_<name>.sql` migrations
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply, roll back or inspect migrations
    Migrate {
        #[command(subcommand)]
        command: MigrateCommand,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum MigrateCommand {
    /// Apply every pending migration
    Up,
    /// Apply pending migrations up to and including VERSION
    UpTo { version: String },
    /// Roll back the most recently applied migration
    Down,
    /// Roll back every migration newer than VERSION
    DownTo { version: String },
    /// Show applied and pending migrations
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the current schema version
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(ConfigLoader::default_path);
    let config = ConfigLoader::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    logging::init(&config.log, cli.json_logs)?;
    debug!("using config {}", config_path.display());

    let registry = build_registry(cli.migrations_dir.as_deref())?;

    match cli.command {
        Commands::Migrate { command } => {
            let out = migrate(&command, &config.database, &registry, &TracingSink)?;
            if !out.is_empty() {
                println!("{out}");
            }
        }
    }
    Ok(())
}

/// Built-in catalog migrations plus any script migrations in `dir`.
fn build_registry(dir: Option<&Path>) -> Result<MigrationRegistry> {
    let mut registry = catalog::registry().context("failed to build migration registry")?;
    if let Some(dir) = dir {
        let loaded = registry
            .load_dir(dir)
            .with_context(|| format!("failed to load migrations from {}", dir.display()))?;
        debug!("loaded {loaded} script migrations");
    }
    Ok(registry)
}

/// Run one migrate subcommand and return what should be printed.
fn migrate(
    command: &MigrateCommand,
    config: &DatabaseConfig,
    registry: &MigrationRegistry,
    sink: &dyn LogSink,
) -> Result<String> {
    // `up` is the regular startup path through the process-wide handle
    if *command == MigrateCommand::Up {
        let (db, startup) = strata_db::try_init_with_report(config, registry, sink)?;
        let result = run_on(&db, command, registry, sink, startup);
        strata_db::close().context("failed to close database")?;
        return result;
    }

    let db = Database::open(config).context("failed to open database")?;
    let result = run_on(&db, command, registry, sink, None);
    db.close().context("failed to close database")?;
    result
}

/// `startup` is the report of a run that already happened while opening the
/// store; `up` renders it instead of migrating again.
fn run_on(
    db: &Database,
    command: &MigrateCommand,
    registry: &MigrationRegistry,
    sink: &dyn LogSink,
    startup: Option<RunReport>,
) -> Result<String> {
    let migrator = db.migrator(registry);
    let out = match command {
        MigrateCommand::Up => {
            let report = match startup {
                Some(report) => report,
                None => db.migrate(registry, sink)?,
            };
            output::up_to_date(&report, db.current_version()?.as_ref())
        }
        MigrateCommand::UpTo { version } => {
            let target = parse_version(version)?;
            let report = db.with_connection(|conn| migrator.up_to(conn, sink, &target))?;
            output::run_report(&report)
        }
        MigrateCommand::Down => {
            let reverted = db.with_connection(|conn| migrator.down(conn, sink))?;
            output::rolled_back(reverted.as_slice())
        }
        MigrateCommand::DownTo { version } => {
            let target = parse_version(version)?;
            let reverted = db.with_connection(|conn| migrator.down_to(conn, sink, &target))?;
            output::rolled_back(&reverted)
        }
        MigrateCommand::Status { json } => {
            let status = db.status(registry)?;
            if *json {
                serde_json::to_string_pretty(&status)?
            } else {
                output::status_table(&status, registry)
            }
        }
        MigrateCommand::Version => output::current_version(db.current_version()?.as_ref()),
    };
    Ok(out)
}

fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw).with_context(|| format!("invalid target version {raw:?}"))
}
