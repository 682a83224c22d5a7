//! Plain-text rendering of migration results.

use strata_db::{MigrationRegistry, MigrationStatus, RunReport, Version};

pub fn current_version(version: Option<&Version>) -> String {
    version.map_or_else(|| "none".to_string(), Version::to_string)
}

pub fn run_report(report: &RunReport) -> String {
    if report.applied.is_empty() {
        return "no migrations to apply".to_string();
    }
    let mut lines: Vec<String> = report
        .applied
        .iter()
        .map(|version| format!("applied     {version}"))
        .collect();
    lines.push(format!(
        "{} applied in {:.2?}",
        report.applied.len(),
        report.elapsed
    ));
    lines.join("\n")
}

pub fn up_to_date(report: &RunReport, version: Option<&Version>) -> String {
    let mut out = String::new();
    if !report.applied.is_empty() {
        out.push_str(&run_report(report));
        out.push('\n');
    }
    out.push_str(&format!("database is at version {}", current_version(version)));
    out
}

pub fn rolled_back(versions: &[Version]) -> String {
    if versions.is_empty() {
        return "no migrations to roll back".to_string();
    }
    versions
        .iter()
        .map(|version| format!("rolled back {version}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per known migration, oldest first, followed by any ledger rows
/// without a registered definition.
pub fn status_table(status: &MigrationStatus, registry: &MigrationRegistry) -> String {
    let mut lines = vec![format!("{:<8} {:<26} migration", "state", "applied at")];

    for def in registry.iter() {
        let applied = status.applied.iter().find(|e| e.version == def.version);
        let (state, at) = match applied {
            Some(entry) => (
                "applied",
                entry.applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ),
            None => ("pending", "-".to_string()),
        };
        lines.push(format!("{state:<8} {at:<26} {}", def.source_name()));
    }
    for version in &status.unknown {
        lines.push(format!("{:<8} {:<26} {version}", "unknown", "-"));
    }
    lines.join("\n")
}
