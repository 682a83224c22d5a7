//! Parsing of SQL migration scripts with annotated Up/Down sections.
//!
//! ```sql
//! -- +migrate Up
//! CREATE TABLE album (id TEXT PRIMARY KEY);
//!
//! -- +migrate Down
//! DROP TABLE album;
//! ```
//!
//! `-- +goose Up` / `-- +goose Down` markers are accepted as well.
//! `StatementBegin` / `StatementEnd` markers are dropped; each section runs as
//! one batch.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("missing Up section")]
    MissingUp,

    #[error("duplicate {0} section")]
    DuplicateSection(&'static str),

    #[error("statement outside of an Up or Down section on line {0}")]
    OrphanStatement(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlScript {
    pub up: String,
    pub down: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

enum Marker {
    Up,
    Down,
    Ignored,
}

fn marker(line: &str) -> Option<Marker> {
    let rest = line.trim().strip_prefix("--")?.trim_start();
    let directive = rest
        .strip_prefix("+migrate")
        .or_else(|| rest.strip_prefix("+goose"))?
        .trim()
        .to_ascii_lowercase();
    match directive.split_whitespace().next() {
        Some("up") => Some(Marker::Up),
        Some("down") => Some(Marker::Down),
        _ => Some(Marker::Ignored),
    }
}

impl SqlScript {
    pub fn parse(content: &str) -> Result<Self, ScriptError> {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = Section::Preamble;
        let mut seen_up = false;
        let mut seen_down = false;

        for (idx, line) in content.lines().enumerate() {
            match marker(line) {
                Some(Marker::Up) => {
                    if seen_up {
                        return Err(ScriptError::DuplicateSection("Up"));
                    }
                    seen_up = true;
                    section = Section::Up;
                    continue;
                }
                Some(Marker::Down) => {
                    if seen_down {
                        return Err(ScriptError::DuplicateSection("Down"));
                    }
                    seen_down = true;
                    section = Section::Down;
                    continue;
                }
                Some(Marker::Ignored) => continue,
                None => {}
            }

            let trimmed = line.trim();
            match section {
                Section::Up => up.push(line),
                Section::Down => down.push(line),
                Section::Preamble if trimmed.is_empty() || trimmed.starts_with("--") => {}
                Section::Preamble => return Err(ScriptError::OrphanStatement(idx + 1)),
            }
        }

        if !seen_up {
            return Err(ScriptError::MissingUp);
        }

        Ok(Self {
            up: up.join("\n").trim().to_string(),
            down: down.join("\n").trim().to_string(),
        })
    }
}
