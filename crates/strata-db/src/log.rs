//! Logging capability consumed by the migration runner.

use std::sync::Mutex;

use tracing::{error, info};

pub trait LogSink: Send + Sync {
    fn info(&self, message: &str);

    fn error(&self, message: &str);

    /// Log and terminate. Never returns.
    fn fatal(&self, message: &str) -> !;
}

/// Forwards to `tracing`; `fatal` exits the process with status 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str) {
        info!(target: "strata::migrate", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "strata::migrate", "{message}");
    }

    fn fatal(&self, message: &str) -> ! {
        error!(target: "strata::migrate", fatal = true, "{message}");
        std::process::exit(1)
    }
}

/// Per-run view of a sink. Informational lines are dropped while `silent`
/// (a fresh install has no ledger yet); errors always pass through.
pub struct RunLog<'a> {
    sink: &'a dyn LogSink,
    silent: bool,
}

impl<'a> RunLog<'a> {
    pub fn new(sink: &'a dyn LogSink, silent: bool) -> Self {
        Self { sink, silent }
    }

    pub fn info(&self, message: &str) {
        if !self.silent {
            self.sink.info(message);
        }
    }

    pub fn error(&self, message: &str) {
        self.sink.error(message);
    }

    pub fn fatal(&self, message: &str) -> ! {
        self.sink.fatal(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
}

/// Records every line in memory. `fatal` records and then panics, so callers
/// can observe it with `catch_unwind`.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<LogLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.level == level)
            .map(|l| l.message)
            .collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages(level).iter().any(|m| m.contains(needle))
    }

    fn push(&self, level: Level, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(LogLine {
                level,
                message: message.to_string(),
            });
        }
    }
}

impl LogSink for MemorySink {
    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }

    fn fatal(&self, message: &str) -> ! {
        self.push(Level::Fatal, message);
        panic!("fatal: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_run_log_drops_info_only() {
        let sink = MemorySink::new();
        let log = RunLog::new(&sink, true);
        log.info("applying 1");
        log.error("boom");

        assert!(sink.messages(Level::Info).is_empty());
        assert_eq!(sink.messages(Level::Error), vec!["boom".to_string()]);
    }

    #[test]
    fn verbose_run_log_forwards_info() {
        let sink = MemorySink::new();
        let log = RunLog::new(&sink, false);
        log.info("applying 1");
        assert!(sink.contains(Level::Info, "applying"));
    }

    #[test]
    fn memory_sink_fatal_records_then_panics() {
        let sink = MemorySink::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            RunLog::new(&sink, true).fatal("cannot continue")
        }));
        assert!(result.is_err());
        assert!(sink.contains(Level::Fatal, "cannot continue"));
    }
}
