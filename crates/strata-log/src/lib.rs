//! Structured logging and diagnostics for the Strata server.
//!
//! [`init_logging`] installs the process-wide `tracing` subscriber: console
//! output with uptime timestamps and module paths, an optional JSON file for
//! post-mortem analysis, and `RUST_LOG`-aware filtering.
//!
//! Server components never look up a global logger. They hold a
//! [`Diagnostics`] handle given to them at construction, which forwards to
//! whatever [`DiagnosticSink`] the owner chose ([`TracingSink`] in the binary,
//! [`MemorySink`] in tests).

mod diagnostics;

pub use diagnostics::{
    DiagnosticEntry, DiagnosticSink, Diagnostics, MemorySink, Severity, TracingSink,
};

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor a configured level is available.
pub const DEFAULT_FILTER: &str = "info";

/// File name of the JSON log inside the log directory.
pub const LOG_FILE_NAME: &str = "strata.log";

/// Initialize the tracing subscriber for the server process.
///
/// * `log_dir` - directory for the JSON log file
/// * `file_logging` - whether to write the JSON log file at all
/// * `level` - configured filter string, used when `RUST_LOG` is not set
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
///
/// ```no_run
/// strata_log::init_logging(None, false, "info,strata_net=debug");
/// ```
pub fn init_logging(log_dir: Option<&Path>, file_logging: bool, level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_or_default(level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if file_logging
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        let _ = subscriber.with(file_layer).try_init();
        return;
    }

    let _ = subscriber.try_init();
}

/// Parse a filter string, falling back to [`DEFAULT_FILTER`] when it is
/// empty or unparsable.
pub fn filter_or_default(level: &str) -> EnvFilter {
    if level.trim().is_empty() {
        return EnvFilter::new(DEFAULT_FILTER);
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_level_uses_default() {
        let filter = filter_or_default("  ");
        assert_eq!(format!("{filter}"), DEFAULT_FILTER);
    }

    #[test]
    fn test_subsystem_filter() {
        let filter = filter_or_default("info,strata_net=debug");
        let text = format!("{filter}");
        assert!(text.contains("strata_net=debug"));
        assert!(text.contains("info"));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let filter = filter_or_default("strata_net=notalevel");
        assert_eq!(format!("{filter}"), DEFAULT_FILTER);
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        init_logging(Some(dir.path()), true, "debug");
        init_logging(None, false, "info");
        assert!(dir.path().join(LOG_FILE_NAME).exists());
    }
}
