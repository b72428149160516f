//! Injected diagnostic sink.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Severity of a diagnostic entry, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    /// The process can't continue with the current operation (e.g. server start).
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Append-only destination for diagnostics.
///
/// Implementations must be usable from any thread.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, component: &str, severity: Severity, message: &str);
}

/// Forwards every entry to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, component: &str, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!(component, "{message}"),
            Severity::Info => tracing::info!(component, "{message}"),
            Severity::Warning => tracing::warn!(component, "{message}"),
            Severity::Error => tracing::error!(component, "{message}"),
            Severity::Fatal => tracing::error!(component, fatal = true, "{message}"),
        }
    }
}

/// One recorded entry in a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub component: String,
    pub severity: Severity,
    pub message: String,
}

/// Keeps entries in memory so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<DiagnosticEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.lock().clone()
    }

    /// Number of entries with the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    /// Whether an entry with `severity` contains `needle` in its message.
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.lock()
            .iter()
            .any(|e| e.severity == severity && e.message.contains(needle))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DiagnosticEntry>> {
        // A panicking test thread must not hide entries from the others.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, component: &str, severity: Severity, message: &str) {
        self.lock().push(DiagnosticEntry {
            component: component.to_string(),
            severity,
            message: message.to_string(),
        });
    }
}

/// Cloneable handle to a diagnostic sink, tagged with the owning component.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    component: &'static str,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticSink>, component: &'static str) -> Self {
        Self { sink, component }
    }

    /// Handle that forwards to `tracing`.
    pub fn tracing(component: &'static str) -> Self {
        Self::new(Arc::new(TracingSink), component)
    }

    /// Handle backed by a fresh [`MemorySink`], returned alongside it.
    pub fn memory(component: &'static str) -> (Self, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Self::new(sink.clone(), component), sink)
    }

    /// Same sink, different component tag.
    pub fn scoped(&self, component: &'static str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            component,
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn log(&self, severity: Severity, message: impl fmt::Display) {
        self.sink
            .record(self.component, severity, &message.to_string());
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Severity::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Severity::Info, message);
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Severity::Error, message);
    }

    pub fn fatal(&self, message: impl fmt::Display) {
        self.log(Severity::Fatal, message);
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}
