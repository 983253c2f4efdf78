//! Diagnostics sink shared by the tracked allocator and the exception engine.
//!
//! Provides:
//! - [`Severity`]: ordered severity levels with a configurable threshold.
//! - [`DiagnosticRecord`]: one structured event, serializable as JSONL.
//! - [`DiagnosticSink`]: the trait every output backend implements.
//! - [`StderrSink`], [`JsonlSink`], [`MemorySink`]: stock backends.
//! - [`Diagnostics`]: a sink paired with its threshold, plus the fatal path.

use std::io::{IsTerminal, Write};
use std::panic::Location;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, LogFormat, RuntimeConfig, config_load_error, runtime_config};

/// Exit status used by every fatal path.
pub const FATAL_EXIT_CODE: i32 = 134;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Severity of a diagnostic record, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    /// Successful completion of a notable step.
    Done,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "done" | "ok" => Some(Self::Done),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "err" => Some(Self::Error),
            "fatal" | "assert" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Prefix printed in front of text-mode lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug: ",
            Self::Info => "info: ",
            Self::Done => "done: ",
            Self::Warn => "warning: ",
            Self::Error => "error: ",
            Self::Fatal => "fatal: ",
        }
    }

    const fn color(self) -> &'static str {
        match self {
            Self::Debug => "\x1b[34m",
            Self::Info => "\x1b[36m",
            Self::Done => "\x1b[32m",
            Self::Warn => "\x1b[33m",
            Self::Error | Self::Fatal => "\x1b[31m",
        }
    }
}

/// One diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    /// Machine-readable event name (`untracked_release`, `cache_full`, ...).
    pub event: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl DiagnosticRecord {
    #[must_use]
    pub fn new(severity: Severity, event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            event: event.into(),
            message: message.into(),
            file: None,
            line: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: &Location<'_>) -> Self {
        self.file = Some(location.file().to_string());
        self.line = Some(location.line());
        self
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Render as ` warning:  > message`, optionally with ANSI colors.
    #[must_use]
    pub fn render_text(&self, color: bool) -> String {
        let body = match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("Failed line {line}, in {file}: {}", self.message),
            _ => self.message.clone(),
        };
        if color {
            format!(
                "\x1b[1m{}{:>10}\x1b[0m\x1b[22m > {body}",
                self.severity.color(),
                self.severity.label()
            )
        } else {
            format!("{:>10} > {body}", self.severity.label())
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Output backend for diagnostic records.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, record: &DiagnosticRecord);
}

/// Text lines on standard error. Colored when stderr is a terminal.
#[derive(Debug, Clone, Copy)]
pub struct StderrSink {
    color: bool,
}

impl StderrSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            color: std::io::stderr().is_terminal(),
        }
    }

    #[must_use]
    pub const fn with_color(color: bool) -> Self {
        Self { color }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for StderrSink {
    fn emit(&self, record: &DiagnosticRecord) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", record.render_text(self.color));
    }
}

/// JSON lines on an arbitrary writer.
pub struct JsonlSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlSink<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Borrow the underlying writer.
    pub fn writer(&self) -> MutexGuard<'_, W> {
        self.writer.lock()
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> DiagnosticSink for JsonlSink<W> {
    fn emit(&self, record: &DiagnosticRecord) {
        let Ok(line) = record.to_jsonl() else {
            return;
        };
        let mut writer = self.writer.lock();
        let _ = writeln!(writer, "{line}");
        let _ = writer.flush();
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records.lock().clone()
    }

    /// Event names in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }

    /// Drain the captured records.
    pub fn take(&self) -> Vec<DiagnosticRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, record: &DiagnosticRecord) {
        self.records.lock().push(record.clone());
    }
}

// ---------------------------------------------------------------------------
// Front end
// ---------------------------------------------------------------------------

/// A sink paired with a severity threshold.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    threshold: Severity,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Diagnostics {
    #[must_use]
    pub fn new(sink: Arc<dyn DiagnosticSink>, threshold: Severity) -> Self {
        Self { sink, threshold }
    }

    /// Text diagnostics on standard error.
    #[must_use]
    pub fn stderr(threshold: Severity) -> Self {
        Self::new(Arc::new(StderrSink::new()), threshold)
    }

    /// Build the sink selected by `config`.
    #[must_use]
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let sink: Arc<dyn DiagnosticSink> = match config.log_format {
            LogFormat::Text => Arc::new(StderrSink::new()),
            LogFormat::Jsonl => Arc::new(JsonlSink::new(std::io::stderr())),
        };
        Self::new(sink, config.threshold)
    }

    #[must_use]
    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    /// Fatal records bypass the threshold.
    #[must_use]
    pub fn enabled(&self, severity: Severity) -> bool {
        severity == Severity::Fatal || severity >= self.threshold
    }

    pub fn emit(&self, record: DiagnosticRecord) {
        if self.enabled(record.severity) {
            self.sink.emit(&record);
        }
    }

    pub fn log(&self, severity: Severity, event: &str, message: impl Into<String>) {
        if self.enabled(severity) {
            self.sink
                .emit(&DiagnosticRecord::new(severity, event, message));
        }
    }

    pub fn debug(&self, event: &str, message: impl Into<String>) {
        self.log(Severity::Debug, event, message);
    }

    /// Debug record whose message is only built when debug output is on.
    pub fn debug_with<F>(&self, event: &str, message: F)
    where
        F: FnOnce() -> String,
    {
        if self.enabled(Severity::Debug) {
            self.sink
                .emit(&DiagnosticRecord::new(Severity::Debug, event, message()));
        }
    }

    pub fn info(&self, event: &str, message: impl Into<String>) {
        self.log(Severity::Info, event, message);
    }

    pub fn done(&self, event: &str, message: impl Into<String>) {
        self.log(Severity::Done, event, message);
    }

    pub fn warn(&self, event: &str, message: impl Into<String>) {
        self.log(Severity::Warn, event, message);
    }

    pub fn error(&self, event: &str, message: impl Into<String>) {
        self.log(Severity::Error, event, message);
    }

    /// Report an environment that failed to parse and was replaced by
    /// defaults.
    pub fn config_invalid(&self, err: &ConfigError) {
        self.warn(
            "config_invalid",
            format!("ignoring invalid environment, using defaults: {err}"),
        );
    }

    /// Emit a fatal record tagged with the caller's location and terminate
    /// the process with [`FATAL_EXIT_CODE`].
    #[track_caller]
    pub fn fatal(&self, event: &str, message: impl Into<String>) -> ! {
        self.fatal_at(Location::caller(), event, message)
    }

    /// Like [`Diagnostics::fatal`] with an explicit location.
    pub fn fatal_at(&self, location: &Location<'_>, event: &str, message: impl Into<String>) -> ! {
        self.sink.emit(
            &DiagnosticRecord::new(Severity::Fatal, event, message).with_location(location),
        );
        std::process::exit(FATAL_EXIT_CODE)
    }
}

static GLOBAL_DIAGNOSTICS: OnceLock<RwLock<Diagnostics>> = OnceLock::new();

fn global_slot() -> &'static RwLock<Diagnostics> {
    GLOBAL_DIAGNOSTICS.get_or_init(|| {
        let diagnostics = Diagnostics::from_config(runtime_config());
        if let Some(err) = config_load_error() {
            diagnostics.config_invalid(err);
        }
        RwLock::new(diagnostics)
    })
}

/// The process-wide diagnostics front end.
#[must_use]
pub fn diagnostics() -> Diagnostics {
    global_slot().read().clone()
}

/// Replace the process-wide diagnostics, returning the previous one.
pub fn set_diagnostics(diagnostics: Diagnostics) -> Diagnostics {
    std::mem::replace(&mut *global_slot().write(), diagnostics)
}
