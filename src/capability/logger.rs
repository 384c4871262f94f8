//! Logger capability contract.
//!
//! This is the contract *handler code* reaches through
//! [`crate::context::Context::logger`]. The framework's own internal
//! diagnostics (route registration, circuit transitions, shutdown phases)
//! go straight through `tracing`, independent of whatever `Logger` the
//! caller wires up here — see `DESIGN.md`.

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;

/// Severity of a log line, ordered least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained diagnostic detail.
    Debug,
    /// Routine operational information.
    Info,
    /// Unexpected but recoverable condition.
    Warn,
    /// Operation failed.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Structured key-value fields attached to a log line.
pub type Fields = BTreeMap<String, String>;

/// The logger capability contract.
///
/// Implementations are expected to be cheap to clone (`Arc`-backed) since
/// [`Logger::with_fields`] and [`Logger::named`] both return a fresh
/// `Arc<dyn Logger>` rather than mutating in place.
#[async_trait]
pub trait Logger: Send + Sync {
    /// Emit a message at the given level with no extra structured fields.
    fn log(&self, level: LogLevel, message: &str) {
        self.log_fields(level, message, &Fields::new());
    }

    /// Emit a message at the given level carrying structured fields.
    fn log_fields(&self, level: LogLevel, message: &str, fields: &Fields);

    /// Extract a trace/request id from an inbound carrier (e.g. an HTTP
    /// header map or broker message headers) so subsequent log lines on
    /// this logger correlate with it. Returns `None` when no id is
    /// present.
    fn extract_trace_id(&self, carrier: &Fields) -> Option<String> {
        carrier.get("trace-id").or_else(|| carrier.get("x-trace-id")).cloned()
    }

    /// A sub-logger whose lines are additionally tagged with `name`
    /// (e.g. `logger.named("db").log(...)`).
    fn named(&self, name: &str) -> std::sync::Arc<dyn Logger>;

    /// A sub-logger that binds `err` into every subsequent line's fields
    /// until it, too, is replaced.
    fn with_error(&self, err: &(dyn std::error::Error + Send + Sync)) -> std::sync::Arc<dyn Logger>;

    /// Flush any buffered output. Best-effort.
    async fn sync(&self) {}
}

/// Convenience helpers layered over [`Logger::log_fields`].
pub trait LoggerExt: Logger {
    /// Log at [`LogLevel::Debug`].
    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }
    /// Log at [`LogLevel::Info`].
    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }
    /// Log at [`LogLevel::Warn`].
    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }
    /// Log at [`LogLevel::Error`].
    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl<L: Logger + ?Sized> LoggerExt for L {}
