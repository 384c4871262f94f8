//! A [`Logger`] that discards everything it's given.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::logger::{Fields, LogLevel, Logger};

/// A logger that drops every line. Useful wherever a `Logger` is required
/// by a signature but the test doesn't care what's logged.
#[derive(Debug, Default, Clone)]
pub struct NullLogger;

impl NullLogger {
    /// A new `NullLogger`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Logger for NullLogger {
    fn log_fields(&self, _level: LogLevel, _message: &str, _fields: &Fields) {}

    fn named(&self, _name: &str) -> Arc<dyn Logger> {
        Arc::new(Self)
    }

    fn with_error(&self, _err: &(dyn std::error::Error + Send + Sync)) -> Arc<dyn Logger> {
        Arc::new(Self)
    }
}
