//! Database capability contract.
//!
//! The core never assumes a concrete SQL driver. A handler reaches the
//! database strictly through this trait, looked up lazily off
//! [`crate::capability::AppAdapters`] via [`crate::context::Context::db`].

use std::fmt;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Isolation level for a transaction, as requested by the caller.
///
/// The concrete driver is free to map these onto whatever its backend
/// actually supports; the contract only promises the caller's *intent* is
/// carried through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Driver default isolation level.
    #[default]
    Default,
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable.
    Serializable,
}

/// Options passed to [`Database::begin`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    /// Requested isolation level.
    pub isolation: IsolationLevel,
    /// Whether the transaction only reads.
    pub read_only: bool,
}

/// The result of an `exec` call: rows affected plus an optional
/// driver-assigned identifier (e.g. an autoincrement primary key).
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Number of rows the statement touched.
    pub rows_affected: u64,
    /// Identifier the driver assigned to the inserted row, if any.
    pub last_insert_id: Option<i64>,
}

/// A single row, represented as a JSON object. Concrete drivers map their
/// native row representation onto this before returning it across the
/// contract boundary, keeping the core itself driver-agnostic.
pub type Row = JsonValue;

/// Errors a [`Database`] or [`Transaction`] implementation can surface.
#[derive(Debug)]
pub enum DatabaseError {
    /// The connection could not be established or was lost.
    Connection(String),
    /// The statement was rejected by the backend.
    Query(String),
    /// A transaction could not be committed or rolled back.
    Transaction(String),
    /// Any other failure.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::Connection(msg) => write!(f, "database connection error: {msg}"),
            DatabaseError::Query(msg) => write!(f, "database query error: {msg}"),
            DatabaseError::Transaction(msg) => write!(f, "database transaction error: {msg}"),
            DatabaseError::Other(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatabaseError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// An open transaction obtained from [`Database::begin`].
///
/// Consumed by [`Transaction::commit`] or [`Transaction::rollback`]; if
/// dropped without either, the concrete driver decides the fallback
/// behavior (typically rollback), mirroring ordinary SQL driver semantics.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a statement that does not return rows.
    async fn exec(&self, statement: &str, params: &[JsonValue]) -> Result<ExecResult, DatabaseError>;

    /// Execute a statement and return all matching rows.
    async fn query(&self, statement: &str, params: &[JsonValue]) -> Result<Vec<Row>, DatabaseError>;

    /// Execute a statement and return at most one row.
    async fn query_row(
        &self,
        statement: &str,
        params: &[JsonValue],
    ) -> Result<Option<Row>, DatabaseError>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    /// Roll the transaction back.
    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// The database capability contract.
#[async_trait]
pub trait Database: Send + Sync {
    /// Begin a transaction with the given options.
    async fn begin(
        &self,
        options: TransactionOptions,
    ) -> Result<Box<dyn Transaction>, DatabaseError>;

    /// Execute a statement outside of any transaction.
    async fn exec(&self, statement: &str, params: &[JsonValue]) -> Result<ExecResult, DatabaseError>;

    /// Query for all matching rows outside of any transaction.
    async fn query(&self, statement: &str, params: &[JsonValue]) -> Result<Vec<Row>, DatabaseError>;

    /// Query for at most one row outside of any transaction.
    async fn query_row(
        &self,
        statement: &str,
        params: &[JsonValue],
    ) -> Result<Option<Row>, DatabaseError>;

    /// Release any pooled connections. Idempotent.
    async fn close(&self) -> Result<(), DatabaseError>;
}
