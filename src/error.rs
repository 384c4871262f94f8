//! Framework-wide error taxonomy.
//!
//! Every error the core can surface to a trigger adapter implements
//! [`std::error::Error`] and exposes [`DispatchError::status_code`] for the
//! HTTP translation step. Handler code returns [`HandlerError`]; adapters
//! translate it (and their own transport-level failures) into whatever the
//! trigger requires.

use std::fmt;

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path to the offending field.
    pub field: String,
    /// Human-readable description of what is wrong.
    pub message: String,
}

impl Violation {
    /// Create a new violation.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The closed taxonomy of errors a handler or adapter can raise.
#[derive(Debug)]
pub enum DispatchError {
    /// The request payload failed structural validation.
    Validation(Vec<Violation>),
    /// The requested route, topic, or resource does not exist.
    NotFound(String),
    /// The caller has no valid credentials.
    Unauthorized(String),
    /// The caller is authenticated but lacks permission.
    Forbidden(String),
    /// A failure the caller should retry (e.g. a flaky downstream call).
    Transient(Box<dyn std::error::Error + Send + Sync>),
    /// The circuit protecting this call is open.
    CircuitOpen {
        /// Name of the circuit.
        circuit: String,
    },
    /// Too many concurrent requests were admitted to a half-open circuit.
    TooManyRequests {
        /// Name of the circuit.
        circuit: String,
    },
    /// A bulkhead's concurrency limit was reached and the acquire timed out.
    BulkheadFull {
        /// Name of the bulkhead.
        bulkhead: String,
    },
    /// An operation exceeded its deadline.
    Timeout {
        /// Name of the operation, for diagnostics.
        operation: String,
    },
    /// The inbound payload could not be decoded into the handler's request
    /// type.
    Deserialization(String),
    /// Anything else. Never surfaced verbatim to an external caller.
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A handler-chosen status and message, surfaced to the caller verbatim.
    ///
    /// Unlike every other variant, `message` here is caller-authored and
    /// intentionally reaches the client as-is (e.g. as an HTTP
    /// `{"error": message}` body with the given status). Use this when a
    /// handler needs a status code the rest of the taxonomy doesn't cover.
    Http {
        /// The status code to report (HTTP status for the HTTP adapter;
        /// other adapters map it at their own discretion).
        status: u16,
        /// Message surfaced to the caller unchanged.
        message: String,
    },
}

impl DispatchError {
    /// Construct a [`DispatchError::Internal`] from any error.
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(err))
    }

    /// Construct a [`DispatchError::Transient`] from any error.
    pub fn transient<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transient(Box::new(err))
    }

    /// Construct a [`DispatchError::Http`] with a caller-chosen status and
    /// message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Validation(_) => 400,
            DispatchError::NotFound(_) => 404,
            DispatchError::Unauthorized(_) => 401,
            DispatchError::Forbidden(_) => 403,
            DispatchError::Transient(_) => 503,
            DispatchError::CircuitOpen { .. } => 503,
            DispatchError::TooManyRequests { .. } => 429,
            DispatchError::BulkheadFull { .. } => 503,
            DispatchError::Timeout { .. } => 504,
            DispatchError::Deserialization(_) => 400,
            DispatchError::Internal(_) => 500,
            DispatchError::Http { status, .. } => *status,
        }
    }

    /// A message safe to return to an external caller. Internal details
    /// never leak through this path; see logs for the full error.
    pub fn public_message(&self) -> String {
        match self {
            DispatchError::Validation(violations) => {
                let joined = violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("validation failed: {joined}")
            }
            DispatchError::NotFound(what) => format!("not found: {what}"),
            DispatchError::Unauthorized(msg) => msg.clone(),
            DispatchError::Forbidden(msg) => msg.clone(),
            DispatchError::Transient(_) => "temporarily unavailable, retry later".to_string(),
            DispatchError::CircuitOpen { circuit } => format!("circuit '{circuit}' is open"),
            DispatchError::TooManyRequests { circuit } => {
                format!("circuit '{circuit}' is admitting limited traffic, try again shortly")
            }
            DispatchError::BulkheadFull { bulkhead } => {
                format!("bulkhead '{bulkhead}' is at capacity")
            }
            DispatchError::Timeout { operation } => format!("'{operation}' timed out"),
            DispatchError::Deserialization(_) => "malformed request body".to_string(),
            DispatchError::Internal(_) => "internal server error".to_string(),
            DispatchError::Http { message, .. } => message.clone(),
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Validation(v) => write!(f, "validation error: {v:?}"),
            DispatchError::NotFound(what) => write!(f, "not found: {what}"),
            DispatchError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            DispatchError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            DispatchError::Transient(e) => write!(f, "transient error: {e}"),
            DispatchError::CircuitOpen { circuit } => write!(f, "circuit '{circuit}' is open"),
            DispatchError::TooManyRequests { circuit } => {
                write!(f, "circuit '{circuit}' rejected request: too many requests")
            }
            DispatchError::BulkheadFull { bulkhead } => {
                write!(f, "bulkhead '{bulkhead}' is full")
            }
            DispatchError::Timeout { operation } => write!(f, "'{operation}' timed out"),
            DispatchError::Deserialization(msg) => write!(f, "deserialization error: {msg}"),
            DispatchError::Internal(e) => write!(f, "internal error: {e}"),
            DispatchError::Http { status, message } => write!(f, "http {status}: {message}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Transient(e) => Some(e.as_ref()),
            DispatchError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Alias used throughout handler and middleware signatures.
pub type HandlerError = DispatchError;

/// Convenience result alias.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_as_specified() {
        assert_eq!(DispatchError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            DispatchError::CircuitOpen {
                circuit: "db".into()
            }
            .status_code(),
            503
        );
        assert_eq!(
            DispatchError::TooManyRequests {
                circuit: "db".into()
            }
            .status_code(),
            429
        );
        assert_eq!(
            DispatchError::BulkheadFull {
                bulkhead: "db".into()
            }
            .status_code(),
            503
        );
        assert_eq!(
            DispatchError::Timeout {
                operation: "db".into()
            }
            .status_code(),
            504
        );
    }

    #[test]
    fn internal_details_never_appear_in_public_message() {
        let err = DispatchError::internal(std::io::Error::new(
            std::io::ErrorKind::Other,
            "leaked connection string: postgres://secret",
        ));
        assert_eq!(err.public_message(), "internal server error");
    }

    #[test]
    fn validation_violations_are_joined() {
        let err = DispatchError::Validation(vec![
            Violation::new("name", "required"),
            Violation::new("age", "must be positive"),
        ]);
        assert!(err.public_message().contains("name: required"));
    }

    #[test]
    fn http_variant_surfaces_caller_status_and_message_verbatim() {
        let err = DispatchError::http(418, "teapot");
        assert_eq!(err.status_code(), 418);
        assert_eq!(err.public_message(), "teapot");
    }
}
