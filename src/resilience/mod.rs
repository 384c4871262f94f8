//! Resilience patterns used by trigger adapters and exposable to handler
//! code: a circuit breaker, retry with exponential backoff and
//! jitter, a bulkhead, and a timeout helper.
//!
//! # Example
//!
//! ```rust,ignore
//! use dispatchcore::resilience::{
//!     RetryExecutor, RetryConfig,
//!     Bulkhead, BulkheadConfig,
//!     CircuitBreaker, CircuitBreakerConfig,
//! };
//!
//! // Retry with exponential backoff
//! let retry = RetryExecutor::new(RetryConfig::default());
//! let result = retry.execute("fetch_data", || async {
//!     Ok::<_, std::io::Error>("success")
//! }).await;
//!
//! // Circuit breaker
//! let cb = CircuitBreaker::new("external_api", CircuitBreakerConfig::default());
//! let result = cb.call(|| async {
//!     Ok::<_, std::io::Error>("response")
//! }).await;
//! ```

mod bulkhead;
mod circuit_breaker;
mod retry;
mod timeout;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager,
    CircuitBreakerStats, CircuitOpenError, CircuitState, Counts,
};
pub use retry::{AdaptiveRetry, RetryBudget, RetryConfig, RetryError, RetryExecutor, RetryPolicy};
pub use timeout::{timeout, TimeoutError};
