//! Timeout wrapper for an async call.

use std::future::Future;
use std::time::Duration;

/// Error returned when a call did not complete within its deadline.
#[derive(Debug, Clone)]
pub struct TimeoutError {
    /// Name of the operation that timed out, for diagnostics.
    pub operation: String,
    /// The deadline that was exceeded.
    pub after: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation '{}' timed out after {:?}", self.operation, self.after)
    }
}

impl std::error::Error for TimeoutError {}

/// Run `fut` to completion or fail with [`TimeoutError`] once `duration`
/// elapses. `fut` is dropped (and, if it's holding a connection or lock,
/// its own `Drop` impl cleans up) when the deadline fires — the caller
/// gets no further signal back from the cancelled work.
pub async fn timeout<F>(
    operation: impl Into<String>,
    duration: Duration,
    fut: F,
) -> Result<F::Output, TimeoutError>
where
    F: Future,
{
    let operation = operation.into();
    match tokio::time::timeout(duration, fut).await {
        Ok(value) => Ok(value),
        Err(_elapsed) => Err(TimeoutError {
            operation,
            after: duration,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_before_deadline() {
        let result = timeout("fast", Duration::from_millis(50), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn times_out_slow_call() {
        let result = timeout("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        })
        .await;
        assert!(result.is_err());
    }
}
