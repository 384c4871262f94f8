//! Bulkhead: bounds the number of concurrent in-flight calls to a
//! dependency so a slow downstream can't exhaust the whole process.

use std::sync::Arc;

use tokio::sync::{AcquireError, Semaphore};

/// Error returned when a bulkhead has no free slot and no queue capacity
/// left to wait in.
#[derive(Debug, Clone)]
pub struct BulkheadError {
    /// Name of the bulkhead that rejected the call.
    pub bulkhead: String,
}

impl std::fmt::Display for BulkheadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bulkhead '{}' is full", self.bulkhead)
    }
}

impl std::error::Error for BulkheadError {}

/// Configuration for a [`Bulkhead`].
#[derive(Debug, Clone, Copy)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent calls admitted.
    pub max_concurrent: usize,
    /// Additional calls allowed to queue for a slot before being
    /// rejected outright. `0` means reject immediately once `max_concurrent`
    /// is in flight.
    pub max_queue: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue: 0,
        }
    }
}

impl BulkheadConfig {
    /// A bulkhead that admits at most `max_concurrent` calls and rejects
    /// the rest immediately.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            max_queue: 0,
        }
    }

    /// Allow up to `max_queue` additional calls to wait for a slot instead
    /// of being rejected immediately.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }
}

/// A named concurrency limiter wrapping a call.
///
/// Unlike the circuit breaker, a bulkhead has no notion of success or
/// failure — it only ever bounds concurrency. Queued callers wait on the
/// semaphore; once `max_concurrent + max_queue` callers are already
/// waiting or running, new calls are rejected with [`BulkheadError`].
pub struct Bulkhead {
    name: String,
    semaphore: Arc<Semaphore>,
    max_queue: usize,
    waiting: std::sync::atomic::AtomicUsize,
}

impl Bulkhead {
    /// Construct a bulkhead under `name` with `config`.
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            max_queue: config.max_queue,
            waiting: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// This bulkhead's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of calls currently holding a slot or waiting for one.
    pub fn in_flight(&self) -> usize {
        self.waiting.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Execute `f` once a slot is available, rejecting immediately if the
    /// queue is already full.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, BulkheadError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        use std::sync::atomic::Ordering;

        if self.semaphore.available_permits() == 0 {
            let already_waiting = self.waiting.load(Ordering::SeqCst);
            if already_waiting >= self.max_queue {
                return Err(BulkheadError {
                    bulkhead: self.name.clone(),
                });
            }
        }
        self.waiting.fetch_add(1, Ordering::SeqCst);

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(AcquireError { .. }) => {
                self.waiting.fetch_sub(1, Ordering::SeqCst);
                return Err(BulkheadError {
                    bulkhead: self.name.clone(),
                });
            }
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        let result = f().await;
        drop(permit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_max_concurrent() {
        let bh = Arc::new(Bulkhead::new("db", BulkheadConfig::new(2)));

        let a = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.call(|| async { tokio::time::sleep(Duration::from_millis(30)).await; 1 }).await })
        };
        let b = {
            let bh = bh.clone();
            tokio::spawn(async move { bh.call(|| async { tokio::time::sleep(Duration::from_millis(30)).await; 2 }).await })
        };

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap().unwrap(), 1);
        assert_eq!(rb.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn rejects_when_queue_is_full() {
        let bh = Arc::new(Bulkhead::new("db", BulkheadConfig::new(1)));
        let held = {
            let bh = bh.clone();
            tokio::spawn(async move {
                bh.call(|| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let rejected = bh.call(|| async {}).await;
        assert!(rejected.is_err());
        held.await.unwrap().unwrap();
    }
}
