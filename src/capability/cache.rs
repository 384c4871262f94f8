//! Cache capability contract.
//!
//! Byte-oriented (`Vec<u8>` in, `Vec<u8>` out) rather than generic, so it stays
//! object-safe and can be looked up dynamically from
//! [`crate::capability::AppAdapters`]. Handlers that want typed values
//! serialize/deserialize at the call site (JSON, as everywhere else in this
//! core).

use std::{fmt, future::Future, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;

/// Errors a [`Cache`] implementation can surface.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// The backend connection failed or was lost.
    Connection(String),
    /// The requested lock could not be acquired or no longer belongs to
    /// the caller.
    Lock(String),
    /// Any other backend-specific failure.
    Other(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Connection(msg) => write!(f, "cache connection error: {msg}"),
            CacheError::Lock(msg) => write!(f, "cache lock error: {msg}"),
            CacheError::Other(msg) => write!(f, "cache error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// A future producing the value to memoize in [`Cache::compute_or_fetch`].
pub type ComputeFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, CacheError>> + Send + 'a>>;

/// A handle on a distributed lock obtained from [`Cache::acquire_lock`].
///
/// Unlocking is caller-driven and not automatic on drop: the contract
/// mirrors a real distributed lock (e.g. Redis `SET NX PX` + token-checked
/// `DEL`), where release is an explicit network round trip, not a local
/// destructor.
#[async_trait]
pub trait LockHandle: Send + Sync {
    /// The key this lock was acquired on.
    fn key(&self) -> &str;

    /// Release the lock. A no-op if it has already expired or been
    /// released.
    async fn unlock(&self) -> Result<(), CacheError>;

    /// Extend the lock's TTL from now.
    async fn extend(&self, ttl: Duration) -> Result<(), CacheError>;
}

/// The cache capability contract.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value. `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value. `ttl = None` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove a value. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Check presence without fetching the value.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Batch fetch. Result order matches `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    /// Batch store, all sharing the same TTL.
    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    /// Batch delete. Returns the number of keys that existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut count = 0;
        for key in keys {
            if self.delete(key).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Atomically add `delta` to the integer stored at `key`, creating it
    /// at `0` first if absent, and return the new value.
    async fn incr(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Equivalent to `incr(key, -delta)`.
    async fn decr(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.incr(key, -delta).await
    }

    /// Set a TTL on an existing key. Returns whether the key existed.
    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Read the remaining TTL of a key, if it has one.
    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// List keys matching a glob-style pattern (`*`, `?`).
    async fn match_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Remove every entry.
    async fn flush(&self) -> Result<(), CacheError>;

    /// Acquire a distributed lock, blocking the caller only long enough to
    /// make the one attempt — callers that want blocking/backoff semantics
    /// compose this with [`crate::resilience::retry`].
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Arc<dyn LockHandle>, CacheError>;

    /// Fetch `key`; on a miss, run `compute`, store its result with `ttl`,
    /// and return it. Concurrent misses on the same key may both invoke
    /// `compute`; the contract promises the eventual cached value is
    /// *a* result of `compute`, not that `compute` runs exactly once.
    async fn compute_or_fetch(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: impl FnOnce() -> ComputeFuture<'static> + Send,
    ) -> Result<Vec<u8>, CacheError>
    where
        Self: Sized,
    {
        if let Some(existing) = self.get(key).await? {
            return Ok(existing);
        }
        let value = compute().await?;
        self.set(key, value.clone(), ttl).await?;
        Ok(value)
    }

    /// Remove every entry previously written under the given tag via a
    /// tagged view (see [`CacheExt::with_tag`]). The default implementation
    /// relies on [`TaggedCache`]'s `tag:<tag>:` key prefix convention and
    /// [`Cache::match_keys`]; backends with a native tag index may override
    /// it with something cheaper.
    async fn flush_tag(&self, tag: &str) -> Result<(), CacheError> {
        let keys = self.match_keys(&format!("tag:{tag}:*")).await?;
        self.delete_many(&keys).await?;
        Ok(())
    }

    /// Liveness check.
    async fn ping(&self) -> Result<(), CacheError>;

    /// Release any pooled connections. Idempotent.
    async fn close(&self) -> Result<(), CacheError>;
}

/// A namespaced view over a [`Cache`] whose writes are remembered under a
/// tag so they can all be evicted together with [`Cache::flush_tag`].
///
/// `compute_or_fetch` takes `impl FnOnce` rather than being part of the
/// object-safe [`Cache`] trait, so it is not callable through `dyn Cache`;
/// callers holding a concrete cache type get it for free via this
/// extension.
pub struct TaggedCache {
    inner: Arc<dyn Cache>,
    tag: String,
}

impl TaggedCache {
    /// Wrap `inner`, namespacing keys under `tag`.
    pub fn new(inner: Arc<dyn Cache>, tag: impl Into<String>) -> Self {
        Self {
            inner,
            tag: tag.into(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("tag:{}:{key}", self.tag)
    }
}

#[async_trait]
impl Cache for TaggedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.inner.get(&self.namespaced(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.inner.set(&self.namespaced(key), value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.delete(&self.namespaced(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.exists(&self.namespaced(key)).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.inner.incr(&self.namespaced(key), delta).await
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.inner.set_ttl(&self.namespaced(key), ttl).await
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.inner.get_ttl(&self.namespaced(key)).await
    }

    async fn match_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.inner.match_keys(&self.namespaced(pattern)).await
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.inner.flush_tag(&self.tag).await
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Arc<dyn LockHandle>, CacheError> {
        self.inner.acquire_lock(&self.namespaced(key), ttl).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Convenience extension adding [`TaggedCache`] construction to any cache.
pub trait CacheExt {
    /// Produce a tagged sub-cache view over `self`.
    fn with_tag(self: Arc<Self>, tag: impl Into<String>) -> TaggedCache
    where
        Self: Cache + Sized + 'static;
}

impl<C: Cache + 'static> CacheExt for C {
    fn with_tag(self: Arc<Self>, tag: impl Into<String>) -> TaggedCache {
        TaggedCache::new(self, tag)
    }
}
