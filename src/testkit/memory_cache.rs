//! An in-memory [`Cache`] for tests and local development.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::capability::cache::{Cache, CacheError, LockHandle};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// An in-memory cache backed by a single mutex-guarded map.
///
/// TTLs are evaluated lazily on access rather than by a background sweep;
/// good enough for tests, and it keeps this fake free of its own spawned
/// task.
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryCache {
    /// An empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn inner(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], c) || (!c.is_empty() && inner(p, &c[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &c[1..]),
            (Some(pc), Some(cc)) if pc == cc => inner(&p[1..], &c[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), candidate.as_bytes())
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if entry.is_expired() {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired() => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| CacheError::Other(format!("value at {key} is not an integer")))?,
            _ => 0,
        };
        let next = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at: None,
            },
        );
        Ok(next)
    }

    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                Ok(entry.expires_at.map(|at| at.saturating_duration_since(Instant::now())))
            }
            _ => Ok(None),
        }
    }

    async fn match_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(k, _)| k.clone())
            .filter(|k| glob_match(pattern, k))
            .collect())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<Arc<dyn LockHandle>, CacheError> {
        let token = format!("lock:{key}");
        {
            let mut entries = self.entries.lock();
            if let Some(existing) = entries.get(&token) {
                if !existing.is_expired() {
                    return Err(CacheError::Lock(format!("{key} is already locked")));
                }
            }
            entries.insert(
                token.clone(),
                Entry {
                    value: Vec::new(),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        }
        Ok(Arc::new(MemoryLockHandle {
            key: key.to_string(),
            token,
            cache: self.entries_handle(),
            released: AtomicBool::new(false),
        }))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

impl MemoryCache {
    fn entries_handle(&self) -> Arc<Mutex<HashMap<String, Entry>>> {
        self.entries.clone()
    }
}

struct MemoryLockHandle {
    key: String,
    token: String,
    cache: Arc<Mutex<HashMap<String, Entry>>>,
    released: AtomicBool,
}

#[async_trait]
impl LockHandle for MemoryLockHandle {
    fn key(&self) -> &str {
        &self.key
    }

    async fn unlock(&self) -> Result<(), CacheError> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.cache.lock().remove(&self.token);
        }
        Ok(())
    }

    async fn extend(&self, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.cache.lock();
        match entries.get_mut(&self.token) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(())
            }
            None => Err(CacheError::Lock(format!("{} lock no longer held", self.key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MemoryCache::new();
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_creates_then_accumulates() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("n", 5).await.unwrap(), 5);
        assert_eq!(cache.incr("n", 3).await.unwrap(), 8);
        assert_eq!(cache.decr("n", 2).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn match_keys_filters_by_glob() {
        let cache = MemoryCache::new();
        cache.set("user:1", b"a".to_vec(), None).await.unwrap();
        cache.set("user:2", b"b".to_vec(), None).await.unwrap();
        cache.set("order:1", b"c".to_vec(), None).await.unwrap();
        let mut matched = cache.match_keys("user:*").await.unwrap();
        matched.sort();
        assert_eq!(matched, vec!["user:1".to_string(), "user:2".to_string()]);
    }

    #[tokio::test]
    async fn second_lock_acquisition_fails_until_unlocked() {
        let cache = MemoryCache::new();
        let lock = cache.acquire_lock("resource", Duration::from_secs(5)).await.unwrap();
        assert!(cache.acquire_lock("resource", Duration::from_secs(5)).await.is_err());
        lock.unlock().await.unwrap();
        assert!(cache.acquire_lock("resource", Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn flush_tag_only_removes_tagged_keys() {
        use crate::capability::cache::CacheExt;
        let cache = MemoryCache::new();
        let tagged = cache.clone().with_tag("session");
        tagged.set("a", b"1".to_vec(), None).await.unwrap();
        cache.set("untagged", b"2".to_vec(), None).await.unwrap();

        cache.flush_tag("session").await.unwrap();

        assert_eq!(tagged.get("a").await.unwrap(), None);
        assert_eq!(cache.get("untagged").await.unwrap(), Some(b"2".to_vec()));
    }
}
