//! A minimal free-list pool for [`Context`].
//!
//! Deliberately simple: a `parking_lot::Mutex<Vec<Box<Context>>>` behind an
//! `Arc`, no external pooling crate. Acquiring a context from an empty pool
//! allocates a new one; releasing one pushes it back after resetting it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{Context, TriggerKind};
use crate::capability::AppAdapters;

/// A free list of reusable [`Context`] instances, shared across every
/// adapter in a running app.
pub struct ContextPool {
    free: Mutex<Vec<Box<Context>>>,
}

impl ContextPool {
    /// An empty pool. Contexts are allocated lazily on first acquire.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
        })
    }

    /// Acquire a context for a new invocation, reusing one from the free
    /// list if available. The returned [`PooledContext`] releases itself
    /// back to the pool on drop, including across a panic unwind — the
    /// caller does not need a `try`/`finally` of its own.
    pub fn acquire(
        self: &Arc<Self>,
        app: Option<Arc<AppAdapters>>,
        trigger_kind: TriggerKind,
        cancellation: CancellationToken,
    ) -> PooledContext {
        let mut ctx = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| Box::new(Context::empty()));
        ctx.prepare(app, trigger_kind, cancellation);
        PooledContext {
            ctx: Some(ctx),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut ctx: Box<Context>) {
        ctx.reset();
        self.free.lock().push(ctx);
    }

    /// Number of idle contexts currently held in the free list.
    pub fn idle_len(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }
}

/// An acquired [`Context`], returned to its [`ContextPool`] on drop.
pub struct PooledContext {
    ctx: Option<Box<Context>>,
    pool: Arc<ContextPool>,
}

impl std::ops::Deref for PooledContext {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx.as_ref().expect("context taken before drop")
    }
}

impl std::ops::DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_mut().expect("context taken before drop")
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_returns_context_to_free_list() {
        let pool = ContextPool::new();
        assert_eq!(pool.idle_len(), 0);
        {
            let mut ctx = pool.acquire(None, TriggerKind::Http, CancellationToken::new());
            ctx.set_metadata("k", "v");
        }
        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn reused_context_is_clean() {
        let pool = ContextPool::new();
        {
            let mut ctx = pool.acquire(None, TriggerKind::Http, CancellationToken::new());
            ctx.set_metadata("k", "v");
            ctx.response.status = 200;
        }
        let ctx = pool.acquire(None, TriggerKind::Http, CancellationToken::new());
        assert!(ctx.get_metadata("k").is_none());
        assert_eq!(ctx.response.status, 0);
    }

    #[test]
    fn drop_during_panic_unwind_still_releases() {
        let pool = ContextPool::new();
        let pool_clone = Arc::clone(&pool);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _ctx = pool_clone.acquire(None, TriggerKind::Http, CancellationToken::new());
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(pool.idle_len(), 1);
    }
}
