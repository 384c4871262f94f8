//! Capability contracts: the abstract interfaces the core uses to reach
//! every external collaborator. The core never depends on a
//! concrete database, cache, broker, logger, metrics, tracer, or validator
//! implementation — only on these traits.

mod broker;
mod cache;
mod database;
mod logger;
mod metrics;
mod tracer;
mod validator;

pub use broker::{Broker, BrokerError, Message, MessageHandler, SubscriptionId};
pub use cache::{Cache, CacheError, CacheExt, ComputeFuture, LockHandle, TaggedCache};
pub use database::{
    DatabaseError, ExecResult, IsolationLevel, Row, Transaction, TransactionOptions,
};
pub use logger::{Fields, LogLevel, Logger, LoggerExt};
pub use metrics::{Counter, Gauge, Histogram, Metrics, Tags};
pub use tracer::{Carrier, Span, SpanStatus, Tracer};
pub use validator::Validator;

use std::{collections::HashMap, sync::Arc};

pub use database::Database;

/// A default-plus-named registry of one capability kind.
///
/// Mirrors the "unnamed call returns the pre-wired default; a named call
/// looks up by key and returns `None` when unknown" rule for every
/// capability uniformly.
#[derive(Clone)]
pub struct AdapterSet<T: ?Sized> {
    default: Option<Arc<T>>,
    named: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Default for AdapterSet<T> {
    fn default() -> Self {
        Self {
            default: None,
            named: HashMap::new(),
        }
    }
}

impl<T: ?Sized> AdapterSet<T> {
    /// An empty set: no default, no named entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unnamed default implementation.
    pub fn set_default(&mut self, impl_: Arc<T>) {
        self.default = Some(impl_);
    }

    /// Register a named implementation, in addition to (or instead of)
    /// the default.
    pub fn set_named(&mut self, name: impl Into<String>, impl_: Arc<T>) {
        self.named.insert(name.into(), impl_);
    }

    /// The default implementation, if one was set.
    pub fn default(&self) -> Option<Arc<T>> {
        self.default.clone()
    }

    /// A named implementation, if registered. `None` if the name is
    /// unknown, matching the default-named-lookup rule above.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.named.get(name).cloned()
    }

    /// All registered names, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        self.named.keys().cloned().collect()
    }
}

/// Process-wide record bundling one default and a name-indexed map for
/// every capability kind.
///
/// Populated during [`crate::app::App`] configuration, before the
/// lifecycle starts; read-only afterward. Every [`crate::context::Context`]
/// holds an `Arc<AppAdapters>` for lazy dependency lookup.
#[derive(Clone, Default)]
pub struct AppAdapters {
    /// Database implementations.
    pub database: AdapterSet<dyn Database>,
    /// Cache implementations.
    pub cache: AdapterSet<dyn Cache>,
    /// Logger implementations.
    pub logger: AdapterSet<dyn Logger>,
    /// Broker implementations.
    pub broker: AdapterSet<dyn Broker>,
    /// Metrics implementations.
    pub metrics: AdapterSet<dyn Metrics>,
    /// Tracer implementations.
    pub tracer: AdapterSet<dyn Tracer>,
    /// Validator implementations.
    pub validator: AdapterSet<dyn Validator>,
}

impl AppAdapters {
    /// An empty adapter set; every accessor will return `None` until
    /// populated.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingCounter(AtomicU64);
    impl Counter for CountingCounter {
        fn add(&self, value: u64) {
            self.0.fetch_add(value, Ordering::Relaxed);
        }
    }

    struct NullMetrics;
    impl Metrics for NullMetrics {
        fn counter(&self, _name: &str, _tags: Tags) -> Arc<dyn Counter> {
            Arc::new(CountingCounter(AtomicU64::new(0)))
        }
        fn histogram(&self, _name: &str, _tags: Tags) -> Arc<dyn Histogram> {
            struct H;
            impl Histogram for H {
                fn observe(&self, _value: f64) {}
            }
            Arc::new(H)
        }
        fn gauge(&self, _name: &str, _tags: Tags) -> Arc<dyn Gauge> {
            struct G;
            impl Gauge for G {
                fn set(&self, _value: f64) {}
                fn add(&self, _delta: f64) {}
            }
            Arc::new(G)
        }
    }

    #[test]
    fn unnamed_lookup_returns_default_named_returns_none_when_unknown() {
        let mut set: AdapterSet<dyn Metrics> = AdapterSet::new();
        set.set_default(Arc::new(NullMetrics));
        assert!(set.default().is_some());
        assert!(set.get("secondary").is_none());

        set.set_named("secondary", Arc::new(NullMetrics));
        assert!(set.get("secondary").is_some());
    }
}
