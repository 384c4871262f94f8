//! Metrics capability contract.
//!
//! A thin handle-factory contract: the core never aggregates or exports
//! metrics itself, it only hands handler code (and, internally, the
//! adapters) tagged handles to push samples through.

use std::collections::BTreeMap;

/// Dimensional tags attached to a metric handle at creation time.
pub type Tags = BTreeMap<String, String>;

/// A monotonically increasing counter handle.
pub trait Counter: Send + Sync {
    /// Add `value` to the counter. `value` must be non-negative.
    fn add(&self, value: u64);

    /// Increment by one.
    fn increment(&self) {
        self.add(1);
    }
}

/// A distribution-sample handle (latencies, sizes, ...).
pub trait Histogram: Send + Sync {
    /// Record one observation.
    fn observe(&self, value: f64);
}

/// A point-in-time value handle that can move up or down.
pub trait Gauge: Send + Sync {
    /// Set the gauge to an absolute value.
    fn set(&self, value: f64);

    /// Add (or, with a negative value, subtract) from the gauge.
    fn add(&self, delta: f64);
}

/// The metrics capability contract: factories for tagged handles.
pub trait Metrics: Send + Sync {
    /// Get or create a counter.
    fn counter(&self, name: &str, tags: Tags) -> std::sync::Arc<dyn Counter>;

    /// Get or create a histogram.
    fn histogram(&self, name: &str, tags: Tags) -> std::sync::Arc<dyn Histogram>;

    /// Get or create a gauge.
    fn gauge(&self, name: &str, tags: Tags) -> std::sync::Arc<dyn Gauge>;
}
