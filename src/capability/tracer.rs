//! Tracer capability contract.

use std::collections::BTreeMap;

use async_trait::async_trait;

/// Status a span finishes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatus {
    /// Completed without error.
    Ok,
    /// Completed with an error.
    Error,
    /// No status was explicitly set.
    Unset,
}

/// A carrier for cross-process propagation headers (HTTP headers, broker
/// message headers, ...). Implementations of [`Tracer::inject`]/
/// [`Tracer::extract`] read and write through this rather than assuming a
/// concrete header map type.
pub trait Carrier: Send + Sync {
    /// Set a propagation header.
    fn set(&mut self, key: &str, value: String);
    /// Read a propagation header.
    fn get(&self, key: &str) -> Option<String>;
}

impl Carrier for BTreeMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

/// A handle on an open span, returned by [`Tracer::start_span`].
#[async_trait]
pub trait Span: Send + Sync {
    /// Rename the span after creation.
    fn set_name(&self, name: &str);

    /// Set the final status.
    fn set_status(&self, status: SpanStatus);

    /// Attach a single attribute.
    fn set_attribute(&self, key: &str, value: String);

    /// Record a point-in-time event within the span.
    fn add_event(&self, name: &str, attributes: BTreeMap<String, String>);

    /// Record an error without necessarily ending the span.
    fn record_error(&self, err: &(dyn std::error::Error + Send + Sync));

    /// Close the span.
    async fn end(&self);
}

/// The tracer capability contract.
#[async_trait]
pub trait Tracer: Send + Sync {
    /// Start a span. If `parent` is provided, the new span is a child of
    /// it; backends that support remote parents may also accept a parent
    /// extracted via [`Tracer::extract`] as an opaque span handle.
    fn start_span(&self, name: &str, parent: Option<&dyn Span>) -> std::sync::Arc<dyn Span>;

    /// Serialize the active trace context into `carrier` for outbound
    /// propagation.
    fn inject(&self, span: &dyn Span, carrier: &mut dyn Carrier);

    /// Deserialize an inbound trace context from `carrier`, if present.
    fn extract(&self, carrier: &dyn Carrier) -> Option<std::sync::Arc<dyn Span>>;

    /// Flush/export any buffered spans and release resources. Idempotent.
    async fn close(&self) {}
}
