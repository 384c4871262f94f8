//! A [`Tracer`] whose spans record nothing and whose propagation is a
//! no-op.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::tracer::{Carrier, Span, SpanStatus, Tracer};

/// A span that ignores every call made on it.
#[derive(Debug, Default)]
pub struct NullSpan;

#[async_trait]
impl Span for NullSpan {
    fn set_name(&self, _name: &str) {}
    fn set_status(&self, _status: SpanStatus) {}
    fn set_attribute(&self, _key: &str, _value: String) {}
    fn add_event(&self, _name: &str, _attributes: std::collections::BTreeMap<String, String>) {}
    fn record_error(&self, _err: &(dyn std::error::Error + Send + Sync)) {}
    async fn end(&self) {}
}

/// A tracer that produces [`NullSpan`]s and never propagates or extracts
/// a trace context.
#[derive(Debug, Default, Clone)]
pub struct NullTracer;

impl NullTracer {
    /// A new `NullTracer`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Tracer for NullTracer {
    fn start_span(&self, _name: &str, _parent: Option<&dyn Span>) -> Arc<dyn Span> {
        Arc::new(NullSpan)
    }

    fn inject(&self, _span: &dyn Span, _carrier: &mut dyn Carrier) {}

    fn extract(&self, _carrier: &dyn Carrier) -> Option<Arc<dyn Span>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_span_and_end_are_harmless() {
        let tracer = NullTracer::new();
        let span = tracer.start_span("op", None);
        span.set_status(SpanStatus::Ok);
        span.end().await;

        let mut carrier = std::collections::BTreeMap::new();
        tracer.inject(span.as_ref(), &mut carrier);
        assert!(tracer.extract(&carrier).is_none());
    }
}
