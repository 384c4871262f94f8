//! Trigger variants bindable to a [`crate::handler::Handler`].

use std::{collections::HashMap, time::Duration};

/// An activation source bound to a handler. A handler may carry any number
/// of triggers, of any mix of kinds.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Inbound HTTP request matched on exact method and path pattern.
    Http(HttpTrigger),
    /// Broker message delivery on a topic.
    Message(MessageTrigger),
    /// Scheduled cron firing.
    Cron(CronTrigger),
    /// Inbound gRPC call. Registry/uniqueness support only — no transport
    /// is implemented; see `DESIGN.md`.
    Grpc(GrpcTrigger),
    /// Legacy Kafka trigger, kept for source compatibility. Projects into
    /// a [`MessageTrigger`] via [`KafkaTrigger::to_message`] and is
    /// registered into both the message and kafka indices.
    Kafka(KafkaTrigger),
}

impl Trigger {
    /// A short tag for diagnostics and `tracing` fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Http(_) => "http",
            Trigger::Message(_) => "message",
            Trigger::Cron(_) => "cron",
            Trigger::Grpc(_) => "grpc",
            Trigger::Kafka(_) => "kafka",
        }
    }
}

/// `HTTP{method, path, middleware-refs}`.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    /// Exact HTTP method, e.g. `"GET"`.
    pub method: String,
    /// Route pattern. `:name` and `{name}` segments are positional
    /// wildcards.
    pub path: String,
    /// Names of middleware registered with the
    /// [`crate::registry::Registry`] via `register_middleware`, resolved
    /// and run (in list order, outermost first) around this route only —
    /// in addition to, not instead of, the handler's own
    /// [`crate::handler::Handler::use_middleware`] chain. A name with no
    /// matching registration is silently skipped.
    pub middleware_refs: Vec<String>,
}

impl HttpTrigger {
    /// A trigger with no per-route middleware refs.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            middleware_refs: Vec::new(),
        }
    }

    /// Attach middleware refs, resolved against the registry at dispatch
    /// time.
    pub fn with_middleware_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware_refs = refs.into_iter().map(Into::into).collect();
        self
    }

    /// The `(method, path)` index key used by the [`crate::registry::Registry`]
    /// for route-uniqueness.
    pub fn route_key(&self) -> (String, String) {
        (self.method.to_ascii_uppercase(), self.path.clone())
    }
}

/// `Message{topic, group, auto-ack, max-retries, dlq-topic, retry-backoff,
/// broker-options}`.
#[derive(Debug, Clone)]
pub struct MessageTrigger {
    /// Topic name. Opaque to the core.
    pub topic: String,
    /// Consumer group. `None` falls back to the broker adapter's
    /// configured default.
    pub group: Option<String>,
    /// Whether the framework acks/nacks automatically on handler
    /// success/failure, or leaves it to the handler via
    /// [`crate::context::Context::ack`]/[`crate::context::Context::nack`].
    pub auto_ack: bool,
    /// Maximum redelivery attempts before routing to the DLQ.
    pub max_retries: u32,
    /// Backoff between redelivery attempts.
    pub retry_backoff: Option<Duration>,
    /// Dead-letter topic. `None` means exhausted messages are simply
    /// acked and dropped.
    pub dlq_topic: Option<String>,
    /// Free-form broker-specific options.
    pub broker_options: HashMap<String, String>,
}

impl MessageTrigger {
    /// A trigger with every option at its default: manual ack off (i.e.
    /// `auto_ack = true`), no retries, no DLQ.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: None,
            auto_ack: true,
            max_retries: 0,
            retry_backoff: None,
            dlq_topic: None,
            broker_options: HashMap::new(),
        }
    }
}

/// `Cron{schedule, timezone, allow-overlap, max-duration}`.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    /// Standard five-field cron expression.
    pub schedule: String,
    /// IANA timezone identifier. `None` means UTC.
    pub timezone: Option<String>,
    /// Whether a new fire may start while the previous one is still
    /// running. Default `false`.
    pub allow_overlap: bool,
    /// If set, the invocation's cancellation token fires after this many
    /// seconds.
    pub max_duration: Option<Duration>,
}

impl CronTrigger {
    /// A trigger with overlap disallowed and no duration cap.
    pub fn new(schedule: impl Into<String>) -> Self {
        Self {
            schedule: schedule.into(),
            timezone: None,
            allow_overlap: false,
            max_duration: None,
        }
    }
}

/// `GRPC{service, method}`.
#[derive(Debug, Clone)]
pub struct GrpcTrigger {
    /// gRPC service name.
    pub service: String,
    /// gRPC method name.
    pub method: String,
}

impl GrpcTrigger {
    /// The `(service, method)` index key used by the registry.
    pub fn rpc_key(&self) -> (String, String) {
        (self.service.clone(), self.method.clone())
    }
}

/// Legacy Kafka trigger. Exists for source compatibility; projects into a
/// [`MessageTrigger`]. Kept rather than removed — see `DESIGN.md`.
#[derive(Debug, Clone)]
pub struct KafkaTrigger {
    /// Topic name.
    pub topic: String,
    /// Consumer group.
    pub group: Option<String>,
    /// Free-form broker-specific options, carried through to the
    /// projected [`MessageTrigger`].
    pub options: HashMap<String, String>,
}

impl KafkaTrigger {
    /// A trigger with every option at its default.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: None,
            options: HashMap::new(),
        }
    }

    /// Project into the [`MessageTrigger`] shape the message index and
    /// the [`crate::adapters::broker::BrokerAdapter`] actually operate on.
    pub fn to_message(&self) -> MessageTrigger {
        MessageTrigger {
            topic: self.topic.clone(),
            group: self.group.clone(),
            auto_ack: true,
            max_retries: 0,
            retry_backoff: None,
            dlq_topic: None,
            broker_options: self.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_route_key_uppercases_method() {
        let t = HttpTrigger::new("get", "/hello/:name");
        assert_eq!(t.route_key(), ("GET".to_string(), "/hello/:name".to_string()));
    }

    #[test]
    fn http_trigger_carries_middleware_refs() {
        let t = HttpTrigger::new("GET", "/x").with_middleware_refs(["auth", "rate-limit"]);
        assert_eq!(t.middleware_refs, vec!["auth".to_string(), "rate-limit".to_string()]);
    }

    #[test]
    fn kafka_trigger_projects_into_message() {
        let kafka = KafkaTrigger::new("orders");
        let msg = kafka.to_message();
        assert_eq!(msg.topic, "orders");
        assert!(msg.auto_ack);
        assert_eq!(msg.max_retries, 0);
    }
}
