//! Request/response state carried on a [`crate::context::Context`].

use std::collections::HashMap;

use super::headers::HeaderMap;

/// Which trigger kind is driving the current invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Inbound HTTP request.
    Http,
    /// Broker message delivery.
    Message,
    /// Cron firing.
    Cron,
    /// Inbound gRPC call.
    Grpc,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Http => "http",
            TriggerKind::Message => "message",
            TriggerKind::Cron => "cron",
            TriggerKind::Grpc => "grpc",
        };
        write!(f, "{s}")
    }
}

/// Inbound request state, populated by whichever trigger adapter is
/// driving this invocation.
#[derive(Debug, Clone)]
pub struct Request {
    /// Which trigger produced this request.
    pub trigger_kind: TriggerKind,
    /// HTTP method, when `trigger_kind` is [`TriggerKind::Http`].
    pub method: Option<String>,
    /// Request path, when `trigger_kind` is [`TriggerKind::Http`].
    pub path: Option<String>,
    /// Raw body bytes, before JSON decoding.
    pub body: Vec<u8>,
    /// Request headers (HTTP) or message headers (broker).
    pub headers: HeaderMap,
    /// Positional path parameters extracted by the HTTP adapter's router.
    pub path_params: HashMap<String, String>,
    /// Parsed query-string parameters.
    pub query_params: HashMap<String, String>,
    /// Parsed cookies.
    pub cookies: HashMap<String, String>,
    /// Message topic, when `trigger_kind` is [`TriggerKind::Message`].
    pub topic: Option<String>,
    /// Message partition, if the broker partitions topics.
    pub partition: Option<i32>,
    /// Message offset within its partition.
    pub offset: Option<i64>,
    /// Message/partitioning key.
    pub key: Option<String>,
}

impl Request {
    /// An empty request tagged with `trigger_kind`; every other field
    /// starts at its zero value.
    pub fn new(trigger_kind: TriggerKind) -> Self {
        Self {
            trigger_kind,
            method: None,
            path: None,
            body: Vec::new(),
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            query_params: HashMap::new(),
            cookies: HashMap::new(),
            topic: None,
            partition: None,
            offset: None,
            key: None,
        }
    }

    /// Reset to an empty [`TriggerKind::Http`] request, retaining the
    /// backing allocations of every collection.
    pub(crate) fn reset(&mut self) {
        self.trigger_kind = TriggerKind::Http;
        self.method = None;
        self.path = None;
        self.body.clear();
        self.headers.clear();
        self.path_params.clear();
        self.query_params.clear();
        self.cookies.clear();
        self.topic = None;
        self.partition = None;
        self.offset = None;
        self.key = None;
    }
}

/// Outbound response state, written by the handler (via
/// [`crate::context::Context`] helpers) and read by the trigger adapter.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP-style status code. `0` means "not yet set"; adapters default
    /// it to 200 when a body is present.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
    /// Response headers.
    pub headers: HeaderMap,
}

impl Response {
    /// An empty, unset response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to an unset response, retaining the backing allocations.
    pub(crate) fn reset(&mut self) {
        self.status = 0;
        self.body.clear();
        self.headers.clear();
    }
}
