//! Name-indexed plus trigger-indexed handler catalog.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    handler::{Handler, Middleware},
    trigger::Trigger,
};

/// A condition the [`Registry`] rejects at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another handler already owns this name.
    DuplicateName(String),
    /// Another handler already owns this `(method, path)`.
    DuplicateRoute {
        /// HTTP method.
        method: String,
        /// Route pattern.
        path: String,
    },
    /// Another handler already owns this topic.
    DuplicateTopic(String),
    /// Another handler already owns this `(service, method)`.
    DuplicateRpcMethod {
        /// gRPC service name.
        service: String,
        /// gRPC method name.
        method: String,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateName(name) => write!(f, "duplicate handler name: {name}"),
            RegistryError::DuplicateRoute { method, path } => {
                write!(f, "duplicate HTTP route: {method} {path}")
            }
            RegistryError::DuplicateTopic(topic) => write!(f, "duplicate message topic: {topic}"),
            RegistryError::DuplicateRpcMethod { service, method } => {
                write!(f, "duplicate gRPC method: {service}.{method}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Process-wide catalog of registered handlers, indexed by name and by
/// every trigger kind.
///
/// Mutated during boot in the intended usage; the reader-writer lock also
/// makes runtime registration safe, though that's permitted rather than
/// encouraged.
pub struct Registry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Arc<Handler>>,
    by_http: HashMap<(String, String), Arc<Handler>>,
    by_message: HashMap<String, Arc<Handler>>,
    by_kafka: HashMap<String, Arc<Handler>>,
    by_grpc: HashMap<(String, String), Arc<Handler>>,
    cron: Vec<Arc<Handler>>,
    order: Vec<Arc<Handler>>,
    middleware: HashMap<String, Middleware>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register `handler`, validating every uniqueness invariant before
    /// committing any index write.
    ///
    /// Auto-generates a name via [`crate::handler::next_auto_name`] if the
    /// handler was built without one. Cron triggers never fail on
    /// duplication; every other trigger kind does.
    pub fn register(&self, mut handler: Handler) -> Result<Arc<Handler>, RegistryError> {
        if handler.name().is_none() {
            handler = handler.named(crate::handler::next_auto_name());
        }
        let name = handler.name().expect("name set above").to_string();

        let mut inner = self.inner.write();

        if inner.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        for trigger in handler.triggers() {
            match trigger {
                Trigger::Http(h) => {
                    let key = h.route_key();
                    if inner.by_http.contains_key(&key) {
                        return Err(RegistryError::DuplicateRoute {
                            method: key.0,
                            path: key.1,
                        });
                    }
                }
                Trigger::Message(m) => {
                    if inner.by_message.contains_key(&m.topic) {
                        return Err(RegistryError::DuplicateTopic(m.topic.clone()));
                    }
                }
                Trigger::Kafka(k) => {
                    if inner.by_message.contains_key(&k.topic) || inner.by_kafka.contains_key(&k.topic) {
                        return Err(RegistryError::DuplicateTopic(k.topic.clone()));
                    }
                }
                Trigger::Grpc(g) => {
                    let key = g.rpc_key();
                    if inner.by_grpc.contains_key(&key) {
                        return Err(RegistryError::DuplicateRpcMethod {
                            service: key.0,
                            method: key.1,
                        });
                    }
                }
                Trigger::Cron(_) => {}
            }
        }

        let handler = Arc::new(handler);
        inner.by_name.insert(name, handler.clone());
        for trigger in handler.triggers() {
            match trigger {
                Trigger::Http(h) => {
                    inner.by_http.insert(h.route_key(), handler.clone());
                }
                Trigger::Message(m) => {
                    inner.by_message.insert(m.topic.clone(), handler.clone());
                }
                Trigger::Kafka(k) => {
                    // Kafka trigger writes into both indices.
                    inner.by_kafka.insert(k.topic.clone(), handler.clone());
                    inner.by_message.insert(k.topic.clone(), handler.clone());
                }
                Trigger::Grpc(g) => {
                    inner.by_grpc.insert(g.rpc_key(), handler.clone());
                }
                Trigger::Cron(_) => {
                    inner.cron.push(handler.clone());
                }
            }
        }
        inner.order.push(handler.clone());

        Ok(handler)
    }

    /// Look up a handler by name.
    pub fn by_name(&self, name: &str) -> Option<Arc<Handler>> {
        self.inner.read().by_name.get(name).cloned()
    }

    /// Look up the handler bound to an exact `(method, path)`.
    pub fn by_http(&self, method: &str, path: &str) -> Option<Arc<Handler>> {
        self.inner
            .read()
            .by_http
            .get(&(method.to_ascii_uppercase(), path.to_string()))
            .cloned()
    }

    /// Look up the handler subscribed to `topic` (message or
    /// Kafka-aliased).
    pub fn by_message_topic(&self, topic: &str) -> Option<Arc<Handler>> {
        self.inner.read().by_message.get(topic).cloned()
    }

    /// Look up the handler subscribed to `topic` through the legacy Kafka
    /// alias index specifically.
    pub fn by_kafka_topic(&self, topic: &str) -> Option<Arc<Handler>> {
        self.inner.read().by_kafka.get(topic).cloned()
    }

    /// Look up the handler bound to an exact `(service, method)` gRPC
    /// method.
    pub fn by_grpc(&self, service: &str, method: &str) -> Option<Arc<Handler>> {
        self.inner
            .read()
            .by_grpc
            .get(&(service.to_string(), method.to_string()))
            .cloned()
    }

    /// Every registered handler, in registration order.
    pub fn all(&self) -> Vec<Arc<Handler>> {
        self.inner.read().order.clone()
    }

    /// Every registered HTTP route as `(method, path)`.
    pub fn http_routes(&self) -> Vec<(String, String)> {
        self.inner.read().by_http.keys().cloned().collect()
    }

    /// Every registered message topic (message and Kafka-aliased).
    pub fn message_topics(&self) -> Vec<String> {
        self.inner.read().by_message.keys().cloned().collect()
    }

    /// Every handler carrying at least one cron trigger.
    pub fn cron_handlers(&self) -> Vec<Arc<Handler>> {
        self.inner.read().cron.clone()
    }

    /// Whether any handler has an HTTP trigger.
    pub fn has_http(&self) -> bool {
        !self.inner.read().by_http.is_empty()
    }

    /// Whether any handler has a message (or Kafka-aliased) trigger.
    pub fn has_message(&self) -> bool {
        !self.inner.read().by_message.is_empty()
    }

    /// Whether any handler has a cron trigger.
    pub fn has_cron(&self) -> bool {
        !self.inner.read().cron.is_empty()
    }

    /// Register a middleware under `name`, resolvable by a
    /// [`crate::trigger::HttpTrigger::middleware_refs`] entry of the same
    /// name. Re-registering a name replaces the previous middleware.
    pub fn register_middleware(&self, name: impl Into<String>, mw: Middleware) {
        self.inner.write().middleware.insert(name.into(), mw);
    }

    /// Look up a middleware registered under `name`.
    pub fn middleware_ref(&self, name: &str) -> Option<Middleware> {
        self.inner.read().middleware.get(name).cloned()
    }

    /// Resolve a list of middleware-ref names against the registered set,
    /// in order, silently dropping any name with no registration.
    pub fn resolve_middleware_refs(&self, refs: &[String]) -> Vec<Middleware> {
        let inner = self.inner.read();
        refs.iter().filter_map(|name| inner.middleware.get(name).cloned()).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn noop_handler() -> Handler {
        Handler::new_no_request(|_ctx: &mut Context| async move { Ok(()) })
    }

    #[test]
    fn duplicate_route_is_rejected_and_first_registration_survives() {
        let registry = Registry::new();
        registry
            .register(noop_handler().named("first").http("GET", "/x"))
            .unwrap();

        let err = registry
            .register(noop_handler().named("second").http("GET", "/x"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateRoute {
                method: "GET".into(),
                path: "/x".into()
            }
        );

        assert!(registry.by_name("first").is_some());
        assert!(registry.by_name("second").is_none());
        assert!(registry.by_http("GET", "/x").is_some());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = Registry::new();
        registry.register(noop_handler().named("dup")).unwrap();
        let err = registry.register(noop_handler().named("dup")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("dup".into()));
    }

    #[test]
    fn unnamed_handlers_get_deterministic_auto_names() {
        let registry = Registry::new();
        let h1 = registry.register(noop_handler()).unwrap();
        let h2 = registry.register(noop_handler()).unwrap();
        assert_ne!(h1.name(), h2.name());
        assert!(h1.name().unwrap().starts_with("handler_"));
    }

    #[test]
    fn cron_triggers_allow_duplicates() {
        let registry = Registry::new();
        registry
            .register(noop_handler().named("a").cron("*/5 * * * *"))
            .unwrap();
        registry
            .register(noop_handler().named("b").cron("*/5 * * * *"))
            .unwrap();
        assert_eq!(registry.cron_handlers().len(), 2);
    }

    #[test]
    fn kafka_trigger_appears_in_both_indices() {
        let registry = Registry::new();
        registry
            .register(
                noop_handler()
                    .named("legacy")
                    .kafka(crate::trigger::KafkaTrigger::new("orders")),
            )
            .unwrap();
        assert!(registry.by_message_topic("orders").is_some());
        assert!(registry.by_kafka_topic("orders").is_some());
    }

    #[test]
    fn duplicate_grpc_method_is_rejected() {
        let registry = Registry::new();
        registry
            .register(noop_handler().named("a").grpc("Greeter", "Hello"))
            .unwrap();
        let err = registry
            .register(noop_handler().named("b").grpc("Greeter", "Hello"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateRpcMethod {
                service: "Greeter".into(),
                method: "Hello".into(),
            }
        );
    }

    #[test]
    fn registered_handler_is_observable_through_every_surface() {
        let registry = Registry::new();
        registry
            .register(
                noop_handler()
                    .named("multi")
                    .http("GET", "/multi")
                    .message("multi-topic")
                    .cron("0 0 * * *"),
            )
            .unwrap();

        assert!(registry.by_name("multi").is_some());
        assert!(registry.by_http("GET", "/multi").is_some());
        assert!(registry.by_message_topic("multi-topic").is_some());
        assert_eq!(registry.cron_handlers().len(), 1);
        assert!(registry.has_http());
        assert!(registry.has_message());
        assert!(registry.has_cron());
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn middleware_refs_resolve_in_order_and_skip_unknown_names() {
        let registry = Registry::new();
        let mw: crate::handler::Middleware =
            std::sync::Arc::new(|ctx: &mut Context, next| next.run(ctx));
        registry.register_middleware("auth", mw.clone());
        registry.register_middleware("rate-limit", mw);

        let resolved = registry.resolve_middleware_refs(&[
            "auth".to_string(),
            "ghost".to_string(),
            "rate-limit".to_string(),
        ]);
        assert_eq!(resolved.len(), 2);
        assert!(registry.middleware_ref("ghost").is_none());
        assert!(registry.middleware_ref("auth").is_some());
    }
}
