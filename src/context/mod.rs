//! The per-invocation [`Context`] carrier and its pool.

mod headers;
mod message;
mod pool;

pub use headers::HeaderMap;
pub use message::{Request, Response, TriggerKind};
pub use pool::{ContextPool, PooledContext};

use std::{any::Any, collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::{
    capability::{
        AppAdapters, Broker, Cache, Database, Logger, Metrics, Tracer, Validator,
    },
    error::DispatchError,
    identity::Identity,
};

/// What the handler decided to do with an at-least-once broker delivery
/// when its trigger's `auto_ack` is `false`. Read by
/// [`crate::adapters::broker::BrokerAdapter`] after the executor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Acknowledge: the message will not be redelivered.
    Ack,
    /// Negative-acknowledge, optionally requesting redelivery.
    Nack {
        /// Whether the broker should requeue the message.
        requeue: bool,
    },
}

/// The per-invocation carrier.
///
/// Acquired from a [`ContextPool`] at dispatch and reset-and-returned at
/// completion. Never shared across concurrent tasks by the framework —
/// each inbound HTTP request, broker delivery, or cron firing gets its own
/// instance drawn from the pool.
pub struct Context {
    app: Option<Arc<AppAdapters>>,
    identity: Option<Identity>,
    /// Inbound request state.
    pub request: Request,
    /// Outbound response state.
    pub response: Response,
    metadata: RwLock<HashMap<String, JsonValue>>,
    services: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    cancellation: CancellationToken,
    ack_action: RwLock<Option<AckAction>>,
}

impl Context {
    /// A fresh, pool-independent context. Most callers should go through
    /// [`ContextPool::acquire`] instead; this is exposed for tests and for
    /// adapters that need a one-off context outside the pool.
    pub fn empty() -> Self {
        Self {
            app: None,
            identity: None,
            request: Request::new(TriggerKind::Http),
            response: Response::new(),
            metadata: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            cancellation: CancellationToken::new(),
            ack_action: RwLock::new(None),
        }
    }

    /// Re-prepare a (possibly reused) context for a new invocation. Called
    /// by [`ContextPool::acquire`]; not part of the public API because
    /// calling it on a context already in use would violate the
    /// single-owner invariant.
    pub(crate) fn prepare(
        &mut self,
        app: Option<Arc<AppAdapters>>,
        trigger_kind: TriggerKind,
        cancellation: CancellationToken,
    ) {
        self.app = app;
        self.request = Request::new(trigger_kind);
        self.cancellation = cancellation;
    }

    /// Reset every collection (metadata, services, headers, params) and
    /// clear every reference field, retaining backing capacity so reuse
    /// from the pool doesn't reallocate.
    pub(crate) fn reset(&mut self) {
        self.app = None;
        self.identity = None;
        self.request.reset();
        self.response.reset();
        self.metadata.write().clear();
        self.services.write().clear();
        *self.ack_action.write() = None;
        self.cancellation = CancellationToken::new();
    }

    /// The cancellation signal for this invocation: a child of the app's
    /// root token (or, for a context built via [`Context::empty`], an
    /// independent one). Handlers that spawn their own tasks should
    /// observe this to stop promptly on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Whether this invocation's cancellation signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    // -- Identity -----------------------------------------------------

    /// The authenticated principal, if one was attached before dispatch.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Attach an authenticated principal (normally called by an
    /// authenticating adapter or middleware before the handler runs).
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    // -- Metadata -------------------------------------------------------

    /// Store a metadata value under `key`.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.metadata.write().insert(key.into(), value.into());
    }

    /// Fetch a raw metadata value.
    pub fn get_metadata(&self, key: &str) -> Option<JsonValue> {
        self.metadata.read().get(key).cloned()
    }

    /// Fetch a metadata value as a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_metadata(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Fetch a metadata value as an integer.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get_metadata(key).and_then(|v| v.as_i64())
    }

    /// Fetch a metadata value as a boolean.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_metadata(key).and_then(|v| v.as_bool())
    }

    // -- Per-invocation user services -----------------------------------

    /// Register a per-invocation service override, distinct from the
    /// process-wide [`AppAdapters`].
    pub fn register_service<T: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<T>) {
        self.services
            .write()
            .insert(name.into(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Look up a registered service by name and type, returning `None` if
    /// absent or of a different type.
    pub fn get_service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .read()
            .get(name)
            .cloned()
            .and_then(|svc| svc.downcast::<T>().ok())
    }

    /// Like [`Context::get_service`], but panics with a descriptive
    /// message if the service is missing or mistyped.
    pub fn must_get_service<T: Any + Send + Sync>(&self, name: &str) -> Arc<T> {
        self.get_service(name)
            .unwrap_or_else(|| panic!("service '{name}' not registered or wrong type"))
    }

    // -- Lazy capability accessors ---------------------------------------

    /// The default database, or `None` if no `AppAdapters` is attached.
    pub fn db(&self) -> Option<Arc<dyn Database>> {
        self.app.as_ref()?.database.default()
    }

    /// A named database implementation, or `None` if unknown.
    pub fn db_named(&self, name: &str) -> Option<Arc<dyn Database>> {
        self.app.as_ref()?.database.get(name)
    }

    /// The default cache.
    pub fn cache(&self) -> Option<Arc<dyn Cache>> {
        self.app.as_ref()?.cache.default()
    }

    /// A named cache implementation.
    pub fn cache_named(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.app.as_ref()?.cache.get(name)
    }

    /// The default logger.
    pub fn logger(&self) -> Option<Arc<dyn Logger>> {
        self.app.as_ref()?.logger.default()
    }

    /// A named logger implementation.
    pub fn logger_named(&self, name: &str) -> Option<Arc<dyn Logger>> {
        self.app.as_ref()?.logger.get(name)
    }

    /// The default broker.
    pub fn broker(&self) -> Option<Arc<dyn Broker>> {
        self.app.as_ref()?.broker.default()
    }

    /// A named broker implementation.
    pub fn broker_named(&self, name: &str) -> Option<Arc<dyn Broker>> {
        self.app.as_ref()?.broker.get(name)
    }

    /// Alias for [`Context::broker`], kept as a separate accessor name
    /// for source compatibility with callers that think in terms of
    /// work queues rather than pub/sub topics; both resolve through the
    /// same `AppAdapters` entry.
    pub fn queue(&self) -> Option<Arc<dyn Broker>> {
        self.broker()
    }

    /// The default metrics handle factory.
    pub fn metrics(&self) -> Option<Arc<dyn Metrics>> {
        self.app.as_ref()?.metrics.default()
    }

    /// A named metrics implementation.
    pub fn metrics_named(&self, name: &str) -> Option<Arc<dyn Metrics>> {
        self.app.as_ref()?.metrics.get(name)
    }

    /// The default tracer.
    pub fn tracer(&self) -> Option<Arc<dyn Tracer>> {
        self.app.as_ref()?.tracer.default()
    }

    /// A named tracer implementation.
    pub fn tracer_named(&self, name: &str) -> Option<Arc<dyn Tracer>> {
        self.app.as_ref()?.tracer.get(name)
    }

    /// The default validator.
    pub fn validator(&self) -> Option<Arc<dyn Validator>> {
        self.app.as_ref()?.validator.default()
    }

    /// A named validator implementation.
    pub fn validator_named(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.app.as_ref()?.validator.get(name)
    }

    // -- Broker ack/nack helpers ------------------------------------------

    /// Acknowledge the inbound message for a `Message` trigger whose
    /// `auto_ack` is `false`. A no-op for any other trigger kind.
    pub fn ack(&self) {
        *self.ack_action.write() = Some(AckAction::Ack);
    }

    /// Negative-acknowledge the inbound message, optionally requesting
    /// redelivery.
    pub fn nack(&self, requeue: bool) {
        *self.ack_action.write() = Some(AckAction::Nack { requeue });
    }

    /// The ack/nack decision the handler made, if any. Read by
    /// [`crate::adapters::broker::BrokerAdapter`] after the executor
    /// returns.
    pub fn take_ack_action(&self) -> Option<AckAction> {
        self.ack_action.write().take()
    }

    // -- Response helpers --------------------------------------------------

    /// Serialize `body` as the JSON response with `status`, setting the
    /// content type if not already set — status, body, and content-type
    /// all land atomically from the handler's perspective.
    pub fn json<T: Serialize>(&mut self, status: u16, body: &T) -> Result<(), DispatchError> {
        let bytes =
            serde_json::to_vec(body).map_err(|e| DispatchError::internal(JsonEncodeError(e)))?;
        self.response.status = status;
        self.response.body = bytes;
        if !self.response.headers.contains("content-type") {
            self.response.headers.set("Content-Type", "application/json");
        }
        Ok(())
    }

    /// `200 OK` with a JSON body.
    pub fn success<T: Serialize>(&mut self, body: &T) -> Result<(), DispatchError> {
        self.json(200, body)
    }

    /// `201 Created` with a JSON body.
    pub fn created<T: Serialize>(&mut self, body: &T) -> Result<(), DispatchError> {
        self.json(201, body)
    }

    /// `204 No Content`, no body.
    pub fn no_content(&mut self) {
        self.response.status = 204;
        self.response.body.clear();
    }

    /// Write an `{"error": <message>}` body with the given status.
    pub fn error(&mut self, status: u16, message: &str) {
        self.response.status = status;
        self.response.body =
            serde_json::to_vec(&serde_json::json!({ "error": message })).unwrap_or_default();
        if !self.response.headers.contains("content-type") {
            self.response.headers.set("Content-Type", "application/json");
        }
    }
}

#[derive(Debug)]
struct JsonEncodeError(serde_json::Error);

impl std::fmt::Display for JsonEncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to encode JSON response: {}", self.0)
    }
}

impl std::error::Error for JsonEncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_everything_and_retains_capacity() {
        let mut ctx = Context::empty();
        ctx.set_metadata("k", "v");
        ctx.request.headers.insert("X-Test", "1");
        ctx.response.headers.insert("X-Test", "1");
        ctx.request.path_params.insert("id".into(), "1".into());
        ctx.set_identity(Identity::new("u1", crate::identity::IdentityKind::User));
        ctx.response.status = 200;
        ctx.response.body = b"hello".to_vec();

        ctx.reset();

        assert!(ctx.get_metadata("k").is_none());
        assert!(ctx.request.headers.is_empty());
        assert!(ctx.response.headers.is_empty());
        assert!(ctx.request.path_params.is_empty());
        assert!(ctx.identity().is_none());
        assert_eq!(ctx.response.status, 0);
        assert!(ctx.response.body.is_empty());
        assert!(ctx.db().is_none());
    }

    #[test]
    fn service_overlay_is_typed_and_distinct_per_name() {
        let ctx = Context::empty();
        ctx.register_service("greeter", Arc::new(String::from("hi")));
        assert_eq!(ctx.get_service::<String>("greeter").as_deref().map(|s| s.as_str()), Some("hi"));
        assert!(ctx.get_service::<u32>("greeter").is_none());
        assert!(ctx.get_service::<String>("missing").is_none());
    }

    #[test]
    fn json_response_sets_status_body_and_content_type_once() {
        let mut ctx = Context::empty();
        ctx.response.headers.set("Content-Type", "text/plain");
        ctx.json(200, &serde_json::json!({"ok": true})).unwrap();
        assert_eq!(ctx.response.status, 200);
        assert_eq!(ctx.response.headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn ack_nack_round_trip() {
        let ctx = Context::empty();
        assert!(ctx.take_ack_action().is_none());
        ctx.nack(true);
        assert_eq!(ctx.take_ack_action(), Some(AckAction::Nack { requeue: true }));
        assert!(ctx.take_ack_action().is_none());
    }
}
