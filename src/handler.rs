//! Handler descriptors and the builder API that attaches triggers and
//! middleware to them.
//!
//! A handler's request/response types are pinned down at registration
//! time through generics rather than runtime reflection: [`Handler::new`]
//! is generic over a closure of one of two shapes —
//! `Fn(&mut Context) -> Future<Output = Result<(), DispatchError>>` (no
//! request payload) or `Fn(&mut Context, Req) -> Future<Output =
//! Result<Resp, DispatchError>>` — and wraps whichever shape it's given in
//! an internal [`ErasedInvoke`] trait object that performs decode/encode
//! with the concrete types monomorphized at the call site. The `Handler`
//! itself only ever stores the erased form, plus enough metadata for
//! diagnostics.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
};

use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};

use crate::{capability::Validator, context::Context, error::DispatchError, trigger::Trigger};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A middleware wraps the next link in the chain, observing or altering
/// the [`Context`] before and/or after it runs.
pub type Middleware = std::sync::Arc<
    dyn for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), DispatchError>>
        + Send
        + Sync,
>;

/// The remainder of the middleware chain, captured as a single callable so
/// a middleware can decide whether (and when) to invoke it.
pub struct Next<'a> {
    inner: std::sync::Arc<dyn ErasedInvoke>,
    rest: &'a [Middleware],
}

impl<'a> Next<'a> {
    pub(crate) fn new(inner: std::sync::Arc<dyn ErasedInvoke>, rest: &'a [Middleware]) -> Self {
        Self { inner, rest }
    }

    /// Run the next middleware, or the handler itself once the chain is
    /// exhausted.
    pub fn run(self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>> {
        match self.rest.split_first() {
            Some((mw, rest)) => {
                let next = Next::new(self.inner, rest);
                mw(ctx, next)
            }
            None => self.inner.invoke(ctx),
        }
    }
}

/// A unit of business logic bindable to any number of [`Trigger`]s.
///
/// Immutable once built: [`crate::registry::Registry::register`] takes it
/// by value and never hands back a mutable reference.
pub struct Handler {
    name: Option<String>,
    description: Option<String>,
    triggers: Vec<Trigger>,
    middleware: Vec<Middleware>,
    request_type_name: &'static str,
    response_type_name: &'static str,
    declares_request: bool,
    invoke: std::sync::Arc<dyn ErasedInvoke>,
    validator: Option<std::sync::Arc<dyn Validator>>,
}

impl Handler {
    /// Build a handler around a request-and-response-bearing closure:
    /// `Fn(&mut Context, Req) -> impl Future<Output = Result<Resp,
    /// DispatchError>>`.
    ///
    /// `Resp` may be `()` (no body is ever written), `Option<T>` (a `None`
    /// leaves the response body unset rather than serializing a literal
    /// `null` — see [`Executor`](crate::executor::Executor)), or any other
    /// `Serialize` type.
    pub fn new<F, Fut, Req, Resp>(f: F) -> Self
    where
        F: Fn(&mut Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, DispatchError>> + Send,
        Req: DeserializeOwned + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        Self::build(f, true)
    }

    /// Build a handler around a request-free closure: `Fn(&mut Context) ->
    /// impl Future<Output = Result<(), DispatchError>>`.
    ///
    /// Because no request type is declared, an inbound body (if any) is
    /// never decoded — a non-empty, non-`null` body on a route or topic
    /// bound to one of these handlers is simply ignored rather than
    /// rejected.
    pub fn new_no_request<F, Fut>(f: F) -> Self
    where
        F: Fn(&mut Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send,
    {
        Self::build(move |ctx: &mut Context, ()| f(ctx), false)
    }

    fn build<F, Fut, Req, Resp>(f: F, decode_request: bool) -> Self
    where
        F: Fn(&mut Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, DispatchError>> + Send,
        Req: DeserializeOwned + Default + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        Self {
            name: None,
            description: None,
            triggers: Vec::new(),
            middleware: Vec::new(),
            request_type_name: std::any::type_name::<Req>(),
            response_type_name: std::any::type_name::<Resp>(),
            declares_request: decode_request,
            invoke: std::sync::Arc::new(TypedInvoke {
                f,
                decode_request,
                _marker: std::marker::PhantomData::<(Req, Resp)>,
            }),
            validator: None,
        }
    }

    /// Give the handler an explicit name. If never called, the
    /// [`crate::registry::Registry`] assigns a deterministic
    /// `handler_<n>` at registration time.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a human-readable description, for diagnostics only.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Bind an HTTP trigger: `GET /hello/:name`-style route, with no
    /// per-route middleware refs; chain [`Handler::http_with`] for those.
    pub fn http(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.triggers
            .push(Trigger::Http(crate::trigger::HttpTrigger::new(method, path)));
        self
    }

    /// Bind an HTTP trigger built from a fully-specified
    /// [`crate::trigger::HttpTrigger`], including any per-route
    /// middleware refs.
    pub fn http_with(mut self, trigger: crate::trigger::HttpTrigger) -> Self {
        self.triggers.push(Trigger::Http(trigger));
        self
    }

    /// Bind a message trigger on `topic`, with every option at its
    /// default; chain `.configure_message` to adjust one.
    pub fn message(mut self, topic: impl Into<String>) -> Self {
        self.triggers
            .push(Trigger::Message(crate::trigger::MessageTrigger::new(topic)));
        self
    }

    /// Bind a message trigger built from a fully-specified
    /// [`crate::trigger::MessageTrigger`].
    pub fn message_with(mut self, trigger: crate::trigger::MessageTrigger) -> Self {
        self.triggers.push(Trigger::Message(trigger));
        self
    }

    /// Bind a cron trigger on `schedule`, with overlap disallowed and no
    /// duration cap; chain `.cron_with` for full control.
    pub fn cron(mut self, schedule: impl Into<String>) -> Self {
        self.triggers
            .push(Trigger::Cron(crate::trigger::CronTrigger::new(schedule)));
        self
    }

    /// Bind a cron trigger built from a fully-specified
    /// [`crate::trigger::CronTrigger`].
    pub fn cron_with(mut self, trigger: crate::trigger::CronTrigger) -> Self {
        self.triggers.push(Trigger::Cron(trigger));
        self
    }

    /// Bind a gRPC trigger (registry/uniqueness support only; no listener
    /// — see `DESIGN.md`).
    pub fn grpc(mut self, service: impl Into<String>, method: impl Into<String>) -> Self {
        self.triggers.push(Trigger::Grpc(crate::trigger::GrpcTrigger {
            service: service.into(),
            method: method.into(),
        }));
        self
    }

    /// Bind a legacy Kafka trigger, projected into the message index too.
    pub fn kafka(mut self, trigger: crate::trigger::KafkaTrigger) -> Self {
        self.triggers.push(Trigger::Kafka(trigger));
        self
    }

    /// Append middleware, run in registration order around this handler:
    /// the first one registered runs first.
    pub fn use_middleware(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    /// Opt this handler into request validation: once set, [`Handler::dispatch`]
    /// decodes the request body to JSON and runs `validator` against it
    /// before any middleware or the handler itself runs, short-circuiting
    /// with [`DispatchError::Validation`] on the first violation found.
    pub fn validate_with(mut self, validator: std::sync::Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// The handler's name, if one was set with [`Handler::named`].
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Every trigger bound to this handler.
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Middleware attached to this handler, in registration order.
    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    /// The human-readable description, if set.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The declared request type's name, for diagnostics.
    pub fn request_type_name(&self) -> &'static str {
        self.request_type_name
    }

    /// The declared response type's name, for diagnostics.
    pub fn response_type_name(&self) -> &'static str {
        self.response_type_name
    }

    /// Whether this handler declares a request type at all. `false` for
    /// handlers built with [`Handler::new_no_request`]; the request body,
    /// if any, is never decoded for those.
    pub fn declares_request(&self) -> bool {
        self.declares_request
    }

    /// Run this handler's middleware chain then the handler itself,
    /// against `ctx`. Used by [`crate::executor::Executor`].
    ///
    /// If [`Handler::validate_with`] was called, the request body is
    /// decoded to JSON and validated here first — before the middleware
    /// chain or the handler ever sees it — so a rejected request never
    /// reaches either.
    pub(crate) fn dispatch<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>> {
        let validator = self.validator.clone();
        let request_type_name = self.request_type_name;
        let invoke = self.invoke.clone();
        let middleware = &self.middleware;
        Box::pin(async move {
            if let Some(validator) = validator {
                let value: serde_json::Value = if ctx.request.body.is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_slice(&ctx.request.body)
                        .map_err(|e| DispatchError::Deserialization(e.to_string()))?
                };
                let violations = validator.validate(request_type_name, &value).await;
                if !violations.is_empty() {
                    return Err(DispatchError::Validation(violations));
                }
            }
            let next = Next::new(invoke, middleware);
            next.run(ctx).await
        })
    }
}

/// A panic caught while invoking a handler, converted into a
/// [`DispatchError::Internal`].
#[derive(Debug)]
struct HandlerPanic(String);

impl std::fmt::Display for HandlerPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler panicked: {}", self.0)
    }
}

impl std::error::Error for HandlerPanic {}

fn describe_panic(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Type-erased invocation: decode the request body, call the typed
/// handler, encode the response, all behind a uniform non-generic
/// signature so [`Handler`] can store one regardless of its `Req`/`Resp`.
pub(crate) trait ErasedInvoke: Send + Sync {
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>>;
}

struct TypedInvoke<F, Req, Resp> {
    f: F,
    /// `false` for handlers built via [`Handler::new_no_request`]: the
    /// request body is never decoded, regardless of its contents.
    decode_request: bool,
    _marker: std::marker::PhantomData<(Req, Resp)>,
}

impl<F, Req, Resp> Send for TypedInvoke<F, Req, Resp> where F: Send {}
impl<F, Req, Resp> Sync for TypedInvoke<F, Req, Resp> where F: Sync {}

impl<F, Fut, Req, Resp> ErasedInvoke for TypedInvoke<F, Req, Resp>
where
    F: Fn(&mut Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, DispatchError>> + Send,
    Req: DeserializeOwned + Default + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>> {
        Box::pin(async move {
            let req: Req = if !self.decode_request || ctx.request.body.is_empty() {
                Req::default()
            } else {
                serde_json::from_slice(&ctx.request.body)
                    .map_err(|e| DispatchError::Deserialization(e.to_string()))?
            };

            let outcome = AssertUnwindSafe((self.f)(ctx, req)).catch_unwind().await;

            let resp = match outcome {
                Ok(Ok(resp)) => resp,
                Ok(Err(err)) => return Err(err),
                Err(panic) => return Err(DispatchError::internal(HandlerPanic(describe_panic(panic)))),
            };

            // Encode first, then inspect the serialized value rather than
            // the Rust-side type kind. `()` and `Option::None` both encode
            // to JSON `null`; a `Some` or any concrete struct encodes to
            // something else.
            let value = serde_json::to_value(&resp)
                .map_err(|e| DispatchError::internal(ResponseEncodeError(e)))?;
            if !value.is_null() {
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| DispatchError::internal(ResponseEncodeError(e)))?;
                if ctx.response.status == 0 {
                    ctx.response.status = 200;
                }
                ctx.response.body = bytes;
                if !ctx.response.headers.contains("content-type") {
                    ctx.response.headers.set("Content-Type", "application/json");
                }
            }
            Ok(())
        })
    }
}

#[derive(Debug)]
struct ResponseEncodeError(serde_json::Error);

impl std::fmt::Display for ResponseEncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to encode handler response: {}", self.0)
    }
}

impl std::error::Error for ResponseEncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Deterministic `handler_<n>` numbering for handlers registered without
/// an explicit name.
static AUTO_NAME_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_auto_name() -> String {
    let n = AUTO_NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("handler_{n}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Default)]
    struct Greet {
        name: String,
    }

    #[derive(Serialize)]
    struct Greeting {
        greeting: String,
    }

    #[tokio::test]
    async fn handler_decodes_request_and_encodes_response() {
        let handler = Handler::new(|_ctx: &mut Context, req: Greet| async move {
            Ok::<_, DispatchError>(Greeting {
                greeting: format!("hello {}", req.name),
            })
        })
        .named("greet")
        .http("GET", "/hello/:name");

        let mut ctx = Context::empty();
        ctx.request.body = br#"{"name":"world"}"#.to_vec();
        handler.dispatch(&mut ctx).await.unwrap();

        assert_eq!(ctx.response.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&ctx.response.body).unwrap();
        assert_eq!(body["greeting"], "hello world");
    }

    #[tokio::test]
    async fn none_response_leaves_body_unset() {
        let handler = Handler::new(|_ctx: &mut Context, _req: ()| async move {
            Ok::<Option<Greeting>, DispatchError>(None)
        });

        let mut ctx = Context::empty();
        handler.dispatch(&mut ctx).await.unwrap();

        assert!(ctx.response.body.is_empty());
        assert_eq!(ctx.response.status, 0);
    }

    #[tokio::test]
    async fn no_request_handler_ignores_body() {
        let handler = Handler::new_no_request(|ctx: &mut Context| async move {
            ctx.success(&serde_json::json!({"ok": true}))
        });

        let mut ctx = Context::empty();
        handler.dispatch(&mut ctx).await.unwrap();
        assert_eq!(ctx.response.status, 200);
    }

    #[tokio::test]
    async fn no_request_handler_never_rejects_a_non_empty_body() {
        assert!(!Handler::new_no_request(|_ctx: &mut Context| async move { Ok(()) }).declares_request());

        let handler = Handler::new_no_request(|ctx: &mut Context| async move {
            ctx.success(&serde_json::json!({"ok": true}))
        });

        let mut ctx = Context::empty();
        ctx.request.body = br#"{"this": "is not unit"}"#.to_vec();
        handler.dispatch(&mut ctx).await.unwrap();
        assert_eq!(ctx.response.status, 200);
    }

    #[tokio::test]
    async fn panic_is_converted_to_internal_error() {
        let handler = Handler::new(|_ctx: &mut Context, _req: ()| async move {
            if true {
                panic!("boom");
            }
            #[allow(unreachable_code)]
            Ok::<(), DispatchError>(())
        });

        let mut ctx = Context::empty();
        let err = handler.dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::Internal(_)));
    }

    struct RejectAll;

    #[async_trait::async_trait]
    impl crate::capability::Validator for RejectAll {
        async fn validate(&self, _type_name: &str, _value: &serde_json::Value) -> Vec<crate::error::Violation> {
            vec![crate::error::Violation {
                field: "name".into(),
                message: "must not be empty".into(),
            }]
        }
    }

    #[tokio::test]
    async fn validate_with_short_circuits_before_handler_runs() {
        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let i = invoked.clone();
        let handler = Handler::new(move |_ctx: &mut Context, _req: Greet| {
            let i = i.clone();
            async move {
                i.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, DispatchError>(Greeting {
                    greeting: "unreachable".into(),
                })
            }
        })
        .validate_with(std::sync::Arc::new(RejectAll));

        let mut ctx = Context::empty();
        ctx.request.body = br#"{"name":""}"#.to_vec();
        let err = handler.dispatch(&mut ctx).await.unwrap_err();

        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn middleware_runs_in_registration_order() {
        let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();

        let mw_a: Middleware = std::sync::Arc::new(move |ctx: &mut Context, next: Next<'_>| {
            let o1 = o1.clone();
            Box::pin(async move {
                o1.lock().push("a-before");
                let r = next.run(ctx).await;
                o1.lock().push("a-after");
                r
            })
        });
        let mw_b: Middleware = std::sync::Arc::new(move |ctx: &mut Context, next: Next<'_>| {
            let o2 = o2.clone();
            Box::pin(async move {
                o2.lock().push("b-before");
                let r = next.run(ctx).await;
                o2.lock().push("b-after");
                r
            })
        });

        let handler = Handler::new_no_request(|_ctx| async move { Ok(()) })
            .use_middleware(mw_a)
            .use_middleware(mw_b);

        let mut ctx = Context::empty();
        handler.dispatch(&mut ctx).await.unwrap();

        assert_eq!(
            *order.lock(),
            vec!["a-before", "b-before", "b-after", "a-after"]
        );
    }
}
