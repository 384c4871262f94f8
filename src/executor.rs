//! The middleware-chained invoker every trigger adapter drives a
//! [`Handler`] through.
//!
//! Handler-level middleware (attached via
//! [`crate::handler::Handler::use_middleware`]) already runs inside
//! [`Handler::dispatch`](crate::handler::Handler); the [`Executor`] adds a
//! second, adapter-level chain (recovery middleware, per-adapter
//! instrumentation) wrapped *around* that, and owns the
//! `tracing` span every invocation runs inside.

use std::{pin::Pin, sync::Arc};

use tracing::Instrument;

use crate::{
    context::Context,
    error::DispatchError,
    handler::{ErasedInvoke, Handler, Middleware, Next},
};

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Runs a [`Handler`] against a [`Context`], wrapped in an adapter-level
/// middleware chain and a per-invocation tracing span.
#[derive(Clone, Default)]
pub struct Executor {
    middleware: Vec<Middleware>,
}

impl Executor {
    /// An executor with no adapter-level middleware.
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Append adapter-level middleware, run in registration order around
    /// every handler this executor dispatches.
    pub fn use_middleware(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    /// Run `handler` against `ctx`: adapter-level chain, then
    /// [`Handler::dispatch`] (which itself runs the handler's own
    /// middleware, decodes the request, invokes the handler, and encodes
    /// the response).
    pub async fn execute(&self, handler: &Arc<Handler>, ctx: &mut Context) -> Result<(), DispatchError> {
        self.execute_with_refs(handler, ctx, &[]).await
    }

    /// Like [`Executor::execute`], but with additional middleware
    /// (resolved trigger-level refs, e.g. [`crate::trigger::HttpTrigger::middleware_refs`])
    /// run outermost, ahead of this executor's own adapter-level chain.
    pub async fn execute_with_refs(
        &self,
        handler: &Arc<Handler>,
        ctx: &mut Context,
        extra: &[Middleware],
    ) -> Result<(), DispatchError> {
        let span = tracing::info_span!(
            "dispatch",
            trigger = %ctx.request.trigger_kind,
            handler = handler.name().unwrap_or("unnamed"),
        );
        async move {
            let inner: Arc<dyn ErasedInvoke> = Arc::new(DispatchHandler(handler.clone()));
            let mut chain = extra.to_vec();
            chain.extend(self.middleware.iter().cloned());
            let next = Next::new(inner, &chain);
            let result = next.run(ctx).await;
            match &result {
                Ok(()) => tracing::debug!(status = ctx.response.status, "dispatch completed"),
                Err(err) => tracing::warn!(error = %err, "dispatch failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Adapts an owned `Arc<Handler>` (so it satisfies `ErasedInvoke`'s
/// implicit `'static` bound) into the same erased-invoke seam
/// [`crate::handler::Handler`] uses internally for its own middleware
/// chain, letting [`Executor`]'s adapter-level chain and the handler's own
/// chain compose through one `Next`.
struct DispatchHandler(Arc<Handler>);

impl ErasedInvoke for DispatchHandler {
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), DispatchError>> {
        self.0.dispatch(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[tokio::test]
    async fn executes_handler_through_adapter_middleware() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o = order.clone();
        let mw: Middleware = Arc::new(move |ctx: &mut Context, next| {
            let o = o.clone();
            Box::pin(async move {
                o.lock().push("adapter-before");
                let r = next.run(ctx).await;
                o.lock().push("adapter-after");
                r
            })
        });

        let handler = Arc::new(
            Handler::new_no_request(|ctx: &mut Context| async move { ctx.success(&serde_json::json!({})) })
                .named("h"),
        );
        let executor = Executor::new().use_middleware(mw);

        let mut ctx = Context::empty();
        executor.execute(&handler, &mut ctx).await.unwrap();

        assert_eq!(ctx.response.status, 200);
        assert_eq!(*order.lock(), vec!["adapter-before", "adapter-after"]);
    }

    #[tokio::test]
    async fn extra_refs_run_outermost_ahead_of_adapter_middleware() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mk = |label: &'static str, order: Arc<parking_lot::Mutex<Vec<&'static str>>>| -> Middleware {
            Arc::new(move |ctx: &mut Context, next| {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().push(label);
                    next.run(ctx).await
                })
            })
        };

        let handler = Arc::new(Handler::new_no_request(|_ctx: &mut Context| async move { Ok(()) }));
        let executor = Executor::new().use_middleware(mk("adapter", order.clone()));
        let refs = vec![mk("route-ref", order.clone())];

        let mut ctx = Context::empty();
        executor.execute_with_refs(&handler, &mut ctx, &refs).await.unwrap();

        assert_eq!(*order.lock(), vec!["route-ref", "adapter"]);
    }

    #[tokio::test]
    async fn propagates_handler_errors() {
        let handler = Arc::new(Handler::new_no_request(|_ctx: &mut Context| async move {
            Err(DispatchError::NotFound("thing".into()))
        }));
        let executor = Executor::new();
        let mut ctx = Context::empty();
        let err = executor.execute(&handler, &mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}
