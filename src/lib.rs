//! # dispatchcore
//!
//! A trigger-agnostic handler dispatch runtime: write a handler once,
//! bind it to any mix of HTTP routes, broker topics, cron schedules, or
//! gRPC methods, and let one [`executor::Executor`] drive it regardless
//! of which trigger fired.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dispatchcore::prelude::*;
//! use dispatchcore::adapters::http::HttpAdapterConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = App::new(AppConfig::new().with_http(HttpAdapterConfig::new("0.0.0.0", 8080)));
//!
//!     app.register(
//!         Handler::new_no_request(|ctx| async move { ctx.success(&serde_json::json!({"ok": true})) })
//!             .named("health")
//!             .http("GET", "/health"),
//!     )
//!     .expect("register health handler");
//!
//!     app.start().await.expect("start");
//!     app.wait().await;
//!     app.shutdown().await;
//! }
//! ```
//!
//! ## Layout
//!
//! - [`capability`]: the abstract contracts (database, cache, logger,
//!   broker, metrics, tracer, validator) the core depends on instead of
//!   any concrete implementation.
//! - [`context`]: the per-invocation [`context::Context`] and its pool.
//! - [`handler`] / [`trigger`] / [`registry`]: a [`handler::Handler`]'s
//!   request/response shape, the [`trigger::Trigger`] kinds it can be
//!   bound to, and the catalog that indexes them.
//! - [`executor`]: drives a [`handler::Handler`] against a [`context::Context`].
//! - [`adapters`]: trigger dispatch adapters (HTTP, broker, cron) that
//!   turn external events into executor calls.
//! - [`resilience`]: circuit breaker, retry, bulkhead, timeout — generic
//!   over any caller error type, usable inside or outside a handler.
//! - [`app`]: the orchestrator tying configuration, adapters, and
//!   graceful shutdown together.
//! - [`testkit`]: in-memory fakes for tests (`InMemoryBroker`,
//!   `MemoryCache`, `NullLogger`, `NullTracer`, `NullValidator`).

#![deny(missing_docs)]
#![deny(unsafe_code)]

/// Trigger dispatch adapters.
pub mod adapters;
/// App Orchestrator.
pub mod app;
/// Capability contracts.
pub mod capability;
/// Per-invocation Context and its pool.
pub mod context;
/// Framework-wide error taxonomy.
pub mod error;
/// Executor: drives a Handler against a Context.
pub mod executor;
/// Handler descriptors and the trigger/middleware builder API.
pub mod handler;
/// Authenticated-principal type attached to a Context.
pub mod identity;
/// Name- and trigger-indexed handler catalog.
pub mod registry;
/// Resilience primitives: circuit breaker, retry, bulkhead, timeout.
pub mod resilience;
/// Graceful shutdown utilities.
pub mod shutdown;
/// In-memory fakes for tests.
pub mod testkit;
/// Trigger variants bindable to a Handler.
pub mod trigger;

/// Convenient imports for building a `dispatchcore` application.
pub mod prelude {
    pub use crate::app::{App, AppConfig};
    pub use crate::capability::{AppAdapters, Broker, Cache, Database, Logger, Metrics, Tracer, Validator};
    pub use crate::context::Context;
    pub use crate::error::{DispatchError, DispatchResult, HandlerError};
    pub use crate::executor::Executor;
    pub use crate::handler::Handler;
    pub use crate::registry::{Registry, RegistryError};
    pub use crate::trigger::{CronTrigger, HttpTrigger, MessageTrigger, Trigger};
}
