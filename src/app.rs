//! App Orchestrator: ties configuration, trigger adapters, and
//! graceful shutdown together into one lifecycle — Configure, Start,
//! Wait, Shutdown.
//!
//! Built on [`crate::shutdown::GracefulShutdown`]: every adapter is
//! handed a child of [`GracefulShutdown::root_cancellation_token`] and
//! every acquired [`crate::context::Context`] gets its own cancellation
//! derived from the same root, so one call to [`App::shutdown`] reaches
//! every in-flight dispatch.

use std::{any::Any, collections::HashMap, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    capability::{AppAdapters, Broker, Cache, Database, Logger},
    context::ContextPool,
    error::DispatchError,
    executor::Executor,
    handler::Handler,
    registry::{Registry, RegistryError},
    shutdown::GracefulShutdown,
};

#[cfg(feature = "http")]
use crate::adapters::http::{HttpAdapter, HttpAdapterConfig, HttpAdapterError};
#[cfg(feature = "broker")]
use crate::adapters::broker::{BrokerAdapter, BrokerAdapterConfig, BrokerAdapterError};
#[cfg(feature = "cron")]
use crate::adapters::cron::{CronAdapter, CronAdapterConfig, CronAdapterError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A user-registered service (database connection, file handle, ...) that
/// can be closed at shutdown if it implements a closable capability.
#[async_trait]
pub trait Closable: Send + Sync {
    /// Release the service's resources. Best-effort: a failure here is
    /// logged, not propagated, so one misbehaving service can't block
    /// the rest of shutdown.
    async fn close(&self) -> Result<(), DispatchError>;
}

type StartupHook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync>;
type StopHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Failure modes surfaced by [`App::start`]/[`App::wait`].
#[derive(Debug)]
pub enum AppError {
    /// A startup hook failed; this aborts before any adapter is bound.
    Startup(DispatchError),
    /// Two or more services declare a dependency cycle.
    CyclicDependency(Vec<String>),
    /// A named service referenced as a dependency was never added.
    UnknownService(String),
    /// The HTTP adapter failed.
    #[cfg(feature = "http")]
    Http(HttpAdapterError),
    /// The broker adapter failed.
    #[cfg(feature = "broker")]
    Broker(BrokerAdapterError),
    /// The cron adapter failed.
    #[cfg(feature = "cron")]
    Cron(CronAdapterError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Startup(e) => write!(f, "startup hook failed: {e}"),
            AppError::CyclicDependency(cycle) => {
                write!(f, "service dependency cycle: {}", cycle.join(" -> "))
            }
            AppError::UnknownService(name) => write!(f, "unknown service dependency: {name}"),
            #[cfg(feature = "http")]
            AppError::Http(e) => write!(f, "{e}"),
            #[cfg(feature = "broker")]
            AppError::Broker(e) => write!(f, "{e}"),
            #[cfg(feature = "cron")]
            AppError::Cron(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AppError {}

/// How a multi-service [`App`] maps services onto HTTP/broker adapters.
#[derive(Debug, Clone, Copy, Default)]
pub enum PortStrategy {
    /// One registry, one HTTP adapter, one broker adapter, across every
    /// service. Use the App's own `register`/capability setters as usual;
    /// services added via [`App::add_service`] only affect logging order.
    #[default]
    Shared,
    /// One adapter pair per service, bound to `base_port + offset` (offset
    /// = the service's position in dependency-resolved startup order),
    /// with consumer group `<base_port>-<service>`.
    Separate {
        /// The first port; later services in startup order get
        /// `base_port + 1`, `+2`, and so on.
        base_port: u16,
    },
}

/// One named service in a multi-service [`App`].
///
/// Because [`Handler`] is deliberately not `Clone` and the [`Registry`]
/// has no API to carve a subset back out after registration, a service's
/// handlers are registered directly into the [`Registry`] the caller
/// builds for it, rather than filtered out of one shared registry after
/// the fact.
pub struct ServiceDef {
    name: String,
    registry: Arc<Registry>,
    depends_on: Vec<String>,
}

impl ServiceDef {
    /// Declare a service named `name`, backed by its own `registry`, with
    /// no declared dependencies.
    pub fn new(name: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            name: name.into(),
            registry,
            depends_on: Vec::new(),
        }
    }

    /// Declare that this service must start after `service`.
    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on.push(service.into());
        self
    }
}

/// Caller-supplied configuration for one [`App`].
#[derive(Default)]
pub struct AppConfig {
    /// HTTP adapter configuration. `None` disables the HTTP adapter
    /// regardless of what's registered.
    #[cfg(feature = "http")]
    pub http: Option<HttpAdapterConfig>,
    /// Whether the broker adapter is enabled at all. The broker adapter
    /// only starts when this is true, a broker is set, and the registry
    /// has at least one message handler.
    #[cfg(feature = "broker")]
    pub broker_enabled: bool,
    /// Broker adapter configuration.
    #[cfg(feature = "broker")]
    pub broker: BrokerAdapterConfig,
    /// Whether the cron adapter is enabled.
    #[cfg(feature = "cron")]
    pub cron_enabled: bool,
    /// Cron adapter configuration.
    #[cfg(feature = "cron")]
    pub cron: CronAdapterConfig,
    /// How multi-service startup maps services onto ports. Only consulted
    /// when at least one [`ServiceDef`] has been added via
    /// [`App::add_service`]; ignored for the default shared registry.
    #[cfg(any(feature = "http", feature = "broker"))]
    pub port_strategy: PortStrategy,
}

impl AppConfig {
    /// A config with every adapter disabled; enable what's needed with
    /// the `with_*`/`enable_*` builders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the HTTP adapter with the given configuration.
    #[cfg(feature = "http")]
    pub fn with_http(mut self, config: HttpAdapterConfig) -> Self {
        self.http = Some(config);
        self
    }

    /// Enable the broker adapter.
    #[cfg(feature = "broker")]
    pub fn enable_broker(mut self) -> Self {
        self.broker_enabled = true;
        self
    }

    /// Enable the broker adapter with explicit configuration.
    #[cfg(feature = "broker")]
    pub fn with_broker(mut self, config: BrokerAdapterConfig) -> Self {
        self.broker_enabled = true;
        self.broker = config;
        self
    }

    /// Enable the cron adapter.
    #[cfg(feature = "cron")]
    pub fn enable_cron(mut self) -> Self {
        self.cron_enabled = true;
        self
    }

    /// Enable the cron adapter with explicit configuration.
    #[cfg(feature = "cron")]
    pub fn with_cron(mut self, config: CronAdapterConfig) -> Self {
        self.cron_enabled = true;
        self.cron = config;
        self
    }

    /// Set how multi-service startup maps services onto ports. Defaults
    /// to [`PortStrategy::Shared`].
    #[cfg(any(feature = "http", feature = "broker"))]
    pub fn with_port_strategy(mut self, strategy: PortStrategy) -> Self {
        self.port_strategy = strategy;
        self
    }
}

/// Owns the [`AppAdapters`], the user-service registry, the [`Registry`]
/// of handlers, and the set of trigger adapters this process runs.
pub struct App {
    config: AppConfig,
    registry: Arc<Registry>,
    pool: Arc<ContextPool>,
    executor: Arc<Executor>,
    adapters: Mutex<AppAdapters>,
    services: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    closable: Mutex<Vec<Arc<dyn Closable>>>,
    startup_hooks: Mutex<Vec<StartupHook>>,
    stop_hooks: Mutex<Vec<StopHook>>,
    service_defs: Mutex<Vec<ServiceDef>>,
    shutdown: Arc<GracefulShutdown>,
    adapter_handles: Mutex<Vec<JoinHandle<Result<(), AppError>>>>,
}

impl App {
    /// An app configured to run the adapters `config` enables, with no
    /// handlers, capabilities, or hooks registered yet.
    pub fn new(config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: Arc::new(Registry::new()),
            pool: ContextPool::new(),
            executor: Arc::new(Executor::new()),
            adapters: Mutex::new(AppAdapters::new()),
            services: Mutex::new(HashMap::new()),
            closable: Mutex::new(Vec::new()),
            startup_hooks: Mutex::new(Vec::new()),
            stop_hooks: Mutex::new(Vec::new()),
            service_defs: Mutex::new(Vec::new()),
            shutdown: Arc::new(GracefulShutdown::new()),
            adapter_handles: Mutex::new(Vec::new()),
        })
    }

    // -- Configure ---------------------------------------------------------

    /// Register a handler into this app's default (shared-mode) registry.
    pub fn register(&self, handler: Handler) -> Result<Arc<Handler>, RegistryError> {
        self.registry.register(handler)
    }

    /// The shared registry every `register`ed handler lands in.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Add a named service for multi-service [`PortStrategy::Separate`]
    /// startup.
    pub fn add_service(&self, service: ServiceDef) {
        self.service_defs.lock().push(service);
    }

    /// Set the default database implementation.
    pub fn set_database(&self, db: Arc<dyn Database>) {
        self.adapters.lock().database.set_default(db);
    }

    /// Set a named database implementation.
    pub fn set_database_named(&self, name: impl Into<String>, db: Arc<dyn Database>) {
        self.adapters.lock().database.set_named(name, db);
    }

    /// Set the default cache implementation.
    pub fn set_cache(&self, cache: Arc<dyn Cache>) {
        self.adapters.lock().cache.set_default(cache);
    }

    /// Set a named cache implementation.
    pub fn set_cache_named(&self, name: impl Into<String>, cache: Arc<dyn Cache>) {
        self.adapters.lock().cache.set_named(name, cache);
    }

    /// Set the default logger implementation.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        self.adapters.lock().logger.set_default(logger);
    }

    /// Set a named logger implementation.
    pub fn set_logger_named(&self, name: impl Into<String>, logger: Arc<dyn Logger>) {
        self.adapters.lock().logger.set_named(name, logger);
    }

    /// Set the default broker implementation.
    pub fn set_broker(&self, broker: Arc<dyn Broker>) {
        self.adapters.lock().broker.set_default(broker);
    }

    /// Set a named broker implementation.
    pub fn set_broker_named(&self, name: impl Into<String>, broker: Arc<dyn Broker>) {
        self.adapters.lock().broker.set_named(name, broker);
    }

    /// Set the default metrics implementation.
    pub fn set_metrics(&self, metrics: Arc<dyn crate::capability::Metrics>) {
        self.adapters.lock().metrics.set_default(metrics);
    }

    /// Set the default tracer implementation.
    pub fn set_tracer(&self, tracer: Arc<dyn crate::capability::Tracer>) {
        self.adapters.lock().tracer.set_default(tracer);
    }

    /// Set the default validator implementation.
    pub fn set_validator(&self, validator: Arc<dyn crate::capability::Validator>) {
        self.adapters.lock().validator.set_default(validator);
    }

    /// Register an app-wide user service under `name`, retrievable later
    /// by type through [`App::service`].
    pub fn register_service<T: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<T>) {
        self.services
            .lock()
            .insert(name.into(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Register an app-wide user service that should be closed at
    /// shutdown.
    pub fn register_closable_service<T>(&self, name: impl Into<String>, service: Arc<T>)
    where
        T: Any + Send + Sync + Closable,
    {
        self.closable.lock().push(service.clone());
        self.services
            .lock()
            .insert(name.into(), service as Arc<dyn Any + Send + Sync>);
    }

    /// Look up a registered user service by name and type.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .lock()
            .get(name)
            .cloned()
            .and_then(|svc| svc.downcast::<T>().ok())
    }

    /// Append a startup hook, run in registration order during
    /// [`App::start`] before any adapter is bound.
    pub fn on_startup<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DispatchError>> + Send + 'static,
    {
        self.startup_hooks.lock().push(Arc::new(move || Box::pin(hook())));
    }

    /// Append a stop hook, run during [`App::shutdown`]. Every stop hook
    /// runs regardless of whether an earlier one failed.
    pub fn on_stop<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop_hooks.lock().push(Arc::new(move || Box::pin(hook())));
    }

    /// A child of the root cancellation token, the same one every
    /// [`crate::context::Context`] this app acquires derives from.
    pub fn cancellation_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown.root_cancellation_token()
    }

    // -- Start ---------------------------------------------------------------

    /// Run startup hooks in order (aborting on the first failure), then
    /// spawn every adapter this registry's contents and `config` enable.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        self.run_startup_hooks().await?;

        let root = self.shutdown.root_cancellation_token();
        let snapshot = Arc::new(self.adapters.lock().clone());
        let mut handles = Vec::new();

        #[cfg(feature = "http")]
        if let Some(http_config) = self.config.http.clone() {
            if self.registry.has_http() {
                let adapter = Arc::new(HttpAdapter::new(
                    http_config,
                    self.registry.clone(),
                    self.pool.clone(),
                    Some(snapshot.clone()),
                    self.executor.clone(),
                ));
                tracing::info!(address = %adapter.address(), "binding HTTP adapter");
                let shutdown = root.child_token();
                handles.push(tokio::spawn(async move {
                    adapter.serve(shutdown).await.map_err(AppError::Http)
                }));
            }
        }

        #[cfg(feature = "broker")]
        if self.config.broker_enabled && self.registry.has_message() {
            if let Some(broker) = snapshot.broker.default() {
                let adapter = Arc::new(BrokerAdapter::new(
                    self.config.broker.clone(),
                    self.registry.clone(),
                    self.pool.clone(),
                    Some(snapshot.clone()),
                    self.executor.clone(),
                    broker,
                ));
                tracing::info!("binding broker adapter");
                let shutdown = root.child_token();
                handles.push(tokio::spawn(async move {
                    adapter.serve(shutdown).await.map_err(AppError::Broker)
                }));
            }
        }

        #[cfg(feature = "cron")]
        if self.config.cron_enabled && self.registry.has_cron() {
            let adapter = Arc::new(CronAdapter::new(
                self.config.cron.clone(),
                self.registry.clone(),
                self.pool.clone(),
                Some(snapshot.clone()),
                self.executor.clone(),
            ));
            tracing::info!("binding cron adapter");
            let shutdown = root.child_token();
            handles.push(tokio::spawn(async move {
                adapter.serve(shutdown).await.map_err(AppError::Cron)
            }));
        }

        // Multi-service "separate" adapters, one pair per declared service,
        // bound alongside whatever the default registry enabled above.
        self.start_services(&snapshot, &root, &mut handles).await?;

        *self.adapter_handles.lock() = handles;
        Ok(())
    }

    #[cfg(any(feature = "http", feature = "broker"))]
    async fn start_services(
        &self,
        snapshot: &Arc<AppAdapters>,
        root: &tokio_util::sync::CancellationToken,
        handles: &mut Vec<JoinHandle<Result<(), AppError>>>,
    ) -> Result<(), AppError> {
        let defs = self.service_defs.lock();
        if defs.is_empty() {
            return Ok(());
        }
        let order = topological_order(&defs)?;
        let base_port = self.separate_base_port();

        for (offset, name) in order.iter().enumerate() {
            let def = defs.iter().find(|d| &d.name == name).expect("name from topo order");
            let port = base_port.map(|base| base + offset as u16);

            #[cfg(feature = "http")]
            if let (Some(port), true) = (port, def.registry.has_http()) {
                let http_config = HttpAdapterConfig::new("0.0.0.0", port);
                let adapter = Arc::new(HttpAdapter::new(
                    http_config,
                    def.registry.clone(),
                    self.pool.clone(),
                    Some(snapshot.clone()),
                    self.executor.clone(),
                ));
                tracing::info!(service = %name, address = %adapter.address(), "binding per-service HTTP adapter");
                let shutdown = root.child_token();
                handles.push(tokio::spawn(async move {
                    adapter.serve(shutdown).await.map_err(AppError::Http)
                }));
            }

            #[cfg(feature = "broker")]
            if def.registry.has_message() {
                if let Some(broker) = snapshot.broker.default() {
                    let group = base_port
                        .map(|base| format!("{base}-{name}"))
                        .unwrap_or_else(|| name.clone());
                    let broker_config = BrokerAdapterConfig::new().with_default_group(group);
                    let adapter = Arc::new(BrokerAdapter::new(
                        broker_config,
                        def.registry.clone(),
                        self.pool.clone(),
                        Some(snapshot.clone()),
                        self.executor.clone(),
                        broker,
                    ));
                    tracing::info!(service = %name, "binding per-service broker adapter");
                    let shutdown = root.child_token();
                    handles.push(tokio::spawn(async move {
                        adapter.serve(shutdown).await.map_err(AppError::Broker)
                    }));
                }
            }
        }
        Ok(())
    }

    #[cfg(not(any(feature = "http", feature = "broker")))]
    async fn start_services(
        &self,
        _snapshot: &Arc<AppAdapters>,
        _root: &tokio_util::sync::CancellationToken,
        _handles: &mut Vec<JoinHandle<Result<(), AppError>>>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    #[cfg(any(feature = "http", feature = "broker"))]
    fn separate_base_port(&self) -> Option<u16> {
        match self.config.port_strategy {
            PortStrategy::Shared => None,
            PortStrategy::Separate { base_port } => Some(base_port),
        }
    }

    async fn run_startup_hooks(&self) -> Result<(), AppError> {
        let hooks = self.startup_hooks.lock().clone();
        for hook in hooks {
            hook().await.map_err(AppError::Startup)?;
        }
        Ok(())
    }

    // -- Wait ------------------------------------------------------------

    /// Block until either a termination signal arrives or a running
    /// adapter errors, whichever happens first.
    pub async fn wait(self: &Arc<Self>) {
        let handles = std::mem::take(&mut *self.adapter_handles.lock());
        if handles.is_empty() {
            self.shutdown.wait().await;
            return;
        }

        let mut adapters = futures::stream::FuturesUnordered::new();
        for handle in handles {
            adapters.push(handle);
        }

        tokio::select! {
            _ = self.shutdown.wait() => {}
            Some(result) = futures::StreamExt::next(&mut adapters) => {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::error!(error = %err, "adapter exited with an error"),
                    Err(err) => tracing::error!(error = %err, "adapter task panicked"),
                }
                self.shutdown.shutdown();
            }
        }

        // Drain any remaining adapters so their own shutdown paths run to
        // completion before the caller proceeds to `App::shutdown`.
        while let Some(result) = futures::StreamExt::next(&mut adapters).await {
            if let Ok(Err(err)) = result {
                tracing::warn!(error = %err, "adapter exited with an error during drain");
            }
        }
    }

    // -- Shutdown ----------------------------------------------------------

    /// Cancel the root context, run stop hooks (continuing past
    /// individual failures), close closable user services, and
    /// best-effort close every capability.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutdown.shutdown();

        for hook in self.stop_hooks.lock().clone() {
            hook().await;
        }

        for service in self.closable.lock().drain(..).collect::<Vec<_>>() {
            if let Err(err) = service.close().await {
                tracing::warn!(error = %err, "closable service failed to close");
            }
        }

        let adapters = self.adapters.lock().clone();
        if let Some(db) = adapters.database.default() {
            if let Err(err) = db.close().await {
                tracing::warn!(error = %err, "database failed to close");
            }
        }
        if let Some(cache) = adapters.cache.default() {
            if let Err(err) = cache.close().await {
                tracing::warn!(error = %err, "cache failed to close");
            }
        }
        if let Some(broker) = adapters.broker.default() {
            if let Err(err) = broker.disconnect().await {
                tracing::warn!(error = %err, "broker failed to disconnect");
            }
        }
        if let Some(logger) = adapters.logger.default() {
            logger.sync().await;
        }
        if let Some(tracer) = adapters.tracer.default() {
            tracer.close().await;
        }

        tracing::info!("app shutdown complete");
    }
}

/// Kahn's algorithm over declared `depends_on` edges; returns service
/// names in an order where every dependency precedes its dependents.
/// Rejects a cycle by returning the names still unresolved when no more
/// progress can be made.
fn topological_order(services: &[ServiceDef]) -> Result<Vec<String>, AppError> {
    let names: std::collections::HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
    for service in services {
        for dep in &service.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(AppError::UnknownService(dep.clone()));
            }
        }
    }

    let mut remaining: Vec<&ServiceDef> = services.iter().collect();
    let mut resolved: Vec<String> = Vec::new();
    let mut resolved_names: std::collections::HashSet<String> = std::collections::HashSet::new();

    while !remaining.is_empty() {
        let ready_index = remaining
            .iter()
            .position(|s| s.depends_on.iter().all(|d| resolved_names.contains(d)));

        match ready_index {
            Some(index) => {
                let service = remaining.remove(index);
                resolved_names.insert(service.name.clone());
                resolved.push(service.name.clone());
            }
            None => {
                return Err(AppError::CyclicDependency(
                    remaining.iter().map(|s| s.name.clone()).collect(),
                ));
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn topological_order_respects_dependencies() {
        let services = vec![
            ServiceDef::new("b", Arc::new(Registry::new())).depends_on("a"),
            ServiceDef::new("a", Arc::new(Registry::new())),
            ServiceDef::new("c", Arc::new(Registry::new())).depends_on("b"),
        ];
        let order = topological_order(&services).unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn topological_order_rejects_cycles() {
        let services = vec![
            ServiceDef::new("a", Arc::new(Registry::new())).depends_on("b"),
            ServiceDef::new("b", Arc::new(Registry::new())).depends_on("a"),
        ];
        let err = topological_order(&services).unwrap_err();
        assert!(matches!(err, AppError::CyclicDependency(_)));
    }

    #[test]
    fn topological_order_rejects_unknown_dependency() {
        let services = vec![ServiceDef::new("a", Arc::new(Registry::new())).depends_on("ghost")];
        let err = topological_order(&services).unwrap_err();
        assert!(matches!(err, AppError::UnknownService(_)));
    }

    #[tokio::test]
    async fn startup_hook_failure_aborts_before_binding_adapters() {
        let app = App::new(AppConfig::new());
        app.on_startup(|| async { Err(DispatchError::internal(std::io::Error::new(std::io::ErrorKind::Other, "boom"))) });
        let err = app.start().await.unwrap_err();
        assert!(matches!(err, AppError::Startup(_)));
    }

    #[tokio::test]
    async fn stop_hooks_run_on_shutdown_even_after_failures() {
        let app = App::new(AppConfig::new());
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        app.on_stop(move || {
            let r = r.clone();
            async move {
                r.store(true, Ordering::SeqCst);
            }
        });
        app.start().await.unwrap();
        app.shutdown().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn registered_handler_is_reachable_through_the_app_registry() {
        let app = App::new(AppConfig::new());
        app.register(Handler::new_no_request(|_ctx: &mut Context| async move { Ok(()) }).named("h"))
            .unwrap();
        assert!(app.registry().by_name("h").is_some());
    }

    #[cfg(any(feature = "http", feature = "broker"))]
    #[test]
    fn shared_port_strategy_has_no_base_port() {
        let app = App::new(AppConfig::new());
        assert_eq!(app.separate_base_port(), None);
    }

    #[cfg(any(feature = "http", feature = "broker"))]
    #[test]
    fn separate_port_strategy_reports_its_configured_base_port() {
        let app = App::new(AppConfig::new().with_port_strategy(PortStrategy::Separate { base_port: 9000 }));
        assert_eq!(app.separate_base_port(), Some(9000));
    }

    #[cfg(feature = "broker")]
    #[tokio::test]
    async fn separate_mode_names_the_per_service_group_base_dash_service() {
        use crate::testkit::InMemoryBroker;
        use crate::trigger::MessageTrigger;

        let app = App::new(
            AppConfig::new()
                .enable_broker()
                .with_port_strategy(PortStrategy::Separate { base_port: 9000 }),
        );
        app.set_broker(InMemoryBroker::new());

        let service_registry = Arc::new(Registry::new());
        service_registry
            .register(
                Handler::new_no_request(|_ctx: &mut Context| async move { Ok(()) })
                    .named("handle-order")
                    .message_with(MessageTrigger::new("orders")),
            )
            .unwrap();
        app.add_service(ServiceDef::new("orders-service", service_registry));

        app.start().await.unwrap();
        app.shutdown().await;
    }
}
