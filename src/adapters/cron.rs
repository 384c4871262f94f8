//! Cron trigger adapter: parses each [`crate::trigger::CronTrigger`]'s
//! expression, schedules its next fire, and drives the
//! [`Executor`] when it arrives.
//!
//! Built on the `cron` + `chrono`(`-tz`) crate pairing for expression
//! parsing against a wall-clock timezone; each schedule runs its own
//! `select! { sleep, cancel }` / recompute-next-on-wake loop, with
//! `allow-overlap` and `max-duration` layered on top.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    capability::AppAdapters,
    context::{ContextPool, TriggerKind},
    executor::Executor,
    handler::Handler,
    registry::Registry,
    trigger::Trigger,
};

/// Configuration for one [`CronAdapter`] instance.
#[derive(Clone, Default)]
pub struct CronAdapterConfig {
    /// Fallback IANA timezone for triggers that don't name one.
    /// `None` (the default) resolves to UTC, matching
    /// [`crate::trigger::CronTrigger`]'s own documented default.
    pub default_timezone: Option<String>,
}

impl CronAdapterConfig {
    /// A config with no adapter-level default timezone (falls back to UTC).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the adapter-level default timezone.
    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = Some(timezone.into());
        self
    }
}

/// Failure modes surfaced by [`CronAdapter::serve`] itself. A handler
/// whose own schedule expression fails to parse does not abort the
/// adapter — it is logged and that handler simply never fires (see
/// `run_schedule`).
#[derive(Debug)]
pub enum CronAdapterError {
    /// One of the spawned per-handler schedule tasks panicked.
    SchedulePanicked(String),
}

impl std::fmt::Display for CronAdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronAdapterError::SchedulePanicked(msg) => write!(f, "cron schedule task panicked: {msg}"),
        }
    }
}

impl std::error::Error for CronAdapterError {}

/// Drives every cron-triggered handler in a [`Registry`] off its own
/// schedule.
pub struct CronAdapter {
    config: CronAdapterConfig,
    registry: Arc<Registry>,
    pool: Arc<ContextPool>,
    app: Option<Arc<AppAdapters>>,
    executor: Arc<Executor>,
    fire_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CronAdapter {
    /// Build an adapter over the given registry and context pool.
    pub fn new(
        config: CronAdapterConfig,
        registry: Arc<Registry>,
        pool: Arc<ContextPool>,
        app: Option<Arc<AppAdapters>>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            config,
            registry,
            pool,
            app,
            executor,
            fire_handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one schedule-driving task per cron trigger, then block until
    /// `shutdown` fires; every task observes the same token and exits
    /// promptly once it does.
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), CronAdapterError> {
        let mut handles = Vec::new();
        for handler in self.registry.cron_handlers() {
            for trigger in handler.triggers() {
                if let Trigger::Cron(cron_trigger) = trigger {
                    let this = Arc::clone(&self);
                    let handler = handler.clone();
                    let cron_trigger = cron_trigger.clone();
                    let shutdown = shutdown.clone();
                    handles.push(tokio::spawn(async move {
                        this.run_schedule(handler, cron_trigger, shutdown).await;
                    }));
                }
            }
        }
        tracing::info!(schedules = handles.len(), "cron adapter scheduled handlers");

        shutdown.cancelled().await;
        tracing::info!("cron adapter shutting down, draining fires in flight");

        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "cron schedule task ended abnormally");
            }
        }
        for handle in std::mem::take(&mut *self.fire_handles.lock()) {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "cron fire task ended abnormally");
            }
        }
        Ok(())
    }

    async fn run_schedule(
        self: Arc<Self>,
        handler: Arc<Handler>,
        trigger: crate::trigger::CronTrigger,
        shutdown: CancellationToken,
    ) {
        let schedule: cron::Schedule = match trigger.schedule.parse() {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::error!(
                    schedule = %trigger.schedule,
                    error = %err,
                    handler = handler.name().unwrap_or("unnamed"),
                    "invalid cron expression, handler will never fire"
                );
                return;
            }
        };
        let timezone = resolve_timezone(
            trigger
                .timezone
                .as_deref()
                .or(self.config.default_timezone.as_deref()),
        );

        loop {
            let now = Utc::now().with_timezone(&timezone);
            let Some(next) = schedule.upcoming(timezone).next() else {
                tracing::warn!(
                    handler = handler.name().unwrap_or("unnamed"),
                    "cron schedule produced no further fire times"
                );
                break;
            };
            let until = (next - now).to_std().unwrap_or(Duration::from_millis(0));

            tokio::select! {
                _ = tokio::time::sleep(until) => {}
                _ = shutdown.cancelled() => break,
            }

            if trigger.allow_overlap {
                let this = Arc::clone(&self);
                let handler = handler.clone();
                let max_duration = trigger.max_duration;
                let handle = tokio::spawn(async move {
                    this.fire(&handler, max_duration).await;
                });
                self.fire_handles.lock().push(handle);
            } else {
                self.fire(&handler, trigger.max_duration).await;
            }
        }
    }

    async fn fire(&self, handler: &Arc<Handler>, max_duration: Option<Duration>) {
        let cancellation = CancellationToken::new();
        let mut ctx = self.pool.acquire(self.app.clone(), TriggerKind::Cron, cancellation.clone());

        let timer = max_duration.map(|duration| {
            let token = cancellation.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                token.cancel();
            })
        });

        if let Err(err) = self.executor.execute(handler, &mut ctx).await {
            tracing::warn!(
                error = %err,
                handler = handler.name().unwrap_or("unnamed"),
                "cron handler failed"
            );
        }

        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

fn resolve_timezone(name: Option<&str>) -> chrono_tz::Tz {
    name.and_then(|s| s.parse::<chrono_tz::Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Context, error::DispatchError, trigger::CronTrigger};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn setup() -> (Arc<Registry>, Arc<ContextPool>, Arc<Executor>) {
        (Arc::new(Registry::new()), ContextPool::new(), Arc::new(Executor::new()))
    }

    #[tokio::test]
    async fn fires_on_every_tick() {
        let (registry, pool, executor) = setup();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        registry
            .register(
                Handler::new_no_request(move |_ctx: &mut Context| {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), DispatchError>(())
                    }
                })
                .named("ticker")
                .cron_with(CronTrigger::new("* * * * * *")),
            )
            .unwrap();

        let adapter = Arc::new(CronAdapter::new(CronAdapterConfig::new(), registry, pool, None, executor));
        let shutdown = CancellationToken::new();
        let shutdown_child = shutdown.clone();
        let serve = tokio::spawn(async move { adapter.serve(shutdown_child).await });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        shutdown.cancel();
        serve.await.unwrap().unwrap();

        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn invalid_schedule_is_skipped_without_aborting_the_adapter() {
        let (registry, pool, executor) = setup();
        registry
            .register(
                Handler::new_no_request(|_ctx: &mut Context| async move { Ok(()) })
                    .named("broken")
                    .cron_with(CronTrigger::new("not a schedule")),
            )
            .unwrap();

        let adapter = Arc::new(CronAdapter::new(CronAdapterConfig::new(), registry, pool, None, executor));
        let shutdown = CancellationToken::new();
        let shutdown_child = shutdown.clone();
        let serve = tokio::spawn(async move { adapter.serve(shutdown_child).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        serve.await.unwrap().unwrap();
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(resolve_timezone(Some("not/a/zone")), chrono_tz::UTC);
        assert_eq!(resolve_timezone(None), chrono_tz::UTC);
    }
}
