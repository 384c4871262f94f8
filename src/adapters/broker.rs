//! Broker trigger adapter: binds every [`crate::trigger::MessageTrigger`]
//! (and legacy [`crate::trigger::KafkaTrigger`], projected) in the
//! [`Registry`] to the configured [`Broker`], and drives the [`Executor`]
//! for each delivery.
//!
//! Grounded on [`crate::testkit::InMemoryBroker`]'s dispatch-task model:
//! one subscription per trigger, delivery handled on whatever task the
//! [`Broker`] implementation spawns for it. Retry/DLQ bookkeeping lives
//! here rather than in the `Broker` trait, since redelivery semantics
//! vary by trigger, not by broker.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    capability::{AppAdapters, Broker, BrokerError, Message, MessageHandler, SubscriptionId},
    context::{AckAction, ContextPool, TriggerKind},
    executor::Executor,
    handler::Handler,
    registry::Registry,
    trigger::{MessageTrigger, Trigger},
};

/// Configuration for one [`BrokerAdapter`] instance.
#[derive(Clone, Default)]
pub struct BrokerAdapterConfig {
    /// Consumer group used for triggers that don't specify their own.
    pub default_group: Option<String>,
}

impl BrokerAdapterConfig {
    /// A config with no adapter-level default consumer group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the adapter-level default consumer group.
    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = Some(group.into());
        self
    }
}

/// Failure modes surfaced by [`BrokerAdapter::serve`] itself, as distinct
/// from a per-delivery handler error (which is handled internally through
/// the retry/DLQ policy rather than returned here).
#[derive(Debug)]
pub enum BrokerAdapterError {
    /// The underlying [`Broker`] rejected a connect, subscribe, or
    /// disconnect call.
    Broker(BrokerError),
}

impl std::fmt::Display for BrokerAdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerAdapterError::Broker(e) => write!(f, "broker adapter error: {e}"),
        }
    }
}

impl std::error::Error for BrokerAdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerAdapterError::Broker(e) => Some(e),
        }
    }
}

/// Drives registered message/kafka handlers off broker deliveries.
pub struct BrokerAdapter {
    config: BrokerAdapterConfig,
    registry: Arc<Registry>,
    pool: Arc<ContextPool>,
    app: Option<Arc<AppAdapters>>,
    executor: Arc<Executor>,
    broker: Arc<dyn Broker>,
    subscriptions: Mutex<Vec<(SubscriptionId, bool)>>,
    retries: DashMap<String, u32>,
}

impl BrokerAdapter {
    /// Build an adapter over `broker`, binding every message-triggered
    /// handler in `registry` once [`BrokerAdapter::serve`] runs.
    pub fn new(
        config: BrokerAdapterConfig,
        registry: Arc<Registry>,
        pool: Arc<ContextPool>,
        app: Option<Arc<AppAdapters>>,
        executor: Arc<Executor>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            config,
            registry,
            pool,
            app,
            executor,
            broker,
            subscriptions: Mutex::new(Vec::new()),
            retries: DashMap::new(),
        }
    }

    /// Connect, bind every message/kafka trigger, then block until
    /// `shutdown` fires; unsubscribe everything and disconnect before
    /// returning.
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), BrokerAdapterError> {
        self.broker.connect().await.map_err(BrokerAdapterError::Broker)?;

        let mut bound = 0;
        for handler in self.registry.all() {
            for trigger in handler.triggers() {
                let message_trigger = match trigger {
                    Trigger::Message(m) => Some(m.clone()),
                    Trigger::Kafka(k) => Some(k.to_message()),
                    _ => None,
                };
                if let Some(message_trigger) = message_trigger {
                    self.bind(handler.clone(), message_trigger).await?;
                    bound += 1;
                }
            }
        }
        tracing::info!(handlers = bound, "broker adapter bound message triggers");

        shutdown.cancelled().await;
        tracing::info!("broker adapter shutting down, draining in-flight deliveries");

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (subscription, is_group) in subscriptions {
            let result = if is_group {
                self.broker.leave_group(&subscription).await
            } else {
                self.broker.unsubscribe(&subscription).await
            };
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to tear down subscription during shutdown");
            }
        }
        self.broker.disconnect().await.map_err(BrokerAdapterError::Broker)?;
        Ok(())
    }

    async fn bind(
        self: &Arc<Self>,
        handler: Arc<Handler>,
        trigger: MessageTrigger,
    ) -> Result<(), BrokerAdapterError> {
        let group = trigger
            .group
            .clone()
            .or_else(|| self.config.default_group.clone());
        let trigger = Arc::new(trigger);
        let this = Arc::clone(self);
        let handler = Arc::clone(&handler);

        let on_message: MessageHandler = {
            let this = Arc::clone(&this);
            let handler = Arc::clone(&handler);
            let trigger = Arc::clone(&trigger);
            Arc::new(move |message: Message| {
                let this = Arc::clone(&this);
                let handler = Arc::clone(&handler);
                let trigger = Arc::clone(&trigger);
                Box::pin(async move {
                    this.deliver(&handler, &trigger, message).await;
                })
            })
        };

        let (subscription, is_group) = match group {
            Some(group) => (
                self.broker
                    .join_consumer_group(&group, std::slice::from_ref(&trigger.topic), on_message)
                    .await
                    .map_err(BrokerAdapterError::Broker)?,
                true,
            ),
            None => (
                self.broker
                    .subscribe(&trigger.topic, on_message)
                    .await
                    .map_err(BrokerAdapterError::Broker)?,
                false,
            ),
        };
        self.subscriptions.lock().push((subscription, is_group));
        Ok(())
    }

    async fn deliver(&self, handler: &Arc<Handler>, trigger: &MessageTrigger, message: Message) {
        let cancellation = CancellationToken::new();
        let mut ctx = self.pool.acquire(self.app.clone(), TriggerKind::Message, cancellation);
        ctx.request.topic = Some(message.topic.clone());
        ctx.request.partition = message.partition;
        ctx.request.offset = message.offset;
        ctx.request.key = message.key.clone();
        ctx.request.body = message.body.clone();
        for (k, v) in &message.headers {
            ctx.request.headers.insert(k.clone(), v.clone());
        }

        let result = self.executor.execute(handler, &mut ctx).await;

        let manual_nack_requeue = if trigger.auto_ack {
            None
        } else {
            match ctx.take_ack_action() {
                Some(AckAction::Nack { requeue }) => Some(requeue),
                _ => None,
            }
        };

        if let Err(err) = &result {
            tracing::warn!(error = %err, topic = %message.topic, "message handler failed");
        }

        let failed = result.is_err() || manual_nack_requeue.is_some();
        if !failed {
            if let Err(err) = self.broker.ack(&message).await {
                tracing::warn!(error = %err, topic = %message.topic, "failed to ack message");
            }
            self.retries.remove(&retry_key(&message));
            return;
        }

        let key = retry_key(&message);
        let attempts = {
            let mut entry = self.retries.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if attempts > trigger.max_retries {
            if let Some(dlq_topic) = &trigger.dlq_topic {
                let mut dlq_message = message.clone();
                dlq_message.topic = dlq_topic.clone();
                if let Err(err) = self.broker.publish(dlq_message).await {
                    tracing::error!(error = %err, topic = %dlq_topic, "failed to publish to DLQ");
                }
            }
            if let Err(err) = self.broker.ack(&message).await {
                tracing::warn!(error = %err, "failed to ack exhausted message");
            }
            self.retries.remove(&key);
            return;
        }

        if let Some(backoff) = trigger.retry_backoff {
            tokio::time::sleep(backoff).await;
        }
        let requeue = manual_nack_requeue.unwrap_or(true);
        if let Err(err) = self.broker.nack(&message, requeue).await {
            tracing::warn!(error = %err, "failed to nack message");
        }
    }
}

/// Identify a message for retry counting: prefer its ordering key, fall
/// back to partition+offset, fall back to topic alone (best-effort for
/// backends that supply neither).
fn retry_key(message: &Message) -> String {
    match (&message.key, message.partition, message.offset) {
        (Some(key), _, _) => format!("{}:{key}", message.topic),
        (None, Some(partition), Some(offset)) => format!("{}:{partition}:{offset}", message.topic),
        _ => message.topic.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Context, error::DispatchError, testkit::InMemoryBroker};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn setup() -> (Arc<Registry>, Arc<ContextPool>, Arc<Executor>, Arc<dyn Broker>) {
        (
            Arc::new(Registry::new()),
            ContextPool::new(),
            Arc::new(Executor::new()),
            InMemoryBroker::new() as Arc<dyn Broker>,
        )
    }

    #[tokio::test]
    async fn successful_delivery_acks_and_runs_handler() {
        let (registry, pool, executor, broker) = setup();
        let received = Arc::new(AtomicU32::new(0));
        let r = received.clone();
        registry
            .register(
                Handler::new_no_request(move |_ctx: &mut Context| {
                    let r = r.clone();
                    async move {
                        r.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), DispatchError>(())
                    }
                })
                .named("consumer")
                .message("orders"),
            )
            .unwrap();

        let adapter = Arc::new(BrokerAdapter::new(
            BrokerAdapterConfig::new(),
            registry,
            pool,
            None,
            executor,
            broker.clone(),
        ));
        let shutdown = CancellationToken::new();
        let shutdown_child = shutdown.clone();
        let serve = tokio::spawn(async move { adapter.serve(shutdown_child).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        broker
            .publish(Message::new("orders", b"hello".to_vec()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(received.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_route_to_dlq() {
        let (registry, pool, executor, broker) = setup();
        registry
            .register(
                Handler::new_no_request(|_ctx: &mut Context| async move {
                    Err(DispatchError::internal(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "boom",
                    )))
                })
                .named("always-fails")
                .message_with(MessageTrigger {
                    dlq_topic: Some("orders-dlq".to_string()),
                    ..MessageTrigger::new("orders")
                }),
            )
            .unwrap();

        let dlq_received = Arc::new(AtomicU32::new(0));
        let d = dlq_received.clone();
        broker
            .subscribe(
                "orders-dlq",
                Arc::new(move |_msg| {
                    let d = d.clone();
                    Box::pin(async move {
                        d.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .await
            .unwrap();

        let adapter = Arc::new(BrokerAdapter::new(
            BrokerAdapterConfig::new(),
            registry,
            pool,
            None,
            executor,
            broker.clone(),
        ));
        let shutdown = CancellationToken::new();
        let shutdown_child = shutdown.clone();
        let serve = tokio::spawn(async move { adapter.serve(shutdown_child).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        broker
            .publish(Message::new("orders", b"hello".to_vec()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(dlq_received.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        serve.await.unwrap().unwrap();
    }
}
