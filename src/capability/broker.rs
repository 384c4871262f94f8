//! Broker (message bus) capability contract.
//!
//! Implemented once for real deployments (Kafka, NATS, SQS, ...) and once
//! in-memory for tests ([`crate::testkit::InMemoryBroker`]). The
//! [`crate::adapters::broker::BrokerAdapter`] drives handlers off this
//! trait; handler code may also reach it directly via
//! [`crate::context::Context::broker`].

use std::{collections::HashMap, fmt, time::SystemTime};

use async_trait::async_trait;

/// A single message as delivered to a subscriber or consumer group member.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was published to.
    pub topic: String,
    /// Raw payload bytes.
    pub body: Vec<u8>,
    /// Transport headers.
    pub headers: HashMap<String, String>,
    /// Partition the message was delivered from, if the backend
    /// partitions topics.
    pub partition: Option<i32>,
    /// Offset within the partition, if the backend tracks one.
    pub offset: Option<i64>,
    /// Partitioning/ordering key, if set at publish time.
    pub key: Option<String>,
    /// Publish time, if known.
    pub timestamp: Option<SystemTime>,
}

impl Message {
    /// Construct a message with just a topic and body; every other field
    /// defaults empty.
    pub fn new(topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
            headers: HashMap::new(),
            partition: None,
            offset: None,
            key: None,
            timestamp: None,
        }
    }
}

/// Errors a [`Broker`] implementation can surface.
#[derive(Debug)]
pub enum BrokerError {
    /// Could not connect, or the connection dropped.
    Connection(String),
    /// The topic or subscription does not exist.
    NotFound(String),
    /// The publish or ack/nack call itself failed.
    Operation(String),
    /// Any other backend-specific failure.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Connection(msg) => write!(f, "broker connection error: {msg}"),
            BrokerError::NotFound(msg) => write!(f, "broker not found: {msg}"),
            BrokerError::Operation(msg) => write!(f, "broker operation failed: {msg}"),
            BrokerError::Other(e) => write!(f, "broker error: {e}"),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Callback invoked for every message delivered to a subscription.
///
/// Boxed/`Arc`-wrapped at registration time; the broker clones it per
/// dispatch task.
pub type MessageHandler = std::sync::Arc<
    dyn Fn(Message) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + Sync,
>;

/// An opaque handle identifying one subscription, returned by
/// [`Broker::subscribe`]/[`Broker::join_consumer_group`] and consumed by
/// [`Broker::unsubscribe`]/[`Broker::leave_group`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

/// The broker capability contract.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the underlying connection. Idempotent.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Tear down the underlying connection, stop accepting new messages,
    /// and wait for in-flight dispatches to finish.
    async fn disconnect(&self) -> Result<(), BrokerError>;

    /// Liveness check.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Publish a single message.
    async fn publish(&self, message: Message) -> Result<(), BrokerError>;

    /// Publish several messages; backends may batch the network call.
    async fn publish_batch(&self, messages: Vec<Message>) -> Result<(), BrokerError> {
        for message in messages {
            self.publish(message).await?;
        }
        Ok(())
    }

    /// Subscribe to a single topic in pub/sub fan-out mode: every direct
    /// subscriber receives every message.
    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError>;

    /// Subscribe the same handler to several topics at once.
    async fn subscribe_multi(
        &self,
        topics: &[String],
        handler: MessageHandler,
    ) -> Result<Vec<SubscriptionId>, BrokerError> {
        let mut ids = Vec::with_capacity(topics.len());
        for topic in topics {
            ids.push(self.subscribe(topic, handler.clone()).await?);
        }
        Ok(ids)
    }

    /// Cancel a subscription created by [`Broker::subscribe`] or
    /// [`Broker::subscribe_multi`].
    async fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<(), BrokerError>;

    /// Join a consumer group across one or more topics: across every
    /// member of `group`, each message is delivered to exactly one.
    async fn join_consumer_group(
        &self,
        group: &str,
        topics: &[String],
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError>;

    /// Leave a consumer group.
    async fn leave_group(&self, subscription: &SubscriptionId) -> Result<(), BrokerError>;

    /// Acknowledge successful processing of a message.
    async fn ack(&self, message: &Message) -> Result<(), BrokerError>;

    /// Negative-acknowledge a message, requesting redelivery.
    async fn nack(&self, message: &Message, requeue: bool) -> Result<(), BrokerError>;

    /// Approximate number of undelivered/unacknowledged messages on a
    /// topic, if the backend can report it.
    async fn queue_length(&self, topic: &str) -> Result<Option<u64>, BrokerError>;
}
