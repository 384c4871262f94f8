//! An in-memory [`Broker`] for tests and local development.
//!
//! This implementation does **not** swallow handler errors. A subscriber
//! closure's own panics/errors are the caller's concern (the
//! [`MessageHandler`] signature returns no error — adapters observe
//! failure through [`crate::context::Context::take_ack_action`] /
//! handler-level error propagation, not through the broker), but delivery
//! itself — whether a message reaches every direct subscriber and exactly
//! one consumer-group member — is never silently dropped.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capability::{Broker, BrokerError, Message, MessageHandler, SubscriptionId};

struct DirectSubscriber {
    id: SubscriptionId,
    topic: String,
    sender: mpsc::UnboundedSender<Message>,
}

struct GroupMember {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<Message>,
}

struct Group {
    topics: Vec<String>,
    members: Vec<GroupMember>,
    next: AtomicUsize,
}

/// An in-memory pub/sub and consumer-group broker.
///
/// Pub/sub fan-out delivers a clone of every published message to every
/// direct subscriber of its topic; consumer-group fan-out delivers each
/// message to exactly one member, round-robin. Each subscription runs its
/// own dispatch task, so delivery is asynchronous via an independent
/// dispatch task per subscriber.
pub struct InMemoryBroker {
    direct: Mutex<Vec<DirectSubscriber>>,
    groups: Mutex<HashMap<String, Group>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    cancellation: CancellationToken,
}

impl InMemoryBroker {
    /// An empty broker with no subscribers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            direct: Mutex::new(Vec::new()),
            groups: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            cancellation: CancellationToken::new(),
        })
    }

    fn spawn_dispatch_task(
        &self,
        mut receiver: mpsc::UnboundedReceiver<Message>,
        handler: MessageHandler,
    ) {
        let cancellation = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => break,
                    maybe_msg = receiver.recv() => {
                        match maybe_msg {
                            Some(msg) => handler(msg).await,
                            None => break,
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            direct: Mutex::new(Vec::new()),
            groups: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            cancellation: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.cancellation.cancel();
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.direct.lock().clear();
        self.groups.lock().clear();
        Ok(())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), BrokerError> {
        for sub in self.direct.lock().iter().filter(|s| s.topic == message.topic) {
            // An unbound receiver dropped mid-flight just means nobody's
            // listening anymore; that's not a publish failure.
            let _ = sub.sender.send(message.clone());
        }

        for group in self.groups.lock().values() {
            if !group.topics.iter().any(|t| t == &message.topic) || group.members.is_empty() {
                continue;
            }
            let idx = group.next.fetch_add(1, Ordering::Relaxed) % group.members.len();
            let _ = group.members[idx].sender.send(message.clone());
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = SubscriptionId(Uuid::new_v4().to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        self.direct.lock().push(DirectSubscriber {
            id: id.clone(),
            topic: topic.to_string(),
            sender: tx,
        });
        self.spawn_dispatch_task(rx, handler);
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: &SubscriptionId) -> Result<(), BrokerError> {
        self.direct.lock().retain(|s| &s.id != subscription);
        Ok(())
    }

    async fn join_consumer_group(
        &self,
        group: &str,
        topics: &[String],
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = SubscriptionId(Uuid::new_v4().to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut groups = self.groups.lock();
            let entry = groups.entry(group.to_string()).or_insert_with(|| Group {
                topics: topics.to_vec(),
                members: Vec::new(),
                next: AtomicUsize::new(0),
            });
            for topic in topics {
                if !entry.topics.contains(topic) {
                    entry.topics.push(topic.clone());
                }
            }
            entry.members.push(GroupMember {
                id: id.clone(),
                sender: tx,
            });
        }
        self.spawn_dispatch_task(rx, handler);
        Ok(id)
    }

    async fn leave_group(&self, subscription: &SubscriptionId) -> Result<(), BrokerError> {
        let mut groups = self.groups.lock();
        for group in groups.values_mut() {
            group.members.retain(|m| &m.id != subscription);
        }
        groups.retain(|_, g| !g.members.is_empty());
        Ok(())
    }

    async fn ack(&self, message: &Message) -> Result<(), BrokerError> {
        tracing::debug!(topic = %message.topic, "in-memory broker: ack");
        Ok(())
    }

    async fn nack(&self, message: &Message, requeue: bool) -> Result<(), BrokerError> {
        tracing::debug!(topic = %message.topic, requeue, "in-memory broker: nack");
        if requeue {
            self.publish(message.clone()).await?;
        }
        Ok(())
    }

    async fn queue_length(&self, _topic: &str) -> Result<Option<u64>, BrokerError> {
        Ok(Some(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn every_direct_subscriber_receives_every_message() {
        let broker = InMemoryBroker::new();
        let received_a = Arc::new(Mutex::new(Vec::new()));
        let received_b = Arc::new(Mutex::new(Vec::new()));

        for received in [received_a.clone(), received_b.clone()] {
            let handler: MessageHandler = Arc::new(move |msg: Message| {
                let received = received.clone();
                Box::pin(async move {
                    received.lock().push(msg.body);
                })
            });
            broker.subscribe("greetings", handler).await.unwrap();
        }

        for i in 0..3 {
            broker
                .publish(Message::new("greetings", format!("hi-{i}").into_bytes()))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received_a.lock().len(), 3);
        assert_eq!(received_b.lock().len(), 3);
    }

    #[tokio::test]
    async fn consumer_group_delivers_each_message_to_one_member() {
        let broker = InMemoryBroker::new();
        let total = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let total = total.clone();
            let handler: MessageHandler = Arc::new(move |_msg: Message| {
                let total = total.clone();
                Box::pin(async move {
                    total.fetch_add(1, Ordering::Relaxed);
                })
            });
            broker
                .join_consumer_group("workers", &["jobs".to_string()], handler)
                .await
                .unwrap();
        }

        for _ in 0..9 {
            broker.publish(Message::new("jobs", b"work".to_vec())).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(total.load(Ordering::Relaxed), 9);
    }

    #[tokio::test]
    async fn disconnect_drains_in_flight_and_stops_future_delivery() {
        let broker = InMemoryBroker::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let handler: MessageHandler = Arc::new(move |msg: Message| {
            let r = r.clone();
            Box::pin(async move {
                r.lock().push(msg.body);
            })
        });
        broker.subscribe("t", handler).await.unwrap();
        broker.publish(Message::new("t", b"1".to_vec())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        broker.disconnect().await.unwrap();
        assert_eq!(received.lock().len(), 1);
    }
}
