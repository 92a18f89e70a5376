//! In-process event bus: bounded per-subscriber fan-out with drop-on-full semantics.
//!
//! Publish is non-blocking. If a subscriber's buffer is full, the event is dropped
//! for that subscriber only — other subscribers still receive it. Subscriptions are
//! cancelled exactly once; a second cancel is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Event kinds published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ContainerUpdate,
    ContainerState,
    QueueChange,
    ScanComplete,
    PolicyChange,
    ClusterHost,
}

/// A single published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            container_name: None,
            host_name: None,
            message: None,
            timestamp,
        }
    }

    pub fn with_container(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    pub fn with_host(mut self, name: impl Into<String>) -> Self {
        self.host_name = Some(name.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::Sender<Event>,
}

/// A receive handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    id: Uuid,
    bus: EventBus,
    receiver: mpsc::Receiver<Event>,
    cancelled: std::sync::atomic::AtomicBool,
}

impl Subscription {
    /// Receive the next event, or `None` once the subscription is cancelled.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Cancel this subscription. Idempotent.
    pub async fn cancel(&self) {
        if self
            .cancelled
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        self.bus.remove_subscriber(self.id).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            let bus = self.bus.clone();
            let id = self.id;
            tokio::spawn(async move {
                bus.remove_subscriber(id).await;
            });
        }
    }
}

/// The bus itself. Cheap to clone; all clones share the same subscriber set.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            capacity,
        }
    }

    /// Subscribe to the bus. Returns a handle to receive events until cancelled.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .await
            .push(Subscriber { id, sender: tx });
        Subscription {
            id,
            bus: self.clone(),
            receiver: rx,
            cancelled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Publish an event to all current subscribers. Non-blocking: a full subscriber
    /// buffer drops the event for that subscriber only.
    pub async fn publish(&self, event: Event) {
        let subscribers = self.subscribers.read().await;
        for sub in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.sender.try_send(event.clone()) {
                tracing::debug!(subscriber = %sub.id, "event bus: dropping event for full subscriber");
            }
        }
    }

    async fn remove_subscriber(&self, id: Uuid) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Number of currently active subscribers (test/diagnostic helper).
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> Event {
        Event::new(kind, Utc::now())
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe().await;

        bus.publish(event(EventKind::ScanComplete)).await;
        bus.publish(event(EventKind::QueueChange)).await;

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::ScanComplete);
        assert_eq!(second.kind, EventKind::QueueChange);
    }

    #[tokio::test]
    async fn full_buffer_drops_only_for_that_subscriber() {
        let bus = EventBus::new(1);
        let mut slow = bus.subscribe().await;
        let mut fast = bus.subscribe().await;

        bus.publish(event(EventKind::ScanComplete)).await;
        bus.publish(event(EventKind::QueueChange)).await; // dropped for `slow`, buffer full

        let slow_first = slow.recv().await.unwrap();
        assert_eq!(slow_first.kind, EventKind::ScanComplete);

        let fast_first = fast.recv().await.unwrap();
        assert_eq!(fast_first.kind, EventKind::ScanComplete);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe().await;
        assert_eq!(bus.subscriber_count().await, 1);

        sub.cancel().await;
        sub.cancel().await; // second cancel: no-op, does not panic

        assert_eq!(bus.subscriber_count().await, 0);
    }
}
