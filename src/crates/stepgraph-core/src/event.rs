//! Plan events and the channel-based event bus
//!
//! Observers call `subscribe()` and receive every event emitted afterwards on
//! an unbounded `tokio::sync::mpsc` channel. Emission is synchronous and never
//! blocks: a subscriber whose receiver was dropped is pruned on the next
//! emit and does not affect the other subscribers or the mutation that
//! produced the event.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Kinds of plan events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanEventType {
    #[serde(rename = "node:ready")]
    NodeReady,
    #[serde(rename = "node:started")]
    NodeStarted,
    #[serde(rename = "node:completed")]
    NodeCompleted,
    #[serde(rename = "node:failed")]
    NodeFailed,
    #[serde(rename = "node:skipped")]
    NodeSkipped,
    #[serde(rename = "node:retrying")]
    NodeRetrying,
    #[serde(rename = "plan:completed")]
    PlanCompleted,
    #[serde(rename = "plan:failed")]
    PlanFailed,
    #[serde(rename = "plan:paused")]
    PlanPaused,
    #[serde(rename = "plan:cancelled")]
    PlanCancelled,
}

impl PlanEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeReady => "node:ready",
            Self::NodeStarted => "node:started",
            Self::NodeCompleted => "node:completed",
            Self::NodeFailed => "node:failed",
            Self::NodeSkipped => "node:skipped",
            Self::NodeRetrying => "node:retrying",
            Self::PlanCompleted => "plan:completed",
            Self::PlanFailed => "plan:failed",
            Self::PlanPaused => "plan:paused",
            Self::PlanCancelled => "plan:cancelled",
        }
    }
}

impl fmt::Display for PlanEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single plan event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEvent {
    #[serde(rename = "type")]
    pub event_type: PlanEventType,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PlanEvent {
    pub fn new(event_type: PlanEventType, plan_id: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now().timestamp_millis(),
            plan_id: plan_id.into(),
            node_id: None,
            data: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Identifier returned by [`EventBus::subscribe`]
pub type SubscriptionId = u64;

/// Receiving end of a subscription
///
/// Dropping it detaches the subscriber.
#[derive(Debug)]
pub struct Subscription<E> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event; `None` once the bus is gone or unsubscribed
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// All events delivered so far
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Fan-out of events to any number of channel subscribers
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<E>)>,
    next_id: SubscriptionId,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 1,
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    /// Detach a subscriber; returns `false` if the id is unknown
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every live subscriber, in subscription order
    pub fn emit(&mut self, event: E) {
        self.subscribers.retain(|(id, tx)| {
            if tx.send(event.clone()).is_err() {
                tracing::debug!(subscription_id = id, "Dropping closed event subscriber");
                return false;
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&PlanEventType::NodeRetrying).unwrap();
        assert_eq!(json, "\"node:retrying\"");
        assert_eq!(PlanEventType::PlanCancelled.to_string(), "plan:cancelled");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = PlanEvent::new(PlanEventType::NodeStarted, "plan-1").with_node("a");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "node:started");
        assert_eq!(value["planId"], "plan-1");
        assert_eq!(value["nodeId"], "a");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_fan_out_in_order() {
        let mut bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(1u32);
        bus.emit(2u32);

        assert_eq!(first.drain(), vec![1, 2]);
        assert_eq!(second.drain(), vec![1, 2]);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.emit("x".to_string());
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().as_deref(), Some("x"));
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));

        bus.emit(7u8);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_async_recv() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.emit(PlanEvent::new(PlanEventType::PlanPaused, "p"));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, PlanEventType::PlanPaused);
    }
}
