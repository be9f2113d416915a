//! Workflow event types and the in-process event bus
//!
//! Events are fire-and-forget: the workflow never waits on a subscriber,
//! and emitting with nobody listening is not an error for non-critical events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Roomsort event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomsortEvent {
    /// A workflow execution was created for a request
    WorkflowStarted {
        execution_id: Uuid,
        request_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An execution moved to a new state
    StateEntered {
        execution_id: Uuid,
        request_id: String,
        state: String,
        timestamp: DateTime<Utc>,
    },

    /// Final result for a request (status summary as JSON)
    ClassificationResult {
        request_id: String,
        result: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// Operator alert (e.g. persistent fallback-tier rate limiting)
    OperatorAlert {
        request_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// An execution exhausted its retries or hit a fatal error
    WorkflowFailed {
        execution_id: Uuid,
        request_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl RoomsortEvent {
    /// Event name used for the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            RoomsortEvent::WorkflowStarted { .. } => "WorkflowStarted",
            RoomsortEvent::StateEntered { .. } => "StateEntered",
            RoomsortEvent::ClassificationResult { .. } => "ClassificationResult",
            RoomsortEvent::OperatorAlert { .. } => "OperatorAlert",
            RoomsortEvent::WorkflowFailed { .. } => "WorkflowFailed",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            RoomsortEvent::WorkflowStarted { request_id, .. }
            | RoomsortEvent::StateEntered { request_id, .. }
            | RoomsortEvent::ClassificationResult { request_id, .. }
            | RoomsortEvent::OperatorAlert { request_id, .. }
            | RoomsortEvent::WorkflowFailed { request_id, .. } => request_id,
        }
    }
}

/// Broadcast bus shared by the executor, notifier and SSE handlers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RoomsortEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RoomsortEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: RoomsortEvent,
    ) -> Result<usize, broadcast::error::SendError<RoomsortEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RoomsortEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("No subscribers for event {}", e.0.event_type());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(request_id: &str) -> RoomsortEvent {
        RoomsortEvent::OperatorAlert {
            request_id: request_id.to_string(),
            message: "rate limited".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(alert("r1")).unwrap(), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "OperatorAlert");
        assert_eq!(received.request_id(), "r1");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(alert("r1")).is_err());
        // lossy variant must not panic
        bus.emit_lossy(alert("r1"));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 10);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(alert("r9")).unwrap();
        assert_eq!(json["type"], "OperatorAlert");
        assert_eq!(json["request_id"], "r9");
    }
}
