//! Event types for the PIM event system
//!
//! Events are broadcast via `EventBus` (tokio broadcast channel) and forwarded
//! to SSE clients. Emission is lossy: a job never waits for, or fails because
//! of, a missing subscriber.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PimEvent {
    /// A job was accepted and registered
    JobSubmitted {
        job_id: Uuid,
        input_reference: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Published job record changed (stage boundary or terminal transition)
    JobProgress {
        job_id: Uuid,
        /// Externally visible status ("pending", "running", ...)
        status: String,
        current_step: String,
        progress: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One item failed one stage; the job continues
    ItemFailed {
        job_id: Uuid,
        /// "segment" or "enhance"
        stage: String,
        item: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job reached Completed
    JobCompleted {
        job_id: Uuid,
        /// Items discovered by identification
        items: usize,
        /// Items with a segmented cutout
        segmented: usize,
        /// Items with at least one enhanced variant
        enhanced: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job reached Failed
    JobFailed {
        job_id: Uuid,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PimEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PimEvent::JobSubmitted { .. } => "JobSubmitted",
            PimEvent::JobProgress { .. } => "JobProgress",
            PimEvent::ItemFailed { .. } => "ItemFailed",
            PimEvent::JobCompleted { .. } => "JobCompleted",
            PimEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            PimEvent::JobSubmitted { job_id, .. }
            | PimEvent::JobProgress { job_id, .. }
            | PimEvent::ItemFailed { job_id, .. }
            | PimEvent::JobCompleted { job_id, .. }
            | PimEvent::JobFailed { job_id, .. } => *job_id,
        }
    }
}

/// Central event distribution bus
///
/// Cheap to clone; all clones share one broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PimEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lag and lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PimEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: PimEvent) -> Result<usize, broadcast::error::SendError<PimEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PimEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit_lossy(PimEvent::JobFailed {
            job_id,
            error: "boom".to_string(),
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "JobFailed");
        assert_eq!(event.job_id(), job_id);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(PimEvent::JobSubmitted {
            job_id: Uuid::new_v4(),
            input_reference: "https://example.com/v".to_string(),
            timestamp: chrono::Utc::now(),
        })
        .is_err());
        assert_eq!(bus.capacity(), 10);
    }

    #[test]
    fn test_serialized_event_is_tagged() {
        let event = PimEvent::ItemFailed {
            job_id: Uuid::nil(),
            stage: "segment".to_string(),
            item: "Widget".to_string(),
            error: "no mask".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ItemFailed");
        assert_eq!(json["item"], "Widget");
    }
}
