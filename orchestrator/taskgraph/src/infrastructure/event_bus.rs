// Event Bus Implementation - Pub/Sub for Graph Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// The graph service publishes here fire-and-forget; delivery is never
// awaited and a failed or absent subscriber cannot affect graph state.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::DagEvent;

/// Event bus for publishing and subscribing to graph events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DagEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a graph event to all subscribers
    pub fn publish(&self, event: DagEvent) {
        debug!(channel_id = %event.channel_id(), "Publishing event: {:?}", event);

        // send() returns the number of receivers that received the message
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all graph events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single channel's events
    pub fn subscribe_channel(&self, channel_id: impl Into<String>) -> ChannelEventReceiver {
        ChannelEventReceiver {
            receiver: self.sender.subscribe(),
            channel_id: channel_id.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all graph events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DagEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available)
    pub async fn recv(&mut self) -> Result<DagEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DagEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for a single channel's events (filtered)
pub struct ChannelEventReceiver {
    receiver: broadcast::Receiver<DagEvent>,
    channel_id: String,
}

impl ChannelEventReceiver {
    /// Receive the next event for the subscribed channel, skipping others
    pub async fn recv(&mut self) -> Result<DagEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if event.channel_id() == self.channel_id {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{DagUpdateReason, SYSTEM_ACTOR};
    use chrono::Utc;

    fn updated(channel_id: &str, version: u64) -> DagEvent {
        DagEvent::DagUpdated {
            channel_id: channel_id.to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            reason: DagUpdateReason::Rebuilt,
            affected_tasks: vec![],
            version,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(updated("ops", 1));

        assert!(matches!(first.recv().await.unwrap(), DagEvent::DagUpdated { version: 1, .. }));
        assert!(matches!(second.recv().await.unwrap(), DagEvent::DagUpdated { version: 1, .. }));
    }

    #[tokio::test]
    async fn channel_subscription_filters_other_channels() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe_channel("ops");

        bus.publish(updated("other", 1));
        bus.publish(updated("ops", 2));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.channel_id(), "ops");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(10);
        bus.publish(updated("ops", 1));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
