//! Event bus for bridge notifications
//!
//! Every notification the bridge forwards to the signaling authority is also
//! published here for in-process subscribers.

pub mod types;

pub use types::BridgeEvent;

use tokio::sync::broadcast;

/// Default event channel capacity (ring buffer size)
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast bus for bridge events
///
/// Publishing never blocks, so it is safe from the engine's signaling thread.
/// A subscriber that falls too far behind receives `Lagged` and misses events.
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BridgeEvent) {
        // No subscribers is the common case
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::types::{DataConsumerId, TransportDirection, TransportId};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(BridgeEvent::TransportFailed {
            transport_id: TransportId::new("t1").unwrap(),
            direction: TransportDirection::Send,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BridgeEvent::TransportFailed { .. }));
    }

    #[test]
    fn test_multiple_subscribers() {
        let bus = EventBus::with_capacity(4);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(BridgeEvent::DataMessage {
            data_consumer_id: DataConsumerId::new("dc1").unwrap(),
            data: Bytes::from_static(b"ping"),
        });

        let (event1, event2) = tokio_test::block_on(async { (rx1.recv().await, rx2.recv().await) });
        match event1.unwrap() {
            BridgeEvent::DataMessage { data, .. } => assert_eq!(&data[..], b"ping"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(event2.unwrap(), BridgeEvent::DataMessage { .. }));
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(BridgeEvent::CoordinatorClosed {
            coordinator_id: "c1".to_string(),
        });
    }
}
