use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::signaling::types::{
    DataChannelState, DataConsumerId, DataProducerId, ProducerId, TransportDirection, TransportId,
    TransportState,
};

/// Bridge event published to in-process observers
///
/// Mirrors the notifications forwarded to the signaling authority so Rust
/// callers can watch a coordinator without implementing the callback table.
///
/// ```json
/// {
///   "event": "transport.state_changed",
///   "data": { "transport_id": "t1", "direction": "send", "state": "connected" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum BridgeEvent {
    /// A transport moved forward in its connection state machine
    #[serde(rename = "transport.state_changed")]
    ///
    /// The authority may hand out the same id for both transports, so the
    /// direction tells them apart.
    TransportStateChanged {
        transport_id: TransportId,
        direction: TransportDirection,
        state: TransportState,
    },

    /// A transport reached `failed`; the authority decides what happens next
    #[serde(rename = "transport.failed")]
    TransportFailed {
        transport_id: TransportId,
        direction: TransportDirection,
    },

    #[serde(rename = "producer.created")]
    ProducerCreated { producer_id: ProducerId, kind: String },

    #[serde(rename = "producer.transport_closed")]
    ProducerTransportClosed { producer_id: ProducerId },

    #[serde(rename = "data_producer.state_changed")]
    DataProducerStateChanged {
        data_producer_id: DataProducerId,
        state: DataChannelState,
    },

    #[serde(rename = "data_consumer.state_changed")]
    DataConsumerStateChanged {
        data_consumer_id: DataConsumerId,
        state: DataChannelState,
    },

    /// Inbound data channel message
    #[serde(rename = "data_consumer.message")]
    DataMessage {
        data_consumer_id: DataConsumerId,
        data: Bytes,
    },

    #[serde(rename = "coordinator.closed")]
    CoordinatorClosed { coordinator_id: String },
}

impl BridgeEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TransportStateChanged { .. } => "transport.state_changed",
            Self::TransportFailed { .. } => "transport.failed",
            Self::ProducerCreated { .. } => "producer.created",
            Self::ProducerTransportClosed { .. } => "producer.transport_closed",
            Self::DataProducerStateChanged { .. } => "data_producer.state_changed",
            Self::DataConsumerStateChanged { .. } => "data_consumer.state_changed",
            Self::DataMessage { .. } => "data_consumer.message",
            Self::CoordinatorClosed { .. } => "coordinator.closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_shape() {
        let event = BridgeEvent::TransportStateChanged {
            transport_id: TransportId::new("t1").unwrap(),
            direction: TransportDirection::Recv,
            state: TransportState::Connected,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.event_name());
        assert_eq!(value["data"]["transport_id"], "t1");
        assert_eq!(value["data"]["direction"], "recv");
        assert_eq!(value["data"]["state"], "connected");
    }
}
