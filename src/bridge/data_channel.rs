//! Data channel dispatchers

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::Outlet;
use crate::engine::{DataConsumerListener, DataProducerListener};
use crate::events::BridgeEvent;
use crate::signaling::types::{DataChannelState, DataConsumerId, DataProducerId};

/// Forwards data producer state changes
pub struct DataProducerEvents {
    outlet: Arc<Outlet>,
}

impl DataProducerEvents {
    pub fn new(outlet: Arc<Outlet>) -> Self {
        Self { outlet }
    }
}

impl DataProducerListener for DataProducerEvents {
    fn on_state_change(&self, data_producer_id: &DataProducerId, state: DataChannelState) {
        debug!("Data producer {} is {}", data_producer_id, state);
        if let Some(signaller) = self.outlet.notify() {
            signaller.on_data_producer_state(data_producer_id, state);
        }
        self.outlet.publish(BridgeEvent::DataProducerStateChanged {
            data_producer_id: data_producer_id.clone(),
            state,
        });
    }

    fn on_transport_close(&self, data_producer_id: &DataProducerId) {
        warn!("Data producer {}: transport closed underneath it", data_producer_id);
    }
}

/// Forwards data consumer state changes and inbound messages
pub struct DataConsumerEvents {
    outlet: Arc<Outlet>,
}

impl DataConsumerEvents {
    pub fn new(outlet: Arc<Outlet>) -> Self {
        Self { outlet }
    }

    fn state(&self, data_consumer_id: &DataConsumerId, state: DataChannelState) {
        debug!("Data consumer {} is {}", data_consumer_id, state);
        if let Some(signaller) = self.outlet.notify() {
            signaller.on_data_consumer_state(data_consumer_id, state);
        }
        self.outlet.publish(BridgeEvent::DataConsumerStateChanged {
            data_consumer_id: data_consumer_id.clone(),
            state,
        });
    }
}

impl DataConsumerListener for DataConsumerEvents {
    fn on_connecting(&self, data_consumer_id: &DataConsumerId) {
        self.state(data_consumer_id, DataChannelState::Connecting);
    }

    fn on_open(&self, data_consumer_id: &DataConsumerId) {
        self.state(data_consumer_id, DataChannelState::Open);
    }

    fn on_closing(&self, data_consumer_id: &DataConsumerId) {
        self.state(data_consumer_id, DataChannelState::Closing);
    }

    fn on_close(&self, data_consumer_id: &DataConsumerId) {
        self.state(data_consumer_id, DataChannelState::Closed);
    }

    fn on_message(&self, data_consumer_id: &DataConsumerId, data: &[u8]) {
        trace!("Data consumer {}: {} bytes", data_consumer_id, data.len());
        if let Some(signaller) = self.outlet.notify() {
            signaller.on_data_message(data_consumer_id, data);
        }
        self.outlet.publish(BridgeEvent::DataMessage {
            data_consumer_id: data_consumer_id.clone(),
            data: Bytes::copy_from_slice(data),
        });
    }

    fn on_transport_close(&self, data_consumer_id: &DataConsumerId) {
        warn!("Data consumer {}: transport closed underneath it", data_consumer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{Call, RecordingSignaller};

    #[test]
    fn test_consumer_lifecycle_maps_to_states() {
        let signaller = Arc::new(RecordingSignaller::new());
        let outlet = Arc::new(Outlet::new(signaller.clone(), 16));
        let events = DataConsumerEvents::new(outlet);
        let id = DataConsumerId::new("dc1").unwrap();

        events.on_connecting(&id);
        events.on_open(&id);
        events.on_message(&id, b"hi");
        events.on_closing(&id);
        events.on_close(&id);

        assert_eq!(
            signaller.calls(),
            vec![
                Call::DataConsumerState("dc1".into(), DataChannelState::Connecting),
                Call::DataConsumerState("dc1".into(), DataChannelState::Open),
                Call::DataMessage("dc1".into(), b"hi".to_vec()),
                Call::DataConsumerState("dc1".into(), DataChannelState::Closing),
                Call::DataConsumerState("dc1".into(), DataChannelState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_message_published_to_bus() {
        let signaller = Arc::new(RecordingSignaller::new());
        let outlet = Arc::new(Outlet::new(signaller, 16));
        let mut rx = outlet.subscribe();
        let events = DataConsumerEvents::new(outlet);

        events.on_message(&DataConsumerId::new("dc1").unwrap(), &[0, 1, 2]);
        match rx.recv().await.unwrap() {
            BridgeEvent::DataMessage { data, .. } => assert_eq!(&data[..], &[0, 1, 2]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_producer_state_forwarded() {
        let signaller = Arc::new(RecordingSignaller::new());
        let outlet = Arc::new(Outlet::new(signaller.clone(), 16));
        let events = DataProducerEvents::new(outlet.clone());
        let id = DataProducerId::new("dp0").unwrap();

        events.on_state_change(&id, DataChannelState::Open);
        outlet.cut();
        events.on_state_change(&id, DataChannelState::Closed);

        assert_eq!(
            signaller.calls(),
            vec![Call::DataProducerState("dp0".into(), DataChannelState::Open)]
        );
    }
}
