//! Produce and media-lifetime dispatchers

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use super::{IdRegistry, IdScope, Outlet};
use crate::engine::{ConsumerListener, ProduceListener, ProducerListener};
use crate::error::Result;
use crate::events::BridgeEvent;
use crate::signaling::types::*;

/// Registers new producers with the authority and validates the ids it hands back
pub struct ProduceEvents {
    outlet: Arc<Outlet>,
    registry: Arc<IdRegistry>,
}

impl ProduceEvents {
    pub fn new(outlet: Arc<Outlet>, registry: Arc<IdRegistry>) -> Self {
        Self { outlet, registry }
    }
}

impl ProduceListener for ProduceEvents {
    fn on_produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        _app_data: &Value,
    ) -> Result<ProducerId> {
        let producer_id = self
            .outlet
            .round_trip()?
            .on_produce(transport_id, kind, rtp_parameters)?;
        self.registry.claim(IdScope::Producer, producer_id.as_str())?;

        info!(
            "Producer {} ({}) registered on transport {}",
            producer_id, kind, transport_id
        );
        self.outlet.publish(BridgeEvent::ProducerCreated {
            producer_id: producer_id.clone(),
            kind: kind.to_string(),
        });
        Ok(producer_id)
    }

    fn on_produce_data(
        &self,
        transport_id: &TransportId,
        sctp_stream_parameters: &SctpStreamParameters,
        label: &str,
        protocol: &str,
        _app_data: &Value,
    ) -> Result<DataProducerId> {
        let data_producer_id = self.outlet.round_trip()?.on_produce_data(
            transport_id,
            sctp_stream_parameters,
            label,
            protocol,
        )?;
        self.registry
            .claim(IdScope::DataProducer, data_producer_id.as_str())?;

        info!(
            "Data producer {} ({:?}, stream {}) registered on transport {}",
            data_producer_id, label, sctp_stream_parameters.stream_id, transport_id
        );
        Ok(data_producer_id)
    }
}

/// Transport-close notices for producers and consumers
pub struct MediaEvents {
    outlet: Arc<Outlet>,
}

impl MediaEvents {
    pub fn new(outlet: Arc<Outlet>) -> Self {
        Self { outlet }
    }
}

impl ProducerListener for MediaEvents {
    fn on_transport_close(&self, producer_id: &ProducerId) {
        warn!("Producer {}: transport closed underneath it", producer_id);
        self.outlet.publish(BridgeEvent::ProducerTransportClosed {
            producer_id: producer_id.clone(),
        });
    }
}

impl ConsumerListener for MediaEvents {
    fn on_transport_close(&self, consumer_id: &ConsumerId) {
        warn!("Consumer {}: transport closed underneath it", consumer_id);
    }
}
