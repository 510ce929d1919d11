//! Media engine seam
//!
//! The bridge drives a media engine through these traits and receives its
//! events through one narrow listener per capability. Engine methods are
//! called on the signaling thread of the [`EngineContext`], and engines
//! deliver listener events on that same thread.
//!
//! [`EngineContext`]: context::EngineContext

pub mod context;
pub mod devices;
pub mod loopback;

use std::sync::Arc;

use serde_json::Value;

use crate::audio::AudioSource;
use crate::error::Result;
use crate::signaling::types::*;
use crate::video::{CaptureStats, FrameGenerator};

pub use context::{Clock, EngineContext, EngineThread, EngineThreads};
pub use devices::{CaptureDeviceList, CaptureDevices, SystemDevices};
pub use loopback::LoopbackEngine;

/// Where a local track's media comes from
pub enum TrackSource {
    /// Engine-generated audio
    SyntheticAudio,
    /// PCM read from a capture device
    Microphone {
        source: Box<dyn AudioSource>,
        clock: Clock,
    },
    /// Frames pulled from a generator at a fixed rate
    Video {
        generator: Arc<dyn FrameGenerator>,
        fps: u32,
    },
}

/// A local track ready to be produced
pub struct MediaTrack {
    pub id: String,
    pub source: TrackSource,
}

impl MediaTrack {
    pub fn synthetic_audio() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: TrackSource::SyntheticAudio,
        }
    }

    pub fn microphone(source: Box<dyn AudioSource>, clock: Clock) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: TrackSource::Microphone { source, clock },
        }
    }

    pub fn video(generator: Arc<dyn FrameGenerator>, fps: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: TrackSource::Video { generator, fps },
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self.source {
            TrackSource::SyntheticAudio | TrackSource::Microphone { .. } => MediaKind::Audio,
            TrackSource::Video { .. } => MediaKind::Video,
        }
    }
}

/// Engine entry point
pub trait MediaEngine: Send + Sync {
    fn name(&self) -> &str;

    fn create_device(&self, threads: EngineThreads) -> Result<Box<dyn Device>>;

    /// Cameras and microphones tracks can be captured from
    fn devices(&self) -> Arc<dyn CaptureDevices>;
}

pub trait Device: Send + Sync {
    /// Load the router's RTP capabilities.
    fn load(&mut self, router_capabilities: &RtpCapabilities) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Local capabilities, available after [`Device::load`].
    fn rtp_capabilities(&self) -> Result<RtpCapabilities>;

    fn can_produce(&self, kind: MediaKind) -> bool;

    fn create_send_transport(
        &self,
        options: &TransportOptions,
        listener: Arc<dyn TransportListener>,
        produce_listener: Arc<dyn ProduceListener>,
    ) -> Result<Arc<dyn SendTransport>>;

    fn create_recv_transport(
        &self,
        options: &TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn RecvTransport>>;
}

pub trait Transport: Send + Sync {
    fn id(&self) -> &TransportId;

    fn direction(&self) -> TransportDirection;

    fn is_closed(&self) -> bool;

    /// Close the transport. Children still open get `on_transport_close`.
    fn close(&self);
}

pub trait SendTransport: Transport {
    fn produce(
        &self,
        track: MediaTrack,
        app_data: Value,
        listener: Arc<dyn ProducerListener>,
    ) -> Result<Arc<dyn Producer>>;

    fn produce_data(
        &self,
        options: DataProducerOptions,
        listener: Arc<dyn DataProducerListener>,
    ) -> Result<Arc<dyn DataProducer>>;
}

pub trait RecvTransport: Transport {
    fn consume(
        &self,
        options: &ConsumerOptions,
        listener: Arc<dyn ConsumerListener>,
    ) -> Result<Arc<dyn Consumer>>;

    fn consume_data(
        &self,
        options: &DataConsumerOptions,
        listener: Arc<dyn DataConsumerListener>,
    ) -> Result<Arc<dyn DataConsumer>>;
}

pub trait Producer: Send + Sync {
    fn id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> &RtpParameters;
    fn is_closed(&self) -> bool;
    fn close(&self);

    /// Capture counters for producers fed by a capture device or generator
    fn capture_stats(&self) -> Option<CaptureStats> {
        None
    }
}

pub trait Consumer: Send + Sync {
    fn id(&self) -> &ConsumerId;
    fn producer_id(&self) -> &ProducerId;
    fn kind(&self) -> MediaKind;
    fn is_closed(&self) -> bool;
    fn close(&self);
}

pub trait DataProducer: Send + Sync {
    fn id(&self) -> &DataProducerId;
    fn label(&self) -> &str;
    fn ready_state(&self) -> DataChannelState;
    fn send(&self, data: &[u8]) -> Result<()>;
    fn close(&self);
}

pub trait DataConsumer: Send + Sync {
    fn id(&self) -> &DataConsumerId;
    fn data_producer_id(&self) -> &DataProducerId;
    fn label(&self) -> &str;
    fn ready_state(&self) -> DataChannelState;
    fn close(&self);
}

/// Transport negotiation events
pub trait TransportListener: Send + Sync {
    /// First produce/consume on a transport; blocks until the remote side
    /// has the local DTLS parameters.
    fn on_connect(&self, transport_id: &TransportId, dtls_parameters: &DtlsParameters)
        -> Result<()>;

    fn on_connection_state_change(&self, transport_id: &TransportId, state: &str);
}

/// Producer registration on a send transport
pub trait ProduceListener: Send + Sync {
    fn on_produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
        app_data: &Value,
    ) -> Result<ProducerId>;

    fn on_produce_data(
        &self,
        transport_id: &TransportId,
        sctp_stream_parameters: &SctpStreamParameters,
        label: &str,
        protocol: &str,
        app_data: &Value,
    ) -> Result<DataProducerId>;
}

pub trait ProducerListener: Send + Sync {
    fn on_transport_close(&self, producer_id: &ProducerId);
}

pub trait ConsumerListener: Send + Sync {
    fn on_transport_close(&self, consumer_id: &ConsumerId);
}

pub trait DataProducerListener: Send + Sync {
    fn on_state_change(&self, data_producer_id: &DataProducerId, state: DataChannelState);
    fn on_transport_close(&self, data_producer_id: &DataProducerId);
}

pub trait DataConsumerListener: Send + Sync {
    fn on_connecting(&self, data_consumer_id: &DataConsumerId);
    fn on_open(&self, data_consumer_id: &DataConsumerId);
    fn on_closing(&self, data_consumer_id: &DataConsumerId);
    fn on_close(&self, data_consumer_id: &DataConsumerId);
    fn on_message(&self, data_consumer_id: &DataConsumerId, data: &[u8]);
    fn on_transport_close(&self, data_consumer_id: &DataConsumerId);
}
