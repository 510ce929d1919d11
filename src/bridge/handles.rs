//! Caller-owned handles to coordinator resources
//!
//! Dropping a handle closes the underlying engine object on the signaling
//! thread. Closing is idempotent, so a handle may outlive its coordinator.

use std::fmt;
use std::sync::Arc;

use crate::engine::{Consumer, DataConsumer, DataProducer, EngineThread, Producer};
use crate::error::{BridgeError, Result};
use crate::signaling::types::*;
use crate::video::{CaptureStats, FrameGenerator, Resolution};

/// Run `close` on the signaling thread; inline once that thread is gone.
fn close_on<T: ?Sized + Send + Sync + 'static>(
    signaling: &EngineThread,
    resource: &Arc<T>,
    close: fn(&T),
) {
    let remote = resource.clone();
    if signaling.invoke(move || close(&remote)).is_err() {
        close(resource);
    }
}

pub struct ProducerHandle {
    producer: Arc<dyn Producer>,
    generator: Option<Arc<dyn FrameGenerator>>,
    signaling: EngineThread,
}

impl ProducerHandle {
    pub(crate) fn new(
        producer: Arc<dyn Producer>,
        generator: Option<Arc<dyn FrameGenerator>>,
        signaling: EngineThread,
    ) -> Self {
        Self {
            producer,
            generator,
            signaling,
        }
    }

    pub fn id(&self) -> &ProducerId {
        self.producer.id()
    }

    pub fn kind(&self) -> MediaKind {
        self.producer.kind()
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        self.producer.rtp_parameters()
    }

    pub fn is_closed(&self) -> bool {
        self.producer.is_closed()
    }

    /// Current source resolution, for video producers
    pub fn resolution(&self) -> Option<Resolution> {
        self.generator.as_ref().map(|g| g.resolution())
    }

    /// Switch the source resolution; frames after the call use it.
    pub fn change_resolution(&self, width: u32, height: u32) -> Result<()> {
        let generator = self.generator.as_ref().ok_or_else(|| {
            BridgeError::Unsupported(format!(
                "producer {} has no resizable video source",
                self.id()
            ))
        })?;
        generator.change_resolution(width, height)
    }

    pub fn capture_stats(&self) -> Option<CaptureStats> {
        self.producer.capture_stats()
    }

    pub fn close(&self) {
        close_on(&self.signaling, &self.producer, |p| p.close());
    }
}

impl fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("id", self.id())
            .field("kind", &self.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct ConsumerHandle {
    consumer: Arc<dyn Consumer>,
    signaling: EngineThread,
}

impl ConsumerHandle {
    pub(crate) fn new(consumer: Arc<dyn Consumer>, signaling: EngineThread) -> Self {
        Self {
            consumer,
            signaling,
        }
    }

    pub fn id(&self) -> &ConsumerId {
        self.consumer.id()
    }

    pub fn producer_id(&self) -> &ProducerId {
        self.consumer.producer_id()
    }

    pub fn kind(&self) -> MediaKind {
        self.consumer.kind()
    }

    pub fn is_closed(&self) -> bool {
        self.consumer.is_closed()
    }

    pub fn close(&self) {
        close_on(&self.signaling, &self.consumer, |c| c.close());
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("id", self.id())
            .field("producer_id", self.producer_id())
            .field("kind", &self.kind())
            .finish()
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct DataProducerHandle {
    data_producer: Arc<dyn DataProducer>,
    signaling: EngineThread,
}

impl DataProducerHandle {
    pub(crate) fn new(data_producer: Arc<dyn DataProducer>, signaling: EngineThread) -> Self {
        Self {
            data_producer,
            signaling,
        }
    }

    pub fn id(&self) -> &DataProducerId {
        self.data_producer.id()
    }

    pub fn label(&self) -> &str {
        self.data_producer.label()
    }

    pub fn ready_state(&self) -> DataChannelState {
        self.data_producer.ready_state()
    }

    /// Queue a binary message. Fails once the channel is no longer open.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.data_producer.send(data)
    }

    pub fn close(&self) {
        close_on(&self.signaling, &self.data_producer, |d| d.close());
    }
}

impl fmt::Debug for DataProducerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProducerHandle")
            .field("id", self.id())
            .field("label", &self.label())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl Drop for DataProducerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct DataConsumerHandle {
    data_consumer: Arc<dyn DataConsumer>,
    signaling: EngineThread,
}

impl DataConsumerHandle {
    pub(crate) fn new(data_consumer: Arc<dyn DataConsumer>, signaling: EngineThread) -> Self {
        Self {
            data_consumer,
            signaling,
        }
    }

    pub fn id(&self) -> &DataConsumerId {
        self.data_consumer.id()
    }

    pub fn data_producer_id(&self) -> &DataProducerId {
        self.data_consumer.data_producer_id()
    }

    pub fn label(&self) -> &str {
        self.data_consumer.label()
    }

    pub fn ready_state(&self) -> DataChannelState {
        self.data_consumer.ready_state()
    }

    pub fn close(&self) {
        close_on(&self.signaling, &self.data_consumer, |d| d.close());
    }
}

impl fmt::Debug for DataConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConsumerHandle")
            .field("id", self.id())
            .field("data_producer_id", self.data_producer_id())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl Drop for DataConsumerHandle {
    fn drop(&mut self) {
        self.close();
    }
}
