//! Coordinator: one session's send and receive transports
//!
//! Construction performs the whole negotiation handshake on the signaling
//! thread: fetch the router capabilities, load the device, report the local
//! capabilities, then create the send and receive transports from options
//! the authority returns. Every later operation also runs on the signaling
//! thread, and the engine calls back into the listeners there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::data_channel::{DataConsumerEvents, DataProducerEvents};
use super::handles::*;
use super::produce::{MediaEvents, ProduceEvents};
use super::transport::TransportEvents;
use super::{IdRegistry, IdScope, Outlet};
use crate::audio::default_audio_device;
use crate::engine::*;
use crate::error::{BridgeError, Result};
use crate::events::BridgeEvent;
use crate::signaling::types::*;
use crate::signaling::Signaller;
use crate::video::{FrameGenerator, FrameRelay, FrameSource, PixelFormat, Resolution, SquaresGenerator};

/// Engine object kinds the coordinator tracks
trait Child: Send + Sync {
    fn is_done(&self) -> bool;
    fn shut(&self);
}

impl Child for dyn Producer {
    fn is_done(&self) -> bool {
        self.is_closed()
    }

    fn shut(&self) {
        self.close()
    }
}

impl Child for dyn Consumer {
    fn is_done(&self) -> bool {
        self.is_closed()
    }

    fn shut(&self) {
        self.close()
    }
}

impl Child for dyn DataProducer {
    fn is_done(&self) -> bool {
        self.ready_state() == DataChannelState::Closed
    }

    fn shut(&self) {
        self.close()
    }
}

impl Child for dyn DataConsumer {
    fn is_done(&self) -> bool {
        self.ready_state() == DataChannelState::Closed
    }

    fn shut(&self) {
        self.close()
    }
}

/// Children of one kind, held weakly: the caller's handle owns the engine
/// object. Entries whose handle is gone or whose object has closed are
/// pruned and their ids released.
struct ChildList<T: ?Sized> {
    scope: IdScope,
    entries: Vec<(String, Weak<T>)>,
}

impl<T: ?Sized + Child> ChildList<T> {
    fn new(scope: IdScope) -> Self {
        Self {
            scope,
            entries: Vec::new(),
        }
    }

    fn prune(&mut self, registry: &IdRegistry) {
        let scope = self.scope;
        self.entries.retain(|(id, child)| {
            let live = child.upgrade().is_some_and(|c| !c.is_done());
            if !live {
                registry.release(scope, id);
            }
            live
        });
    }

    fn insert(&mut self, id: &str, child: &Arc<T>, registry: &IdRegistry) {
        self.prune(registry);
        self.entries.push((id.to_string(), Arc::downgrade(child)));
    }

    fn close_all(&self) {
        for child in self.entries.iter().filter_map(|(_, c)| c.upgrade()) {
            child.shut();
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Engine objects created through the coordinator, closed children-first
struct Children {
    producers: ChildList<dyn Producer>,
    consumers: ChildList<dyn Consumer>,
    data_producers: ChildList<dyn DataProducer>,
    data_consumers: ChildList<dyn DataConsumer>,
}

impl Children {
    fn new() -> Self {
        Self {
            producers: ChildList::new(IdScope::Producer),
            consumers: ChildList::new(IdScope::Consumer),
            data_producers: ChildList::new(IdScope::DataProducer),
            data_consumers: ChildList::new(IdScope::DataConsumer),
        }
    }

    fn close_all(&self) {
        self.data_consumers.close_all();
        self.consumers.close_all();
        self.data_producers.close_all();
        self.producers.close_all();
    }

    fn len(&self) -> usize {
        self.producers.len()
            + self.consumers.len()
            + self.data_producers.len()
            + self.data_consumers.len()
    }
}

pub struct Coordinator {
    id: String,
    context: Arc<EngineContext>,
    outlet: Arc<Outlet>,
    registry: Arc<IdRegistry>,
    send_events: Arc<TransportEvents>,
    recv_events: Arc<TransportEvents>,
    media_events: Arc<MediaEvents>,
    data_producer_events: Arc<DataProducerEvents>,
    data_consumer_events: Arc<DataConsumerEvents>,
    device: Arc<dyn Device>,
    send_transport: Arc<dyn SendTransport>,
    recv_transport: Arc<dyn RecvTransport>,
    children: Mutex<Children>,
    closed: AtomicBool,
}

/// One dispatcher per role; the authority may give both transports the same id
fn transport_events(outlet: &Arc<Outlet>) -> (Arc<TransportEvents>, Arc<TransportEvents>) {
    (
        Arc::new(TransportEvents::new(outlet.clone(), TransportDirection::Send)),
        Arc::new(TransportEvents::new(outlet.clone(), TransportDirection::Recv)),
    )
}

impl Coordinator {
    /// Negotiate with the authority and set up both transports.
    pub fn new(context: Arc<EngineContext>, signaller: Arc<dyn Signaller>) -> Result<Self> {
        if context.is_stopped() {
            return Err(BridgeError::EngineThread("engine context is stopped".into()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let outlet = Arc::new(Outlet::new(signaller, context.config().engine.event_capacity));
        let registry = Arc::new(IdRegistry::default());
        let (send_events, recv_events) = transport_events(&outlet);
        let produce_events = Arc::new(ProduceEvents::new(outlet.clone(), registry.clone()));

        let (device, send_transport, recv_transport) = {
            let engine = context.engine().clone();
            let threads = context.threads().clone();
            let outlet = outlet.clone();
            let send_events = send_events.clone();
            let recv_events = recv_events.clone();
            context.signaling().invoke(move || {
                handshake(
                    engine.as_ref(),
                    threads,
                    &outlet,
                    send_events,
                    recv_events,
                    produce_events,
                )
            })??
        };

        info!(
            "Coordinator {} ready (send {}, recv {})",
            id,
            send_transport.id(),
            recv_transport.id()
        );

        Ok(Self {
            id,
            media_events: Arc::new(MediaEvents::new(outlet.clone())),
            data_producer_events: Arc::new(DataProducerEvents::new(outlet.clone())),
            data_consumer_events: Arc::new(DataConsumerEvents::new(outlet.clone())),
            context,
            outlet,
            registry,
            send_events,
            recv_events,
            device,
            send_transport,
            recv_transport,
            children: Mutex::new(Children::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn send_transport_id(&self) -> &TransportId {
        self.send_transport.id()
    }

    pub fn recv_transport_id(&self) -> &TransportId {
        self.recv_transport.id()
    }

    /// Tracked state of the send or receive transport
    pub fn transport_state(&self, direction: TransportDirection) -> TransportState {
        self.events(direction).state()
    }

    fn events(&self, direction: TransportDirection) -> &TransportEvents {
        match direction {
            TransportDirection::Send => &self.send_events,
            TransportDirection::Recv => &self.recv_events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.outlet.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn can_produce(&self, kind: MediaKind) -> Result<bool> {
        self.ensure_open()?;
        let device = self.device.clone();
        self.context
            .signaling()
            .invoke(move || device.can_produce(kind))
    }

    /// Cameras and microphones of the engine
    pub fn capture_devices(&self) -> Result<CaptureDeviceList> {
        self.ensure_open()?;
        Ok(self.context.engine().devices().list())
    }

    /// Produce an engine-generated audio track.
    pub fn produce_fake_audio(&self) -> Result<ProducerHandle> {
        self.produce(MediaTrack::synthetic_audio(), None)
    }

    /// Produce a synthetic moving-squares video track.
    pub fn produce_fake_video(&self) -> Result<ProducerHandle> {
        let generator: Arc<dyn FrameGenerator> =
            Arc::new(SquaresGenerator::new(Resolution::VGA, self.context.clock())?);
        let fps = self.context.config().capture.default_fps;
        self.produce(MediaTrack::video(generator.clone(), fps), Some(generator))
    }

    /// Produce video from a camera. `device_index` picks an entry of
    /// [`Coordinator::capture_devices`]; `None` takes the first camera that
    /// delivers YUYV, or else the first camera.
    pub fn produce_camera(
        &self,
        device_index: Option<u32>,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<ProducerHandle> {
        self.check_fps(fps)?;
        let resolution = Resolution::new(width, height).validate()?;
        self.require_codec(MediaKind::Video)?;

        let devices = self.context.engine().devices();
        let cameras = devices.video_devices();
        if cameras.is_empty() {
            return Err(BridgeError::Exhausted("no video capture device".into()));
        }
        let camera = match device_index {
            Some(index) => cameras.iter().find(|c| c.index == index).ok_or_else(|| {
                BridgeError::InvalidParameters(format!(
                    "no camera at index {} ({} present)",
                    index,
                    cameras.len()
                ))
            })?,
            None => cameras
                .iter()
                .find(|c| c.supports_yuyv())
                .unwrap_or(&cameras[0]),
        };

        info!(
            "Coordinator {}: opening camera {} ({:?}) at {} {}fps",
            self.id, camera.name, camera.path, resolution, fps
        );
        let generator = devices.open_camera(camera, resolution, fps, self.context.clock())?;
        self.produce(MediaTrack::video(generator.clone(), fps), Some(generator))
    }

    /// Produce audio from the system's default capture device.
    pub fn produce_default_audio(&self) -> Result<ProducerHandle> {
        self.require_codec(MediaKind::Audio)?;

        let devices = self.context.engine().devices();
        let microphones = devices.audio_devices();
        let microphone = default_audio_device(&microphones)
            .ok_or_else(|| BridgeError::Exhausted("no audio capture device".into()))?;

        info!(
            "Coordinator {}: opening audio device {} ({})",
            self.id, microphone.name, microphone.description
        );
        let source = devices.open_microphone(microphone)?;
        self.produce(MediaTrack::microphone(source, self.context.clock()), None)
    }

    /// Produce video pulled from a caller-supplied frame source.
    pub fn produce_external_video(
        &self,
        source: Arc<dyn FrameSource>,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<ProducerHandle> {
        self.check_fps(fps)?;
        let generator: Arc<dyn FrameGenerator> = Arc::new(FrameRelay::new(
            source,
            width,
            height,
            PixelFormat::Rgba,
            self.context.clock(),
        )?);
        self.produce(MediaTrack::video(generator.clone(), fps), Some(generator))
    }

    fn check_fps(&self, fps: u32) -> Result<()> {
        let max_fps = self.context.config().capture.max_fps;
        if fps == 0 || fps > max_fps {
            return Err(BridgeError::InvalidParameters(format!(
                "fps must be within 1..={}, got {}",
                max_fps, fps
            )));
        }
        Ok(())
    }

    fn require_codec(&self, kind: MediaKind) -> Result<()> {
        if !self.can_produce(kind)? {
            return Err(BridgeError::Exhausted(format!(
                "device cannot produce {}",
                kind
            )));
        }
        Ok(())
    }

    fn produce(
        &self,
        track: MediaTrack,
        generator: Option<Arc<dyn FrameGenerator>>,
    ) -> Result<ProducerHandle> {
        let kind = track.kind();
        self.require_codec(kind)?;
        self.send_events.ensure_usable()?;

        let transport = self.send_transport.clone();
        let listener: Arc<dyn ProducerListener> = self.media_events.clone();
        let producer = self
            .context
            .signaling()
            .invoke(move || transport.produce(track, json!({}), listener))??;

        info!("Coordinator {}: producing {} as {}", self.id, kind, producer.id());
        self.children
            .lock()
            .producers
            .insert(producer.id().as_str(), &producer, &self.registry);
        Ok(ProducerHandle::new(
            producer,
            generator,
            self.context.signaling().clone(),
        ))
    }

    /// Consume a remote producer on the receive transport.
    pub fn consume(&self, options: ConsumerOptions) -> Result<ConsumerHandle> {
        self.ensure_open()?;
        self.recv_events.ensure_usable()?;
        self.children.lock().consumers.prune(&self.registry);
        let id = options.id.clone();
        self.registry.claim(IdScope::Consumer, id.as_str())?;

        let transport = self.recv_transport.clone();
        let listener: Arc<dyn ConsumerListener> = self.media_events.clone();
        let consumer = self
            .context
            .signaling()
            .invoke(move || transport.consume(&options, listener))
            .and_then(|created| created)
            .map_err(|e| {
                self.registry.release(IdScope::Consumer, id.as_str());
                e
            })?;

        info!(
            "Coordinator {}: consuming producer {} as {}",
            self.id,
            consumer.producer_id(),
            consumer.id()
        );
        self.children
            .lock()
            .consumers
            .insert(id.as_str(), &consumer, &self.registry);
        Ok(ConsumerHandle::new(consumer, self.context.signaling().clone()))
    }

    /// Open an outbound data channel with the configured reliability.
    pub fn produce_data(&self, label: &str, protocol: &str) -> Result<DataProducerHandle> {
        self.ensure_open()?;
        self.send_events.ensure_usable()?;

        let defaults = &self.context.config().data_channel;
        let mut options = DataProducerOptions::new(label, protocol);
        options.ordered = defaults.ordered;
        options.max_retransmits = defaults.max_retransmits;
        options.max_packet_life_time = defaults.max_packet_life_time;

        let transport = self.send_transport.clone();
        let listener: Arc<dyn DataProducerListener> = self.data_producer_events.clone();
        let data_producer = self
            .context
            .signaling()
            .invoke(move || transport.produce_data(options, listener))??;

        info!(
            "Coordinator {}: data producer {} ({:?}) created",
            self.id,
            data_producer.id(),
            data_producer.label()
        );
        self.children.lock().data_producers.insert(
            data_producer.id().as_str(),
            &data_producer,
            &self.registry,
        );
        Ok(DataProducerHandle::new(
            data_producer,
            self.context.signaling().clone(),
        ))
    }

    /// Ask the authority for a data consumer of `data_producer_id`, then create it.
    pub fn consume_data(&self, data_producer_id: &DataProducerId) -> Result<DataConsumerHandle> {
        self.ensure_open()?;
        self.recv_events.ensure_usable()?;

        let recv_id = self.recv_transport.id().clone();
        let outlet = self.outlet.clone();
        let requested = data_producer_id.clone();
        let options = self
            .context
            .signaling()
            .invoke(move || outlet.round_trip()?.consume_data(&recv_id, &requested))??;

        if &options.data_producer_id != data_producer_id {
            return Err(BridgeError::ContractViolation(format!(
                "asked to consume data producer {}, got options for {}",
                data_producer_id, options.data_producer_id
            )));
        }
        self.create_data_consumer(options)
    }

    /// Create a data consumer from options the authority already produced.
    pub fn create_data_consumer(&self, options: DataConsumerOptions) -> Result<DataConsumerHandle> {
        self.ensure_open()?;
        self.recv_events.ensure_usable()?;
        self.children.lock().data_consumers.prune(&self.registry);
        let id = options.id.clone();
        self.registry.claim(IdScope::DataConsumer, id.as_str())?;

        let transport = self.recv_transport.clone();
        let listener: Arc<dyn DataConsumerListener> = self.data_consumer_events.clone();
        let data_consumer = self
            .context
            .signaling()
            .invoke(move || transport.consume_data(&options, listener))
            .and_then(|created| created)
            .map_err(|e| {
                self.registry.release(IdScope::DataConsumer, id.as_str());
                e
            })?;

        info!(
            "Coordinator {}: data consumer {} for {} created",
            self.id,
            data_consumer.id(),
            data_consumer.data_producer_id()
        );
        self.children
            .lock()
            .data_consumers
            .insert(id.as_str(), &data_consumer, &self.registry);
        Ok(DataConsumerHandle::new(
            data_consumer,
            self.context.signaling().clone(),
        ))
    }

    /// Close everything this coordinator created. Idempotent.
    ///
    /// Children close before their transports. Notifications the engine
    /// queued during teardown are delivered before the authority is
    /// detached; anything later is dropped.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing coordinator {}", self.id);

        let children = Arc::new(std::mem::replace(
            &mut *self.children.lock(),
            Children::new(),
        ));
        let teardown = {
            let children = children.clone();
            let send = self.send_transport.clone();
            let recv = self.recv_transport.clone();
            let send_events = self.send_events.clone();
            let recv_events = self.recv_events.clone();
            move || {
                children.close_all();
                send.close();
                send_events.mark_closed();
                recv.close();
                recv_events.mark_closed();
            }
        };

        let signaling = self.context.signaling();
        if let Err(e) = signaling.invoke(teardown) {
            warn!("Coordinator {}: {}, closing inline", self.id, e);
            children.close_all();
            self.send_transport.close();
            self.recv_transport.close();
            self.send_events.mark_closed();
            self.recv_events.mark_closed();
        } else {
            // Flush what the teardown posted
            let _ = signaling.invoke(|| ());
        }

        self.outlet.publish(BridgeEvent::CoordinatorClosed {
            coordinator_id: self.id.clone(),
        });
        self.outlet.cut();
        info!("Coordinator {} closed", self.id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::ResourceClosed(format!(
                "coordinator {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    /// Live children and claimed ids, after pruning
    #[cfg(test)]
    fn tracked(&self) -> (usize, usize) {
        let mut children = self.children.lock();
        children.producers.prune(&self.registry);
        children.consumers.prune(&self.registry);
        children.data_producers.prune(&self.registry);
        children.data_consumers.prune(&self.registry);
        (children.len(), self.registry.len())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.close();
    }
}

type Negotiated = (Arc<dyn Device>, Arc<dyn SendTransport>, Arc<dyn RecvTransport>);

/// Runs on the signaling thread
fn handshake(
    engine: &dyn MediaEngine,
    threads: EngineThreads,
    outlet: &Outlet,
    send_events: Arc<TransportEvents>,
    recv_events: Arc<TransportEvents>,
    produce_events: Arc<ProduceEvents>,
) -> Result<Negotiated> {
    let signaller = outlet.round_trip()?;

    let router_capabilities = signaller.server_capabilities()?;
    let mut device = engine.create_device(threads)?;
    device.load(&router_capabilities)?;
    signaller.on_capabilities(&device.rtp_capabilities()?)?;

    // Transport ids are opaque to the bridge and may repeat across the pair
    let send_options = signaller.create_transport()?;
    let send = device.create_send_transport(&send_options, send_events, produce_events)?;

    let recv = signaller
        .create_transport()
        .and_then(|recv_options| device.create_recv_transport(&recv_options, recv_events))
        .map_err(|e| {
            send.close();
            e
        })?;

    Ok((Arc::from(device), send, recv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{Call, RecordingSignaller};
    use crate::config::BridgeConfig;
    use crate::engine::devices::StaticDevices;
    use crate::engine::loopback::ResourceKind;
    use crate::engine::LoopbackEngine;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn context() -> (Arc<LoopbackEngine>, Arc<EngineContext>) {
        context_with(LoopbackEngine::new())
    }

    fn context_with(engine: LoopbackEngine) -> (Arc<LoopbackEngine>, Arc<EngineContext>) {
        let engine = Arc::new(engine);
        let mut config = BridgeConfig::default();
        config.engine.thread_prefix = "test".into();
        let context = EngineContext::new(config, engine.clone()).unwrap();
        (engine, context)
    }

    fn coordinator() -> (Arc<LoopbackEngine>, Arc<RecordingSignaller>, Coordinator) {
        let (engine, context) = context();
        let signaller = Arc::new(RecordingSignaller::new());
        let coordinator = Coordinator::new(context, signaller.clone()).unwrap();
        (engine, signaller, coordinator)
    }

    fn wait_until(mut pred: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_handshake_order_and_distinct_transports() {
        let (_engine, signaller, coordinator) = coordinator();

        assert_eq!(
            signaller.calls(),
            vec![
                Call::ServerCapabilities,
                Call::Capabilities,
                Call::CreateTransport("t1".into()),
                Call::CreateTransport("t2".into()),
            ]
        );
        assert_eq!(coordinator.send_transport_id().as_str(), "t1");
        assert_eq!(coordinator.recv_transport_id().as_str(), "t2");
        assert_eq!(
            coordinator.transport_state(TransportDirection::Send),
            TransportState::New
        );
    }

    #[test]
    fn test_connect_fires_once_per_transport() {
        let (_engine, signaller, coordinator) = coordinator();

        let audio = coordinator.produce_fake_audio().unwrap();
        let data = coordinator.produce_data("chat", "").unwrap();
        assert_eq!(audio.id().as_str(), "p1");
        assert_eq!(audio.kind(), MediaKind::Audio);
        assert_eq!(data.id().as_str(), "dp0");

        assert_eq!(signaller.count(|c| matches!(c, Call::Connect(_))), 1);
        assert!(signaller.calls().contains(&Call::Connect("t1".into())));
        assert!(signaller.wait_for(|c| {
            *c == Call::ConnectionState("t1".into(), "connected".into())
        }));
        assert!(wait_until(|| {
            coordinator.transport_state(TransportDirection::Send) == TransportState::Connected
        }));
    }

    #[test]
    fn test_missing_codec_is_exhausted() {
        let (_engine, context) = context();
        let signaller = Arc::new(RecordingSignaller::new().with_capabilities(json!({
            "codecs": [{"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000}]
        })));
        let coordinator = Coordinator::new(context, signaller).unwrap();

        assert!(coordinator.can_produce(MediaKind::Audio).unwrap());
        assert!(!coordinator.can_produce(MediaKind::Video).unwrap());
        let err = coordinator.produce_fake_video().unwrap_err();
        assert!(matches!(err, BridgeError::Exhausted(_)));
    }

    #[test]
    fn test_empty_producer_id_fails_produce() {
        let (_engine, signaller, coordinator) = coordinator();
        *signaller.producer_id.lock() = Some(String::new());
        let err = coordinator.produce_fake_audio().unwrap_err();
        assert!(matches!(err, BridgeError::ContractViolation(_)));
    }

    #[test]
    fn test_fake_video_captures_and_resizes() {
        let (_engine, _signaller, coordinator) = coordinator();
        let video = coordinator.produce_fake_video().unwrap();
        assert_eq!(video.resolution(), Some(Resolution::VGA));

        assert!(wait_until(|| {
            video.capture_stats().map(|s| s.frames).unwrap_or(0) >= 2
        }));
        video.change_resolution(320, 240).unwrap();
        assert_eq!(video.resolution(), Some(Resolution::new(320, 240)));
        assert!(matches!(
            video.change_resolution(0, 240),
            Err(BridgeError::InvalidResolution { .. })
        ));

        let audio = coordinator.produce_fake_audio().unwrap();
        assert!(matches!(
            audio.change_resolution(320, 240),
            Err(BridgeError::Unsupported(_))
        ));
    }

    struct Gray;

    impl FrameSource for Gray {
        fn fill(&self, _width: u32, _height: u32, _timestamp_us: i64, buffer: &mut [u8]) {
            buffer.fill(128);
        }
    }

    #[test]
    fn test_external_video_validation() {
        let (_engine, _signaller, coordinator) = coordinator();
        assert!(matches!(
            coordinator.produce_external_video(Arc::new(Gray), 640, 480, 0),
            Err(BridgeError::InvalidParameters(_))
        ));
        assert!(matches!(
            coordinator.produce_external_video(Arc::new(Gray), 0, 480, 30),
            Err(BridgeError::InvalidResolution { .. })
        ));

        let producer = coordinator
            .produce_external_video(Arc::new(Gray), 64, 48, 30)
            .unwrap();
        assert_eq!(producer.kind(), MediaKind::Video);
        assert!(wait_until(|| {
            producer.capture_stats().map(|s| s.frames).unwrap_or(0) >= 1
        }));
    }

    #[test]
    fn test_data_channel_loopback() {
        let (_engine, signaller, coordinator) = coordinator();

        let producer = coordinator.produce_data("chat", "").unwrap();
        let consumer = coordinator.consume_data(producer.id()).unwrap();
        assert_eq!(consumer.id().as_str(), "dc-dp0");
        assert_eq!(consumer.label(), "chat");
        assert!(signaller
            .calls()
            .contains(&Call::ConsumeData("t2".into(), "dp0".into())));

        producer.send(b"hello").unwrap();
        assert!(signaller.wait_for(|c| {
            *c == Call::DataMessage("dc-dp0".into(), b"hello".to_vec())
        }));

        producer.close();
        assert_eq!(producer.ready_state(), DataChannelState::Closed);
        assert!(matches!(
            producer.send(b"late"),
            Err(BridgeError::ResourceClosed(_))
        ));
    }

    #[test]
    fn test_consume_rejects_duplicate_ids() {
        let (_engine, _signaller, coordinator) = coordinator();
        let options: ConsumerOptions = serde_json::from_value(json!({
            "id": "c1",
            "producerId": "remote-p",
            "kind": "video",
            "rtpParameters": {"codecs": []}
        }))
        .unwrap();

        let consumer = coordinator.consume(options.clone()).unwrap();
        assert_eq!(consumer.producer_id().as_str(), "remote-p");
        assert!(matches!(
            coordinator.consume(options),
            Err(BridgeError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_failed_transport_rejects_new_work() {
        let (engine, signaller, coordinator) = coordinator();
        let _audio = coordinator.produce_fake_audio().unwrap();
        assert!(wait_until(|| {
            coordinator.transport_state(TransportDirection::Send) == TransportState::Connected
        }));

        engine
            .simulate_connection_state(TransportDirection::Send, "failed")
            .unwrap();
        assert!(signaller.wait_for(|c| {
            *c == Call::ConnectionState("t1".into(), "failed".into())
        }));
        assert!(wait_until(|| {
            coordinator.transport_state(TransportDirection::Send) == TransportState::Failed
        }));

        assert!(matches!(
            coordinator.produce_fake_audio(),
            Err(BridgeError::TransportFailed(_))
        ));
        // The receive side is unaffected
        assert!(!coordinator
            .transport_state(TransportDirection::Recv)
            .is_terminal());
    }

    #[test]
    fn test_close_order_children_before_transports() {
        let (engine, _signaller, coordinator) = coordinator();
        let audio = coordinator.produce_fake_audio().unwrap();
        let data = coordinator.produce_data("chat", "").unwrap();
        let data_consumer = coordinator.consume_data(data.id()).unwrap();

        coordinator.close();
        coordinator.close();

        let order: Vec<ResourceKind> = engine
            .journal()
            .closed_order()
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(
            order,
            vec![
                ResourceKind::DataConsumer,
                ResourceKind::DataProducer,
                ResourceKind::Producer,
                ResourceKind::Transport,
                ResourceKind::Transport,
            ]
        );
        assert!(audio.is_closed());
        assert_eq!(data_consumer.ready_state(), DataChannelState::Closed);
        assert!(matches!(
            coordinator.produce_fake_audio(),
            Err(BridgeError::ResourceClosed(_))
        ));
        assert_eq!(
            coordinator.transport_state(TransportDirection::Send),
            TransportState::Closed
        );
    }

    #[test]
    fn test_no_notifications_after_close() {
        let (_engine, signaller, coordinator) = coordinator();
        let data = coordinator.produce_data("chat", "").unwrap();
        let _consumer = coordinator.consume_data(data.id()).unwrap();

        drop(coordinator);
        let recorded = signaller.calls().len();

        // Closing handles after the coordinator is gone stays silent
        drop(data);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(signaller.calls().len(), recorded);
    }

    #[tokio::test]
    async fn test_events_published() {
        let (_engine, _signaller, coordinator) = coordinator();
        let mut rx = coordinator.subscribe();

        let audio = coordinator.produce_fake_audio().unwrap();
        match rx.recv().await.unwrap() {
            BridgeEvent::ProducerCreated { producer_id, kind } => {
                assert_eq!(&producer_id, audio.id());
                assert_eq!(kind, "audio");
            }
            other => panic!("unexpected event {:?}", other),
        }

        coordinator.close();
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_name());
        }
        assert_eq!(names.last(), Some(&"coordinator.closed"));
    }

    #[test]
    fn test_new_on_stopped_context_fails() {
        let (_engine, context) = context();
        context.shutdown();
        let result = Coordinator::new(context, Arc::new(RecordingSignaller::new()));
        assert!(matches!(result, Err(BridgeError::EngineThread(_))));
    }

    #[test]
    fn test_repeated_transport_id_is_tracked_per_role() {
        let (engine, context) = context();
        let signaller = Arc::new(RecordingSignaller::new().with_fixed_transport_id("t1"));
        let coordinator = Coordinator::new(context, signaller.clone()).unwrap();
        assert_eq!(coordinator.send_transport_id().as_str(), "t1");
        assert_eq!(coordinator.recv_transport_id().as_str(), "t1");

        let audio = coordinator.produce_fake_audio().unwrap();
        let data = coordinator.produce_data("chat", "").unwrap();
        let _consumer = coordinator.consume_data(data.id()).unwrap();
        assert_eq!(signaller.count(|c| matches!(c, Call::Connect(_))), 2);

        engine
            .simulate_connection_state(TransportDirection::Recv, "failed")
            .unwrap();
        assert!(wait_until(|| {
            coordinator.transport_state(TransportDirection::Recv) == TransportState::Failed
        }));
        assert!(!coordinator
            .transport_state(TransportDirection::Send)
            .is_terminal());
        assert!(matches!(
            coordinator.consume_data(data.id()),
            Err(BridgeError::TransportFailed(_))
        ));
        assert!(coordinator.produce_fake_audio().is_ok());
        assert!(!audio.is_closed());
    }

    #[test]
    fn test_handles_format_with_debug() {
        let (_engine, _signaller, coordinator) = coordinator();
        let audio = coordinator.produce_fake_audio().unwrap();
        let data = coordinator.produce_data("chat", "").unwrap();
        let consumer = coordinator.consume_data(data.id()).unwrap();

        let text = format!("{:?}", audio);
        assert!(text.starts_with("ProducerHandle"));
        assert!(text.contains("p1"));
        assert!(format!("{:?}", data).contains("chat"));
        assert!(format!("{:?}", consumer).contains("dc-dp0"));

        coordinator.close();
        let err = coordinator.produce_fake_audio().unwrap_err();
        assert!(matches!(err, BridgeError::ResourceClosed(_)));
    }

    fn data_consumer_options(id: &str, data_producer_id: &DataProducerId) -> DataConsumerOptions {
        DataConsumerOptions {
            id: DataConsumerId::new(id).unwrap(),
            data_producer_id: data_producer_id.clone(),
            sctp_stream_parameters: SctpStreamParameters {
                stream_id: 0,
                ordered: true,
                max_packet_life_time: None,
                max_retransmits: None,
            },
            label: "chat".into(),
            protocol: String::new(),
        }
    }

    #[test]
    fn test_dropped_children_are_released() {
        let (_engine, _signaller, coordinator) = coordinator();
        let data = coordinator.produce_data("chat", "").unwrap();

        for i in 0..50 {
            let consumer = coordinator
                .create_data_consumer(data_consumer_options(&format!("dc{}", i), data.id()))
                .unwrap();
            drop(consumer);
        }
        // The data producer and at most one data consumer awaiting pruning
        let (children, ids) = coordinator.tracked();
        assert_eq!(children, 1);
        assert_eq!(ids, 1);

        // A released id is free for a new consumer; a live one is not
        let first = coordinator
            .create_data_consumer(data_consumer_options("dc0", data.id()))
            .unwrap();
        assert!(matches!(
            coordinator.create_data_consumer(data_consumer_options("dc0", data.id())),
            Err(BridgeError::ContractViolation(_))
        ));
        drop(first);

        for _ in 0..20 {
            drop(coordinator.produce_fake_audio().unwrap());
        }
        assert_eq!(coordinator.tracked(), (1, 1));
    }

    #[test]
    fn test_failed_creation_does_not_burn_the_id() {
        let (_engine, context) = context();
        let signaller = Arc::new(RecordingSignaller::new().without_sctp());
        let coordinator = Coordinator::new(context, signaller).unwrap();
        let remote = DataProducerId::new("remote-dp").unwrap();

        for _ in 0..2 {
            assert!(matches!(
                coordinator.create_data_consumer(data_consumer_options("dc1", &remote)),
                Err(BridgeError::Unsupported(_))
            ));
        }

        let bad: ConsumerOptions = serde_json::from_value(json!({
            "id": "c1",
            "producerId": "remote-p",
            "kind": "audio",
            "rtpParameters": []
        }))
        .unwrap();
        for _ in 0..2 {
            assert!(matches!(
                coordinator.consume(bad.clone()),
                Err(BridgeError::InvalidParameters(_))
            ));
        }
        assert_eq!(coordinator.tracked(), (0, 0));
    }

    #[test]
    fn test_camera_and_default_audio() {
        let devices = Arc::new(StaticDevices::typical().with_camera("Second Camera"));
        let (_engine, context) = context_with(LoopbackEngine::new().with_devices(devices.clone()));
        let coordinator = Coordinator::new(context, Arc::new(RecordingSignaller::new())).unwrap();

        let listed = coordinator.capture_devices().unwrap();
        assert_eq!(listed.video.len(), 2);
        assert_eq!(listed.audio.len(), 1);

        let camera = coordinator.produce_camera(Some(1), 320, 240, 30).unwrap();
        assert_eq!(camera.kind(), MediaKind::Video);
        assert_eq!(camera.resolution(), Some(Resolution::new(320, 240)));
        assert!(wait_until(|| {
            camera.capture_stats().map(|s| s.frames).unwrap_or(0) >= 2
        }));
        camera.change_resolution(160, 120).unwrap();

        let microphone = coordinator.produce_default_audio().unwrap();
        assert_eq!(microphone.kind(), MediaKind::Audio);
        assert!(wait_until(|| {
            microphone.capture_stats().map(|s| s.frames).unwrap_or(0) >= 2
        }));
        assert_eq!(devices.opened(), vec!["Second Camera", "default"]);

        assert!(matches!(
            coordinator.produce_camera(Some(7), 320, 240, 30),
            Err(BridgeError::InvalidParameters(_))
        ));
        assert!(matches!(
            coordinator.produce_camera(None, 0, 240, 30),
            Err(BridgeError::InvalidResolution { .. })
        ));
        assert!(matches!(
            coordinator.produce_camera(None, 320, 240, 0),
            Err(BridgeError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_no_capture_device_is_exhausted() {
        let (_engine, context) =
            context_with(LoopbackEngine::new().with_devices(Arc::new(StaticDevices::empty())));
        let coordinator = Coordinator::new(context, Arc::new(RecordingSignaller::new())).unwrap();

        assert_eq!(coordinator.capture_devices().unwrap(), CaptureDeviceList::default());
        assert!(matches!(
            coordinator.produce_camera(None, 640, 480, 30),
            Err(BridgeError::Exhausted(_))
        ));
        assert!(matches!(
            coordinator.produce_default_audio(),
            Err(BridgeError::Exhausted(_))
        ));
    }
}
