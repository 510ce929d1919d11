//! In-process media engine
//!
//! Implements the engine traits without any network: transports connect
//! immediately, data producers deliver straight to data consumers created
//! for them, and video and microphone producers run a real capture loop
//! whose output is "encoded" on the worker thread. Every create and close is
//! written to a [`Journal`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use super::*;
use crate::audio::{AudioCaptureLoop, AudioFrame, AudioSink};
use crate::error::{BridgeError, Result};
use crate::signaling::types::*;
use crate::video::{CaptureLoop, FrameSink, StatsSink, VideoFrame};

/// Resource kinds recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Transport,
    Producer,
    Consumer,
    DataProducer,
    DataConsumer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Created { kind: ResourceKind, id: String },
    Closed { kind: ResourceKind, id: String },
}

/// Ordered log of resource lifecycle events
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    fn created(&self, kind: ResourceKind, id: &str) {
        self.entries.lock().push(JournalEntry::Created {
            kind,
            id: id.to_string(),
        });
    }

    fn closed(&self, kind: ResourceKind, id: &str) {
        self.entries.lock().push(JournalEntry::Closed {
            kind,
            id: id.to_string(),
        });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Close events in the order they happened
    pub fn closed_order(&self) -> Vec<(ResourceKind, String)> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| match entry {
                JournalEntry::Closed { kind, id } => Some((*kind, id.clone())),
                JournalEntry::Created { .. } => None,
            })
            .collect()
    }
}

/// Data producer id -> data consumers fed by it
#[derive(Default)]
struct ForwardingTable {
    routes: Mutex<HashMap<DataProducerId, Vec<Weak<LoopbackDataConsumer>>>>,
}

impl ForwardingTable {
    fn add(&self, consumer: &Arc<LoopbackDataConsumer>) {
        self.routes
            .lock()
            .entry(consumer.data_producer_id.clone())
            .or_default()
            .push(Arc::downgrade(consumer));
    }

    fn targets(&self, data_producer_id: &DataProducerId) -> Vec<Arc<LoopbackDataConsumer>> {
        let mut routes = self.routes.lock();
        let Some(list) = routes.get_mut(data_producer_id) else {
            return Vec::new();
        };
        list.retain(|weak| weak.strong_count() > 0);
        list.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Open transports. Ids come from the authority and may repeat, so the
/// list is searched by direction.
type TransportList = Arc<Mutex<Vec<Weak<LoopbackTransport>>>>;

struct Shared {
    threads: EngineThreads,
    journal: Arc<Journal>,
    table: Arc<ForwardingTable>,
    transports: TransportList,
}

/// In-process engine
pub struct LoopbackEngine {
    journal: Arc<Journal>,
    table: Arc<ForwardingTable>,
    transports: TransportList,
    devices: Arc<dyn CaptureDevices>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self {
            journal: Arc::default(),
            table: Arc::default(),
            transports: Arc::default(),
            devices: Arc::new(SystemDevices),
        }
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the machine's cameras and microphones
    pub fn with_devices(mut self, devices: Arc<dyn CaptureDevices>) -> Self {
        self.devices = devices;
        self
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Emit a connection state change on the most recent open transport of
    /// `direction`, as if ICE/DTLS had reported it.
    pub fn simulate_connection_state(&self, direction: TransportDirection, state: &str) -> Result<()> {
        let transport = self
            .transports
            .lock()
            .iter()
            .rev()
            .filter_map(Weak::upgrade)
            .find(|t| t.direction == direction && !t.is_closed())
            .ok_or_else(|| {
                BridgeError::InvalidParameters(format!("no open {} transport", direction))
            })?;
        transport.post_state(state);
        Ok(())
    }
}

impl MediaEngine for LoopbackEngine {
    fn name(&self) -> &str {
        "loopback"
    }

    fn devices(&self) -> Arc<dyn CaptureDevices> {
        self.devices.clone()
    }

    fn create_device(&self, threads: EngineThreads) -> Result<Box<dyn Device>> {
        Ok(Box::new(LoopbackDevice {
            shared: Arc::new(Shared {
                threads,
                journal: self.journal.clone(),
                table: self.table.clone(),
                transports: self.transports.clone(),
            }),
            local_capabilities: None,
        }))
    }
}

fn codecs_of(capabilities: &Value, kind: MediaKind) -> Vec<Value> {
    capabilities
        .get("codecs")
        .and_then(Value::as_array)
        .map(|codecs| {
            codecs
                .iter()
                .filter(|codec| codec.get("kind").and_then(Value::as_str) == Some(kind.as_str()))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

struct LoopbackDevice {
    shared: Arc<Shared>,
    local_capabilities: Option<Value>,
}

impl LoopbackDevice {
    fn loaded_capabilities(&self) -> Result<&Value> {
        self.local_capabilities
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidParameters("device not loaded".into()))
    }

    fn transport(
        &self,
        options: &TransportOptions,
        direction: TransportDirection,
        listener: Arc<dyn TransportListener>,
        produce_listener: Option<Arc<dyn ProduceListener>>,
    ) -> Result<Arc<LoopbackTransport>> {
        let local_capabilities = self.loaded_capabilities()?.clone();
        let transport = Arc::new(LoopbackTransport {
            id: options.id.clone(),
            direction,
            shared: self.shared.clone(),
            listener,
            produce_listener,
            local_capabilities,
            sctp_enabled: options.sctp_parameters.is_some(),
            local_dtls: DtlsParameters(json!({
                "role": "client",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": uuid::Uuid::new_v4().simple().to_string(),
                }],
            })),
            cname: uuid::Uuid::new_v4().simple().to_string(),
            connected: Mutex::new(false),
            closed: AtomicBool::new(false),
            next_mid: AtomicU32::new(0),
            next_stream_id: AtomicU16::new(0),
            children: Mutex::new(Vec::new()),
        });
        {
            let mut transports = self.shared.transports.lock();
            transports.retain(|weak| weak.strong_count() > 0);
            transports.push(Arc::downgrade(&transport));
        }
        self.shared
            .journal
            .created(ResourceKind::Transport, transport.id.as_str());
        info!("Loopback {} transport {} created", direction, transport.id);
        Ok(transport)
    }
}

impl Device for LoopbackDevice {
    fn load(&mut self, router_capabilities: &RtpCapabilities) -> Result<()> {
        let caps = router_capabilities.0.as_object().ok_or_else(|| {
            BridgeError::InvalidParameters("router RTP capabilities must be an object".into())
        })?;
        let codecs: Vec<Value> = caps
            .get("codecs")
            .and_then(Value::as_array)
            .map(|codecs| {
                codecs
                    .iter()
                    .filter(|c| matches!(c.get("kind").and_then(Value::as_str), Some("audio" | "video")))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let header_extensions = caps
            .get("headerExtensions")
            .cloned()
            .unwrap_or_else(|| json!([]));

        debug!("Loopback device loaded with {} codecs", codecs.len());
        self.local_capabilities = Some(json!({
            "codecs": codecs,
            "headerExtensions": header_extensions,
        }));
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.local_capabilities.is_some()
    }

    fn rtp_capabilities(&self) -> Result<RtpCapabilities> {
        Ok(RtpCapabilities(self.loaded_capabilities()?.clone()))
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        self.local_capabilities
            .as_ref()
            .map(|caps| !codecs_of(caps, kind).is_empty())
            .unwrap_or(false)
    }

    fn create_send_transport(
        &self,
        options: &TransportOptions,
        listener: Arc<dyn TransportListener>,
        produce_listener: Arc<dyn ProduceListener>,
    ) -> Result<Arc<dyn SendTransport>> {
        let transport = self.transport(
            options,
            TransportDirection::Send,
            listener,
            Some(produce_listener),
        )?;
        Ok(transport as Arc<dyn SendTransport>)
    }

    fn create_recv_transport(
        &self,
        options: &TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn RecvTransport>> {
        let transport = self.transport(options, TransportDirection::Recv, listener, None)?;
        Ok(transport as Arc<dyn RecvTransport>)
    }
}

/// Lets a transport tell its children it went away
trait TransportChild: Send + Sync {
    fn transport_closed(&self);
}

struct LoopbackTransport {
    id: TransportId,
    direction: TransportDirection,
    shared: Arc<Shared>,
    listener: Arc<dyn TransportListener>,
    produce_listener: Option<Arc<dyn ProduceListener>>,
    local_capabilities: Value,
    sctp_enabled: bool,
    local_dtls: DtlsParameters,
    cname: String,
    connected: Mutex<bool>,
    closed: AtomicBool,
    next_mid: AtomicU32,
    next_stream_id: AtomicU16,
    children: Mutex<Vec<Weak<dyn TransportChild>>>,
}

impl LoopbackTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::TransportClosed(self.id.to_string()));
        }
        Ok(())
    }

    /// Fire `on_connect` once, before the first produce or consume.
    fn ensure_connected(&self) -> Result<()> {
        let mut connected = self.connected.lock();
        if *connected {
            return Ok(());
        }
        self.listener.on_connect(&self.id, &self.local_dtls)?;
        *connected = true;
        drop(connected);

        self.post_state("connecting");
        self.post_state("connected");
        Ok(())
    }

    fn post_state(&self, state: &str) {
        let listener = self.listener.clone();
        let id = self.id.clone();
        let state = state.to_string();
        self.shared
            .threads
            .signaling
            .post(move || listener.on_connection_state_change(&id, &state));
    }

    fn adopt(&self, child: Weak<dyn TransportChild>) {
        let mut children = self.children.lock();
        children.retain(|weak| weak.strong_count() > 0);
        children.push(child);
    }

    fn require_sctp(&self) -> Result<()> {
        if !self.sctp_enabled {
            return Err(BridgeError::Unsupported(format!(
                "transport {} was created without sctpParameters",
                self.id
            )));
        }
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let children: Vec<_> = self.children.lock().drain(..).collect();
        for child in children.iter().filter_map(Weak::upgrade) {
            child.transport_closed();
        }
        self.shared
            .transports
            .lock()
            .retain(|weak| weak.upgrade().is_some_and(|t| !t.is_closed()));
        self.shared
            .journal
            .closed(ResourceKind::Transport, self.id.as_str());
        info!("Loopback {} transport {} closed", self.direction, self.id);
    }
}

impl SendTransport for LoopbackTransport {
    fn produce(
        &self,
        track: MediaTrack,
        app_data: Value,
        listener: Arc<dyn ProducerListener>,
    ) -> Result<Arc<dyn Producer>> {
        self.ensure_open()?;
        let produce_listener = self
            .produce_listener
            .as_ref()
            .ok_or_else(|| BridgeError::Unsupported("recv transport cannot produce".into()))?;

        let kind = track.kind();
        let codecs = codecs_of(&self.local_capabilities, kind);
        if codecs.is_empty() {
            return Err(BridgeError::Exhausted(format!("no {} codec available", kind)));
        }

        self.ensure_connected()?;

        let mid = self.next_mid.fetch_add(1, Ordering::SeqCst);
        let rtp_parameters = RtpParameters(json!({
            "mid": mid.to_string(),
            "codecs": codecs,
            "headerExtensions": [],
            "encodings": [{ "ssrc": rand::random::<u32>() }],
            "rtcp": { "cname": self.cname, "reducedSize": true },
        }));
        let id = produce_listener.on_produce(&self.id, kind, &rtp_parameters, &app_data)?;

        let capture = match track.source {
            TrackSource::Video { generator, fps } => {
                let encoder = Arc::new(EncoderSink {
                    worker: self.shared.threads.worker.clone(),
                    stats: Arc::new(StatsSink::default()),
                });
                Some(Capture::Video(CaptureLoop::start(
                    format!("capture-{}", mid),
                    generator,
                    fps,
                    encoder,
                )?))
            }
            TrackSource::Microphone { source, clock } => {
                let encoder = Arc::new(AudioEncoderSink {
                    worker: self.shared.threads.worker.clone(),
                });
                Some(Capture::Audio(AudioCaptureLoop::start(
                    format!("audio-{}", mid),
                    source,
                    clock,
                    encoder,
                )?))
            }
            TrackSource::SyntheticAudio => None,
        };

        let producer = Arc::new(LoopbackProducer {
            id,
            kind,
            track_id: track.id,
            rtp_parameters,
            capture,
            listener,
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        });
        self.shared
            .journal
            .created(ResourceKind::Producer, producer.id.as_str());
        let weak: Weak<LoopbackProducer> = Arc::downgrade(&producer);
        self.adopt(weak);
        Ok(producer as Arc<dyn Producer>)
    }

    fn produce_data(
        &self,
        options: DataProducerOptions,
        listener: Arc<dyn DataProducerListener>,
    ) -> Result<Arc<dyn DataProducer>> {
        self.ensure_open()?;
        self.require_sctp()?;
        let produce_listener = self
            .produce_listener
            .as_ref()
            .ok_or_else(|| BridgeError::Unsupported("recv transport cannot produce".into()))?;

        self.ensure_connected()?;

        let sctp = SctpStreamParameters {
            stream_id: self.next_stream_id.fetch_add(1, Ordering::SeqCst),
            ordered: options.ordered,
            max_packet_life_time: options.max_packet_life_time,
            max_retransmits: options.max_retransmits,
        };
        let id = produce_listener.on_produce_data(
            &self.id,
            &sctp,
            &options.label,
            &options.protocol,
            &options.app_data,
        )?;

        let producer = Arc::new(LoopbackDataProducer {
            id,
            label: options.label,
            shared: self.shared.clone(),
            listener,
            state: Mutex::new(DataChannelState::Open),
        });
        self.shared
            .journal
            .created(ResourceKind::DataProducer, producer.id.as_str());
        producer.post_state(DataChannelState::Connecting);
        producer.post_state(DataChannelState::Open);

        let weak: Weak<LoopbackDataProducer> = Arc::downgrade(&producer);
        self.adopt(weak);
        Ok(producer as Arc<dyn DataProducer>)
    }
}

impl RecvTransport for LoopbackTransport {
    fn consume(
        &self,
        options: &ConsumerOptions,
        listener: Arc<dyn ConsumerListener>,
    ) -> Result<Arc<dyn Consumer>> {
        self.ensure_open()?;
        if !options.rtp_parameters.0.is_object() {
            return Err(BridgeError::InvalidParameters(
                "consumer rtpParameters must be an object".into(),
            ));
        }
        self.ensure_connected()?;

        let consumer = Arc::new(LoopbackConsumer {
            id: options.id.clone(),
            producer_id: options.producer_id.clone(),
            kind: options.kind,
            listener,
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        });
        self.shared
            .journal
            .created(ResourceKind::Consumer, consumer.id.as_str());
        let weak: Weak<LoopbackConsumer> = Arc::downgrade(&consumer);
        self.adopt(weak);
        Ok(consumer as Arc<dyn Consumer>)
    }

    fn consume_data(
        &self,
        options: &DataConsumerOptions,
        listener: Arc<dyn DataConsumerListener>,
    ) -> Result<Arc<dyn DataConsumer>> {
        self.ensure_open()?;
        self.require_sctp()?;
        self.ensure_connected()?;

        let consumer = Arc::new(LoopbackDataConsumer {
            id: options.id.clone(),
            data_producer_id: options.data_producer_id.clone(),
            label: options.label.clone(),
            shared: self.shared.clone(),
            listener,
            state: Mutex::new(DataChannelState::Open),
        });
        self.shared
            .journal
            .created(ResourceKind::DataConsumer, consumer.id.as_str());
        self.shared.table.add(&consumer);
        consumer.post(|listener, id| listener.on_connecting(id));
        consumer.post(|listener, id| listener.on_open(id));

        let weak: Weak<LoopbackDataConsumer> = Arc::downgrade(&consumer);
        self.adopt(weak);
        Ok(consumer as Arc<dyn DataConsumer>)
    }
}

/// Hands captured frames to the worker thread
struct EncoderSink {
    worker: EngineThread,
    stats: Arc<StatsSink>,
}

impl FrameSink for EncoderSink {
    fn on_frame(&self, frame: VideoFrame) {
        let stats = self.stats.clone();
        self.worker.post(move || {
            trace!("encode frame #{} {}", frame.sequence, frame.resolution);
            stats.on_frame(frame);
        });
    }
}

/// Hands captured PCM to the worker thread
struct AudioEncoderSink {
    worker: EngineThread,
}

impl AudioSink for AudioEncoderSink {
    fn on_audio(&self, frame: AudioFrame) {
        self.worker.post(move || {
            trace!(
                "encode audio #{} {} samples @ {}Hz",
                frame.sequence,
                frame.samples,
                frame.sample_rate
            );
        });
    }
}

/// The capture thread feeding a producer
enum Capture {
    Video(CaptureLoop),
    Audio(AudioCaptureLoop),
}

impl Capture {
    fn stop(&self) {
        match self {
            Capture::Video(capture) => capture.stop(),
            Capture::Audio(capture) => capture.stop(),
        }
    }

    fn stats(&self) -> CaptureStats {
        match self {
            Capture::Video(capture) => capture.stats(),
            Capture::Audio(capture) => capture.stats(),
        }
    }
}

struct LoopbackProducer {
    id: ProducerId,
    kind: MediaKind,
    track_id: String,
    rtp_parameters: RtpParameters,
    capture: Option<Capture>,
    listener: Arc<dyn ProducerListener>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl LoopbackProducer {
    fn shut(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(capture) = &self.capture {
            capture.stop();
        }
        self.shared
            .journal
            .closed(ResourceKind::Producer, self.id.as_str());
        debug!("Loopback producer {} (track {}) closed", self.id, self.track_id);
        true
    }
}

impl Producer for LoopbackProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.shut();
    }

    fn capture_stats(&self) -> Option<CaptureStats> {
        self.capture.as_ref().map(Capture::stats)
    }
}

impl TransportChild for LoopbackProducer {
    fn transport_closed(&self) {
        if self.shut() {
            let listener = self.listener.clone();
            let id = self.id.clone();
            self.shared
                .threads
                .signaling
                .post(move || listener.on_transport_close(&id));
        }
    }
}

struct LoopbackConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    listener: Arc<dyn ConsumerListener>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl LoopbackConsumer {
    fn shut(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared
            .journal
            .closed(ResourceKind::Consumer, self.id.as_str());
        true
    }
}

impl Consumer for LoopbackConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.shut();
    }
}

impl TransportChild for LoopbackConsumer {
    fn transport_closed(&self) {
        if self.shut() {
            let listener = self.listener.clone();
            let id = self.id.clone();
            self.shared
                .threads
                .signaling
                .post(move || listener.on_transport_close(&id));
        }
    }
}

struct LoopbackDataProducer {
    id: DataProducerId,
    label: String,
    shared: Arc<Shared>,
    listener: Arc<dyn DataProducerListener>,
    state: Mutex<DataChannelState>,
}

impl LoopbackDataProducer {
    fn post_state(&self, state: DataChannelState) {
        let listener = self.listener.clone();
        let id = self.id.clone();
        self.shared
            .threads
            .signaling
            .post(move || listener.on_state_change(&id, state));
    }

    fn shut(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == DataChannelState::Closed {
                return false;
            }
            *state = DataChannelState::Closed;
        }
        self.post_state(DataChannelState::Closing);
        self.post_state(DataChannelState::Closed);
        self.shared
            .journal
            .closed(ResourceKind::DataProducer, self.id.as_str());
        true
    }
}

impl DataProducer for LoopbackDataProducer {
    fn id(&self) -> &DataProducerId {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn send(&self, data: &[u8]) -> Result<()> {
        let state = self.ready_state();
        if state != DataChannelState::Open {
            return Err(BridgeError::ResourceClosed(format!(
                "data producer {} is {}",
                self.id, state
            )));
        }

        let targets = self.shared.table.targets(&self.id);
        if targets.is_empty() {
            trace!("data producer {}: no consumers, {} bytes dropped", self.id, data.len());
            return Ok(());
        }
        let payload = Bytes::copy_from_slice(data);
        self.shared.threads.network.post(move || {
            for consumer in targets {
                consumer.deliver(payload.clone());
            }
        });
        Ok(())
    }

    fn close(&self) {
        self.shut();
    }
}

impl TransportChild for LoopbackDataProducer {
    fn transport_closed(&self) {
        if self.shut() {
            let listener = self.listener.clone();
            let id = self.id.clone();
            self.shared
                .threads
                .signaling
                .post(move || listener.on_transport_close(&id));
        }
    }
}

struct LoopbackDataConsumer {
    id: DataConsumerId,
    data_producer_id: DataProducerId,
    label: String,
    shared: Arc<Shared>,
    listener: Arc<dyn DataConsumerListener>,
    state: Mutex<DataChannelState>,
}

impl LoopbackDataConsumer {
    fn post<F>(&self, f: F)
    where
        F: FnOnce(&dyn DataConsumerListener, &DataConsumerId) + Send + 'static,
    {
        let listener = self.listener.clone();
        let id = self.id.clone();
        self.shared
            .threads
            .signaling
            .post(move || f(listener.as_ref(), &id));
    }

    /// Runs on the network thread
    fn deliver(&self, data: Bytes) {
        if self.ready_state() != DataChannelState::Open {
            warn!("data consumer {} is not open, message dropped", self.id);
            return;
        }
        self.post(move |listener, id| listener.on_message(id, &data));
    }

    fn shut(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state == DataChannelState::Closed {
                return false;
            }
            *state = DataChannelState::Closed;
        }
        self.post(|listener, id| listener.on_closing(id));
        self.post(|listener, id| listener.on_close(id));
        self.shared
            .journal
            .closed(ResourceKind::DataConsumer, self.id.as_str());
        true
    }
}

impl DataConsumer for LoopbackDataConsumer {
    fn id(&self) -> &DataConsumerId {
        &self.id
    }

    fn data_producer_id(&self) -> &DataProducerId {
        &self.data_producer_id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> DataChannelState {
        *self.state.lock()
    }

    fn close(&self) {
        self.shut();
    }
}

impl TransportChild for LoopbackDataConsumer {
    fn transport_closed(&self) {
        if self.shut() {
            self.post(|listener, id| listener.on_transport_close(id));
        }
    }
}
