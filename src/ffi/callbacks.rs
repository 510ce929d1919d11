//! Caller-supplied callback table and the [`Signaller`] built on it

use libc::{c_char, c_void};

use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::signaling::marshal::{self, ForeignText, ReleaseFn};
use crate::signaling::types::*;
use crate::signaling::Signaller;
use crate::video::FrameSource;

pub type QueryFn = unsafe extern "C" fn(ctx: *const c_void) -> *mut c_char;
pub type TextFn = unsafe extern "C" fn(ctx: *const c_void, text: *const c_char);
pub type ConnectTransportFn =
    unsafe extern "C" fn(ctx: *const c_void, transport_id: *const c_char, dtls_parameters: *const c_char);
pub type ProduceFn = unsafe extern "C" fn(
    ctx: *const c_void,
    transport_id: *const c_char,
    kind: *const c_char,
    rtp_parameters: *const c_char,
) -> *mut c_char;
pub type ProduceDataFn = unsafe extern "C" fn(
    ctx: *const c_void,
    transport_id: *const c_char,
    sctp_stream_parameters: *const c_char,
    label: *const c_char,
    protocol: *const c_char,
) -> *mut c_char;
pub type ConsumeDataFn = unsafe extern "C" fn(
    ctx: *const c_void,
    transport_id: *const c_char,
    data_producer_id: *const c_char,
) -> *mut c_char;
/// (ctx, id, state) notifications
pub type StateFn = unsafe extern "C" fn(ctx: *const c_void, id: *const c_char, state: *const c_char);
pub type DataMessageFn = unsafe extern "C" fn(
    ctx: *const c_void,
    data_consumer_id: *const c_char,
    data: *const u8,
    len: usize,
);

/// Fixed callback table, passed by value to `rtc_coordinator_new`
///
/// Every text returned by a callback is handed back exactly once through
/// `release_string`.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct RtcCallbacks {
    pub get_capabilities: Option<QueryFn>,
    pub create_transport: Option<QueryFn>,
    pub on_capabilities: Option<TextFn>,
    pub on_connect_transport: Option<ConnectTransportFn>,
    pub on_produce: Option<ProduceFn>,
    pub on_produce_data: Option<ProduceDataFn>,
    pub on_connection_state: Option<StateFn>,
    pub on_consume_data: Option<ConsumeDataFn>,
    pub on_data_message: Option<DataMessageFn>,
    pub on_data_consumer_state: Option<StateFn>,
    pub on_data_producer_state: Option<StateFn>,
    pub release_string: Option<ReleaseFn>,
}

/// The entries without which no coordinator can be negotiated
#[derive(Clone, Copy)]
struct Required {
    get_capabilities: QueryFn,
    create_transport: QueryFn,
    on_connect_transport: ConnectTransportFn,
    on_produce: ProduceFn,
    on_produce_data: ProduceDataFn,
    release_string: ReleaseFn,
}

fn required<T>(entry: Option<T>, name: &str) -> Result<T> {
    entry.ok_or_else(|| {
        BridgeError::ContractViolation(format!("callback table entry {} is null", name))
    })
}

/// [`Signaller`] backed by the caller's callback table
pub struct CallbackSignaller {
    ctx: *const c_void,
    table: RtcCallbacks,
    required: Required,
}

// Safety: the table is plain function pointers. The caller guarantees that
// `ctx` and the callbacks may be used from the engine's signaling thread for
// as long as the coordinator lives; the bridge only calls them from there.
unsafe impl Send for CallbackSignaller {}
unsafe impl Sync for CallbackSignaller {}

impl CallbackSignaller {
    pub fn new(ctx: *const c_void, table: RtcCallbacks) -> Result<Self> {
        let required = Required {
            get_capabilities: required(table.get_capabilities, "get_capabilities")?,
            create_transport: required(table.create_transport, "create_transport")?,
            on_connect_transport: required(table.on_connect_transport, "on_connect_transport")?,
            on_produce: required(table.on_produce, "on_produce")?,
            on_produce_data: required(table.on_produce_data, "on_produce_data")?,
            release_string: required(table.release_string, "release_string")?,
        };
        Ok(Self {
            ctx,
            table,
            required,
        })
    }

    fn take(&self, ptr: *mut c_char, what: &str) -> Result<ForeignText> {
        // Safety: `ptr` was just returned by one of the caller's callbacks
        unsafe { ForeignText::take(ptr, self.ctx, self.required.release_string, what) }
    }

    /// Fire a (ctx, id, state) notification; bad text is logged and dropped.
    fn notify_state(&self, entry: Option<StateFn>, id: &str, state: &str) {
        let Some(f) = entry else { return };
        match (marshal::to_c_string(id), marshal::to_c_string(state)) {
            (Ok(id), Ok(state)) => unsafe { f(self.ctx, id.as_ptr(), state.as_ptr()) },
            _ => warn!("Dropping state notification for {:?}: unencodable text", id),
        }
    }
}

impl Signaller for CallbackSignaller {
    fn server_capabilities(&self) -> Result<RtpCapabilities> {
        let ptr = unsafe { (self.required.get_capabilities)(self.ctx) };
        self.take(ptr, "get_capabilities")?.decode()
    }

    fn create_transport(&self) -> Result<TransportOptions> {
        let ptr = unsafe { (self.required.create_transport)(self.ctx) };
        self.take(ptr, "create_transport")?.decode()
    }

    fn on_capabilities(&self, capabilities: &RtpCapabilities) -> Result<()> {
        if let Some(f) = self.table.on_capabilities {
            let text = marshal::encode(capabilities)?;
            unsafe { f(self.ctx, text.as_ptr()) };
        }
        Ok(())
    }

    fn on_connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<()> {
        let id = marshal::to_c_string(transport_id.as_str())?;
        let dtls = marshal::encode(dtls_parameters)?;
        unsafe { (self.required.on_connect_transport)(self.ctx, id.as_ptr(), dtls.as_ptr()) };
        Ok(())
    }

    fn on_produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<ProducerId> {
        let id = marshal::to_c_string(transport_id.as_str())?;
        let kind = marshal::to_c_string(kind.as_str())?;
        let params = marshal::encode(rtp_parameters)?;
        let ptr = unsafe {
            (self.required.on_produce)(self.ctx, id.as_ptr(), kind.as_ptr(), params.as_ptr())
        };
        let text = self.take(ptr, "on_produce")?;
        ProducerId::new(text.as_str()?)
    }

    fn on_produce_data(
        &self,
        transport_id: &TransportId,
        sctp_stream_parameters: &SctpStreamParameters,
        label: &str,
        protocol: &str,
    ) -> Result<DataProducerId> {
        let id = marshal::to_c_string(transport_id.as_str())?;
        let params = marshal::encode(sctp_stream_parameters)?;
        let label = marshal::to_c_string(label)?;
        let protocol = marshal::to_c_string(protocol)?;
        let ptr = unsafe {
            (self.required.on_produce_data)(
                self.ctx,
                id.as_ptr(),
                params.as_ptr(),
                label.as_ptr(),
                protocol.as_ptr(),
            )
        };
        let text = self.take(ptr, "on_produce_data")?;
        DataProducerId::new(text.as_str()?)
    }

    fn consume_data(
        &self,
        transport_id: &TransportId,
        data_producer_id: &DataProducerId,
    ) -> Result<DataConsumerOptions> {
        let f = self.table.on_consume_data.ok_or_else(|| {
            BridgeError::Unsupported("callback table has no on_consume_data".into())
        })?;
        let id = marshal::to_c_string(transport_id.as_str())?;
        let producer = marshal::to_c_string(data_producer_id.as_str())?;
        let ptr = unsafe { f(self.ctx, id.as_ptr(), producer.as_ptr()) };
        self.take(ptr, "on_consume_data")?.decode()
    }

    fn on_connection_state(&self, transport_id: &TransportId, state: &str) {
        self.notify_state(self.table.on_connection_state, transport_id.as_str(), state);
    }

    fn on_data_message(&self, data_consumer_id: &DataConsumerId, data: &[u8]) {
        let Some(f) = self.table.on_data_message else { return };
        match marshal::to_c_string(data_consumer_id.as_str()) {
            Ok(id) => unsafe { f(self.ctx, id.as_ptr(), data.as_ptr(), data.len()) },
            Err(e) => warn!("Dropping data message: {}", e),
        }
    }

    fn on_data_consumer_state(&self, data_consumer_id: &DataConsumerId, state: DataChannelState) {
        self.notify_state(
            self.table.on_data_consumer_state,
            data_consumer_id.as_str(),
            state.as_str(),
        );
    }

    fn on_data_producer_state(&self, data_producer_id: &DataProducerId, state: DataChannelState) {
        self.notify_state(
            self.table.on_data_producer_state,
            data_producer_id.as_str(),
            state.as_str(),
        );
    }
}

/// Fills a packed RGBA buffer of `width * height * 4` bytes.
pub type PullFrameFn = unsafe extern "C" fn(
    ctx: *const c_void,
    width: u32,
    height: u32,
    timestamp_us: i64,
    data: *mut u8,
);

/// [`FrameSource`] backed by a caller pull callback
pub struct ForeignFrameSource {
    ctx: *const c_void,
    pull: PullFrameFn,
}

impl ForeignFrameSource {
    pub fn new(ctx: *const c_void, pull: PullFrameFn) -> Self {
        Self { ctx, pull }
    }
}

// Safety: the caller guarantees the callback may run on the capture thread
// until the producer is deleted.
unsafe impl Send for ForeignFrameSource {}
unsafe impl Sync for ForeignFrameSource {}

impl FrameSource for ForeignFrameSource {
    fn fill(&self, width: u32, height: u32, timestamp_us: i64, data: &mut [u8]) {
        unsafe { (self.pull)(self.ctx, width, height, timestamp_us, data.as_mut_ptr()) }
    }
}
