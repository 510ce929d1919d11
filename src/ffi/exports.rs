//! `extern "C"` entry points
//!
//! Handles are plain boxed addresses; the caller owns each one from its
//! `*_new` until the matching `*_delete`. A null handle, or any failure
//! without a status return, ends the process through [`fatal`].

use libc::{c_char, c_void};
use std::sync::Arc;

use tracing::warn;

use super::callbacks::{CallbackSignaller, ForeignFrameSource, PullFrameFn, RtcCallbacks};
use crate::bridge::{ConsumerHandle, Coordinator, DataConsumerHandle, DataProducerHandle, ProducerHandle};
use crate::config::{BridgeConfig, LogConfig};
use crate::engine::{EngineContext, LoopbackEngine};
use crate::error::{fatal, BridgeError, Result};
use crate::logging::{self, LogLevel};
use crate::signaling::marshal;
use crate::signaling::types::*;

/// Engine context handle
pub struct RtcContext {
    inner: Arc<EngineContext>,
}

fn or_abort<T>(operation: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => fatal(operation, &e),
    }
}

/// Capture hardware can be missing or busy; only contract and engine
/// failures end the process here.
fn or_null<T>(operation: &str, result: Result<T>) -> *mut T {
    match result {
        Ok(value) => Box::into_raw(Box::new(value)),
        Err(e @ (BridgeError::ContractViolation(_) | BridgeError::EngineThread(_))) => {
            fatal(operation, &e)
        }
        Err(e) => {
            warn!("{}: {}", operation, e);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `ptr` must be null or a live handle of type `T`.
unsafe fn handle<'a, T>(ptr: *const T, operation: &str) -> &'a T {
    match ptr.as_ref() {
        Some(value) => value,
        None => fatal(
            operation,
            &BridgeError::ContractViolation("null handle".into()),
        ),
    }
}

/// Release a boxed handle; null is a contract violation.
///
/// # Safety
///
/// `ptr` must be null or come from `Box::into_raw` and not be released yet.
unsafe fn release<T>(ptr: *mut T, operation: &str) {
    if ptr.is_null() {
        fatal(operation, &BridgeError::ContractViolation("null handle".into()));
    }
    drop(Box::from_raw(ptr));
}

/// # Safety
///
/// `ptr` must be null or a NUL-terminated string valid for the call.
unsafe fn text<'a>(ptr: *const c_char, what: &str, operation: &str) -> &'a str {
    or_abort(operation, marshal::borrow_text(ptr, what))
}

fn owned_text(operation: &str, value: &str) -> *mut c_char {
    or_abort(operation, marshal::into_foreign(value))
}

unsafe fn consumer_options(
    consumer_id: *const c_char,
    producer_id: *const c_char,
    kind: *const c_char,
    rtp_parameters: *const c_char,
) -> Result<ConsumerOptions> {
    Ok(ConsumerOptions {
        id: ConsumerId::new(marshal::borrow_text(consumer_id, "consumer_id")?)?,
        producer_id: ProducerId::new(marshal::borrow_text(producer_id, "producer_id")?)?,
        kind: marshal::borrow_text(kind, "kind")?.parse()?,
        rtp_parameters: marshal::decode(marshal::borrow_text(rtp_parameters, "rtp_parameters")?)?,
    })
}

unsafe fn data_consumer_options(
    data_consumer_id: *const c_char,
    data_producer_id: *const c_char,
    sctp_stream_parameters: *const c_char,
    label: *const c_char,
) -> Result<DataConsumerOptions> {
    let label = if label.is_null() {
        String::new()
    } else {
        marshal::borrow_text(label, "label")?.to_string()
    };
    Ok(DataConsumerOptions {
        id: DataConsumerId::new(marshal::borrow_text(data_consumer_id, "data_consumer_id")?)?,
        data_producer_id: DataProducerId::new(marshal::borrow_text(
            data_producer_id,
            "data_producer_id",
        )?)?,
        sctp_stream_parameters: marshal::decode(marshal::borrow_text(
            sctp_stream_parameters,
            "sctp_stream_parameters",
        )?)?,
        label,
        protocol: String::new(),
    })
}

/// Install logging. `log_level`: 0 error, 1 warn, 2 info, 3 debug, 4 trace.
#[no_mangle]
pub extern "C" fn rtc_init(log_level: i32) {
    logging::init(&LogConfig {
        level: LogLevel::from_raw(log_level),
        json: false,
    });
}

/// Start the engine threads. `config_json` may be null for defaults.
///
/// # Safety
///
/// `config_json` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rtc_context_new(config_json: *const c_char) -> *mut RtcContext {
    const OP: &str = "rtc_context_new";
    let config = if config_json.is_null() {
        BridgeConfig::default()
    } else {
        or_abort(OP, BridgeConfig::from_json(text(config_json, "config", OP)))
    };
    // No-op when rtc_init already installed a subscriber
    logging::init(&config.log);
    let inner = or_abort(OP, EngineContext::new(config, Arc::new(LoopbackEngine::new())));
    Box::into_raw(Box::new(RtcContext { inner }))
}

/// Stop and join the engine threads. Delete every coordinator first.
///
/// # Safety
///
/// `context` must come from [`rtc_context_new`] and not be deleted yet.
#[no_mangle]
pub unsafe extern "C" fn rtc_context_delete(context: *mut RtcContext) {
    const OP: &str = "rtc_context_delete";
    handle(context, OP).inner.shutdown();
    release(context, OP);
}

/// Negotiate a coordinator. Blocks until both transports exist.
///
/// # Safety
///
/// `context` must be live. `ctx` and the callbacks must stay usable until
/// [`rtc_coordinator_delete`] returns.
#[no_mangle]
pub unsafe extern "C" fn rtc_coordinator_new(
    context: *const RtcContext,
    ctx: *const c_void,
    callbacks: RtcCallbacks,
) -> *mut Coordinator {
    const OP: &str = "rtc_coordinator_new";
    let context = handle(context, OP).inner.clone();
    let signaller = or_abort(OP, CallbackSignaller::new(ctx, callbacks));
    let coordinator = or_abort(OP, Coordinator::new(context, Arc::new(signaller)));
    Box::into_raw(Box::new(coordinator))
}

/// Close children, then transports. No callback fires after this returns.
///
/// # Safety
///
/// `coordinator` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_coordinator_delete(coordinator: *mut Coordinator) {
    release(coordinator, "rtc_coordinator_delete");
}

/// # Safety
///
/// `coordinator` must be live. Free the result with [`rtc_string_free`].
#[no_mangle]
pub unsafe extern "C" fn rtc_coordinator_send_transport_id(
    coordinator: *const Coordinator,
) -> *mut c_char {
    const OP: &str = "rtc_coordinator_send_transport_id";
    owned_text(OP, handle(coordinator, OP).send_transport_id().as_str())
}

/// # Safety
///
/// `coordinator` must be live. Free the result with [`rtc_string_free`].
#[no_mangle]
pub unsafe extern "C" fn rtc_coordinator_recv_transport_id(
    coordinator: *const Coordinator,
) -> *mut c_char {
    const OP: &str = "rtc_coordinator_recv_transport_id";
    owned_text(OP, handle(coordinator, OP).recv_transport_id().as_str())
}

/// `kind` is `"audio"` or `"video"`.
///
/// # Safety
///
/// `coordinator` must be live; `kind` a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rtc_coordinator_can_produce(
    coordinator: *const Coordinator,
    kind: *const c_char,
) -> bool {
    const OP: &str = "rtc_coordinator_can_produce";
    let coordinator = handle(coordinator, OP);
    let kind: MediaKind = or_abort(OP, text(kind, "kind", OP).parse());
    or_abort(OP, coordinator.can_produce(kind))
}

/// # Safety
///
/// `coordinator` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_new_from_fake_audio(
    coordinator: *const Coordinator,
) -> *mut ProducerHandle {
    const OP: &str = "rtc_producer_new_from_fake_audio";
    let producer = or_abort(OP, handle(coordinator, OP).produce_fake_audio());
    Box::into_raw(Box::new(producer))
}

/// # Safety
///
/// `coordinator` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_new_from_fake_video(
    coordinator: *const Coordinator,
) -> *mut ProducerHandle {
    const OP: &str = "rtc_producer_new_from_fake_video";
    let producer = or_abort(OP, handle(coordinator, OP).produce_fake_video());
    Box::into_raw(Box::new(producer))
}

/// Video from a camera. `device_index` is an index from
/// [`rtc_enumerate_capture_devices`], or -1 for the best available camera.
/// Returns null when there is no such camera or it cannot be opened.
///
/// # Safety
///
/// `coordinator` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_new_from_camera(
    coordinator: *const Coordinator,
    device_index: i32,
    width: u32,
    height: u32,
    fps: u32,
) -> *mut ProducerHandle {
    const OP: &str = "rtc_producer_new_from_camera";
    let coordinator = handle(coordinator, OP);
    let device_index = u32::try_from(device_index).ok();
    or_null(
        OP,
        coordinator.produce_camera(device_index, width, height, fps),
    )
}

/// Audio from the default capture device. Returns null when there is no
/// capture device or it cannot be opened.
///
/// # Safety
///
/// `coordinator` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_new_from_default_audio(
    coordinator: *const Coordinator,
) -> *mut ProducerHandle {
    const OP: &str = "rtc_producer_new_from_default_audio";
    or_null(OP, handle(coordinator, OP).produce_default_audio())
}

/// Cameras and microphones as JSON: `{"video": [...], "audio": [...]}`.
///
/// # Safety
///
/// `context` must be live. Free the result with [`rtc_string_free`].
#[no_mangle]
pub unsafe extern "C" fn rtc_enumerate_capture_devices(context: *const RtcContext) -> *mut c_char {
    const OP: &str = "rtc_enumerate_capture_devices";
    let devices = handle(context, OP).inner.engine().devices().list();
    let json = or_abort(OP, serde_json::to_string(&devices).map_err(BridgeError::from));
    owned_text(OP, &json)
}

/// Video pulled from `pull` at `fps`, starting at `width` x `height`.
///
/// # Safety
///
/// `coordinator` must be live. `pull` runs on the capture thread with
/// `ctx` until [`rtc_producer_delete`] returns.
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_new_from_external_source(
    coordinator: *const Coordinator,
    width: u32,
    height: u32,
    fps: u32,
    ctx: *const c_void,
    pull: Option<PullFrameFn>,
) -> *mut ProducerHandle {
    const OP: &str = "rtc_producer_new_from_external_source";
    let coordinator = handle(coordinator, OP);
    let pull = or_abort(
        OP,
        pull.ok_or_else(|| BridgeError::ContractViolation("pull callback is null".into())),
    );
    let source = Arc::new(ForeignFrameSource::new(ctx, pull));
    let producer = or_abort(
        OP,
        coordinator.produce_external_video(source, width, height, fps),
    );
    Box::into_raw(Box::new(producer))
}

/// Returns 0 on success, -1 if the size is rejected or the producer has no
/// resizable source.
///
/// # Safety
///
/// `producer` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_change_resolution(
    producer: *const ProducerHandle,
    width: u32,
    height: u32,
) -> i32 {
    let producer = handle(producer, "rtc_producer_change_resolution");
    match producer.change_resolution(width, height) {
        Ok(()) => 0,
        Err(e) => {
            warn!("Producer {}: {}", producer.id(), e);
            -1
        }
    }
}

/// # Safety
///
/// `producer` must be live. Free the result with [`rtc_string_free`].
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_id(producer: *const ProducerHandle) -> *mut c_char {
    const OP: &str = "rtc_producer_id";
    owned_text(OP, handle(producer, OP).id().as_str())
}

/// # Safety
///
/// `producer` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_producer_delete(producer: *mut ProducerHandle) {
    release(producer, "rtc_producer_delete");
}

/// Consume a remote producer. `rtp_parameters` is JSON.
///
/// # Safety
///
/// `coordinator` must be live; text arguments NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn rtc_consumer_new(
    coordinator: *const Coordinator,
    consumer_id: *const c_char,
    producer_id: *const c_char,
    kind: *const c_char,
    rtp_parameters: *const c_char,
) -> *mut ConsumerHandle {
    const OP: &str = "rtc_consumer_new";
    let coordinator = handle(coordinator, OP);
    let options = or_abort(
        OP,
        consumer_options(consumer_id, producer_id, kind, rtp_parameters),
    );
    let consumer = or_abort(OP, coordinator.consume(options));
    Box::into_raw(Box::new(consumer))
}

/// # Safety
///
/// `consumer` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_consumer_delete(consumer: *mut ConsumerHandle) {
    release(consumer, "rtc_consumer_delete");
}

/// Open an outbound data channel. `protocol` may be null.
///
/// # Safety
///
/// `coordinator` must be live; text arguments NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn rtc_data_producer_new(
    coordinator: *const Coordinator,
    label: *const c_char,
    protocol: *const c_char,
) -> *mut DataProducerHandle {
    const OP: &str = "rtc_data_producer_new";
    let coordinator = handle(coordinator, OP);
    let label = text(label, "label", OP);
    let protocol = if protocol.is_null() {
        ""
    } else {
        text(protocol, "protocol", OP)
    };
    let data_producer = or_abort(OP, coordinator.produce_data(label, protocol));
    Box::into_raw(Box::new(data_producer))
}

/// Returns 0 when queued, -1 when the channel is not open.
///
/// # Safety
///
/// `data_producer` must be live; `data` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn rtc_data_producer_send(
    data_producer: *const DataProducerHandle,
    data: *const u8,
    len: usize,
) -> i32 {
    const OP: &str = "rtc_data_producer_send";
    let data_producer = handle(data_producer, OP);
    let payload: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        fatal(OP, &BridgeError::ContractViolation("null data with non-zero length".into()))
    } else {
        std::slice::from_raw_parts(data, len)
    };
    match data_producer.send(payload) {
        Ok(()) => 0,
        Err(e) => {
            warn!("Data producer {}: {}", data_producer.id(), e);
            -1
        }
    }
}

/// # Safety
///
/// `data_producer` must be live. Free the result with [`rtc_string_free`].
#[no_mangle]
pub unsafe extern "C" fn rtc_data_producer_id(data_producer: *const DataProducerHandle) -> *mut c_char {
    const OP: &str = "rtc_data_producer_id";
    owned_text(OP, handle(data_producer, OP).id().as_str())
}

/// # Safety
///
/// `data_producer` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_data_producer_delete(data_producer: *mut DataProducerHandle) {
    release(data_producer, "rtc_data_producer_delete");
}

/// Create a data consumer from ids and SCTP stream parameters (JSON) the
/// authority already holds. `label` may be null.
///
/// # Safety
///
/// `coordinator` must be live; text arguments NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn rtc_data_consumer_new(
    coordinator: *const Coordinator,
    data_consumer_id: *const c_char,
    data_producer_id: *const c_char,
    sctp_stream_parameters: *const c_char,
    label: *const c_char,
) -> *mut DataConsumerHandle {
    const OP: &str = "rtc_data_consumer_new";
    let coordinator = handle(coordinator, OP);
    let options = or_abort(
        OP,
        data_consumer_options(data_consumer_id, data_producer_id, sctp_stream_parameters, label),
    );
    let data_consumer = or_abort(OP, coordinator.create_data_consumer(options));
    Box::into_raw(Box::new(data_consumer))
}

/// Ask the authority (`on_consume_data`) for a consumer of `data_producer_id`.
///
/// # Safety
///
/// `coordinator` must be live; `data_producer_id` NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn rtc_coordinator_consume_data(
    coordinator: *const Coordinator,
    data_producer_id: *const c_char,
) -> *mut DataConsumerHandle {
    const OP: &str = "rtc_coordinator_consume_data";
    let coordinator = handle(coordinator, OP);
    let data_producer_id = or_abort(
        OP,
        DataProducerId::new(text(data_producer_id, "data_producer_id", OP)),
    );
    let data_consumer = or_abort(OP, coordinator.consume_data(&data_producer_id));
    Box::into_raw(Box::new(data_consumer))
}

/// # Safety
///
/// `data_consumer` must be live. Free the result with [`rtc_string_free`].
#[no_mangle]
pub unsafe extern "C" fn rtc_data_consumer_id(data_consumer: *const DataConsumerHandle) -> *mut c_char {
    const OP: &str = "rtc_data_consumer_id";
    owned_text(OP, handle(data_consumer, OP).id().as_str())
}

/// # Safety
///
/// `data_consumer` must be live.
#[no_mangle]
pub unsafe extern "C" fn rtc_data_consumer_delete(data_consumer: *mut DataConsumerHandle) {
    release(data_consumer, "rtc_data_consumer_delete");
}

/// Free text returned by an `rtc_*_id` getter or
/// [`rtc_enumerate_capture_devices`]. Null is ignored.
///
/// # Safety
///
/// `text` must be null or come from this library and not be freed yet.
#[no_mangle]
pub unsafe extern "C" fn rtc_string_free(text: *mut c_char) {
    marshal::release_owned(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::devices::StaticDevices;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::ffi::{CStr, CString};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// What the stub authority saw
    #[derive(Default)]
    struct Stub {
        transports: AtomicUsize,
        handed_out: AtomicUsize,
        released: AtomicUsize,
        transport_ids: Mutex<Vec<String>>,
        connects: Mutex<Vec<String>>,
        produced_kinds: Mutex<Vec<String>>,
        states: Mutex<Vec<(String, String)>>,
        messages: Mutex<Vec<(String, Vec<u8>)>>,
        frame_sizes: Mutex<Vec<(u32, u32)>>,
    }

    unsafe fn stub<'a>(ctx: *const c_void) -> &'a Stub {
        &*(ctx as *const Stub)
    }

    unsafe fn str_arg<'a>(ptr: *const c_char) -> &'a str {
        CStr::from_ptr(ptr).to_str().unwrap()
    }

    fn hand_out(stub: &Stub, text: String) -> *mut c_char {
        stub.handed_out.fetch_add(1, Ordering::SeqCst);
        CString::new(text).unwrap().into_raw()
    }

    unsafe extern "C" fn get_capabilities(ctx: *const c_void) -> *mut c_char {
        hand_out(stub(ctx), "{}".into())
    }

    unsafe extern "C" fn get_capabilities_with_codecs(ctx: *const c_void) -> *mut c_char {
        let caps = json!({
            "codecs": [
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000},
                {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
            ]
        });
        hand_out(stub(ctx), caps.to_string())
    }

    unsafe extern "C" fn create_transport(ctx: *const c_void) -> *mut c_char {
        let stub = stub(ctx);
        let n = stub.transports.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("t{}", n);
        stub.transport_ids.lock().push(id.clone());
        let options = json!({
            "id": id,
            "iceParameters": {},
            "iceCandidates": [],
            "dtlsParameters": {"fingerprints": []},
            "sctpParameters": {"port": 5000}
        });
        hand_out(stub, options.to_string())
    }

    unsafe extern "C" fn create_transport_same_id(ctx: *const c_void) -> *mut c_char {
        let stub = stub(ctx);
        stub.transports.fetch_add(1, Ordering::SeqCst);
        stub.transport_ids.lock().push("t1".into());
        let options = json!({
            "id": "t1",
            "iceParameters": {},
            "iceCandidates": [],
            "dtlsParameters": {"fingerprints": []},
            "sctpParameters": {"port": 5000}
        });
        hand_out(stub, options.to_string())
    }

    unsafe extern "C" fn on_connect_transport(
        ctx: *const c_void,
        transport_id: *const c_char,
        dtls_parameters: *const c_char,
    ) {
        let dtls: serde_json::Value = serde_json::from_str(str_arg(dtls_parameters)).unwrap();
        assert!(dtls.get("fingerprints").is_some());
        stub(ctx).connects.lock().push(str_arg(transport_id).to_string());
    }

    unsafe extern "C" fn on_produce(
        ctx: *const c_void,
        _transport_id: *const c_char,
        kind: *const c_char,
        rtp_parameters: *const c_char,
    ) -> *mut c_char {
        let stub = stub(ctx);
        let _: serde_json::Value = serde_json::from_str(str_arg(rtp_parameters)).unwrap();
        let kind = str_arg(kind).to_string();
        let id = format!("{}-producer", kind);
        stub.produced_kinds.lock().push(kind);
        hand_out(stub, id)
    }

    unsafe extern "C" fn on_produce_data(
        ctx: *const c_void,
        _transport_id: *const c_char,
        sctp_stream_parameters: *const c_char,
        label: *const c_char,
        _protocol: *const c_char,
    ) -> *mut c_char {
        let params: SctpStreamParameters =
            serde_json::from_str(str_arg(sctp_stream_parameters)).unwrap();
        hand_out(stub(ctx), format!("{}-{}", str_arg(label), params.stream_id))
    }

    unsafe extern "C" fn on_consume_data(
        ctx: *const c_void,
        _transport_id: *const c_char,
        data_producer_id: *const c_char,
    ) -> *mut c_char {
        let producer = str_arg(data_producer_id);
        let options = json!({
            "id": format!("consumer-of-{}", producer),
            "dataProducerId": producer,
            "sctpStreamParameters": {"streamId": 0},
            "label": "chat"
        });
        hand_out(stub(ctx), options.to_string())
    }

    unsafe extern "C" fn on_connection_state(
        ctx: *const c_void,
        transport_id: *const c_char,
        state: *const c_char,
    ) {
        stub(ctx)
            .states
            .lock()
            .push((str_arg(transport_id).to_string(), str_arg(state).to_string()));
    }

    unsafe extern "C" fn on_data_message(
        ctx: *const c_void,
        data_consumer_id: *const c_char,
        data: *const u8,
        len: usize,
    ) {
        let bytes = std::slice::from_raw_parts(data, len).to_vec();
        stub(ctx)
            .messages
            .lock()
            .push((str_arg(data_consumer_id).to_string(), bytes));
    }

    unsafe extern "C" fn release_string(ctx: *const c_void, text: *mut c_char) {
        stub(ctx).released.fetch_add(1, Ordering::SeqCst);
        drop(CString::from_raw(text));
    }

    unsafe extern "C" fn pull_gray(
        ctx: *const c_void,
        width: u32,
        height: u32,
        _timestamp_us: i64,
        data: *mut u8,
    ) {
        let len = width as usize * height as usize * 4;
        std::slice::from_raw_parts_mut(data, len).fill(128);
        stub(ctx).frame_sizes.lock().push((width, height));
    }

    fn table() -> RtcCallbacks {
        RtcCallbacks {
            get_capabilities: Some(get_capabilities),
            create_transport: Some(create_transport),
            on_connect_transport: Some(on_connect_transport),
            on_produce: Some(on_produce),
            on_produce_data: Some(on_produce_data),
            on_connection_state: Some(on_connection_state),
            on_consume_data: Some(on_consume_data),
            on_data_message: Some(on_data_message),
            release_string: Some(release_string),
            ..Default::default()
        }
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

    unsafe fn take_id(ptr: *mut c_char) -> String {
        let id = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        rtc_string_free(ptr);
        id
    }

    #[test]
    fn test_two_create_transport_round_trips() {
        let stub = Stub::default();
        let ctx = &stub as *const Stub as *const c_void;
        unsafe {
            let context = rtc_context_new(std::ptr::null());
            let coordinator = rtc_coordinator_new(context, ctx, table());

            assert_eq!(stub.transports.load(Ordering::SeqCst), 2);
            assert_eq!(*stub.transport_ids.lock(), vec!["t1", "t2"]);
            assert_eq!(take_id(rtc_coordinator_send_transport_id(coordinator)), "t1");
            assert_eq!(take_id(rtc_coordinator_recv_transport_id(coordinator)), "t2");

            // "{}" carries no codecs
            let video = CString::new("video").unwrap();
            assert!(!rtc_coordinator_can_produce(coordinator, video.as_ptr()));

            rtc_coordinator_delete(coordinator);
            rtc_context_delete(context);
        }
        // Every returned text went back through release_string
        assert_eq!(
            stub.released.load(Ordering::SeqCst),
            stub.handed_out.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_produce_and_data_round_trip() {
        let stub = Stub::default();
        let ctx = &stub as *const Stub as *const c_void;
        let mut callbacks = table();
        callbacks.get_capabilities = Some(get_capabilities_with_codecs);

        unsafe {
            let context = rtc_context_new(std::ptr::null());
            let coordinator = rtc_coordinator_new(context, ctx, callbacks);

            let audio = rtc_producer_new_from_fake_audio(coordinator);
            assert_eq!(take_id(rtc_producer_id(audio)), "audio-producer");
            assert_eq!(rtc_producer_change_resolution(audio, 320, 240), -1);
            assert_eq!(*stub.connects.lock(), vec!["t1"]);

            let label = CString::new("chat").unwrap();
            let data_producer = rtc_data_producer_new(coordinator, label.as_ptr(), std::ptr::null());
            assert_eq!(take_id(rtc_data_producer_id(data_producer)), "chat-0");

            let producer_id = CString::new("chat-0").unwrap();
            let data_consumer = rtc_coordinator_consume_data(coordinator, producer_id.as_ptr());
            assert_eq!(take_id(rtc_data_consumer_id(data_consumer)), "consumer-of-chat-0");

            let payload = b"ping";
            assert_eq!(rtc_data_producer_send(data_producer, payload.as_ptr(), payload.len()), 0);
            assert!(wait_until(|| !stub.messages.lock().is_empty()));
            assert_eq!(
                stub.messages.lock()[0],
                ("consumer-of-chat-0".to_string(), b"ping".to_vec())
            );
            assert!(wait_until(|| {
                stub.states
                    .lock()
                    .contains(&("t1".to_string(), "connected".to_string()))
            }));

            rtc_data_consumer_delete(data_consumer);
            rtc_data_producer_delete(data_producer);
            rtc_producer_delete(audio);
            rtc_coordinator_delete(coordinator);
            rtc_context_delete(context);
        }
        assert_eq!(*stub.produced_kinds.lock(), vec!["audio"]);
        assert_eq!(
            stub.released.load(Ordering::SeqCst),
            stub.handed_out.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn test_external_source_and_explicit_data_consumer() {
        let stub = Stub::default();
        let ctx = &stub as *const Stub as *const c_void;
        let mut callbacks = table();
        callbacks.get_capabilities = Some(get_capabilities_with_codecs);

        unsafe {
            let context = rtc_context_new(std::ptr::null());
            let coordinator = rtc_coordinator_new(context, ctx, callbacks);

            let video = rtc_producer_new_from_external_source(
                coordinator,
                64,
                48,
                30,
                ctx,
                Some(pull_gray),
            );
            assert!(wait_until(|| !stub.frame_sizes.lock().is_empty()));
            assert_eq!(rtc_producer_change_resolution(video, 32, 24), 0);
            assert!(wait_until(|| stub.frame_sizes.lock().contains(&(32, 24))));
            assert_eq!(rtc_producer_change_resolution(video, 0, 24), -1);
            rtc_producer_delete(video);

            let id = CString::new("dc1").unwrap();
            let producer = CString::new("remote-dp").unwrap();
            let params = CString::new(r#"{"streamId":4,"ordered":false}"#).unwrap();
            let data_consumer = rtc_data_consumer_new(
                coordinator,
                id.as_ptr(),
                producer.as_ptr(),
                params.as_ptr(),
                std::ptr::null(),
            );
            assert_eq!(take_id(rtc_data_consumer_id(data_consumer)), "dc1");
            rtc_data_consumer_delete(data_consumer);

            rtc_coordinator_delete(coordinator);
            rtc_context_delete(context);
        }
        // Frames always matched the size the relay asked for
        assert!(stub
            .frame_sizes
            .lock()
            .iter()
            .all(|&size| size == (64, 48) || size == (32, 24)));
    }

    #[test]
    fn test_missing_required_entry_rejected() {
        let mut callbacks = table();
        callbacks.release_string = None;
        assert!(matches!(
            CallbackSignaller::new(std::ptr::null(), callbacks),
            Err(BridgeError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_string_free_ignores_null() {
        unsafe { rtc_string_free(std::ptr::null_mut()) };
    }

    #[test]
    fn test_authority_may_reuse_transport_id() {
        let stub = Stub::default();
        let ctx = &stub as *const Stub as *const c_void;
        let mut callbacks = table();
        callbacks.get_capabilities = Some(get_capabilities_with_codecs);
        callbacks.create_transport = Some(create_transport_same_id);
        unsafe {
            let context = rtc_context_new(std::ptr::null());
            let coordinator = rtc_coordinator_new(context, ctx, callbacks);

            assert_eq!(stub.transports.load(Ordering::SeqCst), 2);
            assert_eq!(take_id(rtc_coordinator_send_transport_id(coordinator)), "t1");
            assert_eq!(take_id(rtc_coordinator_recv_transport_id(coordinator)), "t1");

            let label = CString::new("chat").unwrap();
            let data_producer = rtc_data_producer_new(coordinator, label.as_ptr(), std::ptr::null());
            let dp_id = CString::new(take_id(rtc_data_producer_id(data_producer))).unwrap();
            let data_consumer = rtc_coordinator_consume_data(coordinator, dp_id.as_ptr());
            assert_eq!(*stub.connects.lock(), vec!["t1", "t1"]);

            rtc_data_consumer_delete(data_consumer);
            rtc_data_producer_delete(data_producer);
            rtc_coordinator_delete(coordinator);
            rtc_context_delete(context);
        }
        assert_eq!(
            stub.released.load(Ordering::SeqCst),
            stub.handed_out.load(Ordering::SeqCst)
        );
    }

    fn context_with_devices(devices: StaticDevices) -> *mut RtcContext {
        let engine = LoopbackEngine::new().with_devices(Arc::new(devices));
        let inner = EngineContext::new(BridgeConfig::default(), Arc::new(engine)).unwrap();
        Box::into_raw(Box::new(RtcContext { inner }))
    }

    #[test]
    fn test_capture_device_producers() {
        let stub = Stub::default();
        let ctx = &stub as *const Stub as *const c_void;
        let mut callbacks = table();
        callbacks.get_capabilities = Some(get_capabilities_with_codecs);
        unsafe {
            let context = context_with_devices(StaticDevices::typical());
            let listed = take_id(rtc_enumerate_capture_devices(context));
            let listed: serde_json::Value = serde_json::from_str(&listed).unwrap();
            assert_eq!(listed["video"][0]["name"], "Test Camera");
            assert_eq!(listed["audio"][0]["name"], "default");

            let coordinator = rtc_coordinator_new(context, ctx, callbacks);
            let camera = rtc_producer_new_from_camera(coordinator, -1, 320, 240, 30);
            assert!(!camera.is_null());
            assert_eq!(take_id(rtc_producer_id(camera)), "video-producer");
            assert_eq!(rtc_producer_change_resolution(camera, 160, 120), 0);

            let microphone = rtc_producer_new_from_default_audio(coordinator);
            assert!(!microphone.is_null());
            assert_eq!(take_id(rtc_producer_id(microphone)), "audio-producer");

            // Index past the end of the list
            assert!(rtc_producer_new_from_camera(coordinator, 3, 320, 240, 30).is_null());

            rtc_producer_delete(microphone);
            rtc_producer_delete(camera);
            rtc_coordinator_delete(coordinator);
            rtc_context_delete(context);
        }
        assert_eq!(*stub.produced_kinds.lock(), vec!["video", "audio"]);
    }

    #[test]
    fn test_missing_capture_devices_return_null() {
        let stub = Stub::default();
        let ctx = &stub as *const Stub as *const c_void;
        let mut callbacks = table();
        callbacks.get_capabilities = Some(get_capabilities_with_codecs);
        unsafe {
            let context = context_with_devices(StaticDevices::empty());
            assert_eq!(
                take_id(rtc_enumerate_capture_devices(context)),
                r#"{"video":[],"audio":[]}"#
            );

            let coordinator = rtc_coordinator_new(context, ctx, callbacks);
            assert!(rtc_producer_new_from_camera(coordinator, -1, 640, 480, 30).is_null());
            assert!(rtc_producer_new_from_default_audio(coordinator).is_null());

            rtc_coordinator_delete(coordinator);
            rtc_context_delete(context);
        }
        assert!(stub.produced_kinds.lock().is_empty());
    }
}
