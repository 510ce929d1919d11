//! V4L2 camera enumeration and capture

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Format, FourCC};

use super::convert::PixelConverter;
use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use super::relay::FrameGenerator;
use crate::engine::context::Clock;
use crate::error::{BridgeError, Result};

const YUYV: &[u8; 4] = b"YUYV";
const STREAM_BUFFERS: u32 = 4;

/// Information about a video capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDeviceInfo {
    /// Position in the enumeration order; what callers pass to pick a camera
    pub index: u32,
    /// Device path (e.g., /dev/video0)
    pub path: PathBuf,
    /// Card name reported by the driver
    pub name: String,
    pub driver: String,
    pub bus_info: String,
    /// FourCC codes the device offers, e.g. "YUYV", "MJPG"
    pub formats: Vec<String>,
    /// YUYV frame sizes, largest first
    pub resolutions: Vec<Resolution>,
}

impl VideoDeviceInfo {
    /// Whether frames can be captured without a decoder
    pub fn supports_yuyv(&self) -> bool {
        self.formats.iter().any(|f| f == "YUYV")
    }
}

fn query_device(path: &Path) -> Result<Option<VideoDeviceInfo>> {
    let device = Device::with_path(path).map_err(|e| {
        BridgeError::VideoDevice(format!("Failed to open device {:?}: {}", path, e))
    })?;
    let caps = device.query_caps().map_err(|e| {
        BridgeError::VideoDevice(format!("Failed to query capabilities: {}", e))
    })?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        debug!("Skipping non-capture device: {:?}", path);
        return Ok(None);
    }

    let descriptions = device.enum_formats().map_err(|e| {
        BridgeError::VideoDevice(format!("Failed to enumerate formats: {}", e))
    })?;
    let formats: Vec<String> = descriptions
        .iter()
        .filter_map(|d| d.fourcc.str().ok().map(str::to_string))
        .collect();

    Ok(Some(VideoDeviceInfo {
        index: 0,
        path: path.to_path_buf(),
        name: caps.card,
        driver: caps.driver,
        bus_info: caps.bus,
        formats,
        resolutions: enumerate_resolutions(&device),
    }))
}

fn enumerate_resolutions(device: &Device) -> Vec<Resolution> {
    let mut resolutions = Vec::new();

    match device.enum_framesizes(FourCC::new(YUYV)) {
        Ok(sizes) => {
            for size in sizes {
                match size.size {
                    v4l::framesize::FrameSizeEnum::Discrete(d) => {
                        resolutions.push(Resolution::new(d.width, d.height));
                    }
                    v4l::framesize::FrameSizeEnum::Stepwise(s) => {
                        // Offer the common sizes that fit the range
                        for res in [Resolution::VGA, Resolution::HD720, Resolution::HD1080] {
                            if res.width >= s.min_width
                                && res.width <= s.max_width
                                && res.height >= s.min_height
                                && res.height <= s.max_height
                            {
                                resolutions.push(res);
                            }
                        }
                    }
                }
            }
        }
        Err(e) => debug!("Failed to enumerate YUYV frame sizes: {}", e),
    }

    resolutions.sort_by_key(|r| std::cmp::Reverse(r.pixels()));
    resolutions.dedup();
    resolutions
}

/// Enumerate video capture devices, ordered by device path
pub fn enumerate_devices() -> Result<Vec<VideoDeviceInfo>> {
    info!("Enumerating video devices...");

    let mut paths: Vec<PathBuf> = std::fs::read_dir("/dev")
        .map_err(|e| BridgeError::VideoDevice(format!("Failed to read /dev: {}", e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("video"))
        })
        .collect();
    paths.sort();

    let mut devices = Vec::new();
    for path in paths {
        match query_device(&path) {
            Ok(Some(mut info)) => {
                info.index = devices.len() as u32;
                info!(
                    "Found capture device: {} ({}) - {} formats",
                    info.name,
                    info.driver,
                    info.formats.len()
                );
                devices.push(info);
            }
            Ok(None) => {}
            Err(e) => debug!("{}", e),
        }
    }

    info!("Found {} video capture devices", devices.len());
    Ok(devices)
}

struct CameraState {
    device: Device,
    stream: Option<MmapStream<'static>>,
    resolution: Resolution,
    /// Bytes per line as negotiated with the driver
    stride: usize,
    fps: u32,
    converter: PixelConverter,
    packed: Vec<u8>,
    sequence: u64,
}

impl CameraState {
    /// Negotiate YUYV at the requested size. The stream must be stopped.
    fn configure(&mut self, requested: Resolution) -> Result<()> {
        let wanted = Format::new(requested.width, requested.height, FourCC::new(YUYV));
        let actual = self.device.set_format(&wanted).map_err(|e| {
            BridgeError::VideoDevice(format!("Failed to set format: {}", e))
        })?;

        if actual.fourcc != FourCC::new(YUYV) {
            return Err(BridgeError::Unsupported(format!(
                "camera does not deliver YUYV (got {})",
                actual.fourcc
            )));
        }
        if actual.width != requested.width || actual.height != requested.height {
            warn!(
                "Requested {}, got {}x{}",
                requested, actual.width, actual.height
            );
        }

        if let Err(e) = self.device.set_params(&Parameters::with_fps(self.fps)) {
            debug!("Camera ignored frame rate {}: {}", self.fps, e);
        }

        let resolution = Resolution::new(actual.width, actual.height).validate()?;
        self.resolution = resolution;
        self.stride = (actual.stride as usize).max(resolution.width as usize * 2);
        self.converter = PixelConverter::yuyv_to_i420(resolution);
        self.packed = vec![0u8; PixelFormat::Yuyv.frame_size(resolution)];
        Ok(())
    }

    fn start_stream(&mut self) -> Result<()> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| {
                    BridgeError::VideoDevice(format!("Failed to start streaming: {}", e))
                })?;
            self.stream = Some(stream);
        }
        Ok(())
    }
}

/// Camera generator: YUYV from a V4L2 device converted to I420
pub struct V4lCamera {
    clock: Clock,
    path: PathBuf,
    state: Mutex<CameraState>,
}

impl V4lCamera {
    pub fn open(
        path: impl AsRef<Path>,
        resolution: Resolution,
        fps: u32,
        clock: Clock,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let resolution = resolution.validate()?;
        debug!("Opening camera {:?} at {}", path, resolution);

        let device = Device::with_path(&path).map_err(|e| {
            BridgeError::VideoDevice(format!("Failed to open device {:?}: {}", path, e))
        })?;

        let mut state = CameraState {
            device,
            stream: None,
            resolution,
            stride: resolution.width as usize * 2,
            fps: fps.max(1),
            converter: PixelConverter::yuyv_to_i420(resolution),
            packed: Vec::new(),
            sequence: 0,
        };
        state.configure(resolution)?;
        info!("Camera {:?} capturing {}", path, state.resolution);

        Ok(Self {
            clock,
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameGenerator for V4lCamera {
    fn resolution(&self) -> Resolution {
        self.state.lock().resolution
    }

    fn change_resolution(&self, width: u32, height: u32) -> Result<()> {
        let requested = Resolution::new(width, height).validate()?;
        let mut state = self.state.lock();
        // Buffers have to be released before the format can change
        state.stream = None;
        state.configure(requested)
    }

    fn next_frame(&self) -> Result<VideoFrame> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let width_bytes = state.resolution.width as usize * 2;
        let rows = state.resolution.height as usize;
        let stride = state.stride;

        state.start_stream()?;
        {
            let stream = state
                .stream
                .as_mut()
                .ok_or_else(|| BridgeError::VideoDevice("stream not started".to_string()))?;
            let (buf, _meta) = stream.next().map_err(|e| {
                BridgeError::VideoDevice(format!("Failed to dequeue frame: {}", e))
            })?;
            if buf.len() < stride * (rows - 1) + width_bytes {
                return Err(BridgeError::VideoDevice(format!(
                    "short frame: {} bytes",
                    buf.len()
                )));
            }
            for (row, dst) in state.packed.chunks_exact_mut(width_bytes).enumerate() {
                dst.copy_from_slice(&buf[row * stride..row * stride + width_bytes]);
            }
        }

        let data = Bytes::copy_from_slice(state.converter.convert(&state.packed)?);
        state.sequence += 1;
        Ok(VideoFrame::new(
            data,
            state.resolution,
            PixelFormat::I420,
            state.sequence,
            self.clock.now_us(),
        ))
    }
}
