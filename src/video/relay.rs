//! Frame relay: a pull-based frame generator fed by an external source
//!
//! The capture thread calls [`FrameRelay::next_frame`]; any thread may call
//! [`FrameRelay::change_resolution`]. One mutex guards the pixel buffer, the
//! dimensions and the converter, so a frame is never filled or converted
//! while the buffer is being resized.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use super::convert::PixelConverter;
use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::engine::context::Clock;
use crate::error::{BridgeError, Result};

/// External producer of packed pixels
pub trait FrameSource: Send + Sync {
    /// Fill `data` with one `width` x `height` frame in the relay's packed
    /// layout. `data.len()` is always `width * height * 4`.
    fn fill(&self, width: u32, height: u32, timestamp_us: i64, data: &mut [u8]);
}

/// Anything the capture loop can pull frames from
pub trait FrameGenerator: Send + Sync {
    fn resolution(&self) -> Resolution;

    /// Switch to a new size. Zero dimensions are rejected.
    fn change_resolution(&self, width: u32, height: u32) -> Result<()>;

    fn next_frame(&self) -> Result<VideoFrame>;
}

struct RelayState {
    buffer: Vec<u8>,
    resolution: Resolution,
    converter: PixelConverter,
    sequence: u64,
}

impl RelayState {
    fn new(resolution: Resolution, layout: PixelFormat) -> Self {
        let converter = match layout {
            PixelFormat::Bgra => PixelConverter::bgra_to_i420(resolution),
            _ => PixelConverter::rgba_to_i420(resolution),
        };
        Self {
            buffer: vec![0u8; resolution.pixels() as usize * 4],
            resolution,
            converter,
            sequence: 0,
        }
    }
}

/// Frame relay adapter
pub struct FrameRelay {
    source: Arc<dyn FrameSource>,
    layout: PixelFormat,
    clock: Clock,
    state: Mutex<RelayState>,
}

impl FrameRelay {
    pub fn new(
        source: Arc<dyn FrameSource>,
        width: u32,
        height: u32,
        layout: PixelFormat,
        clock: Clock,
    ) -> Result<Self> {
        if layout.rgb_offsets().is_none() {
            return Err(BridgeError::Unsupported(format!(
                "relay source layout must be packed RGB, got {}",
                layout
            )));
        }
        let resolution = Resolution::new(width, height).validate()?;
        info!("Frame relay created at {} ({})", resolution, layout);

        Ok(Self {
            source,
            layout,
            clock,
            state: Mutex::new(RelayState::new(resolution, layout)),
        })
    }

    pub fn layout(&self) -> PixelFormat {
        self.layout
    }
}

impl FrameGenerator for FrameRelay {
    fn resolution(&self) -> Resolution {
        self.state.lock().resolution
    }

    fn change_resolution(&self, width: u32, height: u32) -> Result<()> {
        let resolution = Resolution::new(width, height).validate()?;

        let mut state = self.state.lock();
        if state.resolution == resolution {
            return Ok(());
        }
        let sequence = state.sequence;
        *state = RelayState::new(resolution, self.layout);
        state.sequence = sequence;
        debug!("Frame relay resized to {}", resolution);
        Ok(())
    }

    fn next_frame(&self) -> Result<VideoFrame> {
        let mut state = self.state.lock();
        let resolution = state.resolution;
        let timestamp_us = self.clock.now_us();

        let RelayState {
            buffer, converter, ..
        } = &mut *state;
        self.source
            .fill(resolution.width, resolution.height, timestamp_us, buffer);
        let planar = Bytes::copy_from_slice(converter.convert(buffer)?);

        state.sequence += 1;
        Ok(VideoFrame::new(
            planar,
            resolution,
            PixelFormat::I420,
            state.sequence,
            timestamp_us,
        ))
    }
}
