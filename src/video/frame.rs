//! Frames flowing from a generator to the engine's track sink

use bytes::Bytes;

use super::format::{PixelFormat, Resolution};

/// One frame in the capture pipeline
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Bytes,
    pub resolution: Resolution,
    pub format: PixelFormat,
    /// Monotonic per generator, unaffected by resizes
    pub sequence: u64,
    /// Engine clock, microseconds
    pub timestamp_us: i64,
}

impl VideoFrame {
    pub fn new(
        data: Bytes,
        resolution: Resolution,
        format: PixelFormat,
        sequence: u64,
        timestamp_us: i64,
    ) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
            timestamp_us,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Whether the payload length matches the declared format and size
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.format.frame_size(self.resolution)
    }

    /// Y, U and V planes of an I420 frame; `None` for other layouts or a
    /// short payload.
    pub fn planes(&self) -> Option<(&[u8], &[u8], &[u8])> {
        if self.format != PixelFormat::I420 || !self.is_consistent() {
            return None;
        }
        let luma = self.resolution.pixels() as usize;
        let (cw, ch) = self.resolution.chroma();
        let chroma = cw as usize * ch as usize;
        let (y, rest) = self.data.split_at(luma);
        let (u, v) = rest.split_at(chroma);
        Some((y, u, v))
    }
}
