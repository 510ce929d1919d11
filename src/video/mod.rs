//! Video capture pipeline
//!
//! External pixel sources and V4L2 cameras feed a pull-based generator,
//! converted to I420, and pulled at a fixed rate by a capture loop.

pub mod capture;
pub mod convert;
pub mod device;
pub mod format;
pub mod frame;
pub mod relay;
pub mod squares;

pub use capture::{CaptureLoop, CaptureStats, FrameSink, StatsSink};
pub use convert::{PixelConverter, Yuv420pBuffer};
pub use device::{enumerate_devices, V4lCamera, VideoDeviceInfo};
pub use format::{PixelFormat, Resolution};
pub use frame::VideoFrame;
pub use relay::{FrameGenerator, FrameRelay, FrameSource};
pub use squares::SquaresGenerator;
