//! Capture hardware behind the engine
//!
//! Enumeration and opening of cameras and microphones go through
//! [`CaptureDevices`] so engines (and tests) can substitute the hardware.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::{AlsaSource, AudioConfig, AudioDeviceInfo, AudioSource};
use crate::engine::context::Clock;
use crate::error::Result;
use crate::video::{FrameGenerator, Resolution, V4lCamera, VideoDeviceInfo};

/// Snapshot of the capture hardware
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureDeviceList {
    pub video: Vec<VideoDeviceInfo>,
    pub audio: Vec<AudioDeviceInfo>,
}

pub trait CaptureDevices: Send + Sync {
    fn video_devices(&self) -> Vec<VideoDeviceInfo>;

    /// Audio capture devices; the default device, when present, first
    fn audio_devices(&self) -> Vec<AudioDeviceInfo>;

    fn open_camera(
        &self,
        device: &VideoDeviceInfo,
        resolution: Resolution,
        fps: u32,
        clock: Clock,
    ) -> Result<Arc<dyn FrameGenerator>>;

    fn open_microphone(&self, device: &AudioDeviceInfo) -> Result<Box<dyn AudioSource>>;

    fn list(&self) -> CaptureDeviceList {
        CaptureDeviceList {
            video: self.video_devices(),
            audio: self.audio_devices(),
        }
    }
}

/// V4L2 cameras and ALSA microphones of this machine
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

impl CaptureDevices for SystemDevices {
    fn video_devices(&self) -> Vec<VideoDeviceInfo> {
        crate::video::enumerate_devices().unwrap_or_else(|e| {
            warn!("Video device enumeration failed: {}", e);
            Vec::new()
        })
    }

    fn audio_devices(&self) -> Vec<AudioDeviceInfo> {
        crate::audio::enumerate_audio_devices().unwrap_or_else(|e| {
            warn!("Audio device enumeration failed: {}", e);
            Vec::new()
        })
    }

    fn open_camera(
        &self,
        device: &VideoDeviceInfo,
        resolution: Resolution,
        fps: u32,
        clock: Clock,
    ) -> Result<Arc<dyn FrameGenerator>> {
        let camera = V4lCamera::open(&device.path, resolution, fps, clock)?;
        Ok(Arc::new(camera))
    }

    fn open_microphone(&self, device: &AudioDeviceInfo) -> Result<Box<dyn AudioSource>> {
        let source = AlsaSource::open(AudioConfig::for_device(device))?;
        Ok(Box::new(source))
    }
}

#[cfg(test)]
pub use fake::StaticDevices;
