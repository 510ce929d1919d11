//! Audio capture
//!
//! ALSA devices are enumerated and read on a dedicated thread; captured
//! PCM goes to the engine's audio track sink.

pub mod capture;
pub mod device;

pub use capture::{
    AlsaSource, AudioCaptureLoop, AudioConfig, AudioFrame, AudioSink, AudioSource,
    AudioStatsSink, SilenceSource,
};
pub use device::{default_audio_device, enumerate_audio_devices, AudioDeviceInfo};
