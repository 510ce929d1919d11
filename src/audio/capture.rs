//! ALSA audio capture
//!
//! An [`AudioSource`] yields S16LE interleaved periods; an
//! [`AudioCaptureLoop`] reads it on a dedicated thread and hands frames to
//! an [`AudioSink`]. The read itself paces the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use alsa::pcm::{Access, Format, Frames, HwParams, State, IO};
use alsa::{Direction, ValueOr, PCM};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::device::AudioDeviceInfo;
use crate::engine::context::Clock;
use crate::error::{BridgeError, Result};
use crate::utils::LogThrottle;
use crate::video::CaptureStats;

/// Audio capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConfig {
    /// ALSA device name (e.g., "hw:0,0" or "default")
    pub device_name: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u32,
    /// Samples per channel in one frame
    pub frame_size: u32,
    /// Buffer size in frames
    pub buffer_frames: u32,
    /// Period size in frames
    pub period_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_name: super::device::DEFAULT_DEVICE.to_string(),
            sample_rate: 48000,
            channels: 2,
            frame_size: 960, // 20ms at 48kHz
            buffer_frames: 4096,
            period_frames: 960,
        }
    }
}

impl AudioConfig {
    /// Prefer 48 kHz stereo when the device offers it
    pub fn for_device(device: &AudioDeviceInfo) -> Self {
        let sample_rate = if device.sample_rates.contains(&48000) {
            48000
        } else {
            *device.sample_rates.first().unwrap_or(&48000)
        };

        let channels = if device.channels.contains(&2) {
            2
        } else {
            *device.channels.first().unwrap_or(&2)
        };

        Self {
            device_name: device.name.clone(),
            sample_rate,
            channels,
            frame_size: sample_rate / 50,
            period_frames: sample_rate / 50,
            ..Default::default()
        }
    }

    /// Bytes per sample across all channels (16-bit signed)
    pub fn bytes_per_sample(&self) -> u32 {
        2 * self.channels
    }

    pub fn bytes_per_frame(&self) -> usize {
        (self.frame_size * self.bytes_per_sample()) as usize
    }

    /// Playback time of one full frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_size as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

/// One block of captured PCM
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// S16LE interleaved
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u32,
    /// Samples per channel
    pub samples: u32,
    pub sequence: u64,
    /// Engine clock, microseconds
    pub timestamp_us: i64,
}

impl AudioFrame {
    pub fn new(data: Bytes, config: &AudioConfig, sequence: u64, timestamp_us: i64) -> Self {
        Self {
            samples: data.len() as u32 / config.bytes_per_sample().max(1),
            data,
            sample_rate: config.sample_rate,
            channels: config.channels,
            sequence,
            timestamp_us,
        }
    }
}

/// A blocking PCM source
pub trait AudioSource: Send {
    fn config(&self) -> &AudioConfig;

    /// Fill `buf` with whole samples; returns the number of bytes written.
    /// Zero means nothing was ready.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Consumer of captured audio (the encoder side of an audio track)
pub trait AudioSink: Send + Sync {
    fn on_audio(&self, frame: AudioFrame);
}

/// Capture from an ALSA PCM device
pub struct AlsaSource {
    config: AudioConfig,
    pcm: PCM,
    overruns: u64,
}

fn audio_error(what: &str, e: alsa::Error) -> BridgeError {
    BridgeError::AudioDevice(format!("{}: {}", what, e))
}

impl AlsaSource {
    pub fn open(config: AudioConfig) -> Result<Self> {
        let pcm = PCM::new(&config.device_name, Direction::Capture, false).map_err(|e| {
            BridgeError::AudioDevice(format!(
                "Failed to open audio device {}: {}",
                config.device_name, e
            ))
        })?;

        {
            let hwp = HwParams::any(&pcm).map_err(|e| audio_error("Failed to get HwParams", e))?;
            hwp.set_channels(config.channels)
                .map_err(|e| audio_error("Failed to set channels", e))?;
            hwp.set_rate(config.sample_rate, ValueOr::Nearest)
                .map_err(|e| audio_error("Failed to set sample rate", e))?;
            hwp.set_format(Format::s16())
                .map_err(|e| audio_error("Failed to set format", e))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| audio_error("Failed to set access", e))?;
            hwp.set_buffer_size_near(config.buffer_frames as Frames)
                .map_err(|e| audio_error("Failed to set buffer size", e))?;
            hwp.set_period_size_near(config.period_frames as Frames, ValueOr::Nearest)
                .map_err(|e| audio_error("Failed to set period size", e))?;
            pcm.hw_params(&hwp)
                .map_err(|e| audio_error("Failed to apply hw params", e))?;
        }

        let mut config = config;
        if let Ok(rate) = pcm.hw_params_current().and_then(|h| h.get_rate()) {
            if rate != config.sample_rate {
                info!(
                    "Audio device {} runs at {}Hz (requested {}Hz)",
                    config.device_name, rate, config.sample_rate
                );
                config.sample_rate = rate;
            }
        }

        pcm.prepare().map_err(|e| audio_error("Failed to prepare PCM", e))?;
        info!(
            "Audio capture configured: {} {}Hz {}ch",
            config.device_name, config.sample_rate, config.channels
        );

        Ok(Self {
            config,
            pcm,
            overruns: 0,
        })
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

impl AudioSource for AlsaSource {
    fn config(&self) -> &AudioConfig {
        &self.config
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.pcm.state() {
            State::XRun => {
                warn!("Audio buffer overrun, recovering");
                self.overruns += 1;
                self.pcm.prepare().map_err(|e| audio_error("Failed to recover", e))?;
                return Ok(0);
            }
            State::Suspended => {
                warn!("Audio device suspended, recovering");
                self.pcm.resume().map_err(|e| audio_error("Failed to resume", e))?;
                return Ok(0);
            }
            _ => {}
        }

        // io_bytes rather than a checked IO: USB devices rarely support mmap
        let io: IO<u8> = self.pcm.io_bytes();
        match io.readi(buf) {
            Ok(frames) => Ok(frames * self.config.bytes_per_sample() as usize),
            Err(e) if e.errno() == libc::EPIPE => {
                warn!("Audio buffer overrun");
                self.overruns += 1;
                self.pcm.prepare().map_err(|e| audio_error("Failed to recover", e))?;
                Ok(0)
            }
            Err(e) => Err(audio_error("Audio read error", e)),
        }
    }
}

/// Zero-valued PCM delivered in real time; a stand-in for a microphone
pub struct SilenceSource {
    config: AudioConfig,
    next: Option<Instant>,
}

impl SilenceSource {
    pub fn new(config: AudioConfig) -> Self {
        Self { config, next: None }
    }
}

impl AudioSource for SilenceSource {
    fn config(&self) -> &AudioConfig {
        &self.config
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let period = self.config.frame_duration();
        let now = Instant::now();
        let due = *self.next.get_or_insert(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next = Some(due.max(now) + period);

        let len = buf.len().min(self.config.bytes_per_frame());
        buf[..len].fill(0);
        Ok(len)
    }
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    errors: AtomicU64,
}

/// A running audio capture thread
pub struct AudioCaptureLoop {
    name: String,
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AudioCaptureLoop {
    pub fn start(
        name: impl Into<String>,
        source: Box<dyn AudioSource>,
        clock: Clock,
        sink: Arc<dyn AudioSink>,
    ) -> Result<Self> {
        if source.config().bytes_per_frame() == 0 {
            return Err(BridgeError::InvalidParameters(
                "audio frame size must be positive".into(),
            ));
        }
        let name = name.into();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let handle = {
            let stop_flag = stop_flag.clone();
            let counters = counters.clone();
            let name = name.clone();
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || run(&name, source, clock, sink, &stop_flag, &counters))?
        };

        info!("Audio capture loop {} started", name);
        Ok(Self {
            name,
            stop_flag,
            counters,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Stop and join the capture thread. Idempotent. Returns once the
    /// source's current read completes.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Audio capture loop {} exited abnormally", self.name);
            }
            info!("Audio capture loop {} stopped", self.name);
        }
    }
}

impl Drop for AudioCaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    name: &str,
    mut source: Box<dyn AudioSource>,
    clock: Clock,
    sink: Arc<dyn AudioSink>,
    stop_flag: &AtomicBool,
    counters: &Counters,
) {
    let config = source.config().clone();
    let mut buffer = vec![0u8; config.bytes_per_frame()];
    let throttle = LogThrottle::with_secs(5);
    let mut sequence = 0u64;

    while !stop_flag.load(Ordering::SeqCst) {
        match source.read(&mut buffer) {
            Ok(0) => {}
            Ok(len) => {
                sequence += 1;
                counters.frames.fetch_add(1, Ordering::Relaxed);
                let len = len.min(buffer.len());
                sink.on_audio(AudioFrame::new(
                    Bytes::copy_from_slice(&buffer[..len]),
                    &config,
                    sequence,
                    clock.now_us(),
                ));
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                if let Some(suppressed) = throttle.check() {
                    warn!(
                        "Audio capture loop {} failed to read: {} ({} similar suppressed)",
                        name, e, suppressed
                    );
                }
                // Keep a broken device from spinning the thread
                std::thread::sleep(config.frame_duration());
            }
        }
    }
    debug!("Audio capture loop {} exiting", name);
}

/// Sink that only keeps counters; stands in for an encoder
#[derive(Default)]
pub struct AudioStatsSink {
    frames: AtomicU64,
    samples: AtomicU64,
}

impl AudioStatsSink {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl AudioSink for AudioStatsSink {
    fn on_audio(&self, frame: AudioFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(frame.samples as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_frames() -> AudioConfig {
        AudioConfig {
            device_name: "test".to_string(),
            sample_rate: 48000,
            channels: 2,
            frame_size: 48, // 1ms
            buffer_frames: 480,
            period_frames: 48,
        }
    }

    struct FailingSource(AudioConfig);

    impl AudioSource for FailingSource {
        fn config(&self) -> &AudioConfig {
            &self.0
        }

        fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
            Err(BridgeError::AudioDevice("unplugged".into()))
        }
    }

    #[test]
    fn test_config_for_device() {
        let device = AudioDeviceInfo {
            name: "hw:1,0".to_string(),
            description: "USB Audio".to_string(),
            card_index: 1,
            device_index: 0,
            sample_rates: vec![44100],
            channels: vec![1],
        };
        let config = AudioConfig::for_device(&device);
        assert_eq!(config.device_name, "hw:1,0");
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_size, 882);
        assert_eq!(config.bytes_per_frame(), 882 * 2);
        assert_eq!(config.frame_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_silence_delivers_until_stopped() {
        let sink = Arc::new(AudioStatsSink::default());
        let capture = AudioCaptureLoop::start(
            "test-audio",
            Box::new(SilenceSource::new(short_frames())),
            Clock::new(),
            sink.clone(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.frames() < 5 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        capture.stop();
        assert!(!capture.is_running());

        let delivered = sink.frames();
        assert!(delivered >= 5);
        assert_eq!(capture.stats().frames, delivered);
        assert_eq!(sink.samples(), delivered * 48);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.frames(), delivered);
    }

    #[test]
    fn test_counts_read_errors() {
        let sink = Arc::new(AudioStatsSink::default());
        let capture = AudioCaptureLoop::start(
            "test-audio-err",
            Box::new(FailingSource(short_frames())),
            Clock::new(),
            sink.clone(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while capture.stats().errors < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        capture.stop();
        assert!(capture.stats().errors >= 3);
        assert_eq!(sink.frames(), 0);
    }

    #[test]
    fn test_open_missing_device() {
        let config = AudioConfig {
            device_name: "hw:99,0".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            AlsaSource::open(config),
            Err(BridgeError::AudioDevice(_))
        ));
    }
}
