//! Capture loop
//!
//! Pulls frames from a [`FrameGenerator`] on a dedicated thread at a fixed
//! rate and hands them to a [`FrameSink`]. A generator that stalls stalls
//! only this thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::format::Resolution;
use super::frame::VideoFrame;
use super::relay::FrameGenerator;
use crate::error::{BridgeError, Result};
use crate::utils::LogThrottle;

/// Consumer of captured frames (the encoder side of a video track)
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: VideoFrame);
}

/// Capture statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    frames: AtomicU64,
    errors: AtomicU64,
}

/// A running capture thread
pub struct CaptureLoop {
    name: String,
    fps: u32,
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureLoop {
    pub fn start(
        name: impl Into<String>,
        generator: Arc<dyn FrameGenerator>,
        fps: u32,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self> {
        if fps == 0 {
            return Err(BridgeError::InvalidParameters("capture fps must be positive".into()));
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
                .spawn(move || run(&name, generator, fps, sink, &stop_flag, &counters))?
        };

        info!("Capture loop {} started at {} fps", name, fps);
        Ok(Self {
            name,
            fps,
            stop_flag,
            counters,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn fps(&self) -> u32 {
        self.fps
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

    /// Stop and join the capture thread. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Capture loop {} exited abnormally", self.name);
            }
            info!("Capture loop {} stopped", self.name);
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    name: &str,
    generator: Arc<dyn FrameGenerator>,
    fps: u32,
    sink: Arc<dyn FrameSink>,
    stop_flag: &AtomicBool,
    counters: &Counters,
) {
    let period = Duration::from_secs(1) / fps;
    let throttle = LogThrottle::with_secs(5);
    let mut deadline = Instant::now();

    while !stop_flag.load(Ordering::SeqCst) {
        match generator.next_frame() {
            Ok(frame) => {
                counters.frames.fetch_add(1, Ordering::Relaxed);
                sink.on_frame(frame);
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                if let Some(suppressed) = throttle.check() {
                    warn!(
                        "Capture loop {} failed to pull a frame: {} ({} similar suppressed)",
                        name, e, suppressed
                    );
                }
            }
        }

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            std::thread::park_timeout(deadline - now);
        } else {
            // Behind schedule: skip the missed ticks instead of bursting
            deadline = now;
        }
    }
    debug!("Capture loop {} exiting", name);
}

/// Sink that only keeps counters; stands in for an encoder
#[derive(Default)]
pub struct StatsSink {
    frames: AtomicU64,
    bytes: AtomicU64,
    last: Mutex<Option<(Resolution, i64)>>,
}

impl StatsSink {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Resolution and timestamp of the last frame seen
    pub fn last_frame(&self) -> Option<(Resolution, i64)> {
        *self.last.lock()
    }
}

impl FrameSink for StatsSink {
    fn on_frame(&self, frame: VideoFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
        *self.last.lock() = Some((frame.resolution, frame.timestamp_us));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::PixelFormat;
    use bytes::Bytes;

    struct CountingGenerator {
        fail: bool,
    }

    impl FrameGenerator for CountingGenerator {
        fn resolution(&self) -> Resolution {
            Resolution::new(2, 2)
        }

        fn change_resolution(&self, _width: u32, _height: u32) -> Result<()> {
            Ok(())
        }

        fn next_frame(&self) -> Result<VideoFrame> {
            if self.fail {
                return Err(BridgeError::ResourceClosed("source gone".into()));
            }
            Ok(VideoFrame::new(
                Bytes::from(vec![0u8; 6]),
                Resolution::new(2, 2),
                PixelFormat::I420,
                0,
                0,
            ))
        }
    }

    #[test]
    fn test_delivers_frames_until_stopped() {
        let sink = Arc::new(StatsSink::default());
        let capture = CaptureLoop::start(
            "test-capture",
            Arc::new(CountingGenerator { fail: false }),
            200,
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
        assert_eq!(sink.last_frame().unwrap().0, Resolution::new(2, 2));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.frames(), delivered);
    }

    #[test]
    fn test_counts_errors() {
        let sink = Arc::new(StatsSink::default());
        let capture = CaptureLoop::start(
            "test-capture-err",
            Arc::new(CountingGenerator { fail: true }),
            200,
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
    fn test_zero_fps_rejected() {
        let result = CaptureLoop::start(
            "test-capture-zero",
            Arc::new(CountingGenerator { fail: false }),
            0,
            Arc::new(StatsSink::default()),
        );
        assert!(result.is_err());
    }
}
