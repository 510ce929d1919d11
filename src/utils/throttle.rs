//! Rate limiting for repeated warnings
//!
//! A stalled frame source or a slow data consumer can fail on every tick.
//! [`LogThrottle`] lets one line through per interval and counts the rest.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub struct LogThrottle {
    interval: Duration,
    state: Mutex<ThrottleState>,
}

struct ThrottleState {
    last_logged: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(ThrottleState {
                last_logged: None,
                suppressed: 0,
            }),
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `Some(suppressed)` when the caller should log now, where
    /// `suppressed` counts the calls swallowed since the last logged one.
    pub fn check(&self) -> Option<u64> {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.last_logged {
            Some(last) if now.duration_since(last) < self.interval => {
                state.suppressed += 1;
                None
            }
            _ => {
                state.last_logged = Some(now);
                Some(std::mem::take(&mut state.suppressed))
            }
        }
    }

    /// Forget the last log time, e.g. once the failing condition recovers.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_logged = None;
        state.suppressed = 0;
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::with_secs(5)
    }
}
