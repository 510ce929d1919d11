//! C ABI
//!
//! `include/rtc_bridge.h` declares everything exported here.

pub mod callbacks;
pub mod exports;

pub use callbacks::{CallbackSignaller, ForeignFrameSource, PullFrameFn, RtcCallbacks};
pub use exports::RtcContext;
