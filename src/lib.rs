//! rtc-bridge - media engine to signaling authority bridge
//!
//! A [`bridge::Coordinator`] negotiates one session with an external
//! signaling authority (a [`signaling::Signaller`], or a C callback table
//! through [`ffi`]) and exposes producers, consumers and data channels on a
//! pair of transports. Engine work runs on the threads of an
//! [`engine::EngineContext`].

pub mod audio;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ffi;
pub mod logging;
pub mod signaling;
pub mod utils;
pub mod video;

pub use error::{BridgeError, Result};
