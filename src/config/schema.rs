use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

/// Main bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Logging settings
    pub log: LogConfig,
    /// Engine thread settings
    pub engine: EngineConfig,
    /// Capture pipeline settings
    pub capture: CaptureConfig,
    /// Data channel defaults
    pub data_channel: DataChannelConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
        }
    }
}

/// Engine context configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix for the network/worker/signaling thread names
    pub thread_prefix: String,
    /// Event bus ring buffer size
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_prefix: "rtc".to_string(),
            event_capacity: 256,
        }
    }
}

/// Capture pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frame rate used by the fake video producer
    pub default_fps: u32,
    /// Upper bound accepted for any producer
    pub max_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_fps: 30,
            max_fps: 60,
        }
    }
}

/// Data producer reliability defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataChannelConfig {
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
    pub max_packet_life_time: Option<u16>,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            ordered: true,
            max_retransmits: None,
            max_packet_life_time: None,
        }
    }
}
