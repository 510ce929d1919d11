//! Bridge configuration
//!
//! Configuration arrives either as JSON text across the foreign boundary
//! (`rtc_context_new`) or as a TOML file for Rust callers.

mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::Context;

use crate::error::{BridgeError, Result};

impl BridgeConfig {
    /// Parse a JSON configuration text; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: BridgeConfig = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.thread_prefix.trim().is_empty() {
            return Err(BridgeError::Config("engine.thread_prefix must not be empty".into()));
        }
        if self.engine.event_capacity == 0 {
            return Err(BridgeError::Config("engine.event_capacity must be positive".into()));
        }
        if self.capture.default_fps == 0 || self.capture.max_fps == 0 {
            return Err(BridgeError::Config("capture fps must be positive".into()));
        }
        if self.capture.default_fps > self.capture.max_fps {
            return Err(BridgeError::Config(format!(
                "capture.default_fps ({}) exceeds capture.max_fps ({})",
                self.capture.default_fps, self.capture.max_fps
            )));
        }
        if self.data_channel.max_retransmits.is_some()
            && self.data_channel.max_packet_life_time.is_some()
        {
            return Err(BridgeError::Config(
                "data_channel.max_retransmits and max_packet_life_time are mutually exclusive"
                    .into(),
            ));
        }
        Ok(())
    }
}
