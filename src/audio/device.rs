//! Audio device enumeration using ALSA

use alsa::pcm::HwParams;
use alsa::{Direction, PCM};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// Name of the ALSA device that follows the system's default routing
pub const DEFAULT_DEVICE: &str = "default";

/// Audio capture device information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    /// ALSA device name (e.g., "hw:0,0" or "default")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Card index, -1 for the default device
    pub card_index: i32,
    /// Device index, -1 for the default device
    pub device_index: i32,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u32>,
}

impl AudioDeviceInfo {
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_DEVICE
    }
}

/// Enumerate audio capture devices. The default device, when it can be
/// opened, comes first.
pub fn enumerate_audio_devices() -> Result<Vec<AudioDeviceInfo>> {
    let mut devices = Vec::new();

    for card_result in alsa::card::Iter::new() {
        let card = match card_result {
            Ok(c) => c,
            Err(e) => {
                debug!("Error iterating card: {}", e);
                continue;
            }
        };

        let card_index = card.get_index();
        let card_name = card.get_name().unwrap_or_else(|_| "Unknown".to_string());
        let card_longname = card.get_longname().unwrap_or_else(|_| card_name.clone());
        debug!("Found audio card {}: {}", card_index, card_longname);

        for device_index in 0..8 {
            let device_name = format!("hw:{},{}", card_index, device_index);
            let Ok(pcm) = PCM::new(&device_name, Direction::Capture, false) else {
                continue;
            };
            let (sample_rates, channels) = query_device_caps(&pcm);
            if !sample_rates.is_empty() && !channels.is_empty() {
                devices.push(AudioDeviceInfo {
                    name: device_name,
                    description: format!("{} - Device {}", card_longname, device_index),
                    card_index,
                    device_index,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(pcm) = PCM::new(DEFAULT_DEVICE, Direction::Capture, false) {
        let (sample_rates, channels) = query_device_caps(&pcm);
        if !sample_rates.is_empty() {
            devices.insert(
                0,
                AudioDeviceInfo {
                    name: DEFAULT_DEVICE.to_string(),
                    description: "Default Audio Device".to_string(),
                    card_index: -1,
                    device_index: -1,
                    sample_rates,
                    channels,
                },
            );
        }
    }

    info!("Found {} audio capture devices", devices.len());
    Ok(devices)
}

fn query_device_caps(pcm: &PCM) -> (Vec<u32>, Vec<u32>) {
    let hwp = match HwParams::any(pcm) {
        Ok(h) => h,
        Err(_) => return (vec![], vec![]),
    };

    let supported_rates = [8000, 16000, 22050, 44100, 48000, 96000]
        .into_iter()
        .filter(|rate| hwp.test_rate(*rate).is_ok())
        .collect();
    let supported_channels = (1..=8)
        .filter(|ch| hwp.test_channels(*ch).is_ok())
        .collect();

    (supported_rates, supported_channels)
}

/// The device a "default audio" producer captures from: the system default
/// when present, otherwise the first device that can do 48 kHz stereo,
/// otherwise the first device.
pub fn default_audio_device(devices: &[AudioDeviceInfo]) -> Option<&AudioDeviceInfo> {
    devices
        .iter()
        .find(|d| d.is_default())
        .or_else(|| {
            devices
                .iter()
                .find(|d| d.sample_rates.contains(&48000) && d.channels.contains(&2))
        })
        .or_else(|| devices.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, rates: &[u32], channels: &[u32]) -> AudioDeviceInfo {
        AudioDeviceInfo {
            name: name.to_string(),
            description: name.to_string(),
            card_index: 0,
            device_index: 0,
            sample_rates: rates.to_vec(),
            channels: channels.to_vec(),
        }
    }

    #[test]
    fn test_default_device_selection() {
        assert!(default_audio_device(&[]).is_none());

        let mono = device("hw:0,0", &[16000], &[1]);
        let stereo = device("hw:1,0", &[44100, 48000], &[1, 2]);
        let devices = vec![mono.clone(), stereo.clone()];
        assert_eq!(default_audio_device(&devices), Some(&stereo));

        let devices = vec![mono.clone()];
        assert_eq!(default_audio_device(&devices), Some(&mono));

        let default = device(DEFAULT_DEVICE, &[48000], &[2]);
        let devices = vec![mono, stereo, default.clone()];
        assert_eq!(default_audio_device(&devices), Some(&default));
    }
}
