//! Pixel layouts and resolutions used by the capture pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Pixel formats handled by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Packed 8-bit R, G, B, A (what an external source pushes by default)
    Rgba,
    /// Packed 8-bit B, G, R, A
    Bgra,
    /// Packed YUV 4:2:2 (Y0 U Y1 V), what most V4L2 cameras deliver
    Yuyv,
    /// Planar YUV 4:2:0, the pipeline's internal format
    I420,
}

impl PixelFormat {
    /// Byte offsets of red, green and blue within a packed pixel
    pub fn rgb_offsets(&self) -> Option<(usize, usize, usize)> {
        match self {
            PixelFormat::Rgba => Some((0, 1, 2)),
            PixelFormat::Bgra => Some((2, 1, 0)),
            PixelFormat::Yuyv | PixelFormat::I420 => None,
        }
    }

    /// Exact frame size in bytes for this format
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        let pixels = resolution.pixels() as usize;
        match self {
            PixelFormat::Rgba | PixelFormat::Bgra => pixels * 4,
            PixelFormat::Yuyv => pixels * 2,
            PixelFormat::I420 => {
                let (cw, ch) = resolution.chroma();
                pixels + 2 * (cw as usize * ch as usize)
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Bgra => "BGRA",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::I420 => "I420",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for PixelFormat {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "RGBA" | "ABGR" => Ok(PixelFormat::Rgba),
            "BGRA" | "ARGB" => Ok(PixelFormat::Bgra),
            "YUYV" | "YUY2" => Ok(PixelFormat::Yuyv),
            "I420" | "YU12" | "YUV420" => Ok(PixelFormat::I420),
            _ => Err(BridgeError::InvalidParameters(format!(
                "Unknown pixel format: {}",
                s
            ))),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions must be non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn validate(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(BridgeError::InvalidResolution {
                width: self.width,
                height: self.height,
            })
        }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Chroma plane size for 4:2:0 subsampling (rounded up)
    pub fn chroma(&self) -> (u32, u32) {
        (self.width.div_ceil(2), self.height.div_ceil(2))
    }

    /// Common resolutions
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelFormat::Rgba.frame_size(Resolution::VGA), 640 * 480 * 4);
        assert_eq!(
            PixelFormat::I420.frame_size(Resolution::VGA),
            640 * 480 * 3 / 2
        );
        // 3x3 luma, 2x2 chroma per plane
        assert_eq!(PixelFormat::I420.frame_size(Resolution::new(3, 3)), 9 + 8);
    }

    #[test]
    fn test_validate() {
        assert!(Resolution::new(0, 10).validate().is_err());
        assert!(Resolution::new(10, 0).validate().is_err());
        assert_eq!(Resolution::new(1, 1).validate().unwrap(), (1, 1).into());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("bgra".parse::<PixelFormat>().unwrap(), PixelFormat::Bgra);
        assert!("nv12".parse::<PixelFormat>().is_err());
        assert_eq!(Resolution::HD720.to_string(), "1280x720");
    }
}
