//! Packed RGB and YUYV to planar I420 conversion
//!
//! BT.601 limited range, integer arithmetic. Chroma is averaged over each
//! 2x2 block; odd widths and heights round the chroma planes up and average
//! over the pixels that exist. YUYV already carries limited-range samples,
//! so only the vertical chroma subsampling is done.

use super::format::{PixelFormat, Resolution};
use crate::error::{BridgeError, Result};

/// I420 buffer with separate Y, U, V planes
pub struct Yuv420pBuffer {
    /// Raw buffer containing all planes
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// U plane offset
    u_offset: usize,
    /// V plane offset
    v_offset: usize,
}

impl Yuv420pBuffer {
    /// Create a new buffer for the given resolution
    pub fn new(resolution: Resolution) -> Self {
        let y_size = resolution.pixels() as usize;
        let (cw, ch) = resolution.chroma();
        let uv_size = cw as usize * ch as usize;

        Self {
            data: vec![0u8; y_size + uv_size * 2],
            width: resolution.width,
            height: resolution.height,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    pub fn u_plane(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    pub fn v_plane(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }

    /// Y, U, V planes at once
    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let (y, uv) = self.data.split_at_mut(self.u_offset);
        let (u, v) = uv.split_at_mut(self.v_offset - self.u_offset);
        (y, u, v)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

#[inline]
fn luma(r: i32, g: i32, b: i32) -> u8 {
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

#[inline]
fn chroma_u(r: i32, g: i32, b: i32) -> u8 {
    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8
}

#[inline]
fn chroma_v(r: i32, g: i32, b: i32) -> u8 {
    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8
}

/// Converter from a packed RGB or YUYV layout into I420
pub struct PixelConverter {
    src_format: PixelFormat,
    resolution: Resolution,
    output_buffer: Yuv420pBuffer,
}

impl PixelConverter {
    /// Create a new converter for RGBA → I420
    pub fn rgba_to_i420(resolution: Resolution) -> Self {
        Self::new(PixelFormat::Rgba, resolution)
    }

    /// Create a new converter for BGRA → I420
    pub fn bgra_to_i420(resolution: Resolution) -> Self {
        Self::new(PixelFormat::Bgra, resolution)
    }

    /// Create a new converter for YUYV (camera output) → I420
    pub fn yuyv_to_i420(resolution: Resolution) -> Self {
        Self::new(PixelFormat::Yuyv, resolution)
    }

    fn new(src_format: PixelFormat, resolution: Resolution) -> Self {
        Self {
            src_format,
            resolution,
            output_buffer: Yuv420pBuffer::new(resolution),
        }
    }

    /// Convert a frame and return reference to the output buffer
    pub fn convert(&mut self, input: &[u8]) -> Result<&[u8]> {
        if self.src_format == PixelFormat::I420 {
            return Err(BridgeError::Unsupported(
                "I420 input needs no conversion".to_string(),
            ));
        }

        let expected = self.src_format.frame_size(self.resolution);
        if input.len() != expected {
            return Err(BridgeError::InvalidParameters(format!(
                "Input buffer size mismatch: {} != {}",
                input.len(),
                expected
            )));
        }

        match self.src_format.rgb_offsets() {
            Some(offsets) => self.convert_rgb(input, offsets),
            None => self.convert_yuyv(input),
        }
        Ok(self.output_buffer.as_bytes())
    }

    fn convert_rgb(&mut self, input: &[u8], (ro, go, bo): (usize, usize, usize)) {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let (cw, ch) = self.resolution.chroma();
        let (cw, ch) = (cw as usize, ch as usize);
        let (y_plane, u_plane, v_plane) = self.output_buffer.planes_mut();

        for (row, y_row) in y_plane.chunks_exact_mut(width).enumerate() {
            let src_row = &input[row * width * 4..(row + 1) * width * 4];
            for (px, y) in src_row.chunks_exact(4).zip(y_row.iter_mut()) {
                *y = luma(px[ro] as i32, px[go] as i32, px[bo] as i32);
            }
        }

        for cy in 0..ch {
            for cx in 0..cw {
                let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
                for y in (cy * 2)..(cy * 2 + 2).min(height) {
                    for x in (cx * 2)..(cx * 2 + 2).min(width) {
                        let i = (y * width + x) * 4;
                        r += input[i + ro] as i32;
                        g += input[i + go] as i32;
                        b += input[i + bo] as i32;
                        n += 1;
                    }
                }
                let (r, g, b) = ((r + n / 2) / n, (g + n / 2) / n, (b + n / 2) / n);
                u_plane[cy * cw + cx] = chroma_u(r, g, b);
                v_plane[cy * cw + cx] = chroma_v(r, g, b);
            }
        }
    }

    /// Y0 U Y1 V macropixels; a trailing odd column has Y and U only.
    fn convert_yuyv(&mut self, input: &[u8]) {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let stride = width * 2;
        let (cw, ch) = self.resolution.chroma();
        let (cw, ch) = (cw as usize, ch as usize);
        let (y_plane, u_plane, v_plane) = self.output_buffer.planes_mut();

        for (row, y_row) in y_plane.chunks_exact_mut(width).enumerate() {
            let src_row = &input[row * stride..(row + 1) * stride];
            for (x, y) in y_row.iter_mut().enumerate() {
                *y = src_row[x * 2];
            }
        }

        for cy in 0..ch {
            for cx in 0..cw {
                let (mut u, mut v, mut n, mut nv) = (0u32, 0u32, 0u32, 0u32);
                for y in (cy * 2)..(cy * 2 + 2).min(height) {
                    let base = y * stride + cx * 4;
                    u += input[base + 1] as u32;
                    n += 1;
                    if base + 3 < (y + 1) * stride {
                        v += input[base + 3] as u32;
                        nv += 1;
                    }
                }
                u_plane[cy * cw + cx] = ((u + n / 2) / n) as u8;
                v_plane[cy * cw + cx] = if nv == 0 {
                    128
                } else {
                    ((v + nv / 2) / nv) as u8
                };
            }
        }
    }

    /// Get output buffer length
    pub fn output_len(&self) -> usize {
        self.output_buffer.len()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn src_format(&self) -> PixelFormat {
        self.src_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(res: Resolution, rgba: [u8; 4]) -> Vec<u8> {
        rgba.iter()
            .copied()
            .cycle()
            .take(res.pixels() as usize * 4)
            .collect()
    }

    #[test]
    fn test_yuv420p_buffer_creation() {
        let buffer = Yuv420pBuffer::new(Resolution::HD720);
        assert_eq!(buffer.len(), 1280 * 720 * 3 / 2);
        assert_eq!(buffer.y_plane().len(), 1280 * 720);
        assert_eq!(buffer.u_plane().len(), 1280 * 720 / 4);
        assert_eq!(buffer.v_plane().len(), 1280 * 720 / 4);
    }

    #[test]
    fn test_odd_resolution_planes() {
        let buffer = Yuv420pBuffer::new(Resolution::new(5, 3));
        assert_eq!(buffer.y_plane().len(), 15);
        assert_eq!(buffer.u_plane().len(), 6);
        assert_eq!(buffer.v_plane().len(), 6);
    }

    #[test]
    fn test_white_and_black() {
        let res = Resolution::new(4, 4);
        let mut converter = PixelConverter::rgba_to_i420(res);

        let out = converter.convert(&solid(res, [255, 255, 255, 255])).unwrap();
        assert!(out[..16].iter().all(|&y| y == 235));
        assert!(out[16..].iter().all(|&c| c == 128));

        let out = converter.convert(&solid(res, [0, 0, 0, 255])).unwrap();
        assert!(out[..16].iter().all(|&y| y == 16));
        assert!(out[16..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_channel_order() {
        let res = Resolution::new(2, 2);
        let red_rgba = solid(res, [255, 0, 0, 255]);
        let red_bgra = solid(res, [0, 0, 255, 255]);

        let mut rgba = PixelConverter::rgba_to_i420(res);
        let mut bgra = PixelConverter::bgra_to_i420(res);
        let a = rgba.convert(&red_rgba).unwrap().to_vec();
        let b = bgra.convert(&red_bgra).unwrap().to_vec();
        assert_eq!(a, b);
        // Y, U, V of pure red
        assert_eq!(a, vec![82, 82, 82, 82, 90, 240]);
    }

    #[test]
    fn test_odd_resolution_conversion() {
        let res = Resolution::new(3, 3);
        let mut converter = PixelConverter::rgba_to_i420(res);
        let out = converter.convert(&solid(res, [255, 255, 255, 0])).unwrap();
        assert_eq!(out.len(), 9 + 4 + 4);
        assert!(out[9..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_yuyv_passes_samples_through() {
        // 2x2: row 0 = Y 10,20 U 100 V 200; row 1 = Y 30,40 U 110 V 210
        let res = Resolution::new(2, 2);
        let input = [10, 100, 20, 200, 30, 110, 40, 210];
        let mut converter = PixelConverter::yuyv_to_i420(res);
        let out = converter.convert(&input).unwrap();
        assert_eq!(out, &[10, 20, 30, 40, 105, 205]);
    }

    #[test]
    fn test_yuyv_odd_width() {
        // 3x1: one full macropixel plus a lone Y/U pair
        let res = Resolution::new(3, 1);
        let input = [1, 50, 2, 60, 3, 70];
        let mut converter = PixelConverter::yuyv_to_i420(res);
        let out = converter.convert(&input).unwrap();
        assert_eq!(out, &[1, 2, 3, 50, 70, 60, 128]);
    }

    #[test]
    fn test_size_mismatch() {
        let mut converter = PixelConverter::rgba_to_i420(Resolution::new(2, 2));
        assert!(converter.convert(&[0u8; 15]).is_err());
    }
}
