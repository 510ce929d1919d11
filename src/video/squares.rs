//! Synthetic moving-squares source for the fake video producer

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use super::relay::FrameGenerator;
use crate::engine::context::Clock;
use crate::error::Result;

const SQUARE_COUNT: usize = 10;
const BACKGROUND_Y: u8 = 16;

#[derive(Debug, Clone, Copy)]
struct Square {
    x: i64,
    y: i64,
    dx: i64,
    dy: i64,
    size: u32,
    luma: u8,
    u: u8,
    v: u8,
}

impl Square {
    fn random(rng: &mut impl Rng, resolution: Resolution) -> Self {
        let size = (resolution.width.min(resolution.height) / 8).max(1);
        Self {
            x: rng.gen_range(0..resolution.width.max(1)) as i64,
            y: rng.gen_range(0..resolution.height.max(1)) as i64,
            dx: rng.gen_range(1..=4) * if rng.gen_bool(0.5) { 1 } else { -1 },
            dy: rng.gen_range(1..=4) * if rng.gen_bool(0.5) { 1 } else { -1 },
            size,
            luma: rng.gen_range(64..=235),
            u: rng.gen(),
            v: rng.gen(),
        }
    }

    fn advance(&mut self, resolution: Resolution) {
        let max_x = resolution.width.saturating_sub(self.size) as i64;
        let max_y = resolution.height.saturating_sub(self.size) as i64;
        self.x += self.dx;
        self.y += self.dy;
        if self.x <= 0 || self.x >= max_x {
            self.dx = -self.dx;
            self.x = self.x.clamp(0, max_x);
        }
        if self.y <= 0 || self.y >= max_y {
            self.dy = -self.dy;
            self.y = self.y.clamp(0, max_y);
        }
    }
}

struct SquaresState {
    resolution: Resolution,
    squares: Vec<Square>,
    sequence: u64,
}

/// Generator drawing bouncing squares directly in I420
pub struct SquaresGenerator {
    clock: Clock,
    state: Mutex<SquaresState>,
}

impl SquaresGenerator {
    pub fn new(resolution: Resolution, clock: Clock) -> Result<Self> {
        let resolution = resolution.validate()?;
        Ok(Self {
            clock,
            state: Mutex::new(SquaresState {
                resolution,
                squares: spawn_squares(resolution),
                sequence: 0,
            }),
        })
    }
}

fn spawn_squares(resolution: Resolution) -> Vec<Square> {
    let mut rng = rand::thread_rng();
    (0..SQUARE_COUNT)
        .map(|_| Square::random(&mut rng, resolution))
        .collect()
}

impl FrameGenerator for SquaresGenerator {
    fn resolution(&self) -> Resolution {
        self.state.lock().resolution
    }

    fn change_resolution(&self, width: u32, height: u32) -> Result<()> {
        let resolution = Resolution::new(width, height).validate()?;
        let mut state = self.state.lock();
        state.resolution = resolution;
        state.squares = spawn_squares(resolution);
        Ok(())
    }

    fn next_frame(&self) -> Result<VideoFrame> {
        let mut state = self.state.lock();
        let resolution = state.resolution;
        let width = resolution.width as usize;
        let (cw, ch) = resolution.chroma();
        let (cw, ch) = (cw as usize, ch as usize);
        let y_size = resolution.pixels() as usize;

        let mut data = vec![128u8; PixelFormat::I420.frame_size(resolution)];
        data[..y_size].fill(BACKGROUND_Y);

        for square in state.squares.iter_mut() {
            square.advance(resolution);
            let x0 = square.x as usize;
            let y0 = square.y as usize;
            let x1 = (x0 + square.size as usize).min(width);
            let y1 = (y0 + square.size as usize).min(resolution.height as usize);

            for row in y0..y1 {
                data[row * width + x0..row * width + x1].fill(square.luma);
            }
            for row in (y0 / 2)..y1.div_ceil(2).min(ch) {
                let start = row * cw + x0 / 2;
                let end = row * cw + x1.div_ceil(2).min(cw);
                data[y_size + start..y_size + end].fill(square.u);
                data[y_size + cw * ch + start..y_size + cw * ch + end].fill(square.v);
            }
        }

        state.sequence += 1;
        Ok(VideoFrame::new(
            Bytes::from(data),
            resolution,
            PixelFormat::I420,
            state.sequence,
            self.clock.now_us(),
        ))
    }
}
