//! Packed 3-3-2 frame buffer decoding
//!
//! One byte per pixel: bits 7-5 red, bits 4-2 green, bits 1-0 blue.

use pinbox_core::{Address, LinearMemory, MemoryError};

pub const DEFAULT_WIDTH: u32 = 240;
pub const DEFAULT_HEIGHT: u32 = 320;

pub type Rgba = [u8; 4];

/// Scale a `max`-bounded field to 0..=255, rounded to nearest.
const fn expand(raw: u8, max: u8) -> u8 {
    ((raw as u16 * 255 + max as u16 / 2) / max as u16) as u8
}

/// Decode one packed pixel. Alpha is always opaque.
pub const fn decode_pixel(byte: u8) -> Rgba {
    [
        expand((byte >> 5) & 0x7, 7),
        expand((byte >> 2) & 0x7, 7),
        expand(byte & 0x3, 3),
        255,
    ]
}

/// Reusable decode target for a fixed-size frame.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    width: u32,
    height: u32,
    packed: Vec<u8>,
    pixels: Vec<Rgba>,
}

impl FrameDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            packed: vec![0; len],
            pixels: vec![[0, 0, 0, 255]; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes one frame occupies in linear memory.
    pub fn frame_len(&self) -> usize {
        self.packed.len()
    }

    /// Last decoded frame, row-major.
    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    /// Sample the frame at `addr` and decode it in place.
    ///
    /// Nothing is buffered across calls: the result reflects memory as it
    /// reads now, torn or not. On error the previous frame is kept.
    pub fn decode(&mut self, memory: &LinearMemory, addr: Address) -> Result<&[Rgba], MemoryError> {
        memory.read(addr, &mut self.packed)?;
        for (out, byte) in self.pixels.iter_mut().zip(&self.packed) {
            *out = decode_pixel(*byte);
        }
        Ok(&self.pixels)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}
