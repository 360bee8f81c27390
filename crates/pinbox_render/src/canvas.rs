//! CPU-side composition of the presented image
//!
//! The canvas is in logical pixels: the decoded frame at its native size
//! plus whatever controls are drawn around it. Scaling to the window happens
//! on the GPU.

use crate::framebuffer::Rgba;

pub const BACKGROUND: Rgba = [24, 24, 24, 255];
const CONTROL_IDLE: Rgba = [110, 110, 110, 255];
const CONTROL_PRESSED: Rgba = [230, 230, 230, 255];

/// A round on-screen control.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Overlay {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub pressed: bool,
}

#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![BACKGROUND; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        (x < self.width && y < self.height).then(|| self.pixels[(y * self.width + x) as usize])
    }

    /// Raw RGBA bytes for upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn clear(&mut self) {
        self.pixels.fill(BACKGROUND);
    }

    /// Copy a `width`-wide frame with its top-left corner at (`left`, `top`),
    /// clipped to the canvas.
    pub fn blit(&mut self, frame: &[Rgba], width: u32, left: u32, top: u32) {
        if width == 0 || left >= self.width {
            return;
        }
        let visible = width.min(self.width - left) as usize;
        for (row, src) in frame.chunks_exact(width as usize).enumerate() {
            let y = top as usize + row;
            if y >= self.height as usize {
                break;
            }
            let start = y * self.width as usize + left as usize;
            self.pixels[start..start + visible].copy_from_slice(&src[..visible]);
        }
    }

    /// Draw a control as a ring, filled while pressed.
    pub fn draw_overlay(&mut self, overlay: &Overlay) {
        let color = if overlay.pressed { CONTROL_PRESSED } else { CONTROL_IDLE };
        let outer = overlay.radius;
        let inner = if overlay.pressed { 0.0 } else { (outer - 2.0).max(0.0) };

        let x0 = (overlay.x - outer).floor().max(0.0) as u32;
        let y0 = (overlay.y - outer).floor().max(0.0) as u32;
        let x1 = ((overlay.x + outer).ceil().max(0.0) as u32).min(self.width);
        let y1 = ((overlay.y + outer).ceil().max(0.0) as u32).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - overlay.x;
                let dy = y as f32 + 0.5 - overlay.y;
                let d = (dx * dx + dy * dy).sqrt();
                if d <= outer && d >= inner {
                    self.pixels[(y * self.width + x) as usize] = color;
                }
            }
        }
    }
}
