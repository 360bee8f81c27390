//! Player surface geometry
//!
//! The frame sits at the top of the canvas. With the gamepad enabled the
//! canvas grows by one control radius on each side and by the pad height
//! below, so every control circle fits.

use pinbox_core::Button;
use pinbox_render::Overlay;
use pinbox_services::input::{gamepad_height, gamepad_layout};
use pinbox_services::{Settings, TouchControl};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_left: u32,
    pub radius: f32,
    pub controls: Vec<TouchControl>,
}

impl Layout {
    pub fn from_settings(settings: &Settings) -> Self {
        let frame_width = settings.display.frame_width;
        let frame_height = settings.display.frame_height;
        let radius = settings.input.touch_radius;

        if !settings.input.gamepad {
            return Self {
                canvas_width: frame_width,
                canvas_height: frame_height,
                frame_width,
                frame_height,
                frame_left: 0,
                radius,
                controls: Vec::new(),
            };
        }

        let margin = radius.ceil() as u32;
        let controls = gamepad_layout(margin as f32, frame_height as f32, frame_width as f32, radius);
        Self {
            canvas_width: frame_width + margin * 2,
            canvas_height: frame_height + gamepad_height(radius).ceil() as u32,
            frame_width,
            frame_height,
            frame_left: margin,
            radius,
            controls,
        }
    }

    /// Controls as drawn, highlighting the pressed buttons.
    pub fn overlays(&self, pressed: &BTreeSet<Button>) -> Vec<Overlay> {
        self.controls
            .iter()
            .map(|c| Overlay {
                x: c.x,
                y: c.y,
                radius: self.radius,
                pressed: pressed.contains(&c.button),
            })
            .collect()
    }
}
