//! Input routing
//!
//! Maps key and touch events onto the single-byte button flags the hosted
//! module polls. The router only decides *which* flag changes; applying the
//! change to memory is a separate step so the controller can drop input
//! until the module has published its addresses.

use pinbox_core::{Button, LinearMemory, MemoryError, StateAddresses};
use std::collections::HashMap;

/// Default touch control radius in player-surface pixels.
pub const TOUCH_RADIUS: f32 = 25.0;

/// Gap between the bottom of the frame and the top of the gamepad area.
const GAMEPAD_GAP: f32 = 30.0;

/// Platform-neutral key identifiers the router understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Character(char),
}

impl Key {
    pub fn button(self) -> Option<Button> {
        match self {
            Key::ArrowUp => Some(Button::Up),
            Key::ArrowDown => Some(Button::Down),
            Key::ArrowLeft => Some(Button::Left),
            Key::ArrowRight => Some(Button::Right),
            Key::Character('a') => Some(Button::A),
            Key::Character('b') => Some(Button::B),
            Key::Character(_) => None,
        }
    }
}

/// Circular on-screen control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchControl {
    pub button: Button,
    pub x: f32,
    pub y: f32,
}

impl TouchControl {
    fn distance(&self, x: f32, y: f32) -> f32 {
        (x - self.x).hypot(y - self.y)
    }
}

/// A flag write the controller should perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputChange {
    pub button: Button,
    pub active: bool,
}

impl InputChange {
    /// Store the flag byte. A button the module never published is ignored.
    pub fn apply(self, memory: &LinearMemory, state: &StateAddresses) -> Result<(), MemoryError> {
        match state.input(self.button) {
            Some(addr) => memory.store_u8(addr, self.active as u8),
            None => {
                tracing::trace!(button = ?self.button, "no flag published for button");
                Ok(())
            }
        }
    }
}

pub struct InputRouter {
    radius: f32,
    controls: Vec<TouchControl>,
    touches: HashMap<u64, Button>,
}

impl InputRouter {
    /// Router with keyboard input only.
    pub fn new(radius: f32) -> Self {
        Self::with_controls(radius, Vec::new())
    }

    pub fn with_controls(radius: f32, controls: Vec<TouchControl>) -> Self {
        Self {
            radius,
            controls,
            touches: HashMap::new(),
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn controls(&self) -> &[TouchControl] {
        &self.controls
    }

    pub fn key_down(&self, key: Key) -> Option<InputChange> {
        key.button().map(|button| InputChange { button, active: true })
    }

    pub fn key_up(&self, key: Key) -> Option<InputChange> {
        key.button().map(|button| InputChange {
            button,
            active: false,
        })
    }

    /// Activate the nearest control within reach of the touch point.
    ///
    /// The touch id stays bound to that control until [`touch_end`] for the
    /// same id, wherever the touch moves in between. Starting an id that is
    /// still bound releases its old control first, so the returned changes
    /// are to be applied in order.
    ///
    /// [`touch_end`]: InputRouter::touch_end
    pub fn touch_start(&mut self, id: u64, x: f32, y: f32) -> Vec<InputChange> {
        let mut changes: Vec<_> = self.touch_end(id).into_iter().collect();
        if !(x.is_finite() && y.is_finite()) {
            tracing::debug!(id, x, y, "touch at non-finite point ignored");
            return changes;
        }
        let nearest = self
            .controls
            .iter()
            .map(|c| (c.button, c.distance(x, y)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((button, distance)) = nearest {
            if distance <= self.radius {
                self.touches.insert(id, button);
                changes.push(InputChange { button, active: true });
            }
        }
        changes
    }

    /// Release whatever control `id` activated, regardless of position.
    pub fn touch_end(&mut self, id: u64) -> Option<InputChange> {
        self.touches.remove(&id).map(|button| InputChange {
            button,
            active: false,
        })
    }

    /// Number of touches currently holding a control.
    pub fn active_touches(&self) -> usize {
        self.touches.len()
    }
}

/// Six-button pad laid out below a frame.
///
/// D-pad on the left, A/B staggered on the right. `frame_left` and
/// `frame_bottom` locate the frame on the player surface.
pub fn gamepad_layout(frame_left: f32, frame_bottom: f32, frame_width: f32, radius: f32) -> Vec<TouchControl> {
    let top = frame_bottom + GAMEPAD_GAP;
    let at = |button, x: f32, y: f32| TouchControl { button, x, y };
    vec![
        at(Button::Up, frame_left + radius * 2.0, top + radius),
        at(Button::Down, frame_left + radius * 2.0, top + radius * 5.0),
        at(Button::Left, frame_left, top + radius * 3.0),
        at(Button::Right, frame_left + radius * 4.0, top + radius * 3.0),
        at(Button::A, frame_left + frame_width - radius * 2.0, top + radius * 2.0),
        at(Button::B, frame_left + frame_width, top + radius * 4.0),
    ]
}

/// Height the gamepad area adds below the frame.
pub fn gamepad_height(radius: f32) -> f32 {
    GAMEPAD_GAP + radius * 6.0
}
