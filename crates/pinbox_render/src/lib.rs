//! Pinbox Render
//!
//! Turns the module's packed frame buffer into pixels on screen

pub mod canvas;
pub mod framebuffer;
pub mod presenter;
pub mod render_loop;
pub mod stats;
pub mod window;

pub use wgpu;
pub use winit;

pub use canvas::{Canvas, Overlay};
pub use framebuffer::{decode_pixel, FrameDecoder, Rgba};
pub use presenter::{PresentError, Presenter};
pub use render_loop::RenderLoop;
pub use stats::FrameStats;
pub use window::WindowConfig;
