//! Window management
//!
//! Player window sizing via winit

use winit::{
    dpi::LogicalSize,
    error::EventLoopError,
    event_loop::EventLoop,
    window::{Window, WindowAttributes},
};

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    /// Canvas size in logical pixels.
    pub width: u32,
    pub height: u32,
    /// Integer zoom applied to the canvas.
    pub scale: u32,
}

impl WindowConfig {
    pub fn inner_size(&self) -> LogicalSize<u32> {
        let scale = self.scale.max(1);
        LogicalSize::new(self.width * scale, self.height * scale)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Pinbox".to_string(),
            width: crate::framebuffer::DEFAULT_WIDTH,
            height: crate::framebuffer::DEFAULT_HEIGHT,
            scale: 2,
        }
    }
}

/// Create window attributes from config
pub fn window_attributes(config: &WindowConfig) -> WindowAttributes {
    Window::default_attributes()
        .with_title(config.title.clone())
        .with_inner_size(config.inner_size())
        .with_min_inner_size(LogicalSize::new(config.width, config.height))
}

/// Windows are created later, from `ApplicationHandler::resumed`.
pub fn create_event_loop() -> Result<EventLoop<()>, EventLoopError> {
    EventLoop::new()
}
