//! Windowed player
//!
//! Everything here runs on the controller thread: input is written straight
//! into shared memory, the frame buffer is sampled on the display tick, and
//! messages from the worker are drained between window events.
//!
//! F5 stops the current run and starts the program again; Escape stops it.

use crate::layout::Layout;
use crate::Program;
use anyhow::{anyhow, Context, Result};
use pinbox_core::{time, Button};
use pinbox_host::{ContextConfig, Handle, Notice, Session};
use pinbox_render::wgpu::SurfaceError;
use pinbox_render::window::{create_event_loop, window_attributes};
use pinbox_render::{Canvas, FrameDecoder, PresentError, Presenter, RenderLoop, WindowConfig};
use pinbox_services::{InputChange, InputRouter, Key, Settings};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalPosition,
    event::{ElementState, KeyEvent, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::{Key as WinitKey, NamedKey},
    window::{Window, WindowId},
};

/// Touch id reserved for the mouse pointer.
const MOUSE_TOUCH: u64 = u64::MAX;

pub fn run(module: Vec<u8>, config: ContextConfig, program: Option<Program>, settings: Settings) -> Result<()> {
    let session = Session::start(module, config).context("starting module")?;
    let event_loop = create_event_loop()?;
    let mut player = Player::new(session, program, &settings);

    let result = event_loop.run_app(&mut player);
    player.finish()?;
    result.context("event loop failed")
}

struct Player {
    session: Option<Session>,
    program: Option<Program>,
    layout: Layout,
    window_config: WindowConfig,
    window: Option<Arc<Window>>,
    presenter: Option<Presenter>,
    render: RenderLoop,
    canvas: Canvas,
    router: InputRouter,
    pressed: BTreeSet<Button>,
    cursor: PhysicalPosition<f64>,
    fatal: Option<anyhow::Error>,
}

impl Player {
    fn new(session: Session, program: Option<Program>, settings: &Settings) -> Self {
        let layout = Layout::from_settings(settings);
        let window_config = WindowConfig {
            title: "Pinbox".to_string(),
            width: layout.canvas_width,
            height: layout.canvas_height,
            scale: settings.display.scale,
        };
        let render = RenderLoop::new(
            FrameDecoder::new(layout.frame_width, layout.frame_height),
            time::tick_interval(settings.display.refresh_hz),
            Instant::now(),
        );
        let canvas = Canvas::new(layout.canvas_width, layout.canvas_height);
        let router = InputRouter::with_controls(layout.radius, layout.controls.clone());

        Self {
            session: Some(session),
            program,
            layout,
            window_config,
            window: None,
            presenter: None,
            render,
            canvas,
            router,
            pressed: BTreeSet::new(),
            cursor: PhysicalPosition::new(0.0, 0.0),
            fatal: None,
        }
    }

    fn finish(mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
        match self.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        tracing::error!(error = %format!("{error:#}"), "player stopping");
        self.fatal = Some(error);
        event_loop.exit();
    }

    fn start_program(&mut self, restart: bool) {
        let (Some(session), Some(program)) = (self.session.as_mut(), self.program.as_ref()) else {
            return;
        };
        let result = match (program, restart) {
            (Program::Source(source), true) => session.restart(source).map(|_| true),
            (Program::Source(source), false) => session.run(source),
            (Program::Blob(blob), true) => session.restart_from_blob(blob.clone()).map(|_| true),
            (Program::Blob(blob), false) => session.run_from_blob(blob.clone()),
        };
        match result {
            Ok(true) => tracing::info!(restart, "program started"),
            Ok(false) => tracing::info!("module busy; run ignored"),
            Err(e) => tracing::error!(error = %e, "run request failed"),
        }
    }

    fn apply(&mut self, change: Option<InputChange>) {
        let (Some(change), Some(session)) = (change, self.session.as_ref()) else {
            return;
        };
        if change.active {
            self.pressed.insert(change.button);
        } else {
            self.pressed.remove(&change.button);
        }
        if let Err(e) = change.apply(session.memory(), session.state()) {
            tracing::warn!(error = %e, button = ?change.button, "input flag not written");
        }
    }

    fn keyboard(&mut self, event: KeyEvent) {
        let pressed = event.state == ElementState::Pressed;
        let key = match &event.logical_key {
            WinitKey::Named(NamedKey::F5) if pressed && !event.repeat => {
                self.start_program(true);
                return;
            }
            WinitKey::Named(NamedKey::Escape) if pressed => {
                if let Some(session) = &self.session {
                    session.request_stop();
                }
                return;
            }
            WinitKey::Named(NamedKey::ArrowUp) => Key::ArrowUp,
            WinitKey::Named(NamedKey::ArrowDown) => Key::ArrowDown,
            WinitKey::Named(NamedKey::ArrowLeft) => Key::ArrowLeft,
            WinitKey::Named(NamedKey::ArrowRight) => Key::ArrowRight,
            WinitKey::Character(text) => match text.chars().next() {
                Some(c) => Key::Character(c.to_ascii_lowercase()),
                None => return,
            },
            _ => return,
        };
        let change = if pressed {
            self.router.key_down(key)
        } else {
            self.router.key_up(key)
        };
        self.apply(change);
    }

    /// Window position to canvas coordinates.
    fn to_canvas(&self, position: PhysicalPosition<f64>) -> (f32, f32) {
        let Some(window) = &self.window else {
            return (position.x as f32, position.y as f32);
        };
        let size = window.inner_size();
        let sx = self.layout.canvas_width as f64 / size.width.max(1) as f64;
        let sy = self.layout.canvas_height as f64 / size.height.max(1) as f64;
        ((position.x * sx) as f32, (position.y * sy) as f32)
    }

    fn touch_start(&mut self, id: u64, position: PhysicalPosition<f64>) {
        let (x, y) = self.to_canvas(position);
        for change in self.router.touch_start(id, x, y) {
            self.apply(Some(change));
        }
    }

    fn touch_end(&mut self, id: u64) {
        let change = self.router.touch_end(id);
        let hit_control = change.is_some();
        self.apply(change);
        // A pointer release away from the pad is a click on the page.
        if !hit_control {
            if let Some(session) = &self.session {
                if let Err(e) = session.dispatch_event(Handle::WINDOW, "click") {
                    tracing::warn!(error = %e, "click not delivered");
                }
            }
        }
    }

    fn drain_notices(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        for notice in session.pump() {
            match notice {
                Notice::Print(text) => print!("{text}"),
                Notice::Error(details) => tracing::error!("{details}"),
                Notice::Alert(text) => {
                    tracing::warn!(alert = %text, "module alert");
                    println!("{text}");
                }
                Notice::State(state) => tracing::info!(
                    frame_buffer = ?state.frame_buffer,
                    inputs = state.inputs.len(),
                    clock = state.time_since_start.is_some(),
                    "module state published"
                ),
                Notice::Exported(bytes) => tracing::info!(bytes = bytes.len(), "export published"),
                Notice::Finished(outcome) => tracing::info!(?outcome, "run finished"),
            }
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(session) = &self.session else {
            return;
        };
        // Decodes only when a display tick is due; otherwise the last frame
        // is shown again.
        self.render.tick(Instant::now(), session.memory(), session.frame_buffer());

        self.canvas.clear();
        let decoder = self.render.decoder();
        self.canvas
            .blit(decoder.pixels(), decoder.width(), self.layout.frame_left, 0);
        for overlay in self.layout.overlays(&self.pressed) {
            self.canvas.draw_overlay(&overlay);
        }

        let result = match &self.presenter {
            Some(presenter) => presenter.present(&self.canvas),
            None => return,
        };
        match result {
            Ok(()) => {}
            Err(PresentError::Surface(SurfaceError::Lost | SurfaceError::Outdated)) => {
                if let Some(presenter) = &self.presenter {
                    presenter.reconfigure();
                }
            }
            Err(PresentError::Surface(SurfaceError::OutOfMemory)) => {
                self.fail(event_loop, anyhow!("GPU out of memory"));
            }
            Err(e) => tracing::warn!(error = %e, "frame dropped"),
        }
    }
}

impl ApplicationHandler for Player {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match event_loop.create_window(window_attributes(&self.window_config)) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, anyhow!(e).context("creating window")),
        };
        let presenter = pollster::block_on(Presenter::new(
            Arc::clone(&window),
            self.layout.canvas_width,
            self.layout.canvas_height,
        ));
        match presenter {
            Ok(presenter) => self.presenter = Some(presenter),
            Err(e) => return self.fail(event_loop, anyhow!(e).context("initializing renderer")),
        }
        self.window = Some(window);
        tracing::info!(
            width = self.layout.canvas_width,
            height = self.layout.canvas_height,
            "player window open"
        );
        self.start_program(false);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(presenter) = &mut self.presenter {
                    presenter.resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.keyboard(event),
            WindowEvent::CursorMoved { position, .. } => self.cursor = position,
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => self.touch_start(MOUSE_TOUCH, self.cursor),
                ElementState::Released => self.touch_end(MOUSE_TOUCH),
            },
            WindowEvent::Touch(touch) => match touch.phase {
                TouchPhase::Started => self.touch_start(touch.id, touch.location),
                TouchPhase::Ended | TouchPhase::Cancelled => self.touch_end(touch.id),
                TouchPhase::Moved => {}
            },
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.drain_notices();

        let next = self.render.next_deadline();
        if Instant::now() >= next {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(next));
    }
}
