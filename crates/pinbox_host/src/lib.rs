//! Pinbox Host
//!
//! Runs a guest module on a dedicated worker thread and gives it a small,
//! DOM-flavoured capability table:
//! - Execution context with the init/run/export lifecycle
//! - Handle surface standing in for script objects and elements
//! - Listener, animation-frame and timeout callbacks
//! - Controller-side session with cooperative cancellation

pub mod callbacks;
pub mod capabilities;
pub mod context;
pub mod error;
pub mod outbox;
pub mod session;
pub mod state;
pub mod surface;
pub mod watchdog;
pub mod worker;

#[cfg(test)]
mod testing;

pub use callbacks::{CallbackId, CallbackRegistry};
pub use context::{ContextConfig, ExecutionContext, Phase};
pub use error::HostError;
pub use session::{Notice, Session};
pub use surface::{DrawCommand, Handle, Surface, SurfaceError, Value};
pub use worker::Worker;
