//! Host capability table
//!
//! Everything the module may import from `env`. Capabilities run
//! synchronously on the worker thread inside the guest call that invoked
//! them. A bad handle or address never traps the guest: the fault is
//! logged and the capability returns a neutral default.

mod canvas;
mod console;
mod dom;
mod events;
mod libc;

pub use console::message_event;
pub use libc::atof;
pub(crate) use events::TABLE_EXPORT;

use crate::error::HostError;
use crate::state::HostState;
use pinbox_core::{Address, LinearMemory};
use wasmtime::Linker;

/// Register every capability under the `env` namespace.
pub fn install(linker: &mut Linker<HostState>) -> Result<(), HostError> {
    libc::install(linker)
        .and_then(|_| dom::install(linker))
        .and_then(|_| canvas::install(linker))
        .and_then(|_| events::install(linker))
        .and_then(|_| console::install(linker))
        .map_err(|e| HostError::Engine(format!("{e:#}")))
}

/// Stamp a raw guest pointer against the instance's memory.
pub(crate) fn ptr(mem: &LinearMemory, raw: i32) -> Address {
    mem.address(raw as u32)
}

pub(crate) trait OrFault<T> {
    /// Log a capability fault and fall back to `default`.
    fn or_fault(self, capability: &'static str, default: T) -> T;
}

impl<T, E: Into<HostError>> OrFault<T> for Result<T, E> {
    fn or_fault(self, capability: &'static str, default: T) -> T {
        self.unwrap_or_else(|e| {
            let error = e.into();
            tracing::warn!(target: "capability", capability, error = %error, "capability fault");
            default
        })
    }
}
