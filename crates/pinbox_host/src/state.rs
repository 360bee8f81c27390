use crate::callbacks::CallbackRegistry;
use crate::outbox::Outbox;
use crate::surface::Surface;
use pinbox_core::{bridge, Event, LinearMemory, MemoryError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use wasmtime::Func;

/// Per-instance host data, owned by the engine store.
pub struct HostState {
    pub(crate) memory: LinearMemory,
    pub(crate) surface: Surface,
    pub(crate) callbacks: CallbackRegistry<Func>,
    pub(crate) outbox: Outbox,
    pub(crate) started: Instant,
}

impl HostState {
    pub fn new(memory: LinearMemory, events: UnboundedSender<Event>, frame_interval: Duration) -> Self {
        let started = Instant::now();
        Self {
            memory,
            surface: Surface::new(),
            callbacks: CallbackRegistry::new(frame_interval, started),
            outbox: Outbox::held(events),
            started,
        }
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Decode the guest string at a raw pointer.
    pub(crate) fn text(&self, raw: i32) -> Result<String, MemoryError> {
        bridge::decode(&self.memory, self.memory.address(raw as u32))
    }

    /// Open the scratch scope for one call into the module.
    pub(crate) fn enter(&mut self) {
        self.surface.begin_scope();
    }

    /// Close the scratch scope. Listener targets stay alive.
    pub(crate) fn leave(&mut self) -> usize {
        self.surface.end_scope(self.callbacks.listener_targets())
    }

    /// Milliseconds since the instance was created, as animation frames see it.
    pub fn timestamp_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}
