//! Lifecycle message catalogue
//!
//! Typed messages exchanged between the controller thread and the execution
//! worker. Shared memory travels by reference inside [`Event::PostInit`];
//! the controller must not touch guest memory before it has seen one.

use crate::memory::{Address, LinearMemory};
use std::collections::BTreeMap;

/// Logical buttons the guest polls as single-byte flags.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    Left,
    Right,
    Up,
    Down,
    A,
    B,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::Left,
        Button::Right,
        Button::Up,
        Button::Down,
        Button::A,
        Button::B,
    ];

    /// Property name carrying this button's flag address in a `state` message.
    pub fn state_field(self) -> &'static str {
        match self {
            Button::Left => "leftKeyPtr",
            Button::Right => "rightKeyPtr",
            Button::Up => "upKeyPtr",
            Button::Down => "downKeyPtr",
            Button::A => "aKeyPtr",
            Button::B => "bKeyPtr",
        }
    }
}

/// Well-known addresses published by the guest in a `state` message.
///
/// Every field is optional; a guest without a display or input simply
/// leaves them out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateAddresses {
    pub frame_buffer: Option<Address>,
    pub inputs: BTreeMap<Button, Address>,
    /// Little-endian `f32` seconds the guest's program has been running.
    pub time_since_start: Option<Address>,
}

impl StateAddresses {
    pub fn input(&self, button: Button) -> Option<Address> {
        self.inputs.get(&button).copied()
    }
}

/// Controller → context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Instantiate the compiled module. Accepted once per session.
    Init { module: Vec<u8> },
    /// Compile and run program source (`run` / `compileAndRun`).
    Run { source: String },
    /// Compile program source and publish the resulting blob via `output`.
    CompileAndExport { source: String },
    /// Run a pre-compiled blob.
    RunFromBlob { buffer: Vec<u8> },
    /// Deliver a UI event to listeners registered on a host-surface handle.
    DispatchEvent { target: u32, event: String },
    Shutdown,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::Run { .. } => "run",
            Request::CompileAndExport { .. } => "compileAndExport",
            Request::RunFromBlob { .. } => "runFromBlob",
            Request::DispatchEvent { .. } => "dispatchEvent",
            Request::Shutdown => "shutdown",
        }
    }

    /// Requests that claim the cancellation flag.
    pub fn is_run(&self) -> bool {
        matches!(self, Request::Run { .. } | Request::RunFromBlob { .. })
    }
}

/// How a run-type request ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The entry point returned normally.
    Completed,
    /// The guest trapped or the watchdog interrupted it.
    Faulted,
    /// The context was busy or unavailable; nothing was invoked.
    Dropped,
}

/// Context → controller.
#[derive(Debug, Clone)]
pub enum Event {
    PostInit {
        memory: LinearMemory,
        cancellation_flag: Address,
    },
    State(StateAddresses),
    Output {
        buffer: Address,
        size: u32,
    },
    Print {
        text: String,
    },
    Error {
        details: String,
    },
    Alert {
        text: String,
    },
    /// Sent after every executed run or export; never for a dropped request.
    Finished {
        outcome: RunOutcome,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::PostInit { .. } => "postInit",
            Event::State(_) => "state",
            Event::Output { .. } => "output",
            Event::Print { .. } => "print",
            Event::Error { .. } => "error",
            Event::Alert { .. } => "alert",
            Event::Finished { .. } => "finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_fields_are_distinct() {
        let mut fields: Vec<_> = Button::ALL.iter().map(|b| b.state_field()).collect();
        fields.sort_unstable();
        fields.dedup();
        assert_eq!(fields.len(), Button::ALL.len());
    }

    #[test]
    fn test_only_runs_claim_the_flag() {
        assert!(Request::Run { source: "x".into() }.is_run());
        assert!(Request::RunFromBlob { buffer: vec![] }.is_run());
        assert!(!Request::CompileAndExport { source: "x".into() }.is_run());
        assert!(!Request::Init { module: vec![] }.is_run());
    }
}
