//! Pinbox Core
//!
//! Contains the pieces both threads of a session agree on:
//! - Linear memory view with generation-stamped addresses
//! - String marshaling against that memory
//! - The cooperative cancellation flag
//! - The lifecycle message catalogue
//! - Display tick timing

pub mod bridge;
pub mod cancel;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod time;

pub use cancel::{CancellationFlag, RunGuard};
pub use error::MemoryError;
pub use memory::{Address, Generation, LinearMemory};
pub use protocol::{Button, Event, Request, RunOutcome, StateAddresses};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
