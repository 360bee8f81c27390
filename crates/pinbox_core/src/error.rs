use crate::memory::Generation;
use thiserror::Error;

/// Errors raised by reads and writes against a [`LinearMemory`](crate::LinearMemory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("access of {len} bytes at {offset:#x} exceeds linear memory of {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("address from generation {found} used against memory generation {expected}")]
    StaleAddress {
        expected: Generation,
        found: Generation,
    },

    /// A string scan ran off the end of memory without finding a terminator.
    #[error("string at {offset:#x} is not terminated before the end of memory ({size} bytes)")]
    Unterminated { offset: u64, size: u64 },

    #[error("shared memory could not be allocated: {0}")]
    Allocation(String),
}
