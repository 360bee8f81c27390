//! Cooperative cancellation flag
//!
//! One byte at a module-published address. Non-zero means idle (and doubles
//! as the stop request the guest polls for), zero means a run is in flight.
//! The controller only ever stores idle; the worker stores busy when it
//! accepts a run and idle again when the entry point returns.

use crate::error::MemoryError;
use crate::memory::{Address, LinearMemory};

const IDLE: u8 = 1;
const BUSY: u8 = 0;

#[derive(Debug, Clone)]
pub struct CancellationFlag {
    memory: LinearMemory,
    address: Address,
}

impl CancellationFlag {
    /// Bind the flag at `address`, checking that it lies inside `memory`.
    pub fn new(memory: LinearMemory, address: Address) -> Result<Self, MemoryError> {
        memory.load_u8(address)?;
        Ok(Self { memory, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_idle(&self) -> bool {
        // The address was validated on construction and memory never shrinks.
        self.memory.load_u8(self.address).map_or(false, |v| v != BUSY)
    }

    /// Ask a running guest to stop at its next safe point.
    ///
    /// Has no effect when nothing is running and cannot undo work the guest
    /// already committed.
    pub fn request_stop(&self) {
        if let Err(e) = self.memory.store_u8(self.address, IDLE) {
            tracing::warn!(error = %e, "stop request could not be stored");
        }
    }

    /// Claim the context for one run.
    ///
    /// Returns `None` and leaves the flag untouched when a run is already in
    /// flight. Otherwise the flag is stored busy and stays busy until the
    /// returned guard drops, however the run ends.
    pub fn begin_run(&self) -> Option<RunGuard> {
        if !self.is_idle() {
            return None;
        }
        self.store(BUSY);
        Some(RunGuard { flag: self.clone() })
    }

    fn store(&self, value: u8) {
        if let Err(e) = self.memory.store_u8(self.address, value) {
            tracing::warn!(error = %e, "cancellation flag store failed");
        }
    }
}

/// Holds the flag busy for the lifetime of one run.
#[derive(Debug)]
pub struct RunGuard {
    flag: CancellationFlag,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(IDLE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::memory;
    use std::panic::AssertUnwindSafe;

    fn idle_flag() -> CancellationFlag {
        let mem = memory();
        let addr = mem.address(0x100);
        mem.store_u8(addr, IDLE).unwrap();
        CancellationFlag::new(mem, addr).unwrap()
    }

    #[test]
    fn test_run_brackets_busy() {
        let flag = idle_flag();
        assert!(flag.is_idle());

        let guard = flag.begin_run().expect("idle flag accepts a run");
        assert!(!flag.is_idle());

        drop(guard);
        assert!(flag.is_idle());
    }

    #[test]
    fn test_busy_flag_rejects_second_run() {
        let flag = idle_flag();
        let _guard = flag.begin_run().unwrap();

        assert!(flag.begin_run().is_none());
        assert!(!flag.is_idle());
    }

    #[test]
    fn test_stop_request_reads_as_idle() {
        let flag = idle_flag();
        let guard = flag.begin_run().unwrap();

        flag.request_stop();
        assert!(flag.is_idle());

        drop(guard);
        assert!(flag.is_idle());
    }

    #[test]
    fn test_guard_restores_idle_on_unwind() {
        let flag = idle_flag();
        let inner = flag.clone();

        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let _guard = inner.begin_run().unwrap();
            panic!("guest fault");
        }));

        assert!(result.is_err());
        assert!(flag.is_idle());
    }

    #[test]
    fn test_flag_outside_memory_rejected() {
        let mem = memory();
        let addr = mem.address(70_000);
        assert!(CancellationFlag::new(mem, addr).is_err());
    }
}
