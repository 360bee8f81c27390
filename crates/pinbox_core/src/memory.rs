//! Linear memory view
//!
//! The hosted module's flat byte buffer, shared by reference between the
//! controller and the worker thread. Every access goes through byte-wide
//! atomics: the guest mutates the same bytes concurrently, so the host never
//! forms a plain `&[u8]` over them.
//!
//! Addresses are generation-stamped like entity handles. A memory is
//! replaced wholesale when a module is instantiated, and an address minted
//! against one generation is rejected by every other.

use crate::error::MemoryError;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use wasmtime::{Engine, MemoryType, SharedMemory};

/// Instantiation counter stamped into memories and their addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u32);

impl Generation {
    pub const FIRST: Generation = Generation(1);

    pub fn next(self) -> Generation {
        Generation(self.0.wrapping_add(1))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A byte offset into one particular generation of linear memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    offset: u32,
    generation: Generation,
}

impl Address {
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Address `delta` bytes further on. Saturates; the bounds check on use
    /// rejects anything past the end.
    pub fn add(self, delta: u32) -> Address {
        Address {
            offset: self.offset.saturating_add(delta),
            generation: self.generation,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}@{}", self.offset, self.generation)
    }
}

/// Shared view of one module instance's linear memory.
///
/// Cloning is cheap and yields another view of the same bytes.
#[derive(Clone)]
pub struct LinearMemory {
    shared: SharedMemory,
    generation: Generation,
}

impl LinearMemory {
    /// Allocate a shared memory matching `ty` for the given generation.
    pub fn allocate(
        engine: &Engine,
        ty: MemoryType,
        generation: Generation,
    ) -> Result<Self, MemoryError> {
        let shared = SharedMemory::new(engine, ty)
            .map_err(|e| MemoryError::Allocation(format!("{e:#}")))?;
        tracing::debug!(generation = %generation, bytes = shared.data_size(), "linear memory allocated");
        Ok(Self { shared, generation })
    }

    /// The underlying engine object, for linking into an instance.
    pub fn shared(&self) -> &SharedMemory {
        &self.shared
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Current size in bytes. Grows if the guest executes `memory.grow`.
    pub fn size(&self) -> usize {
        self.shared.data_size()
    }

    /// Stamp a raw guest pointer with this memory's generation.
    pub fn address(&self, offset: u32) -> Address {
        Address {
            offset,
            generation: self.generation,
        }
    }

    pub fn load_u8(&self, addr: Address) -> Result<u8, MemoryError> {
        let cell = self.cells(addr, 1)?;
        Ok(atomic(&cell[0]).load(Ordering::SeqCst))
    }

    pub fn store_u8(&self, addr: Address, value: u8) -> Result<(), MemoryError> {
        let cell = self.cells(addr, 1)?;
        atomic(&cell[0]).store(value, Ordering::SeqCst);
        Ok(())
    }

    /// Copy `out.len()` bytes starting at `addr` into `out`.
    pub fn read(&self, addr: Address, out: &mut [u8]) -> Result<(), MemoryError> {
        let cells = self.cells(addr, out.len())?;
        for (dst, cell) in out.iter_mut().zip(cells) {
            *dst = atomic(cell).load(Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn read_vec(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut out = vec![0; len];
        self.read(addr, &mut out)?;
        Ok(out)
    }

    pub fn write(&self, addr: Address, bytes: &[u8]) -> Result<(), MemoryError> {
        let cells = self.cells(addr, bytes.len())?;
        for (cell, byte) in cells.iter().zip(bytes) {
            atomic(cell).store(*byte, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn fill(&self, addr: Address, value: u8, len: usize) -> Result<(), MemoryError> {
        for cell in self.cells(addr, len)? {
            atomic(cell).store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn copy(&self, dst: Address, src: Address, len: usize) -> Result<(), MemoryError> {
        let from = self.cells(src, len)?;
        let to = self.cells(dst, len)?;
        let step = |i: usize| {
            let byte = atomic(&from[i]).load(Ordering::Relaxed);
            atomic(&to[i]).store(byte, Ordering::Relaxed);
        };
        if dst.offset <= src.offset {
            (0..len).for_each(&step);
        } else {
            (0..len).rev().for_each(&step);
        }
        Ok(())
    }

    /// Number of bytes before the first zero byte at or after `addr`.
    pub fn scan_terminator(&self, addr: Address) -> Result<usize, MemoryError> {
        let start = self.range(addr, 0)?.start;
        self.shared.data()[start..]
            .iter()
            .position(|cell| atomic(cell).load(Ordering::Relaxed) == 0)
            .ok_or(MemoryError::Unterminated {
                offset: addr.offset as u64,
                size: self.size() as u64,
            })
    }

    fn cells(&self, addr: Address, len: usize) -> Result<&[UnsafeCell<u8>], MemoryError> {
        let range = self.range(addr, len)?;
        Ok(&self.shared.data()[range])
    }

    fn range(&self, addr: Address, len: usize) -> Result<Range<usize>, MemoryError> {
        if addr.generation != self.generation {
            return Err(MemoryError::StaleAddress {
                expected: self.generation,
                found: addr.generation,
            });
        }
        let size = self.size();
        let start = addr.offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds {
                offset: addr.offset as u64,
                len: len as u64,
                size: size as u64,
            }),
        }
    }
}

impl fmt::Debug for LinearMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinearMemory")
            .field("generation", &self.generation)
            .field("size", &self.size())
            .finish()
    }
}

fn atomic(cell: &UnsafeCell<u8>) -> &AtomicU8 {
    // SAFETY: the cell lives as long as the borrowed shared memory, u8 has no
    // alignment requirement, and host-side access to shared memory only ever
    // happens through these atomics.
    unsafe { AtomicU8::from_ptr(cell.get()) }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wasmtime::Config;

    /// One-page shared memory on a threads-enabled engine.
    pub(crate) fn memory() -> LinearMemory {
        let mut config = Config::new();
        config.wasm_threads(true);
        let engine = Engine::new(&config).unwrap();
        LinearMemory::allocate(&engine, MemoryType::shared(1, 1), Generation::FIRST).unwrap()
    }

    #[test]
    fn test_store_and_load_byte() {
        let mem = memory();
        let addr = mem.address(0x40);

        mem.store_u8(addr, 7).unwrap();
        assert_eq!(mem.load_u8(addr).unwrap(), 7);
        assert_eq!(mem.size(), 65536);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mem = memory();
        let last = mem.address(65535);

        assert!(mem.store_u8(last, 1).is_ok());
        assert!(matches!(
            mem.write(last, &[1, 2]),
            Err(MemoryError::OutOfBounds { offset: 65535, len: 2, .. })
        ));
        assert!(mem.load_u8(mem.address(u32::MAX)).is_err());
    }

    #[test]
    fn test_stale_generation_rejected() {
        let mem = memory();
        let stale = Address {
            offset: 0,
            generation: Generation::FIRST.next(),
        };

        assert!(matches!(
            mem.load_u8(stale),
            Err(MemoryError::StaleAddress { .. })
        ));
    }

    #[test]
    fn test_overlapping_copy() {
        let mem = memory();
        mem.write(mem.address(0), b"abcdef").unwrap();

        mem.copy(mem.address(2), mem.address(0), 4).unwrap();
        assert_eq!(mem.read_vec(mem.address(0), 6).unwrap(), b"ababcd");

        mem.copy(mem.address(0), mem.address(2), 4).unwrap();
        assert_eq!(mem.read_vec(mem.address(0), 6).unwrap(), b"abcdcd");
    }

    #[test]
    fn test_clones_share_bytes() {
        let mem = memory();
        let other = mem.clone();

        other.store_u8(mem.address(9), 0xAA).unwrap();
        assert_eq!(mem.load_u8(mem.address(9)).unwrap(), 0xAA);
    }
}
