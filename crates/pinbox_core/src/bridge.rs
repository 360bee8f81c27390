//! String marshaling between host values and guest memory
//!
//! Every capability that takes or returns a string goes through [`decode`]
//! and [`encode`]. Guest strings are zero-terminated UTF-8.

use crate::error::MemoryError;
use crate::memory::{Address, LinearMemory};

/// Read the zero-terminated string starting at `addr`.
///
/// Invalid UTF-8 is replaced rather than rejected. A scan that reaches the
/// end of memory without a terminator fails with
/// [`MemoryError::Unterminated`].
pub fn decode(memory: &LinearMemory, addr: Address) -> Result<String, MemoryError> {
    let len = memory.scan_terminator(addr)?;
    let bytes = memory.read_vec(addr, len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write `value` at `addr` followed by a terminator.
///
/// The terminator goes at `addr + declared_len` when a length is declared,
/// otherwise right after the encoded bytes. The guest is responsible for
/// sizing the destination; anything outside linear memory is refused before
/// a single byte is written. Returns the number of value bytes written.
pub fn encode(
    memory: &LinearMemory,
    addr: Address,
    value: &str,
    declared_len: Option<u32>,
) -> Result<usize, MemoryError> {
    let bytes = value.as_bytes();
    let terminator = match declared_len {
        Some(len) => addr.add(len),
        None => addr.add(value_len(memory, addr, bytes.len())?),
    };
    // Probe both ends first so a failed encode leaves memory untouched.
    memory.load_u8(terminator)?;
    memory.write(addr, bytes)?;
    memory.store_u8(terminator, 0)?;
    Ok(bytes.len())
}

/// Length of a value as a guest offset. Anything that does not fit in the
/// 32-bit address space cannot fit in linear memory either.
fn value_len(memory: &LinearMemory, addr: Address, len: usize) -> Result<u32, MemoryError> {
    u32::try_from(len).map_err(|_| MemoryError::OutOfBounds {
        offset: addr.offset() as u64,
        len: len as u64,
        size: memory.size() as u64,
    })
}
