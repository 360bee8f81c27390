//! libc-compatible numeric and string primitives
//!
//! Comparisons report an ordering (-1, 0, 1), never a raw byte difference,
//! and compare bytes unsigned.

use super::{ptr, OrFault};
use crate::state::HostState;
use pinbox_core::{bridge, Address, LinearMemory, MemoryError};
use std::cmp::Ordering;
use wasmtime::{Caller, Linker};

fn ordering(o: Ordering) -> i32 {
    match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn c_bytes(mem: &LinearMemory, s: Address) -> Result<Vec<u8>, MemoryError> {
    let len = mem.scan_terminator(s)?;
    mem.read_vec(s, len)
}

pub fn strlen(mem: &LinearMemory, s: Address) -> Result<u32, MemoryError> {
    Ok(mem.scan_terminator(s)? as u32)
}

pub fn strcmp(mem: &LinearMemory, a: Address, b: Address) -> Result<i32, MemoryError> {
    Ok(ordering(c_bytes(mem, a)?.cmp(&c_bytes(mem, b)?)))
}

pub fn strncmp(mem: &LinearMemory, a: Address, b: Address, n: u32) -> Result<i32, MemoryError> {
    let n = n as usize;
    let (a, b) = (c_bytes(mem, a)?, c_bytes(mem, b)?);
    Ok(ordering(a[..a.len().min(n)].cmp(&b[..b.len().min(n)])))
}

pub fn memcmp(mem: &LinearMemory, a: Address, b: Address, n: u32) -> Result<i32, MemoryError> {
    let n = n as usize;
    Ok(ordering(mem.read_vec(a, n)?.cmp(&mem.read_vec(b, n)?)))
}

pub fn strcpy(mem: &LinearMemory, dst: Address, src: Address) -> Result<(), MemoryError> {
    let len = mem.scan_terminator(src)?;
    mem.copy(dst, src, len + 1)
}

/// Address of the first `c` in the string. Searching for zero finds the
/// terminator.
pub fn strchr(mem: &LinearMemory, s: Address, c: u8) -> Result<Option<Address>, MemoryError> {
    let bytes = c_bytes(mem, s)?;
    if c == 0 {
        return Ok(Some(s.add(bytes.len() as u32)));
    }
    Ok(bytes.iter().position(|b| *b == c).map(|i| s.add(i as u32)))
}

pub fn strstr(mem: &LinearMemory, haystack: Address, needle: Address) -> Result<Option<Address>, MemoryError> {
    let (h, n) = (c_bytes(mem, haystack)?, c_bytes(mem, needle)?);
    if n.is_empty() {
        return Ok(Some(haystack));
    }
    Ok(h
        .windows(n.len())
        .position(|w| w == n.as_slice())
        .map(|i| haystack.add(i as u32)))
}

/// ASCII lowercase copy of `src` into `dst`. Byte length is preserved.
pub fn to_lower(mem: &LinearMemory, dst: Address, src: Address) -> Result<(), MemoryError> {
    let text = bridge::decode(mem, src)?;
    bridge::encode(mem, dst, &text.to_ascii_lowercase(), None)?;
    Ok(())
}

/// C `atof`: parse the longest numeric prefix after leading whitespace,
/// zero when there is none.
pub fn atof(text: &str) -> f64 {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    (1..=end)
        .rev()
        .find_map(|len| text[..len].parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn null_or(addr: Option<Address>) -> i32 {
    addr.map_or(0, |a| a.offset() as i32)
}

pub(super) fn install(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap("env", "atof", |caller: Caller<'_, HostState>, s: i32| -> f64 {
        let mem = &caller.data().memory;
        bridge::decode(mem, ptr(mem, s)).map(|t| atof(&t)).or_fault("atof", 0.0)
    })?;

    linker.func_wrap("env", "sinf", |x: f32| x.sin())?;
    linker.func_wrap("env", "cosf", |x: f32| x.cos())?;
    linker.func_wrap("env", "tanf", |x: f32| x.tan())?;
    linker.func_wrap("env", "atan2f", |y: f32, x: f32| y.atan2(x))?;
    linker.func_wrap("env", "expf", |x: f32| x.exp())?;
    linker.func_wrap("env", "logf", |x: f32| x.ln())?;
    linker.func_wrap("env", "powf", |x: f32, y: f32| x.powf(y))?;
    linker.func_wrap("env", "sqrtf", |x: f32| x.sqrt())?;
    linker.func_wrap("env", "fmodf", |x: f32, y: f32| x % y)?;
    linker.func_wrap("env", "floorf", |x: f32| x.floor())?;
    linker.func_wrap("env", "ceilf", |x: f32| x.ceil())?;

    linker.func_wrap("env", "strlen", |caller: Caller<'_, HostState>, s: i32| -> i32 {
        let mem = &caller.data().memory;
        strlen(mem, ptr(mem, s)).map(|n| n as i32).or_fault("strlen", 0)
    })?;

    linker.func_wrap(
        "env",
        "strcmp",
        |caller: Caller<'_, HostState>, a: i32, b: i32| -> i32 {
            let mem = &caller.data().memory;
            strcmp(mem, ptr(mem, a), ptr(mem, b)).or_fault("strcmp", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "strncmp",
        |caller: Caller<'_, HostState>, a: i32, b: i32, n: i32| -> i32 {
            let mem = &caller.data().memory;
            strncmp(mem, ptr(mem, a), ptr(mem, b), n as u32).or_fault("strncmp", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "memcmp",
        |caller: Caller<'_, HostState>, a: i32, b: i32, n: i32| -> i32 {
            let mem = &caller.data().memory;
            memcmp(mem, ptr(mem, a), ptr(mem, b), n as u32).or_fault("memcmp", 0)
        },
    )?;

    // memcpy shares memmove's overlap handling.
    for name in ["memcpy", "memmove"] {
        linker.func_wrap(
            "env",
            name,
            move |caller: Caller<'_, HostState>, dst: i32, src: i32, n: i32| -> i32 {
                let mem = &caller.data().memory;
                mem.copy(ptr(mem, dst), ptr(mem, src), n as u32 as usize)
                    .or_fault(name, ());
                dst
            },
        )?;
    }

    linker.func_wrap(
        "env",
        "memset",
        |caller: Caller<'_, HostState>, dst: i32, c: i32, n: i32| -> i32 {
            let mem = &caller.data().memory;
            mem.fill(ptr(mem, dst), c as u8, n as u32 as usize)
                .or_fault("memset", ());
            dst
        },
    )?;

    linker.func_wrap(
        "env",
        "strcpy",
        |caller: Caller<'_, HostState>, dst: i32, src: i32| -> i32 {
            let mem = &caller.data().memory;
            strcpy(mem, ptr(mem, dst), ptr(mem, src)).or_fault("strcpy", ());
            dst
        },
    )?;

    linker.func_wrap(
        "env",
        "strchr",
        |caller: Caller<'_, HostState>, s: i32, c: i32| -> i32 {
            let mem = &caller.data().memory;
            strchr(mem, ptr(mem, s), c as u8).map(null_or).or_fault("strchr", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "strstr",
        |caller: Caller<'_, HostState>, h: i32, n: i32| -> i32 {
            let mem = &caller.data().memory;
            strstr(mem, ptr(mem, h), ptr(mem, n)).map(null_or).or_fault("strstr", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "to_lower",
        |caller: Caller<'_, HostState>, dst: i32, src: i32| {
            let mem = &caller.data().memory;
            to_lower(mem, ptr(mem, dst), ptr(mem, src)).or_fault("to_lower", ());
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory;

    fn with_strings(strings: &[(u32, &[u8])]) -> LinearMemory {
        let mem = memory();
        for (offset, bytes) in strings {
            mem.write(mem.address(*offset), bytes).unwrap();
        }
        mem
    }

    #[test]
    fn test_comparisons_return_ordering() {
        let mem = with_strings(&[(0, b"apple\0"), (16, b"apricot\0"), (32, b"app\0")]);
        let (apple, apricot, app) = (mem.address(0), mem.address(16), mem.address(32));

        assert_eq!(strcmp(&mem, apple, apricot).unwrap(), -1);
        assert_eq!(strcmp(&mem, apricot, apple).unwrap(), 1);
        assert_eq!(strcmp(&mem, apple, apple).unwrap(), 0);
        assert_eq!(strcmp(&mem, app, apple).unwrap(), -1);
        assert_eq!(strncmp(&mem, apple, apricot, 2).unwrap(), 0);
        assert_eq!(strncmp(&mem, app, apple, 3).unwrap(), 0);
        assert_eq!(strncmp(&mem, app, apple, 4).unwrap(), -1);
    }

    #[test]
    fn test_memcmp_is_unsigned() {
        let mem = with_strings(&[(0, &[0x80]), (8, &[0x7F])]);

        assert_eq!(memcmp(&mem, mem.address(0), mem.address(8), 1).unwrap(), 1);
        assert_eq!(memcmp(&mem, mem.address(0), mem.address(0), 1).unwrap(), 0);
    }

    #[test]
    fn test_strlen_and_strcpy() {
        let mem = with_strings(&[(0, b"pinbox\0")]);

        assert_eq!(strlen(&mem, mem.address(0)).unwrap(), 6);
        strcpy(&mem, mem.address(100), mem.address(0)).unwrap();
        assert_eq!(mem.read_vec(mem.address(100), 7).unwrap(), b"pinbox\0");
    }

    #[test]
    fn test_strchr_and_strstr() {
        let mem = with_strings(&[(0, b"hello world\0"), (20, b"wor\0"), (30, b"\0"), (40, b"xyz\0")]);
        let s = mem.address(0);

        assert_eq!(strchr(&mem, s, b'o').unwrap(), Some(mem.address(4)));
        assert_eq!(strchr(&mem, s, b'q').unwrap(), None);
        assert_eq!(strchr(&mem, s, 0).unwrap(), Some(mem.address(11)));
        assert_eq!(strstr(&mem, s, mem.address(20)).unwrap(), Some(mem.address(6)));
        assert_eq!(strstr(&mem, s, mem.address(30)).unwrap(), Some(s));
        assert_eq!(strstr(&mem, s, mem.address(40)).unwrap(), None);
    }

    #[test]
    fn test_to_lower() {
        let mem = with_strings(&[(0, b"MiXeD 42\0")]);

        to_lower(&mem, mem.address(64), mem.address(0)).unwrap();
        assert_eq!(bridge::decode(&mem, mem.address(64)).unwrap(), "mixed 42");
    }

    #[test]
    fn test_atof_parses_numeric_prefix() {
        assert_eq!(atof("3.5"), 3.5);
        assert_eq!(atof("  -2e3xyz"), -2000.0);
        assert_eq!(atof("12abc"), 12.0);
        assert_eq!(atof("1e"), 1.0);
        assert_eq!(atof("abc"), 0.0);
        assert_eq!(atof(""), 0.0);
    }
}
