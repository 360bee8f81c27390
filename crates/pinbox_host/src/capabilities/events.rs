//! Event listeners and timers
//!
//! Callbacks arrive as indices into the module's exported indirect
//! function table and are resolved once, at registration.

use super::OrFault;
use crate::callbacks::CallbackId;
use crate::error::HostError;
use crate::state::HostState;
use crate::surface::Handle;
use std::time::{Duration, Instant};
use wasmtime::{Caller, Extern, Func, Linker, Ref, WasmParams};

pub(crate) const TABLE_EXPORT: &str = "__indirect_function_table";

/// Resolve a table index into a callable with parameters `P` and no results.
fn resolve<P: WasmParams>(caller: &mut Caller<'_, HostState>, index: i32) -> Result<Func, HostError> {
    let index = index as u32;
    let table = match caller.get_export(TABLE_EXPORT) {
        Some(Extern::Table(table)) => table,
        _ => return Err(HostError::MissingExport(TABLE_EXPORT)),
    };
    let func = match table.get(&mut *caller, index.into()) {
        Some(Ref::Func(Some(func))) => func,
        _ => return Err(HostError::InvalidTableEntry(index)),
    };
    func.typed::<P, ()>(&*caller)
        .map_err(|_| HostError::InvalidTableEntry(index))?;
    Ok(func)
}

fn add_event_listener(caller: &mut Caller<'_, HostState>, target: i32, event: i32, f: i32) -> Result<CallbackId, HostError> {
    let target = Handle::from_raw(target as u32);
    let event = caller.data().text(event)?;
    caller.data().surface.get(target)?;
    let func = resolve::<i32>(caller, f)?;
    Ok(caller
        .data_mut()
        .callbacks
        .add_listener(target, &event, f as u32, func))
}

fn remove_event_listener(state: &mut HostState, target: i32, event: i32, f: i32) -> Result<bool, HostError> {
    let event = state.text(event)?;
    let removed = state
        .callbacks
        .remove_listener(Handle::from_raw(target as u32), &event, f as u32);
    Ok(removed.is_some())
}

fn unregister(state: &mut HostState, id: i32) -> Result<(), HostError> {
    if state.callbacks.unregister(CallbackId::from_raw(id as u32)) {
        Ok(())
    } else {
        Err(HostError::InvalidCallback(id as u32))
    }
}

const MAX_DELAY: Duration = Duration::from_secs(u32::MAX as u64);

/// Negative and NaN delays fire on the next wake.
fn delay(ms: f32) -> Duration {
    Duration::try_from_secs_f32((ms / 1000.0).max(0.0)).map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
}

pub(super) fn install(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "env",
        "add_event_listener",
        |mut caller: Caller<'_, HostState>, target: i32, event: i32, f: i32| -> i32 {
            add_event_listener(&mut caller, target, event, f)
                .map(|id| id.raw() as i32)
                .or_fault("add_event_listener", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "remove_event_listener",
        |mut caller: Caller<'_, HostState>, target: i32, event: i32, f: i32| -> i32 {
            remove_event_listener(caller.data_mut(), target, event, f)
                .map(i32::from)
                .or_fault("remove_event_listener", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "request_animation_frame",
        |mut caller: Caller<'_, HostState>, f: i32| -> i32 {
            resolve::<f64>(&mut caller, f)
                .map(|func| caller.data_mut().callbacks.request_frame(f as u32, func).raw() as i32)
                .or_fault("request_animation_frame", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "cancel_animation_frame",
        |mut caller: Caller<'_, HostState>, id: i32| {
            unregister(caller.data_mut(), id).or_fault("cancel_animation_frame", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "set_timeout",
        |mut caller: Caller<'_, HostState>, f: i32, ms: f32| -> i32 {
            resolve::<()>(&mut caller, f)
                .map(|func| {
                    caller
                        .data_mut()
                        .callbacks
                        .set_timeout(f as u32, func, delay(ms), Instant::now())
                        .raw() as i32
                })
                .or_fault("set_timeout", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "clear_timeout",
        |mut caller: Caller<'_, HostState>, id: i32| {
            unregister(caller.data_mut(), id).or_fault("clear_timeout", ());
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_clamps() {
        assert_eq!(delay(-5.0), Duration::ZERO);
        assert_eq!(delay(f32::NAN), Duration::ZERO);
        assert_eq!(delay(f32::INFINITY), MAX_DELAY);
        assert_eq!(delay(250.0), Duration::from_millis(250));
    }
}
