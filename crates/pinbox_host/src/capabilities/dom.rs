//! Handles, properties and document mutation
//!
//! Property names are always decoded from the capability's own name
//! parameter.

use super::{ptr, OrFault};
use crate::error::HostError;
use crate::state::HostState;
use crate::surface::{Handle, Value};
use pinbox_core::bridge;
use wasmtime::{Caller, Linker};

fn handle(raw: i32) -> Handle {
    Handle::from_raw(raw as u32)
}

fn raw(h: Handle) -> i32 {
    h.raw() as i32
}

fn new_string(state: &mut HostState, s: i32) -> Result<Handle, HostError> {
    let text = state.text(s)?;
    Ok(state.surface.value(Value::Str(text)))
}

fn set_value(state: &mut HostState, h: i32, name: i32, v: i32) -> Result<i32, HostError> {
    let name = state.text(name)?;
    let value = state.surface.as_value(handle(v))?;
    state.surface.set(handle(h), &name, value)?;
    Ok(v)
}

fn get_value(state: &mut HostState, h: i32, name: i32) -> Result<Handle, HostError> {
    let name = state.text(name)?;
    let value = state.surface.property(handle(h), &name)?;
    if let Value::Ref(target) = value {
        if !state.surface.contains(target) {
            return Ok(Handle::NULL);
        }
    }
    Ok(state.surface.value(value))
}

fn set_scalar(state: &mut HostState, h: i32, name: i32, value: Value) -> Result<(), HostError> {
    let name = state.text(name)?;
    state.surface.set(handle(h), &name, value)?;
    Ok(())
}

fn get_scalar(state: &HostState, h: i32, name: i32) -> Result<Value, HostError> {
    let name = state.text(name)?;
    Ok(state.surface.property(handle(h), &name)?)
}

fn set_str(state: &mut HostState, h: i32, name: i32, s: i32) -> Result<(), HostError> {
    let text = state.text(s)?;
    set_scalar(state, h, name, Value::Str(text))
}

/// Encode a property's string form at `out`. Without a declared length the
/// terminator follows the text; with one it goes at `out + len`.
fn get_str(state: &HostState, h: i32, name: i32, out: i32, len: Option<u32>) -> Result<(), HostError> {
    let text = get_scalar(state, h, name)?.to_display_string();
    let mem = &state.memory;
    bridge::encode(mem, ptr(mem, out), &text, len)?;
    Ok(())
}

/// Copy up to `size` bytes of a byte or string value into guest memory.
fn copy_from_ref(state: &HostState, dst: i32, h: i32, size: i32) -> Result<(), HostError> {
    let value = state.surface.as_value(handle(h))?;
    let bytes: &[u8] = match &value {
        Value::Bytes(b) => b.as_slice(),
        Value::Str(s) => s.as_bytes(),
        _ => &[],
    };
    let n = bytes.len().min(size.max(0) as usize);
    let mem = &state.memory;
    mem.write(ptr(mem, dst), &bytes[..n])?;
    Ok(())
}

fn create_element(state: &mut HostState, ns: Option<i32>, tag: i32) -> Result<Handle, HostError> {
    let namespace = ns.map(|ns| state.text(ns)).transpose()?;
    let tag = state.text(tag)?;
    Ok(state.surface.create_element(&tag, namespace.as_deref()))
}

fn set_attribute(state: &mut HostState, h: i32, name: i32, value: i32) -> Result<(), HostError> {
    let name = state.text(name)?;
    let value = state.text(value)?;
    state.surface.set_attribute(handle(h), &name, &value)?;
    Ok(())
}

pub(super) fn install(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap("env", "null", || raw(Handle::NULL))?;
    linker.func_wrap("env", "get_window", || raw(Handle::WINDOW))?;
    linker.func_wrap("env", "get_document_body", || raw(Handle::BODY))?;

    linker.func_wrap("env", "obj", |mut caller: Caller<'_, HostState>| -> i32 {
        raw(caller.data_mut().surface.object())
    })?;

    linker.func_wrap("env", "string", |mut caller: Caller<'_, HostState>, s: i32| -> i32 {
        new_string(caller.data_mut(), s).map(raw).or_fault("string", 0)
    })?;

    linker.func_wrap("env", "release", |mut caller: Caller<'_, HostState>, h: i32| {
        caller.data_mut().surface.release(handle(h)).or_fault("release", ());
    })?;

    linker.func_wrap(
        "env",
        "set_value",
        |mut caller: Caller<'_, HostState>, h: i32, name: i32, v: i32| -> i32 {
            set_value(caller.data_mut(), h, name, v).or_fault("set_value", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "get_value",
        |mut caller: Caller<'_, HostState>, h: i32, name: i32| -> i32 {
            get_value(caller.data_mut(), h, name).map(raw).or_fault("get_value", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "set_number",
        |mut caller: Caller<'_, HostState>, h: i32, name: i32, v: f32| -> f32 {
            set_scalar(caller.data_mut(), h, name, Value::Number(v as f64)).or_fault("set_number", ());
            v
        },
    )?;

    // Missing or non-numeric properties read as NaN, like a script engine.
    linker.func_wrap(
        "env",
        "get_number",
        |caller: Caller<'_, HostState>, h: i32, name: i32| -> f32 {
            get_scalar(caller.data(), h, name)
                .map(|v| v.as_number().unwrap_or(f64::NAN) as f32)
                .or_fault("get_number", f32::NAN)
        },
    )?;

    linker.func_wrap(
        "env",
        "set_int",
        |mut caller: Caller<'_, HostState>, h: i32, name: i32, v: i32| {
            set_scalar(caller.data_mut(), h, name, Value::Number(v as f64)).or_fault("set_int", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "get_int",
        |caller: Caller<'_, HostState>, h: i32, name: i32| -> i64 {
            get_scalar(caller.data(), h, name)
                .map(|v| v.as_number().unwrap_or(0.0) as i64)
                .or_fault("get_int", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "set_str",
        |mut caller: Caller<'_, HostState>, h: i32, name: i32, s: i32| {
            set_str(caller.data_mut(), h, name, s).or_fault("set_str", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "get_str",
        |caller: Caller<'_, HostState>, h: i32, name: i32, out: i32| {
            get_str(caller.data(), h, name, out, None).or_fault("get_str", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "get_str_n",
        |caller: Caller<'_, HostState>, h: i32, name: i32, out: i32, len: i32| {
            get_str(caller.data(), h, name, out, Some(len as u32)).or_fault("get_str_n", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "copy_from_ref",
        |caller: Caller<'_, HostState>, dst: i32, h: i32, size: i32| {
            copy_from_ref(caller.data(), dst, h, size).or_fault("copy_from_ref", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "get_element_by_id",
        |caller: Caller<'_, HostState>, id: i32| -> i32 {
            let state = caller.data();
            state
                .text(id)
                .map(|id| state.surface.element_by_id(&id).map_or(0, raw))
                .or_fault("get_element_by_id", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "create_element",
        |mut caller: Caller<'_, HostState>, tag: i32| -> i32 {
            create_element(caller.data_mut(), None, tag).map(raw).or_fault("create_element", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "create_element_ns",
        |mut caller: Caller<'_, HostState>, ns: i32, tag: i32| -> i32 {
            create_element(caller.data_mut(), Some(ns), tag)
                .map(raw)
                .or_fault("create_element_ns", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "append_child",
        |mut caller: Caller<'_, HostState>, parent: i32, child: i32| -> i32 {
            caller
                .data_mut()
                .surface
                .append_child(handle(parent), handle(child))
                .map(raw)
                .or_fault("append_child", 0)
        },
    )?;

    linker.func_wrap("env", "remove", |mut caller: Caller<'_, HostState>, h: i32| {
        caller.data_mut().surface.detach(handle(h)).or_fault("remove", ());
    })?;

    linker.func_wrap(
        "env",
        "set_attribute",
        |mut caller: Caller<'_, HostState>, h: i32, name: i32, value: i32| {
            set_attribute(caller.data_mut(), h, name, value).or_fault("set_attribute", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "get_computed_style",
        |mut caller: Caller<'_, HostState>, h: i32| -> i32 {
            caller
                .data_mut()
                .surface
                .computed_style(handle(h))
                .map(raw)
                .or_fault("get_computed_style", 0)
        },
    )?;

    linker.func_wrap("env", "prevent_default", |mut caller: Caller<'_, HostState>, e: i32| {
        caller
            .data_mut()
            .surface
            .set(handle(e), "defaultPrevented", Value::Number(1.0))
            .or_fault("prevent_default", ());
    })?;

    Ok(())
}
