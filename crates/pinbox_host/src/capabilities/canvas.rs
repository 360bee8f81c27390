//! Canvas contexts and pointer capture
//!
//! Draw calls are recorded against the context object with the style that
//! was current when they were made; nothing is rasterized here.

use super::OrFault;
use crate::error::HostError;
use crate::state::HostState;
use crate::surface::Handle;
use wasmtime::{Caller, Linker};

fn handle(raw: i32) -> Handle {
    Handle::from_raw(raw as u32)
}

fn get_context(state: &mut HostState, canvas: i32, kind: i32, options: i32) -> Result<Handle, HostError> {
    let kind = state.text(kind)?;
    Ok(state.surface.context(handle(canvas), &kind, handle(options))?)
}

fn fill_text(state: &mut HostState, ctx: i32, text: i32, x: f32, y: f32) -> Result<(), HostError> {
    let text = state.text(text)?;
    state.surface.fill_text(handle(ctx), &text, x, y)?;
    Ok(())
}

pub(super) fn install(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "env",
        "get_context",
        |mut caller: Caller<'_, HostState>, canvas: i32, kind: i32, options: i32| -> i32 {
            get_context(caller.data_mut(), canvas, kind, options)
                .map(|h| h.raw() as i32)
                .or_fault("get_context", 0)
        },
    )?;

    linker.func_wrap(
        "env",
        "fill_rect",
        |mut caller: Caller<'_, HostState>, ctx: i32, x: f32, y: f32, w: f32, h: f32| {
            caller
                .data_mut()
                .surface
                .fill_rect(handle(ctx), x, y, w, h)
                .or_fault("fill_rect", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "clear_rect",
        |mut caller: Caller<'_, HostState>, ctx: i32, x: f32, y: f32, w: f32, h: f32| {
            caller
                .data_mut()
                .surface
                .clear_rect(handle(ctx), x, y, w, h)
                .or_fault("clear_rect", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "fill_text",
        |mut caller: Caller<'_, HostState>, ctx: i32, text: i32, x: f32, y: f32| {
            fill_text(caller.data_mut(), ctx, text, x, y).or_fault("fill_text", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "set_pointer_capture",
        |mut caller: Caller<'_, HostState>, el: i32, pointer: i32| {
            caller
                .data_mut()
                .surface
                .set_pointer_capture(handle(el), pointer, true)
                .or_fault("set_pointer_capture", ());
        },
    )?;

    linker.func_wrap(
        "env",
        "release_pointer_capture",
        |mut caller: Caller<'_, HostState>, el: i32, pointer: i32| {
            caller
                .data_mut()
                .surface
                .set_pointer_capture(handle(el), pointer, false)
                .or_fault("release_pointer_capture", ());
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::DrawCommand;
    use crate::testing::state;
    use pinbox_core::bridge;

    fn put(state: &HostState, offset: u32, text: &str) -> i32 {
        let mem = &state.memory;
        bridge::encode(mem, mem.address(offset), text, None).unwrap();
        offset as i32
    }

    #[test]
    fn test_get_context_decodes_kind() {
        let (mut st, _rx) = state();
        let canvas = st.surface.create_element("canvas", None);
        let kind = put(&st, 0x10, "2d");

        let ctx = get_context(&mut st, canvas.raw() as i32, kind, 0).unwrap();
        assert_eq!(st.surface.context_2d(ctx).unwrap().kind, "2d");
        assert_eq!(get_context(&mut st, canvas.raw() as i32, kind, 0).unwrap(), ctx);

        assert!(get_context(&mut st, Handle::WINDOW.raw() as i32, kind, 0).is_err());
    }

    #[test]
    fn test_fill_text_decodes_text() {
        let (mut st, _rx) = state();
        let canvas = st.surface.create_element("canvas", None);
        let kind = put(&st, 0x10, "2d");
        let text = put(&st, 0x20, "game over");
        let ctx = get_context(&mut st, canvas.raw() as i32, kind, 0).unwrap();

        fill_text(&mut st, ctx.raw() as i32, text, 4.0, 8.0).unwrap();
        assert!(matches!(
            st.surface.context_2d(ctx).unwrap().commands.back(),
            Some(DrawCommand::FillText { text, x, .. }) if text == "game over" && *x == 4.0
        ));
    }
}
