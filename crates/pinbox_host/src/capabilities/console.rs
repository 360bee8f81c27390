//! Logging, alerts and posted messages

use super::OrFault;
use crate::error::HostError;
use crate::state::HostState;
use crate::surface::{Entry, Handle, Props, Surface, Value};
use pinbox_core::{Address, Button, Event, LinearMemory, StateAddresses};
use wasmtime::{Caller, Linker};

fn text_prop(surface: &Surface, h: Handle, name: &str) -> Result<String, HostError> {
    Ok(surface.property(h, name)?.to_display_string())
}

fn address_prop(
    surface: &Surface,
    memory: &LinearMemory,
    h: Handle,
    name: &str,
) -> Result<Option<Address>, HostError> {
    Ok(surface
        .property(h, name)?
        .as_number()
        .map(|n| memory.address(n as u32)))
}

/// Translate a message object posted by the module into a typed event.
///
/// The object's `type` property picks the message; the remaining properties
/// use the same names the controller protocol does.
pub fn message_event(surface: &Surface, memory: &LinearMemory, h: Handle) -> Result<Event, HostError> {
    let kind = text_prop(surface, h, "type")?;
    let event = match kind.as_str() {
        "print" => Event::Print {
            text: text_prop(surface, h, "text")?,
        },
        "error" => Event::Error {
            details: text_prop(surface, h, "details")?,
        },
        "alert" => Event::Alert {
            text: text_prop(surface, h, "text")?,
        },
        "output" => {
            let buffer = address_prop(surface, memory, h, "buffer")?
                .ok_or(HostError::MalformedMessage("output without buffer"))?;
            let size = surface.property(h, "size")?.as_number().unwrap_or(0.0) as u32;
            Event::Output { buffer, size }
        }
        "state" => {
            let mut state = StateAddresses {
                frame_buffer: address_prop(surface, memory, h, "frameBuffer")?,
                time_since_start: address_prop(surface, memory, h, "timeSinceStartPtr")?,
                ..Default::default()
            };
            for button in Button::ALL {
                if let Some(addr) = address_prop(surface, memory, h, button.state_field())? {
                    state.inputs.insert(button, addr);
                }
            }
            Event::State(state)
        }
        _ => return Err(HostError::UnsupportedMessage(kind)),
    };
    Ok(event)
}

/// One-line rendering of a handle for the log.
fn describe(surface: &Surface, h: Handle) -> String {
    let props = |props: &Props| {
        props
            .iter()
            .map(|(k, v)| match v {
                Value::Str(s) => format!("{k}: {s:?}"),
                other => format!("{k}: {}", other.to_display_string()),
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    if h.is_null() {
        return "null".to_string();
    }
    match surface.get(h) {
        Ok(Entry::Value(v)) => v.to_display_string(),
        Ok(Entry::Object(p)) => format!("{{{}}}", props(p)),
        Ok(Entry::Element(e)) => format!("<{}> {{{}}}", e.tag, props(&e.props)),
        Ok(Entry::Context(c)) => format!("<{} context> {{{}}}", c.kind, props(&c.props)),
        Err(e) => format!("<{e}>"),
    }
}

fn post_message(state: &mut HostState, h: i32) -> Result<(), HostError> {
    let event = message_event(&state.surface, &state.memory, Handle::from_raw(h as u32))?;
    state.outbox.post(event);
    Ok(())
}

pub(super) fn install(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap("env", "console_log", |caller: Caller<'_, HostState>, s: i32| {
        if let Some(text) = caller.data().text(s).map(Some).or_fault("console_log", None) {
            tracing::info!(target: "guest", "{text}");
        }
    })?;

    linker.func_wrap("env", "console_error", |caller: Caller<'_, HostState>, s: i32| {
        if let Some(text) = caller.data().text(s).map(Some).or_fault("console_error", None) {
            tracing::error!(target: "guest", "{text}");
        }
    })?;

    linker.func_wrap("env", "console_log_obj", |caller: Caller<'_, HostState>, h: i32| {
        let text = describe(&caller.data().surface, Handle::from_raw(h as u32));
        tracing::info!(target: "guest", "{text}");
    })?;

    linker.func_wrap("env", "alert", |mut caller: Caller<'_, HostState>, s: i32| {
        let state = caller.data_mut();
        if let Some(text) = state.text(s).map(Some).or_fault("alert", None) {
            state.outbox.post(Event::Alert { text });
        }
    })?;

    linker.func_wrap("env", "puts", |mut caller: Caller<'_, HostState>, s: i32| -> i32 {
        let state = caller.data_mut();
        match state.text(s).map(Some).or_fault("puts", None) {
            Some(mut text) => {
                text.push('\n');
                state.outbox.post(Event::Print { text });
                0
            }
            None => -1,
        }
    })?;

    linker.func_wrap("env", "post_message", |mut caller: Caller<'_, HostState>, h: i32| {
        post_message(caller.data_mut(), h).or_fault("post_message", ());
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::state;

    #[test]
    fn test_state_message_collects_addresses() {
        let (mut st, _rx) = state();
        let msg = st.surface.object_from([
            ("type", Value::Str("state".into())),
            ("frameBuffer", Value::Number(4096.0)),
            ("aKeyPtr", Value::Number(384.0)),
            ("leftKeyPtr", Value::Number(385.0)),
            ("timeSinceStartPtr", Value::Number(400.0)),
        ]);

        let Event::State(addrs) = message_event(&st.surface, &st.memory, msg).unwrap() else {
            panic!("expected state");
        };
        assert_eq!(addrs.frame_buffer, Some(st.memory.address(4096)));
        assert_eq!(addrs.input(Button::A), Some(st.memory.address(384)));
        assert_eq!(addrs.input(Button::Left), Some(st.memory.address(385)));
        assert_eq!(addrs.input(Button::B), None);
        assert_eq!(addrs.time_since_start, Some(st.memory.address(400)));
    }

    #[test]
    fn test_state_message_without_clock() {
        let (mut st, _rx) = state();
        let msg = st.surface.object_from([
            ("type", Value::Str("state".into())),
            ("frameBuffer", Value::Number(4096.0)),
        ]);

        let Event::State(addrs) = message_event(&st.surface, &st.memory, msg).unwrap() else {
            panic!("expected state");
        };
        assert_eq!(addrs.time_since_start, None);
    }

    #[test]
    fn test_output_and_error_messages() {
        let (mut st, _rx) = state();
        let out = st.surface.object_from([
            ("type", Value::Str("output".into())),
            ("buffer", Value::Number(12288.0)),
            ("size", Value::Number(5.0)),
        ]);
        let err = st.surface.object_from([
            ("type", Value::Str("error".into())),
            ("details", Value::Str("Compilation error: line 1".into())),
        ]);

        assert!(matches!(
            message_event(&st.surface, &st.memory, out).unwrap(),
            Event::Output { size: 5, .. }
        ));
        assert!(matches!(
            message_event(&st.surface, &st.memory, err).unwrap(),
            Event::Error { details } if details == "Compilation error: line 1"
        ));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let (mut st, _rx) = state();
        let msg = st.surface.object_from([("type", Value::Str("postInit".into()))]);

        assert!(matches!(
            message_event(&st.surface, &st.memory, msg),
            Err(HostError::UnsupportedMessage(kind)) if kind == "postInit"
        ));
    }

    #[test]
    fn test_post_message_goes_through_outbox() {
        let (mut st, mut rx) = state();
        let msg = st.surface.object_from([
            ("type", Value::Str("print".into())),
            ("text", Value::Str("hello".into())),
        ]);
        while rx.try_recv().is_ok() {}

        post_message(&mut st, msg.raw() as i32).unwrap();
        assert!(matches!(rx.try_recv(), Ok(Event::Print { text }) if text == "hello"));
    }

    #[test]
    fn test_describe_object() {
        let (mut st, _rx) = state();
        let obj = st.surface.object_from([
            ("n", Value::Number(3.0)),
            ("s", Value::Str("x".into())),
        ]);

        assert_eq!(describe(&st.surface, obj), r#"{n: 3, s: "x"}"#);
        assert_eq!(describe(&st.surface, Handle::NULL), "null");
    }
}
