//! Shared fixtures for unit tests

use crate::state::HostState;
use pinbox_core::{Event, Generation, LinearMemory};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use wasmtime::{Config, Engine, MemoryType};

/// One-page shared memory on a threads-enabled engine.
pub(crate) fn memory() -> LinearMemory {
    let mut config = Config::new();
    config.wasm_threads(true);
    let engine = Engine::new(&config).unwrap();
    LinearMemory::allocate(&engine, MemoryType::shared(1, 1), Generation::FIRST).unwrap()
}

/// Host state with an already-open outbox.
pub(crate) fn state() -> (HostState, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = HostState::new(memory(), tx, Duration::from_millis(16));
    state.outbox.open(Event::Print { text: String::new() });
    (state, rx)
}

/// Drain every event delivered so far.
pub(crate) fn collect(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// A guest exercising the run protocol.
///
/// `compile_and_run` switches on the first byte of the source:
/// `f` posts an error, `t` traps, `l` spins until the flag is idle,
/// `h` hangs, `r` requests a frame, `s` sets a timeout, `e` echoes the
/// source. Anything else prints `busy` or `idle` as the flag reads.
pub(crate) const GUEST: &str = r#"
(module
  (import "env" "memory" (memory 1 1 shared))
  (import "env" "obj" (func $obj (result i32)))
  (import "env" "release" (func $release (param i32)))
  (import "env" "get_window" (func $get_window (result i32)))
  (import "env" "set_str" (func $set_str (param i32 i32 i32)))
  (import "env" "get_str" (func $get_str (param i32 i32 i32)))
  (import "env" "set_int" (func $set_int (param i32 i32 i32)))
  (import "env" "get_int" (func $get_int (param i32 i32) (result i64)))
  (import "env" "get_value" (func $get_value (param i32 i32) (result i32)))
  (import "env" "copy_from_ref" (func $copy_from_ref (param i32 i32 i32)))
  (import "env" "post_message" (func $post_message (param i32)))
  (import "env" "add_event_listener" (func $add_event_listener (param i32 i32 i32) (result i32)))
  (import "env" "request_animation_frame" (func $request_animation_frame (param i32) (result i32)))
  (import "env" "set_timeout" (func $set_timeout (param i32 f32) (result i32)))

  (table (export "__indirect_function_table") 4 funcref)
  (elem (i32.const 1) $on_click $on_frame $on_timeout)

  (data (i32.const 0x200) "type\00")
  (data (i32.const 0x210) "state\00")
  (data (i32.const 0x220) "frameBuffer\00")
  (data (i32.const 0x230) "aKeyPtr\00")
  (data (i32.const 0x240) "print\00")
  (data (i32.const 0x250) "text\00")
  (data (i32.const 0x260) "busy\00")
  (data (i32.const 0x270) "idle\00")
  (data (i32.const 0x280) "error\00")
  (data (i32.const 0x290) "details\00")
  (data (i32.const 0x2a0) "bad program\00")
  (data (i32.const 0x2b0) "source\00")
  (data (i32.const 0x2c0) "length\00")
  (data (i32.const 0x2d0) "output\00")
  (data (i32.const 0x2e0) "buffer\00")
  (data (i32.const 0x2f0) "size\00")
  (data (i32.const 0x300) "click\00")
  (data (i32.const 0x310) "clicked\00")
  (data (i32.const 0x320) "frame\00")
  (data (i32.const 0x330) "timeout\00")
  (data (i32.const 0x340) "timeSinceStartPtr\00")

  (func $message (param $kind i32) (param $key i32) (param $text i32)
    (local $o i32)
    (local.set $o (call $obj))
    (call $set_str (local.get $o) (i32.const 0x200) (local.get $kind))
    (call $set_str (local.get $o) (local.get $key) (local.get $text))
    (call $post_message (local.get $o))
    (call $release (local.get $o)))

  (func $print (param $text i32)
    (call $message (i32.const 0x240) (i32.const 0x250) (local.get $text)))

  (func $on_click (param i32) (call $print (i32.const 0x310)))
  (func $on_frame (param f64) (call $print (i32.const 0x320)))
  (func $on_timeout (call $print (i32.const 0x330)))

  (func (export "init")
    (local $o i32)
    (i32.atomic.store8 (i32.const 0x100) (i32.const 1))
    (drop (call $add_event_listener (call $get_window) (i32.const 0x300) (i32.const 1)))
    (local.set $o (call $obj))
    (call $set_str (local.get $o) (i32.const 0x200) (i32.const 0x210))
    (call $set_int (local.get $o) (i32.const 0x220) (i32.const 0x1000))
    (call $set_int (local.get $o) (i32.const 0x230) (i32.const 0x180))
    (call $set_int (local.get $o) (i32.const 0x340) (i32.const 0x190))
    (call $post_message (local.get $o))
    (call $release (local.get $o)))

  (func (export "should_stop_ptr") (result i32)
    (i32.const 0x100))

  (func (export "compile_and_run") (param $req i32)
    (local $c i32)
    (call $get_str (local.get $req) (i32.const 0x2b0) (i32.const 0x2000))
    (local.set $c (i32.load8_u (i32.const 0x2000)))

    (if (i32.eq (local.get $c) (i32.const 0x66)) ;; f
      (then
        (call $message (i32.const 0x280) (i32.const 0x290) (i32.const 0x2a0))
        (return)))
    (if (i32.eq (local.get $c) (i32.const 0x74)) ;; t
      (then (unreachable)))
    (if (i32.eq (local.get $c) (i32.const 0x6c)) ;; l
      (then
        (loop $spin
          (br_if $spin (i32.eqz (i32.atomic.load8_u (i32.const 0x100)))))
        (call $print (i32.const 0x270))
        (return)))
    (if (i32.eq (local.get $c) (i32.const 0x68)) ;; h
      (then (loop $forever (br $forever))))
    (if (i32.eq (local.get $c) (i32.const 0x72)) ;; r
      (then
        (drop (call $request_animation_frame (i32.const 2)))
        (return)))
    (if (i32.eq (local.get $c) (i32.const 0x73)) ;; s
      (then
        (drop (call $set_timeout (i32.const 3) (f32.const 0)))
        (return)))
    (if (i32.eq (local.get $c) (i32.const 0x65)) ;; e
      (then
        (call $print (i32.const 0x2000))
        (return)))

    (if (i32.atomic.load8_u (i32.const 0x100))
      (then (call $print (i32.const 0x270)))
      (else (call $print (i32.const 0x260)))))

  (func (export "compile_and_export") (param $req i32)
    (local $o i32)
    (i32.store (i32.const 0x3000) (i32.const 0x52514950)) ;; "PIQR"
    (local.set $o (call $obj))
    (call $set_str (local.get $o) (i32.const 0x200) (i32.const 0x2d0))
    (call $set_int (local.get $o) (i32.const 0x2e0) (i32.const 0x3000))
    (call $set_int (local.get $o) (i32.const 0x2f0) (i32.const 4))
    (call $post_message (local.get $o))
    (call $release (local.get $o)))

  (func (export "run_from_blob") (param $req i32)
    (local $n i32)
    (local.set $n (i32.wrap_i64 (call $get_int (local.get $req) (i32.const 0x2c0))))
    (call $copy_from_ref
      (i32.const 0x2000)
      (call $get_value (local.get $req) (i32.const 0x2e0))
      (local.get $n))
    (i32.store8 (i32.add (i32.const 0x2000) (local.get $n)) (i32.const 0))
    (call $print (i32.const 0x2000)))
)
"#;
