//! Execution context
//!
//! Owns one module instance, its linear memory and its host state, and
//! executes controller requests against it. Lives on the worker thread;
//! everything it has to say goes out as [`Event`]s.
//!
//! ## Lifecycle
//!
//! `Uninitialized → Instantiating → Ready ⇄ Running`, with `Disposed` as
//! the terminal phase after a failed instantiation or a shutdown.
//!
//! ## Runs
//!
//! A run only starts when the cancellation flag reads idle. The flag is
//! stored busy before the entry point is invoked and idle again after it
//! returns, however it returns. A run requested while busy is dropped, not
//! queued.

use crate::callbacks::Due;
use crate::capabilities::{self, TABLE_EXPORT};
use crate::error::HostError;
use crate::state::HostState;
use crate::surface::{Handle, Value};
use crate::watchdog::Watchdog;
use pinbox_core::time;
use pinbox_core::{CancellationFlag, Event, Generation, LinearMemory, Request, RunOutcome};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use wasmtime::{
    Config, Engine, ExternType, Instance, Linker, Module, Store, Trap, TypedFunc, WasmParams,
};

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Wall-clock budget per guest entry. `None` keeps cancellation purely
    /// cooperative.
    pub watchdog: Option<Duration>,
    pub animation_frame_interval: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            watchdog: None,
            animation_frame_interval: time::TICK_DURATION,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Instantiating,
    Ready,
    Running,
    Disposed,
}

/// Entry points that take a request object.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EntryKind {
    Run,
    Export,
    FromBlob,
}

impl EntryKind {
    fn request(self) -> &'static str {
        match self {
            EntryKind::Run => "run",
            EntryKind::Export => "compileAndExport",
            EntryKind::FromBlob => "runFromBlob",
        }
    }

    fn export(self) -> &'static str {
        match self {
            EntryKind::Run => "compile_and_run",
            EntryKind::Export => "compile_and_export",
            EntryKind::FromBlob => "run_from_blob",
        }
    }

    /// Exports never consult the flag; requests execute serially, so an
    /// export cannot overlap a run.
    fn claims_flag(self) -> bool {
        self != EntryKind::Export
    }
}

struct Entries {
    run: TypedFunc<i32, ()>,
    export: Option<TypedFunc<i32, ()>>,
    from_blob: Option<TypedFunc<i32, ()>>,
}

impl Entries {
    fn get(&self, kind: EntryKind) -> Option<TypedFunc<i32, ()>> {
        match kind {
            EntryKind::Run => Some(self.run.clone()),
            EntryKind::Export => self.export.clone(),
            EntryKind::FromBlob => self.from_blob.clone(),
        }
    }
}

/// A successfully initialized instance.
struct Live {
    store: Store<HostState>,
    entries: Entries,
    flag: CancellationFlag,
}

impl Live {
    fn post(&mut self, event: Event) {
        self.store.data_mut().outbox.post(event);
    }
}

pub struct ExecutionContext {
    engine: Engine,
    config: ContextConfig,
    events: UnboundedSender<Event>,
    phase: Phase,
    generation: Generation,
    live: Option<Live>,
    watchdog: Option<Watchdog>,
}

impl ExecutionContext {
    pub fn new(config: ContextConfig, events: UnboundedSender<Event>) -> Result<Self, HostError> {
        let mut engine_config = Config::new();
        engine_config.wasm_threads(true);
        if config.watchdog.is_some() {
            engine_config.epoch_interruption(true);
        }
        let engine = Engine::new(&engine_config).map_err(|e| HostError::Engine(format!("{e:#}")))?;

        let watchdog = match config.watchdog {
            Some(budget) => Some(
                Watchdog::start(engine.clone(), budget)
                    .map_err(|e| HostError::Engine(format!("watchdog thread: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            engine,
            config,
            events,
            phase: Phase::Uninitialized,
            generation: Generation::FIRST,
            live: None,
            watchdog,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn memory(&self) -> Option<&LinearMemory> {
        self.live.as_ref().map(|live| live.store.data().memory())
    }

    /// Instantiate the module and run its `init` export.
    ///
    /// Accepted once. On success `postInit` is emitted, followed by anything
    /// the module posted during `init`. On failure an `error` is emitted and
    /// the context is disposed.
    pub fn init(&mut self, module: &[u8]) -> Result<(), HostError> {
        if self.phase != Phase::Uninitialized {
            tracing::warn!(phase = ?self.phase, "init rejected");
            let err = HostError::AlreadyInitialized;
            self.send(Event::Error {
                details: err.to_string(),
            });
            return Err(err);
        }

        self.phase = Phase::Instantiating;
        match self.instantiate(module) {
            Ok(mut live) => {
                let memory = live.store.data().memory().clone();
                tracing::info!(
                    generation = %memory.generation(),
                    memory_bytes = memory.size(),
                    flag = %live.flag.address(),
                    "module instantiated"
                );
                live.store.data_mut().outbox.open(Event::PostInit {
                    memory,
                    cancellation_flag: live.flag.address(),
                });
                self.live = Some(live);
                self.phase = Phase::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "instantiation failed");
                self.phase = Phase::Disposed;
                self.send(Event::Error {
                    details: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn instantiate(&mut self, bytes: &[u8]) -> Result<Live, HostError> {
        let failed = |what: &str, e: wasmtime::Error| HostError::Instantiation(format!("{what}: {e:#}"));

        let module = Module::new(&self.engine, bytes).map_err(|e| failed("invalid module", e))?;

        let memory_ty = module
            .imports()
            .find_map(|import| match (import.module(), import.name(), import.ty()) {
                ("env", "memory", ExternType::Memory(ty)) => Some(ty),
                _ => None,
            })
            .filter(|ty| ty.is_shared())
            .ok_or_else(|| HostError::Instantiation("module must import a shared `env.memory`".into()))?;
        let memory = LinearMemory::allocate(&self.engine, memory_ty, self.generation)?;

        let host = HostState::new(
            memory.clone(),
            self.events.clone(),
            self.config.animation_frame_interval,
        );
        let mut store = Store::new(&self.engine, host);
        self.arm(&mut store);

        let mut linker = Linker::new(&self.engine);
        capabilities::install(&mut linker)?;
        linker
            .define(&store, "env", "memory", memory.shared().clone())
            .map_err(|e| failed("linking memory", e))?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| failed("linking", e))?;

        let init = required::<(), ()>(&instance, &mut store, "init")?;
        let should_stop_ptr = required::<(), i32>(&instance, &mut store, "should_stop_ptr")?;
        let run = match optional(&instance, &mut store, "compile_and_run")? {
            Some(run) => run,
            None => required::<i32, ()>(&instance, &mut store, "run")?,
        };
        let entries = Entries {
            run,
            export: optional(&instance, &mut store, "compile_and_export")?,
            from_blob: optional(&instance, &mut store, "run_from_blob")?,
        };
        if instance.get_table(&mut store, TABLE_EXPORT).is_none() {
            tracing::debug!("module exports no function table; callbacks unavailable");
        }

        self.arm(&mut store);
        store.data_mut().enter();
        let initialized = init.call(&mut store, ());
        store.data_mut().leave();
        initialized.map_err(|e| failed("init", e))?;

        self.arm(&mut store);
        let flag_ptr = should_stop_ptr
            .call(&mut store, ())
            .map_err(|e| failed("should_stop_ptr", e))?;
        let flag = CancellationFlag::new(memory.clone(), memory.address(flag_ptr as u32))?;
        if !flag.is_idle() {
            tracing::debug!("module left the flag busy after init; storing idle");
            flag.request_stop();
        }

        self.generation = self.generation.next();
        Ok(Live {
            store,
            entries,
            flag,
        })
    }

    /// Compile and run program source.
    pub fn run(&mut self, source: &str) -> RunOutcome {
        self.run_entry(EntryKind::Run, "source", Value::Str(source.to_string()), source.len())
    }

    /// Run a pre-compiled blob.
    pub fn run_from_blob(&mut self, buffer: &[u8]) -> RunOutcome {
        self.run_entry(EntryKind::FromBlob, "buffer", Value::Bytes(buffer.to_vec()), buffer.len())
    }

    /// Compile program source and publish the blob through `output`.
    pub fn compile_and_export(&mut self, source: &str) -> RunOutcome {
        self.run_entry(EntryKind::Export, "source", Value::Str(source.to_string()), source.len())
    }

    /// Invoke an entry point with a `{ <field>: value, length }` request object.
    fn run_entry(&mut self, kind: EntryKind, field: &str, value: Value, len: usize) -> RunOutcome {
        let deadline = self.watchdog.as_ref().map(Watchdog::deadline_ticks);
        let budget = self.watchdog.as_ref().map(Watchdog::budget);
        let Some(live) = self.live.as_mut().filter(|_| self.phase == Phase::Ready) else {
            tracing::debug!(request = kind.request(), phase = ?self.phase, "request dropped: context not ready");
            return RunOutcome::Dropped;
        };

        let Some(entry) = live.entries.get(kind) else {
            let err = HostError::MissingExport(kind.export());
            live.post(Event::Error {
                details: err.to_string(),
            });
            live.post(Event::Finished {
                outcome: RunOutcome::Faulted,
            });
            return RunOutcome::Faulted;
        };

        let guard = if kind.claims_flag() {
            match live.flag.begin_run() {
                Some(guard) => Some(guard),
                None => {
                    tracing::debug!(request = kind.request(), "request dropped: context busy");
                    return RunOutcome::Dropped;
                }
            }
        } else {
            None
        };

        self.phase = Phase::Running;
        let started = Instant::now();
        let handle = live.store.data_mut().surface.object_from([
            (field, value),
            ("length", Value::Number(len as f64)),
        ]);

        if let Some(ticks) = deadline {
            live.store.set_epoch_deadline(ticks);
        }
        live.store.data_mut().enter();
        let result = entry.call(&mut live.store, handle.raw() as i32);

        if let Err(e) = live.store.data_mut().surface.release(handle) {
            tracing::warn!(error = %e, "request object already released");
        }
        live.store.data_mut().leave();
        drop(guard);
        self.phase = Phase::Ready;

        let outcome = match result {
            Ok(()) => RunOutcome::Completed,
            Err(e) => {
                let err = guest_error(&e, budget);
                tracing::warn!(request = kind.request(), error = %err, "module faulted");
                live.post(Event::Error {
                    details: err.to_string(),
                });
                RunOutcome::Faulted
            }
        };
        tracing::debug!(
            request = kind.request(),
            ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );
        live.post(Event::Finished { outcome });
        outcome
    }

    /// Deliver a UI event to the listeners registered for it on `target`.
    pub fn dispatch_event(&mut self, target: Handle, event: &str) -> usize {
        let deadline = self.watchdog.as_ref().map(Watchdog::deadline_ticks);
        let budget = self.watchdog.as_ref().map(Watchdog::budget);
        let Some(live) = self.live.as_mut().filter(|_| self.phase == Phase::Ready) else {
            tracing::debug!(event, "event dropped: context not ready");
            return 0;
        };

        let ids = live.store.data().callbacks.listeners(target, event);
        if ids.is_empty() {
            tracing::trace!(event, target = %target, "no listeners");
            return 0;
        }

        let handle = live.store.data_mut().surface.object_from([
            ("type", Value::Str(event.to_string())),
            ("target", Value::Ref(target)),
            ("defaultPrevented", Value::Number(0.0)),
        ]);
        live.store.data_mut().enter();
        let mut delivered = 0;
        for id in ids {
            // An earlier listener may have unregistered this one.
            let Some(func) = live.store.data().callbacks.resolve(id) else {
                let err = HostError::InvalidCallback(id.raw());
                tracing::warn!(error = %err, event, "listener dropped");
                continue;
            };
            let result = func
                .typed::<i32, ()>(&live.store)
                .and_then(|f| {
                    if let Some(ticks) = deadline {
                        live.store.set_epoch_deadline(ticks);
                    }
                    f.call(&mut live.store, handle.raw() as i32)
                });
            match result {
                Ok(()) => delivered += 1,
                Err(e) => live.post(Event::Error {
                    details: guest_error(&e, budget).to_string(),
                }),
            }
        }
        if let Err(e) = live.store.data_mut().surface.release(handle) {
            tracing::warn!(error = %e, "event object already released");
        }
        live.store.data_mut().leave();
        delivered
    }

    /// Run every timeout and animation-frame callback due at `now`.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let deadline = self.watchdog.as_ref().map(Watchdog::deadline_ticks);
        let budget = self.watchdog.as_ref().map(Watchdog::budget);
        let Some(live) = self.live.as_mut().filter(|_| self.phase == Phase::Ready) else {
            return 0;
        };

        let fired = live.store.data_mut().callbacks.take_due(now);
        let timestamp = live.store.data().timestamp_ms();
        let count = fired.len();
        live.store.data_mut().enter();
        for callback in fired {
            if let Some(ticks) = deadline {
                live.store.set_epoch_deadline(ticks);
            }
            let result = match callback.due {
                Due::AnimationFrame => callback
                    .func
                    .typed::<f64, ()>(&live.store)
                    .and_then(|f| f.call(&mut live.store, timestamp)),
                Due::Timeout => callback
                    .func
                    .typed::<(), ()>(&live.store)
                    .and_then(|f| f.call(&mut live.store, ())),
            };
            if let Err(e) = result {
                live.post(Event::Error {
                    details: guest_error(&e, budget).to_string(),
                });
            }
        }
        live.store.data_mut().leave();
        count
    }

    /// Earliest moment a registered callback wants to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.live
            .as_ref()
            .and_then(|live| live.store.data().callbacks.next_deadline())
    }

    /// Execute one worker turn: every request queued when the worker woke.
    ///
    /// At most one run-type request executes per turn. Run requests queued
    /// together were issued with no completion in between, so only the
    /// newest is executed and the rest are dropped.
    /// Returns false once the context has shut down.
    pub fn handle_turn(&mut self, requests: Vec<Request>) -> bool {
        let newest_run = requests.iter().rposition(Request::is_run);
        for (i, request) in requests.into_iter().enumerate() {
            tracing::trace!(kind = request.kind(), "request received");
            if request.is_run() && Some(i) != newest_run {
                tracing::debug!(kind = request.kind(), "request dropped: superseded by a newer run");
                continue;
            }
            match request {
                Request::Init { module } => {
                    // Failures were reported as events.
                    let _ = self.init(&module);
                }
                Request::Run { source } => {
                    self.run(&source);
                }
                Request::RunFromBlob { buffer } => {
                    self.run_from_blob(&buffer);
                }
                Request::CompileAndExport { source } => {
                    self.compile_and_export(&source);
                }
                Request::DispatchEvent { target, event } => {
                    self.dispatch_event(Handle::from_raw(target), &event);
                }
                Request::Shutdown => {
                    self.dispose();
                    return false;
                }
            }
        }
        true
    }

    /// Tear down the instance. Idempotent.
    pub fn dispose(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.store.data_mut().callbacks.clear();
            let discarded = live.store.data_mut().outbox.discard();
            tracing::info!(discarded, "execution context disposed");
        }
        self.phase = Phase::Disposed;
        self.watchdog = None;
    }

    fn arm(&self, store: &mut Store<HostState>) {
        if let Some(dog) = &self.watchdog {
            store.set_epoch_deadline(dog.deadline_ticks());
        }
    }

    /// Bypasses the outbox; used before an instance exists.
    fn send(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::debug!("controller dropped; event discarded");
        }
    }
}

fn required<P: WasmParams, R: wasmtime::WasmResults>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &'static str,
) -> Result<TypedFunc<P, R>, HostError> {
    match instance.get_func(&mut *store, name) {
        Some(func) => func
            .typed::<P, R>(&*store)
            .map_err(|e| HostError::Instantiation(format!("export `{name}` has the wrong signature: {e}"))),
        None => Err(HostError::MissingExport(name)),
    }
}

/// A request entry point that may be absent. Present with the wrong
/// signature is still an error.
fn optional(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &'static str,
) -> Result<Option<TypedFunc<i32, ()>>, HostError> {
    if instance.get_func(&mut *store, name).is_none() {
        return Ok(None);
    }
    required(instance, store, name).map(Some)
}

/// Render a guest failure for an `error` message.
fn guest_error(e: &wasmtime::Error, budget: Option<Duration>) -> HostError {
    let details = match e.downcast_ref::<Trap>() {
        Some(Trap::Interrupt) => match budget {
            Some(budget) => format!("Runtime error: module exceeded its {} ms budget", budget.as_millis()),
            None => "Runtime error: module interrupted".to_string(),
        },
        Some(trap) => format!("Runtime error: {trap}"),
        None => format!("Runtime error: {e:#}"),
    };
    HostError::Guest(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{collect, GUEST};
    use pinbox_core::StateAddresses;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn ready(config: ContextConfig) -> (ExecutionContext, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ctx = ExecutionContext::new(config, tx).unwrap();
        ctx.init(GUEST.as_bytes()).unwrap();
        (ctx, rx)
    }

    fn flag_byte(ctx: &ExecutionContext) -> u8 {
        let live = ctx.live.as_ref().unwrap();
        live.store.data().memory().load_u8(live.flag.address()).unwrap()
    }

    fn prints(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Print { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn finished(events: &[Event]) -> Vec<RunOutcome> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Finished { outcome } => Some(*outcome),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_init_posts_post_init_then_state() {
        let (ctx, mut rx) = ready(ContextConfig::default());
        let events = collect(&mut rx);

        assert_eq!(ctx.phase(), Phase::Ready);
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(kinds, ["postInit", "state"]);

        let Event::State(StateAddresses {
            frame_buffer,
            inputs,
            time_since_start,
        }) = &events[1]
        else {
            panic!("expected state");
        };
        assert_eq!(frame_buffer.map(|a| a.offset()), Some(0x1000));
        assert_eq!(time_since_start.map(|a| a.offset()), Some(0x190));
        assert_eq!(inputs.get(&pinbox_core::Button::A).map(|a| a.offset()), Some(0x180));
        assert_eq!(flag_byte(&ctx), 1);
    }

    #[test]
    fn test_second_init_rejected() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        assert!(matches!(ctx.init(GUEST.as_bytes()), Err(HostError::AlreadyInitialized)));
        assert!(matches!(collect(&mut rx).as_slice(), [Event::Error { .. }]));
        assert_eq!(ctx.phase(), Phase::Ready);
    }

    #[test]
    fn test_module_without_shared_memory_disposes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctx = ExecutionContext::new(ContextConfig::default(), tx).unwrap();

        let err = ctx.init(b"(module (func (export \"init\")))").unwrap_err();
        assert!(matches!(err, HostError::Instantiation(_)));
        assert_eq!(ctx.phase(), Phase::Disposed);
        assert!(matches!(collect(&mut rx).as_slice(), [Event::Error { .. }]));
        assert_eq!(ctx.run("x"), RunOutcome::Dropped);
    }

    #[test]
    fn test_run_brackets_busy_and_returns_idle() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        assert_eq!(ctx.run("x"), RunOutcome::Completed);
        let events = collect(&mut rx);

        // The guest observed the flag busy while it ran.
        assert_eq!(prints(&events), ["busy"]);
        assert_eq!(finished(&events), [RunOutcome::Completed]);
        assert_eq!(flag_byte(&ctx), 1);
        assert_eq!(ctx.phase(), Phase::Ready);
    }

    #[test]
    fn test_run_reads_request_source() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        ctx.run("echo me");
        assert_eq!(prints(&collect(&mut rx)), ["echo me"]);
    }

    #[test]
    fn test_run_while_busy_is_dropped() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);
        let live = ctx.live.as_ref().unwrap();
        live.store.data().memory().store_u8(live.flag.address(), 0).unwrap();

        assert_eq!(ctx.run("x"), RunOutcome::Dropped);
        assert!(collect(&mut rx).is_empty());
        assert_eq!(flag_byte(&ctx), 0);
    }

    #[test]
    fn test_guest_error_still_returns_idle() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        assert_eq!(ctx.run("fail"), RunOutcome::Completed);
        let events = collect(&mut rx);
        assert!(matches!(&events[0], Event::Error { details } if details == "bad program"));
        assert_eq!(flag_byte(&ctx), 1);
    }

    #[test]
    fn test_trap_surfaces_as_error() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        assert_eq!(ctx.run("trap"), RunOutcome::Faulted);
        let events = collect(&mut rx);
        assert!(matches!(&events[0], Event::Error { details } if details.starts_with("Runtime error")));
        assert_eq!(finished(&events), [RunOutcome::Faulted]);
        assert_eq!(flag_byte(&ctx), 1);

        // The context is usable again.
        assert_eq!(ctx.run("x"), RunOutcome::Completed);
    }

    #[test]
    fn test_newest_run_in_a_turn_wins() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        let turn = vec![
            Request::Run { source: "x".into() },
            Request::Run { source: "echo a".into() },
            Request::RunFromBlob { buffer: b"blob".to_vec() },
        ];
        assert!(ctx.handle_turn(turn));

        let events = collect(&mut rx);
        assert_eq!(prints(&events), ["blob"]);
        assert_eq!(finished(&events).len(), 1);
    }

    #[test]
    fn test_turn_keeps_other_requests_around_runs() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        let turn = vec![
            Request::Run { source: "echo a".into() },
            Request::DispatchEvent {
                target: Handle::WINDOW.raw(),
                event: "click".into(),
            },
            Request::Run { source: "echo b".into() },
        ];
        assert!(ctx.handle_turn(turn));

        assert_eq!(prints(&collect(&mut rx)), ["clicked", "echo b"]);
    }

    #[test]
    fn test_run_from_blob_copies_buffer() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        assert_eq!(ctx.run_from_blob(b"from blob"), RunOutcome::Completed);
        assert_eq!(prints(&collect(&mut rx)), ["from blob"]);
    }

    #[test]
    fn test_scratch_handles_do_not_accumulate() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        let surface_len = |ctx: &ExecutionContext| ctx.live.as_ref().unwrap().store.data().surface().len();
        assert_eq!(ctx.run_from_blob(b"warm"), RunOutcome::Completed);
        let baseline = surface_len(&ctx);

        // Each blob run boxes the buffer through `get_value` and never
        // releases it.
        for _ in 0..50 {
            ctx.run_from_blob(b"again");
            ctx.dispatch_event(Handle::WINDOW, "click");
        }
        assert_eq!(surface_len(&ctx), baseline);
        assert_eq!(prints(&collect(&mut rx)).iter().filter(|p| *p == "again").count(), 50);
    }

    #[test]
    fn test_export_posts_output() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        assert_eq!(ctx.compile_and_export("anything"), RunOutcome::Completed);
        let events = collect(&mut rx);
        let Some(Event::Output { buffer, size }) = events.first() else {
            panic!("expected output, got {events:?}");
        };
        let bytes = ctx.memory().unwrap().read_vec(*buffer, *size as usize).unwrap();
        assert_eq!(bytes, b"PIQR");
    }

    #[test]
    fn test_dispatch_reaches_listener() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        assert_eq!(ctx.dispatch_event(Handle::WINDOW, "click"), 1);
        assert_eq!(ctx.dispatch_event(Handle::WINDOW, "keydown"), 0);
        assert_eq!(prints(&collect(&mut rx)), ["clicked"]);
    }

    #[test]
    fn test_frames_and_timeouts_fire_after_due() {
        let (mut ctx, mut rx) = ready(ContextConfig::default());
        collect(&mut rx);

        ctx.run("raf");
        ctx.run("set timeout");
        collect(&mut rx);
        let deadline = ctx.next_deadline().expect("callbacks pending");

        let later = deadline.max(Instant::now()) + Duration::from_millis(20);
        assert_eq!(ctx.fire_due(later), 2);
        let mut printed = prints(&collect(&mut rx));
        printed.sort();
        assert_eq!(printed, ["frame", "timeout"]);
        assert_eq!(ctx.next_deadline(), None);
    }

    #[test]
    fn test_watchdog_interrupts_hang() {
        let config = ContextConfig {
            watchdog: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (mut ctx, mut rx) = ready(config);
        collect(&mut rx);

        assert_eq!(ctx.run("hang"), RunOutcome::Faulted);
        let events = collect(&mut rx);
        assert!(matches!(&events[0], Event::Error { details } if details.contains("50 ms")));
        assert_eq!(flag_byte(&ctx), 1);
        assert_eq!(ctx.run("x"), RunOutcome::Completed);
    }

    #[test]
    fn test_shutdown_disposes() {
        let (mut ctx, _rx) = ready(ContextConfig::default());

        assert!(!ctx.handle_turn(vec![Request::Shutdown]));
        assert_eq!(ctx.phase(), Phase::Disposed);
        assert!(ctx.memory().is_none());
    }
}
