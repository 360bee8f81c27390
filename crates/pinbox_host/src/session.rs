//! Controller side of a running module
//!
//! A [`Session`] owns the worker and the event stream. Once started it
//! holds the shared memory view and the cancellation flag, so stopping a run
//! and reading the frame buffer or input bytes never wait on the worker.

use crate::context::ContextConfig;
use crate::error::HostError;
use crate::surface::Handle;
use crate::worker::Worker;
use pinbox_core::{Address, CancellationFlag, Event, LinearMemory, Request, RunOutcome, StateAddresses};
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// What the controller learns from the worker, after the session has
/// applied it.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    State(StateAddresses),
    Print(String),
    Error(String),
    Alert(String),
    /// Bytes published by an export request, already copied out of memory.
    Exported(Vec<u8>),
    Finished(RunOutcome),
}

pub struct Session {
    worker: Worker,
    events: UnboundedReceiver<Event>,
    memory: LinearMemory,
    flag: CancellationFlag,
    state: StateAddresses,
    run_in_flight: bool,
}

impl Session {
    /// Spawn a worker, instantiate `module` on it and wait for `postInit`.
    pub fn start(module: Vec<u8>, config: ContextConfig) -> Result<Self, HostError> {
        let (tx, mut events) = mpsc::unbounded_channel();
        let worker = Worker::spawn(config, tx)?;
        worker.send(Request::Init { module })?;

        loop {
            match events.blocking_recv() {
                Some(Event::PostInit {
                    memory,
                    cancellation_flag,
                }) => {
                    let flag = CancellationFlag::new(memory.clone(), cancellation_flag)?;
                    tracing::info!(flag = %cancellation_flag, "session started");
                    return Ok(Self {
                        worker,
                        events,
                        memory,
                        flag,
                        state: StateAddresses::default(),
                        run_in_flight: false,
                    });
                }
                Some(Event::Error { details }) => {
                    if worker.send(Request::Shutdown).is_ok() {
                        worker.join();
                    }
                    return Err(HostError::Startup(details));
                }
                Some(other) => tracing::debug!(kind = other.kind(), "event before postInit ignored"),
                None => {
                    worker.join();
                    return Err(HostError::Disconnected);
                }
            }
        }
    }

    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    pub fn flag(&self) -> &CancellationFlag {
        &self.flag
    }

    /// Addresses from the most recent `state` message.
    pub fn state(&self) -> &StateAddresses {
        &self.state
    }

    pub fn frame_buffer(&self) -> Option<Address> {
        self.state.frame_buffer
    }

    /// Seconds the running program has been going, as the guest last wrote
    /// them. `None` until a `state` message names the clock.
    pub fn time_since_start(&self) -> Option<f32> {
        let addr = self.state.time_since_start?;
        let mut bytes = [0u8; 4];
        match self.memory.read(addr, &mut bytes) {
            Ok(()) => Some(f32::from_le_bytes(bytes)),
            Err(e) => {
                tracing::debug!(error = %e, "program clock unreadable");
                None
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.flag.is_idle() && !self.run_in_flight
    }

    /// Ask for a run. Returns false, sending nothing, while a run is in
    /// flight.
    pub fn run(&mut self, source: &str) -> Result<bool, HostError> {
        self.gated(Request::Run {
            source: source.to_string(),
        })
    }

    pub fn run_from_blob(&mut self, buffer: Vec<u8>) -> Result<bool, HostError> {
        self.gated(Request::RunFromBlob { buffer })
    }

    /// Stop whatever is running and run `source` once it has unwound.
    ///
    /// Restarts issued faster than the worker picks them up collapse into
    /// the newest one.
    pub fn restart(&mut self, source: &str) -> Result<(), HostError> {
        self.restart_with(Request::Run {
            source: source.to_string(),
        })
    }

    /// Like [`Session::restart`], for a pre-compiled blob.
    pub fn restart_from_blob(&mut self, buffer: Vec<u8>) -> Result<(), HostError> {
        self.restart_with(Request::RunFromBlob { buffer })
    }

    fn restart_with(&mut self, request: Request) -> Result<(), HostError> {
        self.request_stop();
        self.run_in_flight = true;
        self.worker.send(request)
    }

    /// Store idle into the flag. The module unwinds at its next poll.
    pub fn request_stop(&self) {
        tracing::debug!("stop requested");
        self.flag.request_stop();
    }

    pub fn compile_and_export(&mut self, source: &str) -> Result<(), HostError> {
        self.worker.send(Request::CompileAndExport {
            source: source.to_string(),
        })
    }

    pub fn dispatch_event(&self, target: Handle, event: &str) -> Result<(), HostError> {
        self.worker.send(Request::DispatchEvent {
            target: target.raw(),
            event: event.to_string(),
        })
    }

    fn gated(&mut self, request: Request) -> Result<bool, HostError> {
        if !self.is_idle() {
            tracing::debug!(kind = request.kind(), "run ignored: module busy");
            return Ok(false);
        }
        self.run_in_flight = true;
        self.worker.send(request)?;
        Ok(true)
    }

    /// Apply and return every event delivered so far.
    pub fn pump(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            notices.extend(self.apply(event));
        }
        notices
    }

    /// Block for the next notice. `None` once the worker is gone.
    pub fn wait(&mut self) -> Option<Notice> {
        loop {
            let event = self.events.blocking_recv()?;
            if let Some(notice) = self.apply(event) {
                return Some(notice);
            }
        }
    }

    fn apply(&mut self, event: Event) -> Option<Notice> {
        match event {
            Event::PostInit { .. } => {
                tracing::warn!("duplicate postInit ignored");
                None
            }
            Event::State(state) => {
                self.state = state.clone();
                Some(Notice::State(state))
            }
            Event::Output { buffer, size } => match self.memory.read_vec(buffer, size as usize) {
                Ok(bytes) => Some(Notice::Exported(bytes)),
                Err(e) => Some(Notice::Error(format!("output unreadable: {e}"))),
            },
            Event::Print { text } => Some(Notice::Print(text)),
            Event::Error { details } => Some(Notice::Error(details)),
            Event::Alert { text } => Some(Notice::Alert(text)),
            Event::Finished { outcome } => {
                self.run_in_flight = false;
                Some(Notice::Finished(outcome))
            }
        }
    }

    /// Stop any run, shut the worker down and wait for it.
    pub fn shutdown(self) {
        self.request_stop();
        if self.worker.send(Request::Shutdown).is_err() {
            tracing::debug!("worker already gone");
        }
        self.worker.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GUEST;
    use std::time::Duration;

    fn start() -> Session {
        Session::start(GUEST.as_bytes().to_vec(), ContextConfig::default()).unwrap()
    }

    fn wait_busy(session: &Session) {
        while session.flag().is_idle() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for(session: &mut Session, pred: impl Fn(&Notice) -> bool) -> Vec<Notice> {
        let mut seen = Vec::new();
        while let Some(notice) = session.wait() {
            let done = pred(&notice);
            seen.push(notice);
            if done {
                return seen;
            }
        }
        panic!("worker gone; saw {seen:?}");
    }

    #[test]
    fn test_start_then_state() {
        let mut session = start();
        assert!(session.is_idle());

        let seen = wait_for(&mut session, |n| matches!(n, Notice::State(_)));
        assert_eq!(seen.len(), 1);
        assert_eq!(session.frame_buffer().map(|a| a.offset()), Some(0x1000));
        session.shutdown();
    }

    #[test]
    fn test_start_failure_reports_error() {
        let result = Session::start(b"not a module".to_vec(), ContextConfig::default());
        assert!(matches!(result, Err(HostError::Startup(details)) if details.contains("invalid module")));
    }

    #[test]
    fn test_second_run_ignored_until_finished() {
        let mut session = start();
        assert!(session.run("lock").unwrap());
        assert!(!session.run("x").unwrap());
        assert!(!session.is_idle());
        while session.flag().is_idle() {
            std::thread::sleep(Duration::from_millis(1));
        }

        session.request_stop();
        let seen = wait_for(&mut session, |n| matches!(n, Notice::Finished(_)));
        assert!(seen.contains(&Notice::Print("idle".into())));
        assert!(session.is_idle());
        assert!(session.run("x").unwrap());
        session.shutdown();
    }

    #[test]
    fn test_restart_stops_spinning_run() {
        let mut session = start();
        assert!(session.run("lock").unwrap());
        // Let the first run claim the flag.
        while session.flag().is_idle() {
            std::thread::sleep(Duration::from_millis(1));
        }

        session.restart("echo again").unwrap();
        let seen = wait_for(&mut session, |n| *n == Notice::Print("echo again".into()));
        let finished = seen.iter().filter(|n| matches!(n, Notice::Finished(_))).count();
        assert_eq!(finished, 1);
        session.shutdown();
    }

    #[test]
    fn test_restart_from_blob_stops_spinning_run() {
        let mut session = start();
        assert!(session.run("lock").unwrap());
        wait_busy(&session);

        session.restart_from_blob(b"blob".to_vec()).unwrap();
        let seen = wait_for(&mut session, |n| *n == Notice::Print("blob".into()));
        assert!(seen.contains(&Notice::Print("idle".into())));
        session.shutdown();
    }

    #[test]
    fn test_latest_restart_runs() {
        let mut session = start();
        assert!(session.run("lock").unwrap());
        wait_busy(&session);

        session.restart("echo a").unwrap();
        session.restart("echo b").unwrap();
        wait_for(&mut session, |n| *n == Notice::Print("echo b".into()));
        wait_for(&mut session, |n| matches!(n, Notice::Finished(_)));

        // Nothing else was left queued behind the newest restart.
        assert!(session.run("echo c").unwrap());
        let rest = wait_for(&mut session, |n| matches!(n, Notice::Print(_)));
        assert_eq!(rest.last(), Some(&Notice::Print("echo c".into())));
        session.shutdown();
    }

    #[test]
    fn test_time_since_start_reads_guest_clock() {
        let mut session = start();
        assert_eq!(session.time_since_start(), None);
        wait_for(&mut session, |n| matches!(n, Notice::State(_)));

        let clock = session.state().time_since_start.unwrap();
        session.memory().write(clock, &1.5f32.to_le_bytes()).unwrap();
        assert_eq!(session.time_since_start(), Some(1.5));
        session.shutdown();
    }

    #[test]
    fn test_export_copies_bytes() {
        let mut session = start();
        session.compile_and_export("anything").unwrap();

        let seen = wait_for(&mut session, |n| matches!(n, Notice::Exported(_)));
        assert_eq!(seen.last(), Some(&Notice::Exported(b"PIQR".to_vec())));
        session.shutdown();
    }

    #[test]
    fn test_dispatch_click() {
        let mut session = start();
        session.dispatch_event(Handle::WINDOW, "click").unwrap();

        let seen = wait_for(&mut session, |n| matches!(n, Notice::Print(_)));
        assert_eq!(seen.last(), Some(&Notice::Print("clicked".into())));
        session.shutdown();
    }
}
