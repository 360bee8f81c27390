//! Worker thread hosting one execution context
//!
//! The context never leaves its thread. Requests arrive over an unbounded
//! channel; everything queued when the worker wakes is handled as one turn.
//! Between turns the worker sleeps until the next request or the next
//! callback deadline, whichever comes first.

use crate::context::{ContextConfig, ExecutionContext};
use crate::error::HostError;
use pinbox_core::{Event, Request};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub struct Worker {
    requests: UnboundedSender<Request>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker. The context is created on the new thread; engine
    /// setup failures are reported as an `error` event.
    pub fn spawn(config: ContextConfig, events: UnboundedSender<Event>) -> Result<Self, HostError> {
        let (requests, rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("pinbox-worker".into())
            .spawn(move || run(config, events, rx))
            .map_err(|e| HostError::Engine(format!("spawning worker: {e}")))?;
        Ok(Self {
            requests,
            thread: Some(thread),
        })
    }

    pub fn send(&self, request: Request) -> Result<(), HostError> {
        tracing::trace!(kind = request.kind(), "request sent");
        self.requests.send(request).map_err(|_| HostError::Disconnected)
    }

    /// Wait for the worker to exit. Only returns once a `shutdown` request
    /// has been handled or the worker failed.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // The worker may be inside a guest call; do not block on it.
            let _ = self.requests.send(Request::Shutdown);
        }
    }
}

fn run(config: ContextConfig, events: UnboundedSender<Event>, rx: UnboundedReceiver<Request>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "worker runtime failed to start");
            let _ = events.send(Event::Error {
                details: format!("worker runtime failed to start: {e}"),
            });
            return;
        }
    };

    let mut context = match ExecutionContext::new(config, events.clone()) {
        Ok(context) => context,
        Err(e) => {
            tracing::error!(error = %e, "execution context unavailable");
            let _ = events.send(Event::Error { details: e.to_string() });
            return;
        }
    };

    runtime.block_on(serve(&mut context, rx));
    context.dispose();
    tracing::debug!("worker exiting");
}

async fn serve(context: &mut ExecutionContext, mut rx: UnboundedReceiver<Request>) {
    loop {
        let deadline = context.next_deadline();
        let first = tokio::select! {
            request = rx.recv() => match request {
                Some(request) => Some(request),
                None => {
                    tracing::debug!("controller gone");
                    return;
                }
            },
            _ = sleep_until(deadline) => None,
        };

        let mut turn: Vec<Request> = first.into_iter().collect();
        while let Ok(request) = rx.try_recv() {
            turn.push(request);
        }
        if !turn.is_empty() && !context.handle_turn(turn) {
            return;
        }
        context.fire_due(Instant::now());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}
