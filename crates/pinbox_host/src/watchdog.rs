//! Optional wall-clock budget for guest entries
//!
//! Cancellation stays cooperative; the watchdog only exists for modules
//! that never poll the flag. It advances the engine epoch from a background
//! thread, and every guest entry is armed with a deadline a fixed number of
//! epochs ahead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use wasmtime::Engine;

/// Epoch ticks per budget. Higher means tighter enforcement.
const TICKS_PER_BUDGET: u32 = 10;
const MIN_TICK: Duration = Duration::from_millis(1);

pub struct Watchdog {
    budget: Duration,
    ticks: u64,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start ticking `engine`, which must have epoch interruption enabled.
    pub fn start(engine: Engine, budget: Duration) -> std::io::Result<Self> {
        let tick = (budget / TICKS_PER_BUDGET).max(MIN_TICK);
        let ticks = (budget.as_nanos() / tick.as_nanos()).max(1) as u64;
        let stop = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("pinbox-watchdog".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    engine.increment_epoch();
                }
            })?;

        tracing::info!(budget_ms = budget.as_millis() as u64, "watchdog armed");
        Ok(Self {
            budget,
            ticks,
            stop,
            thread: Some(thread),
        })
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Epoch delta to arm before a guest entry. One extra tick covers the
    /// partial tick already elapsed.
    pub fn deadline_ticks(&self) -> u64 {
        self.ticks + 1
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("watchdog thread panicked");
            }
        }
    }
}
