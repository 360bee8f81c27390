//! Display-tick sampling of the frame buffer
//!
//! Runs on the controller thread at the refresh cadence, independent of
//! what the module is doing. Each due tick reads the frame region straight
//! out of shared memory; nothing waits on the worker.

use crate::framebuffer::{FrameDecoder, Rgba};
use crate::stats::FrameStats;
use pinbox_core::time::TickClock;
use pinbox_core::{Address, LinearMemory};
use std::time::{Duration, Instant};

const STATS_WINDOW: usize = 120;
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

pub struct RenderLoop {
    decoder: FrameDecoder,
    clock: TickClock,
    stats: FrameStats,
    last_report: Instant,
    failing: bool,
}

impl RenderLoop {
    pub fn new(decoder: FrameDecoder, interval: Duration, now: Instant) -> Self {
        Self {
            decoder,
            clock: TickClock::new(interval, now),
            stats: FrameStats::new(STATS_WINDOW),
            last_report: now,
            failing: false,
        }
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn next_deadline(&self) -> Instant {
        self.clock.next_deadline()
    }

    /// Decode a fresh frame if a tick is due and the frame buffer address is
    /// known. Returns the frame to present, if any.
    pub fn tick(&mut self, now: Instant, memory: &LinearMemory, frame: Option<Address>) -> Option<&[Rgba]> {
        if !self.clock.poll(now) {
            return None;
        }
        if now.duration_since(self.last_report) >= REPORT_INTERVAL {
            self.stats.report();
            self.last_report = now;
        }
        let addr = frame?;

        let started = Instant::now();
        match self.decoder.decode(memory, addr).map(|_| ()) {
            Ok(()) => {
                self.stats.record(now, started.elapsed());
                self.failing = false;
                Some(self.decoder.pixels())
            }
            Err(e) => {
                if !self.failing {
                    tracing::warn!(error = %e, frame = %addr, "frame skipped");
                }
                self.failing = true;
                self.stats.record_skip();
                None
            }
        }
    }
}
