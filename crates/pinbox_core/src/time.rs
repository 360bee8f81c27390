//! Display tick timing
//!
//! Fixed-cadence ticks for the render loop and animation-frame callbacks.

use std::time::{Duration, Instant};

/// Default display refresh rate (60 Hz = 16.666ms per tick)
pub const REFRESH_RATE_HZ: u32 = 60;
pub const TICK_DURATION: Duration = Duration::from_micros(16_666); // ~16.666ms

/// Interval between ticks at `hz`. Zero is treated as the default rate.
pub fn tick_interval(hz: u32) -> Duration {
    if hz == 0 {
        return TICK_DURATION;
    }
    Duration::from_secs(1) / hz
}

/// Deadline-based tick schedule.
///
/// Missed ticks are coalesced: a late caller gets one tick, and the next
/// deadline is re-anchored on the current time instead of bursting.
#[derive(Debug, Clone)]
pub struct TickClock {
    interval: Duration,
    next: Instant,
    tick_count: u64,
}

impl TickClock {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next: now + interval,
            tick_count: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns true and advances the schedule when a tick is due at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.tick_count += 1;
        self.next += self.interval;
        if self.next <= now {
            self.next = now + self.interval;
        }
        true
    }
}
