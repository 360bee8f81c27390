//! Rolling frame statistics

use std::time::{Duration, Instant};

/// Fixed-capacity window of the most recent samples.
#[derive(Debug, Clone)]
pub struct Window {
    samples: Vec<Duration>,
    capacity: usize,
    index: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            index: 0,
        }
    }

    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.index] = sample;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }

    pub fn min_max(&self) -> (Duration, Duration) {
        let min = self.samples.iter().min().copied().unwrap_or_default();
        let max = self.samples.iter().max().copied().unwrap_or_default();
        (min, max)
    }
}

/// Frame-to-frame intervals and decode cost, reported at debug level.
#[derive(Debug, Clone)]
pub struct FrameStats {
    intervals: Window,
    decode: Window,
    last_frame: Option<Instant>,
    skipped: u64,
}

impl FrameStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            intervals: Window::new(capacity),
            decode: Window::new(capacity),
            last_frame: None,
            skipped: 0,
        }
    }

    /// Record a presented frame that started at `at` and took `cost` to decode.
    pub fn record(&mut self, at: Instant, cost: Duration) {
        if let Some(last) = self.last_frame {
            self.intervals.push(at.saturating_duration_since(last));
        }
        self.last_frame = Some(at);
        self.decode.push(cost);
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn fps(&self) -> f64 {
        let avg = self.intervals.average().as_secs_f64();
        if avg > 0.0 {
            1.0 / avg
        } else {
            0.0
        }
    }

    pub fn frame_time_ms(&self) -> f64 {
        self.intervals.average().as_secs_f64() * 1000.0
    }

    pub fn frame_time_range_ms(&self) -> (f64, f64) {
        let (min, max) = self.intervals.min_max();
        (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0)
    }

    pub fn decode_ms(&self) -> f64 {
        self.decode.average().as_secs_f64() * 1000.0
    }

    pub fn report(&self) {
        let (min_ms, max_ms) = self.frame_time_range_ms();
        tracing::debug!(
            fps = format_args!("{:.1}", self.fps()),
            frame_ms = format_args!("{:.2}", self.frame_time_ms()),
            min_ms = format_args!("{min_ms:.2}"),
            max_ms = format_args!("{max_ms:.2}"),
            decode_ms = format_args!("{:.3}", self.decode_ms()),
            skipped = self.skipped,
            "frame stats"
        );
    }
}
