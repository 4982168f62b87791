//! Fixed-rate tick scheduling on top of a jittery frame callback.

use std::time::{Duration, Instant};

/// Upper bound on ticks emitted by a single frame.
pub const MAX_TICKS_PER_FRAME: u32 = 8;

/// Drift-corrected accumulator.
///
/// Elapsed frame time is accumulated and spent in whole tick intervals, so the
/// long-run tick rate matches the target regardless of when frames arrive.
/// Leftover time carries into the next frame. After a stall the backlog is
/// capped at [`MAX_TICKS_PER_FRAME`] intervals instead of being replayed.
#[derive(Debug, Clone)]
pub struct TickClock {
    interval: Duration,
    accumulator: Duration,
    last: Option<Instant>,
}

impl TickClock {
    /// Clock ticking `rate` times per second.
    pub fn new(rate: f32) -> Self {
        let rate = if rate.is_finite() { rate.clamp(1e-3, 1e6) } else { 60.0 };
        Self {
            interval: Duration::from_secs_f64(1.0 / rate as f64),
            accumulator: Duration::ZERO,
            last: None,
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forget accumulated time; the next `advance` starts a new measurement.
    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
        self.last = None;
    }

    /// Account for the frame at `now` and return how many ticks are due.
    pub fn advance(&mut self, now: Instant) -> u32 {
        let Some(last) = self.last.replace(now) else {
            return 0;
        };

        self.accumulator += now.saturating_duration_since(last);
        let cap = self.interval * MAX_TICKS_PER_FRAME;
        if self.accumulator > cap {
            log::warn!(
                "frame clock fell {:?} behind, dropping backlog beyond {} ticks",
                self.accumulator - cap,
                MAX_TICKS_PER_FRAME
            );
            self.accumulator = cap;
        }

        let ticks = (self.accumulator.as_nanos() / self.interval.as_nanos().max(1)) as u32;
        self.accumulator -= self.interval * ticks;
        ticks
    }
}
