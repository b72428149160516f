//! Fixed-rate tick pacing for the server loop.

use std::time::{Duration, Instant};

use tracing::warn;

/// How far the loop may fall behind before the schedule is reset instead of
/// running ticks back to back.
pub const MAX_LAG: Duration = Duration::from_millis(250);

pub struct TickClock {
    period: Duration,
    next: Instant,
    ticks: u64,
    overruns: u64,
}

impl TickClock {
    /// A clock running `tps` ticks per second, first tick due now.
    pub fn new(tps: u32) -> Self {
        Self::starting_at(tps, Instant::now())
    }

    pub fn starting_at(tps: u32, now: Instant) -> Self {
        let period = Duration::from_secs(1) / tps.max(1);
        Self {
            period,
            next: now,
            ticks: 0,
            overruns: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Seconds simulated by one tick.
    pub fn dt(&self) -> f32 {
        self.period.as_secs_f32()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Times the schedule was reset because the loop fell too far behind.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Advance the schedule by one tick and return how long to wait from
    /// `now` until it is due.
    pub fn schedule(&mut self, now: Instant) -> Duration {
        self.ticks += 1;
        self.next += self.period;

        if now > self.next {
            let behind = now - self.next;
            if behind > MAX_LAG {
                warn!(
                    "Tick loop is {:.1}ms behind, skipping ahead",
                    behind.as_secs_f64() * 1000.0
                );
                self.overruns += 1;
                self.next = now;
            }
            return Duration::ZERO;
        }
        self.next - now
    }

    /// Sleep until the next tick is due.
    pub fn wait(&mut self) {
        let sleep = self.schedule(Instant::now());
        if !sleep.is_zero() {
            std::thread::sleep(sleep);
        }
    }
}
