use std::cell::Cell;
use std::time::{Duration, Instant};

/// Source of monotonic time for the retry schedule.
///
/// Readings never decrease for the lifetime of the process and are unrelated
/// to wall-clock time. The schedule only ever reads the clock; swapping in a
/// [`ManualClock`] makes every scheduling decision deterministic.
pub trait Clock {
    /// Current monotonic time in microseconds.
    fn monotonic_micros(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn monotonic_micros(&self) -> u64 {
        (**self).monotonic_micros()
    }
}

/// Monotonic time as measured by the operating system, counted from the
/// moment the clock was created.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn monotonic_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Clock that only moves when told to. Intended for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.micros.set(self.micros.get() + d.as_micros() as u64);
    }
}

impl Clock for ManualClock {
    fn monotonic_micros(&self) -> u64 {
        self.micros.get()
    }
}
