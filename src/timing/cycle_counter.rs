//! Tick counting.
//!
//! Tracks how many engine ticks have elapsed since the last reset, counting
//! ticks instead of CPU cycles since this engine never emulates a CPU
//! (`spec.md` §1).

/// Monotonic tick counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleCounter {
    ticks: u64,
}

impl CycleCounter {
    /// Create a new counter at zero.
    pub fn new() -> Self {
        CycleCounter { ticks: 0 }
    }

    /// Advance by one tick.
    pub fn clock(&mut self) {
        self.ticks += 1;
    }

    /// Advance by `n` ticks.
    pub fn advance(&mut self, n: u64) {
        self.ticks += n;
    }

    /// Current tick count.
    pub fn get_ticks(&self) -> u64 {
        self.ticks
    }

    /// Reset to zero.
    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    /// Read the current count and reset to zero in one step.
    pub fn take_and_reset(&mut self) -> u64 {
        let result = self.ticks;
        self.ticks = 0;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_ticks() {
        let mut counter = CycleCounter::new();
        assert_eq!(counter.get_ticks(), 0);

        counter.clock();
        assert_eq!(counter.get_ticks(), 1);

        counter.advance(99);
        assert_eq!(counter.get_ticks(), 100);
    }

    #[test]
    fn take_and_reset_drains_the_counter() {
        let mut counter = CycleCounter::new();
        counter.advance(42);
        assert_eq!(counter.take_and_reset(), 42);
        assert_eq!(counter.get_ticks(), 0);
    }
}
