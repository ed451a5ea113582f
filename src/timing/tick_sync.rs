//! Tick-rate synchronization.
//!
//! Tracks the engine's position within the sub-tick schedule (`spec.md`
//! §4.9, §5): the speech streamer runs 4x per tick, so this clocks at that
//! finer rate and reports when a full tick boundary has been crossed,
//! together with the elapsed tick/second position for trace logging.

use super::TimingConfig;

/// Sub-tick synchronizer.
#[derive(Debug, Clone)]
pub struct TickSync {
    config: TimingConfig,
    /// Sub-ticks seen since the last full tick boundary.
    subtick_count: u32,
    /// Total full ticks elapsed.
    tick_count: u64,
    /// Sub-ticks remaining until the next tick boundary.
    subticks_until_tick: u32,
}

impl TickSync {
    /// Create a new synchronizer for the given timing configuration.
    pub fn new(config: TimingConfig) -> Self {
        let subticks_per_tick = config.speech_subticks_per_tick();
        TickSync {
            config,
            subtick_count: 0,
            tick_count: 0,
            subticks_until_tick: subticks_per_tick,
        }
    }

    /// Clock the synchronizer by one sub-tick.
    /// Returns `true` if a full tick boundary was crossed.
    pub fn clock(&mut self) -> bool {
        self.subtick_count += 1;
        self.subticks_until_tick = self.subticks_until_tick.saturating_sub(1);

        if self.subticks_until_tick == 0 {
            self.tick_count += 1;
            self.subticks_until_tick = self.config.speech_subticks_per_tick();
            true
        } else {
            false
        }
    }

    /// Sub-ticks seen since the synchronizer was created or reset.
    pub fn get_subtick_count(&self) -> u32 {
        self.subtick_count
    }

    /// Total full ticks elapsed.
    pub fn get_tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Sub-ticks remaining until the next tick boundary.
    pub fn get_subticks_until_tick(&self) -> u32 {
        self.subticks_until_tick
    }

    /// Reset the synchronizer to tick zero.
    pub fn reset(&mut self) {
        self.subtick_count = 0;
        self.tick_count = 0;
        self.subticks_until_tick = self.config.speech_subticks_per_tick();
    }

    /// The timing configuration driving this synchronizer.
    pub fn get_config(&self) -> &TimingConfig {
        &self.config
    }

    /// Replace the timing configuration, restarting the sub-tick countdown.
    pub fn set_config(&mut self, config: TimingConfig) {
        self.config = config;
        self.subticks_until_tick = config.speech_subticks_per_tick();
    }

    /// Elapsed wall-clock time in seconds, assuming ticks run at
    /// `config.tick_rate_hz`.
    pub fn get_elapsed_time(&self) -> f64 {
        let subticks_per_tick = self.config.speech_subticks_per_tick() as f64;
        (self.subtick_count as f64) / subticks_per_tick / self.config.tick_rate_hz
    }

    /// Current playback position in whole ticks.
    pub fn get_playback_tick(&self) -> u64 {
        self.tick_count + (self.subtick_count / self.config.speech_subticks_per_tick()) as u64
    }
}

impl Default for TickSync {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sync_starts_at_tick_zero() {
        let sync = TickSync::default();
        assert_eq!(sync.get_tick_count(), 0);
    }

    #[test]
    fn fourth_subtick_crosses_a_tick_boundary() {
        let config = TimingConfig { tick_rate_hz: 245.0 };
        let mut sync = TickSync::new(config);
        let subticks_per_tick = config.speech_subticks_per_tick();

        let mut crossed = false;
        for _ in 0..subticks_per_tick {
            if sync.clock() {
                crossed = true;
                break;
            }
        }

        assert!(crossed);
        assert_eq!(sync.get_tick_count(), 1);
    }

    #[test]
    fn elapsed_time_matches_nominal_tick_rate() {
        let mut sync = TickSync::default();
        for _ in 0..(4 * 245) {
            sync.clock();
        }
        assert!((sync.get_elapsed_time() - 1.0).abs() < 1e-9);
    }
}
