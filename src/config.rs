//! Engine configuration.

/// Tunables for [`crate::engine::Engine`].
///
/// Constructed directly by library consumers, or by the CLI frontend from
/// its flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of busy-wait polls before forcing an FM register write
    /// through and setting [`crate::error::ErrorFlags::FM_BUSY_TIMEOUT`].
    ///
    /// `spec.md` §5 fixes this at 255 for the original hardware.
    pub fm_busy_poll_budget: u16,

    /// Maximum number of frames a single channel may consume from its
    /// sequence within one tick before the engine treats it as a pathological
    /// non-yielding sequence (`spec.md` §7).
    pub per_tick_opcode_budget: u8,

    /// Nominal tick rate, `spec.md` §5 ("~245 Hz, video-derived").
    pub timing: crate::timing::TimingConfig,

    /// Minimum base-volume gate used by the POKEY mixer's primary-vs-secondary
    /// "louder wins" comparison (`spec.md` §4.7, §9.2 `music_filter_threshold`
    /// open question — treated as a volume floor below which a channel never
    /// outvotes its pair partner).
    pub music_filter_threshold: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fm_busy_poll_budget: 255,
            per_tick_opcode_budget: 8,
            timing: crate::timing::TimingConfig::default(),
            music_filter_threshold: 0,
        }
    }
}
