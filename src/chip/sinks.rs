//! Register sink traits: write-only interfaces to the three external chip
//! models (`spec.md` §4.1, §6.3).
//!
//! Each sink is a plain register-write consumer: instead of one trait that
//! both accepts register writes and produces samples, the engine
//! never simulates chip DSP itself (that is explicitly out of scope, §1), so
//! each sink is a thin, `Send`-bound, write-only interface that a consumer
//! wires up to its own chip model, trace logger, or register-write recorder.

/// Write-only interface to the PSG (POKEY-style) chip.
///
/// Registers are AUDF1..AUDF4 (0..3), AUDC1..AUDC4 (4..7), AUDCTL (8).
/// Writes never fail; there is no ready/busy predicate.
pub trait PsgSink: Send {
    /// Write one PSG register.
    fn write(&mut self, register: u8, value: u8);
}

/// Write-only interface to the FM (YM2151-style) chip.
///
/// The FM chip exposes a ready/busy predicate that the writer must honor
/// before every write (`spec.md` §4.1, §4.8).
pub trait FmSink: Send {
    /// True when the chip is ready to accept the next register write.
    fn ready(&self) -> bool;

    /// Write one FM register. Callers are expected to have polled
    /// [`FmSink::ready`] first; see [`crate::fm::FmWriter`] for the
    /// busy-wait/timeout policy.
    fn write(&mut self, register: u8, value: u8);
}

/// Write-only interface to the TMS5220-style speech synthesizer.
pub trait SpeechSink: Send {
    /// True when the chip is ready to accept the next LPC byte.
    fn ready(&self) -> bool;

    /// Stream one LPC byte to the chip.
    fn write(&mut self, byte: u8);

    /// Write the "squeak" register, changing the oscillator pitch
    /// (`spec.md` §9.1).
    fn set_squeak(&mut self, value: u8) {
        let _ = value;
    }
}

/// Write-only interface to the coarse three-way volume mixer
/// (`spec.md` §4.3 Type 13, §6.3).
pub trait MixerSink: Send {
    /// Write the combined speech/effects/music volume byte.
    fn write(&mut self, value: u8);
}

/// A value-less reset or IRQ-acknowledge pulse sink (`spec.md` §4.1).
pub trait PulseSink: Send {
    /// Pulse the line once.
    fn pulse(&mut self);
}

/// A no-op sink used in tests and as a default for ports a caller does not
/// care to observe.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PsgSink for NullSink {
    fn write(&mut self, _register: u8, _value: u8) {}
}

impl FmSink for NullSink {
    fn ready(&self) -> bool {
        true
    }
    fn write(&mut self, _register: u8, _value: u8) {}
}

impl SpeechSink for NullSink {
    fn ready(&self) -> bool {
        true
    }
    fn write(&mut self, _byte: u8) {}
}

impl MixerSink for NullSink {
    fn write(&mut self, _value: u8) {}
}

impl PulseSink for NullSink {
    fn pulse(&mut self) {}
}
