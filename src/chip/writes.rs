//! Typed chip register writes, for recording and testing.
//!
//! Each chip's register writes are modeled as a distinct Rust type rather
//! than a bare `(u8, u8)` pair, to make trace output and test assertions
//! self-describing.

use crate::chip::sinks::{FmSink, MixerSink, PsgSink, PulseSink, SpeechSink};

/// One write observed on any of the engine's chip ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipWrite {
    /// A PSG register write.
    Psg {
        /// Register index 0..8 (AUDF1..4, AUDC1..4, AUDCTL).
        register: u8,
        /// Value written.
        value: u8,
    },
    /// An FM register write.
    Fm {
        /// Register index 0..255.
        register: u8,
        /// Value written.
        value: u8,
    },
    /// A speech data byte.
    Speech(u8),
    /// A speech oscillator ("squeak") pitch write.
    SpeechSqueak(u8),
    /// A coarse mixer write.
    Mixer(u8),
}

/// A recording sink that accumulates every write it observes, for use in
/// tests and by the CLI's `--trace` flag.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    /// All writes observed so far, in emission order.
    pub writes: Vec<ChipWrite>,
}

impl RecordingSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all recorded writes.
    pub fn clear(&mut self) {
        self.writes.clear();
    }
}

impl PsgSink for RecordingSink {
    fn write(&mut self, register: u8, value: u8) {
        self.writes.push(ChipWrite::Psg { register, value });
    }
}

impl FmSink for RecordingSink {
    fn ready(&self) -> bool {
        true
    }

    fn write(&mut self, register: u8, value: u8) {
        self.writes.push(ChipWrite::Fm { register, value });
    }
}

impl SpeechSink for RecordingSink {
    fn ready(&self) -> bool {
        true
    }

    fn write(&mut self, byte: u8) {
        self.writes.push(ChipWrite::Speech(byte));
    }

    fn set_squeak(&mut self, value: u8) {
        self.writes.push(ChipWrite::SpeechSqueak(value));
    }
}

impl MixerSink for RecordingSink {
    fn write(&mut self, value: u8) {
        self.writes.push(ChipWrite::Mixer(value));
    }
}

impl PulseSink for RecordingSink {
    fn pulse(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_writes_in_order() {
        let mut sink = RecordingSink::new();
        PsgSink::write(&mut sink, 0, 0x1c);
        FmSink::write(&mut sink, 0x20, 0xc0);
        SpeechSink::write(&mut sink, 0x42);
        assert_eq!(
            sink.writes,
            vec![
                ChipWrite::Psg {
                    register: 0,
                    value: 0x1c
                },
                ChipWrite::Fm {
                    register: 0x20,
                    value: 0xc0
                },
                ChipWrite::Speech(0x42),
            ]
        );
    }
}
