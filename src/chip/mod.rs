//! Register sink adapters (`spec.md` §4.1).

pub mod sinks;
pub mod writes;

pub use sinks::{FmSink, MixerSink, NullSink, PsgSink, PulseSink, SpeechSink};
pub use writes::{ChipWrite, RecordingSink};
