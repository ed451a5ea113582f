//! Portable reimplementation of an arcade sound coprocessor's
//! sequencer/synthesizer firmware: a bytecoded per-channel VM, a 30-channel
//! priority allocator, a frequency/volume envelope pipeline, an alternating
//! POKEY/YM2151 register writer, and a TMS5220 speech/music streaming queue
//! (`spec.md` §1, §2).
//!
//! The crate never decodes audio or touches real hardware: it only computes
//! the register writes the original firmware would have made, and hands
//! them to caller-supplied [`chip`] sink implementations. This mirrors
//! `spec.md` §1's explicit non-goal — "does not synthesize audio" — while
//! keeping every other piece of the firmware's behavior, including its
//! quirks, intact.
//!
//! The [`Engine`] facade is the crate's single entry point for embedders;
//! the `soundrom-engine` binary (`src/bin/soundrom_engine.rs`) is a thin CLI
//! driver built on top of it.

pub mod allocator;
pub mod channel;
pub mod chip;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fm;
pub mod ingress;
pub mod psg;
pub mod rom;
pub mod router;
pub mod speech;
pub mod timing;
pub mod vm;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, ErrorFlags, Result};
pub use rom::RomImage;
