//! Error types for the sound engine.
//!
//! The engine distinguishes **fatal data errors**, which abort an operation
//! and are returned as `Err`, from **recoverable engine errors**, which are
//! recorded as bits in [`ErrorFlags`] and never unwind a tick (`spec.md` §7).

use bitflags::bitflags;

/// Fatal errors that can be returned by ROM loading or a tick.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The supplied ROM image was not the expected size.
    #[error("ROM size mismatch: expected {expected} bytes, got {actual}")]
    RomSize {
        /// Expected ROM size in bytes.
        expected: usize,
        /// Size of the image that was actually supplied.
        actual: usize,
    },

    /// A table offset or pointer resolved outside the ROM image during load.
    #[error("ROM table layout error: {0}")]
    RomLayout(String),

    /// An envelope table lacked a valid terminator/loop pair.
    #[error("envelope table overrun at {address:#06x}")]
    EnvelopeOverrun {
        /// Address at which the overrun was detected.
        address: u16,
    },

    /// A channel's sequence never yielded a frame within the per-tick budget.
    #[error("channel {channel} exceeded its per-tick opcode budget")]
    TickBudgetExceeded {
        /// Index of the offending channel.
        channel: usize,
    },
}

/// Result type for fallible engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

bitflags! {
    /// Process-level recoverable error flags (`spec.md` §6.2, §7).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorFlags: u8 {
        /// RAM self-test failure. Set externally; the core engine never sets
        /// this bit itself but exposes it for the host status byte.
        const RAM_SELF_TEST_FAILED = 0b0000_0001;
        /// The FM busy-wait predicate never went ready within the poll budget.
        const FM_BUSY_TIMEOUT = 0b0000_0010;
        /// A general error occurred (e.g. a per-tick opcode budget was hit).
        const GENERAL_ERROR = 0b0000_0100;
        /// The host egress (output) ring overflowed and a byte was dropped.
        const HOST_EGRESS_OVERFLOW = 0b0000_1000;
    }
}

impl Default for ErrorFlags {
    fn default() -> Self {
        ErrorFlags::empty()
    }
}
