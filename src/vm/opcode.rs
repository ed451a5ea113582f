//! The 59-entry opcode set (`spec.md` §4.5.4, §3.5 "Opcode jump table").
//!
//! Two opcodes (`0xAE`, `0xAF`) are variable-length: their argument count
//! depends on a classified variable's runtime value (`spec.md` §9.1,
//! "Jump-table opcode interpreter with variable-length opcodes"). Every
//! other opcode in `0x80..=0xBA` has a fixed argument count of 0, 1, 2 or 3.

/// Every opcode byte in `0x80..=0xBA` (`spec.md` §3.5, §4.5.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    SetTempo,
    AddTempo,
    SetVolume,
    SetVolumeOrDetune,
    AddTranspose,
    NoOpIfFinished,
    SetFreqEnvPtr,
    SetVolEnvPtr,
    ResetTimers,
    SetLoopCounter,
    SetDistortionMask,
    OrCtlBits,
    AndOrCtlBits,
    PushSegment,
    PushAuxSegment,
    PopSegment,
    ModeToPsg,
    ModeToFm,
    Padding,
    HostOutput,
    ResetEnvelopes,
    AbsoluteJump,
    SubmitCommand,
    VarStore,
    ModeForcePsg,
    VoiceLoad,
    FmEnvParams,
    FmRegisterBlock,
    AluFreqOffset,
    AluDetuneNegate,
    AluOr,
    AluXor,
    VarPairLoad,
    ShiftNop,
    ShiftLeft,
    FreqAdd,
    SetReleaseRate,
    VarAdd,
    VarSub,
    VarAnd,
    VarOr,
    VarXor,
    /// `0xAE`: if the classified variable is 0, consume a 16-bit pointer and
    /// jump; otherwise skip `2 * var` bytes, then load the pointer.
    IndexedJump,
    /// `0xAF`: as `IndexedJump`, additionally incrementing the variable.
    IndexedJumpAndIncrement,
    VarReadToRegister,
    VarApply,
    VarClassify,
    VarShiftRight,
    VarShiftLeft,
    BranchIfEqual,
    BranchIfNotEqual,
    BranchIfPlus,
    BranchIfMinus,
    VarSubAssign,
    VarSubStore,
}

impl Opcode {
    /// Decode an opcode byte in `0x80..=0xBA`. Bytes `< 0x80` are notes;
    /// bytes `>= 0xBB` are end-of-sequence — neither is an opcode, so this
    /// returns `None` for anything out of range.
    pub fn decode(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x80 => SetTempo,
            0x81 => AddTempo,
            0x82 => SetVolume,
            0x83 => SetVolumeOrDetune,
            0x84 => AddTranspose,
            0x85 => NoOpIfFinished,
            0x86 => SetFreqEnvPtr,
            0x87 => SetVolEnvPtr,
            0x88 => ResetTimers,
            0x89 => SetLoopCounter,
            0x8A => SetDistortionMask,
            0x8B => OrCtlBits,
            0x8C => AndOrCtlBits,
            0x8D => PushSegment,
            0x8E => PushAuxSegment,
            0x8F => PopSegment,
            0x90 => ModeToPsg,
            0x91 => ModeToFm,
            0x92..=0x95 => Padding,
            0x96 => HostOutput,
            0x97 => ResetEnvelopes,
            0x98 => Padding,
            0x99 => AbsoluteJump,
            0x9A => SubmitCommand,
            0x9B => VarStore,
            0x9C => ModeForcePsg,
            0x9D => VoiceLoad,
            0x9E => FmEnvParams,
            0x9F => FmRegisterBlock,
            0xA0 => AluFreqOffset,
            0xA1 => AluDetuneNegate,
            0xA2 => AluOr,
            0xA3 => AluXor,
            0xA4 => VarPairLoad,
            0xA5 => ShiftNop,
            0xA6 => ShiftLeft,
            0xA7 => FreqAdd,
            0xA8 => SetReleaseRate,
            0xA9 => VarAdd,
            0xAA => VarSub,
            0xAB => VarAnd,
            0xAC => VarOr,
            0xAD => VarXor,
            0xAE => IndexedJump,
            0xAF => IndexedJumpAndIncrement,
            0xB0 => VarReadToRegister,
            0xB1 => VarApply,
            0xB2 => VarClassify,
            0xB3 => VarShiftRight,
            0xB4 => VarShiftLeft,
            0xB5 => BranchIfEqual,
            0xB6 => BranchIfNotEqual,
            0xB7 => BranchIfPlus,
            0xB8 => BranchIfMinus,
            0xB9 => VarSubAssign,
            0xBA => VarSubStore,
            _ => return None,
        })
    }

    /// Fixed argument byte count, or `None` for the two variable-length
    /// opcodes (see [`Opcode::variable_arg_count`]).
    pub fn fixed_arg_count(self) -> Option<usize> {
        use Opcode::*;
        Some(match self {
            NoOpIfFinished | ResetTimers | PopSegment | ModeToPsg | ModeToFm | Padding
            | ResetEnvelopes | ModeForcePsg | ShiftNop => 0,
            SetTempo | AddTempo | SetVolume | SetVolumeOrDetune | AddTranspose
            | SetLoopCounter | SetDistortionMask | OrCtlBits | HostOutput | SubmitCommand
            | AluFreqOffset | AluDetuneNegate | AluOr | AluXor | ShiftLeft | FreqAdd
            | SetReleaseRate | VarReadToRegister | VarApply | VarClassify | VarShiftRight
            | VarShiftLeft => 1,
            SetFreqEnvPtr | SetVolEnvPtr | AndOrCtlBits | PushSegment | PushAuxSegment
            | AbsoluteJump | VarStore | VoiceLoad | FmEnvParams | FmRegisterBlock
            | VarPairLoad | VarAdd | VarSub | VarAnd | VarOr | VarXor | VarSubAssign
            | VarSubStore => 2,
            BranchIfEqual | BranchIfNotEqual | BranchIfPlus | BranchIfMinus => 3,
            IndexedJump | IndexedJumpAndIncrement => return None,
        })
    }

    /// Total argument byte count for the two variable-length opcodes, given
    /// the classified variable's current value (`spec.md` §4.5.4, §9.1):
    /// `2 + 2 * var` when `var != 0` (skip-and-load), `2` when `var == 0`
    /// (pointer immediately follows).
    pub fn variable_arg_count(self, var: u8) -> usize {
        debug_assert!(matches!(
            self,
            Opcode::IndexedJump | Opcode::IndexedJumpAndIncrement
        ));
        if var == 0 {
            2
        } else {
            2 + 2 * var as usize
        }
    }

    /// Argument byte count, resolving the variable-length case via `var`.
    pub fn arg_count(self, var: u8) -> usize {
        self.fixed_arg_count()
            .unwrap_or_else(|| self.variable_arg_count(var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_opcode_range() {
        for byte in 0x80u16..=0xBA {
            assert!(Opcode::decode(byte as u8).is_some(), "{byte:#04x} should decode");
        }
        assert!(Opcode::decode(0x7F).is_none());
        assert!(Opcode::decode(0xBB).is_none());
    }

    #[test]
    fn variable_length_opcode_skips_2n_bytes_when_nonzero() {
        assert_eq!(Opcode::IndexedJump.arg_count(0), 2);
        assert_eq!(Opcode::IndexedJump.arg_count(3), 8);
    }

    #[test]
    fn classified_branch_opcodes_take_three_args() {
        assert_eq!(Opcode::BranchIfEqual.fixed_arg_count(), Some(3));
        assert_eq!(Opcode::BranchIfMinus.fixed_arg_count(), Some(3));
    }
}
