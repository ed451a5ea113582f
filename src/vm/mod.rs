//! The per-channel bytecode virtual machine (`spec.md` §4.5).
//!
//! A sequence is a byte stream of frames: note bytes (`0x00..=0x7F`),
//! opcodes (`0x80..=0xBA`), or end-of-sequence markers (`0xBB..=0xFF`). The
//! VM is entered once per channel per tick, after timer decrement, when the
//! primary timer has reached zero; it then reads frames until a note frame
//! sets a new primary timer (yielding the channel for this tick), an
//! end-of-sequence byte terminates the channel, or a per-tick frame budget
//! is exceeded (`spec.md` §7: "a pathological sequence that never yields a
//! frame must be detected by a per-tick budget").

pub mod opcode;
pub mod variable;

use crate::channel::{ActiveCommand, Channel, HwType};
use crate::error::{EngineError, ErrorFlags, Result};
use crate::rom::RomImage;
use opcode::Opcode;
use variable::{classify, Scratch};

/// Minimum per-tick frame budget (`spec.md` §7: "≥8 frames per channel per
/// tick").
pub const MIN_FRAME_BUDGET: u8 = 8;

/// Side effects a VM step wants the caller (engine tick loop) to apply
/// after the channel has been stepped. Kept out-of-band rather than called
/// back into directly, since they touch state (ingress, other channels)
/// the VM itself does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmEffect {
    /// Opcode `0x96`: push a byte to the host egress ring.
    HostEgress(u8),
    /// Opcode `0x9A`: recursively invoke the command router.
    SubmitCommand(u8),
    /// Opcode `0x9D`: load the 4-operator FM voice at this ROM pointer
    /// (`spec.md` §4.8 "Voice load"). Deferred to the FM writer, which is
    /// the only place that knows the physical FM channel number and holds
    /// the shadow/sink/error-flags this needs.
    VoiceLoad(u16),
}

/// Outcome of stepping one channel's VM for this tick.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub effects: Vec<VmEffect>,
    /// Set when an end-of-sequence byte (`>= 0xBB`) was read.
    pub terminated: bool,
}

/// Decode byte1 of a note frame (`spec.md` §4.5.1).
#[derive(Debug, Clone, Copy)]
struct NoteByte1 {
    duration_index: u8,
    secondary_div: u8,
    dotted: bool,
    sustain: bool,
}

impl NoteByte1 {
    fn decode(byte: u8) -> Self {
        Self {
            duration_index: byte & 0x0F,
            secondary_div: (byte >> 4) & 0x03,
            dotted: byte & 0x40 != 0,
            sustain: byte & 0x80 != 0,
        }
    }
}

/// Step a single channel's VM for one tick. Caller is responsible for
/// decrementing `primary_timer`/`secondary_timer` by `tempo` beforehand and
/// for only calling this when `channel.primary_timer == 0` (`spec.md`
/// §4.5.2).
pub fn step(
    channel: &mut Channel,
    rom: &RomImage,
    scratch: &mut Scratch,
    random_byte: u8,
    error_flags: &mut ErrorFlags,
    frame_budget: u8,
) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::default();
    let mut frames_read: u8 = 0;

    loop {
        if frames_read >= frame_budget.max(MIN_FRAME_BUDGET) {
            error_flags.insert(ErrorFlags::GENERAL_ERROR);
            return Err(EngineError::TickBudgetExceeded {
                channel: channel.index as usize,
            });
        }
        frames_read += 1;

        let byte0 = rom.read_u8(channel.seq_ptr)?;

        if byte0 >= 0xBB {
            terminate_naturally(channel);
            outcome.terminated = true;
            return Ok(outcome);
        }

        if byte0 < 0x80 {
            read_note_frame(channel, rom, byte0)?;
            return Ok(outcome);
        }

        let op = Opcode::decode(byte0).expect("0x80..=0xBA always decodes");
        let continue_reading = execute_opcode(channel, rom, scratch, random_byte, op, &mut outcome)?;
        if !continue_reading {
            return Ok(outcome);
        }
    }
}

fn terminate_naturally(channel: &mut Channel) {
    channel.active_command = ActiveCommand::FinishedSentinel;
    channel.status_live = false;
    channel.vol_env = Default::default();
    channel.freq_env = Default::default();
    channel.note = 0;
    channel.base_freq = 0;
}

fn read_note_frame(channel: &mut Channel, rom: &RomImage, note: u8) -> Result<()> {
    channel.seq_ptr = channel.seq_ptr.wrapping_add(1);
    let byte1 = rom.read_u8(channel.seq_ptr)?;
    channel.seq_ptr = channel.seq_ptr.wrapping_add(1);

    if byte1 == 0x00 {
        // Channel-chain: load the next segment from the pushed-segment
        // pointer (`spec.md` §4.5.1).
        channel.seq_ptr = channel.chain_ptr_a;
        return Ok(());
    }

    let decoded = NoteByte1::decode(byte1);
    channel.note = note;
    channel.base_freq = rom.fm_frequency(note);

    let base_duration = rom.duration(decoded.duration_index);
    let duration = if decoded.dotted {
        base_duration + base_duration / 2
    } else {
        base_duration
    };
    let tempo = channel.tempo.max(1) as u16;
    channel.primary_timer = duration / tempo;

    channel.secondary_timer = if decoded.sustain {
        0x7F
    } else {
        let shift = match decoded.secondary_div {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 3,
        };
        channel.primary_timer >> shift
    };

    Ok(())
}

/// Execute one opcode. Returns `true` if the frame loop should continue
/// reading within the same tick, `false` if the channel should yield.
fn execute_opcode(
    channel: &mut Channel,
    rom: &RomImage,
    scratch: &mut Scratch,
    random_byte: u8,
    op: Opcode,
    outcome: &mut StepOutcome,
) -> Result<bool> {
    use Opcode::*;

    // Resolve the variable-length opcodes' argument count up front, reading
    // the classifier selector byte that always immediately follows them.
    let (args, advance) = read_args(channel, rom, scratch, random_byte, op)?;
    channel.seq_ptr = channel.seq_ptr.wrapping_add(advance);

    match op {
        SetTempo => channel.tempo = (args[0] >> 2).max(1),
        AddTempo => channel.tempo = channel.tempo.saturating_add(args[0]),
        SetVolume => channel.base_volume = args[0] & 0x0F,
        SetVolumeOrDetune => {
            if matches!(channel.hw_type, HwType::Fm) && !matches!(channel.active_command, ActiveCommand::SpecialMarker) {
                channel.reg = args[0];
            } else if !matches!(channel.active_command, ActiveCommand::SpecialMarker) {
                channel.base_volume = args[0] & 0x0F;
            }
        }
        AddTranspose => channel.transpose = channel.transpose.wrapping_add(args[0] as i8),
        NoOpIfFinished => {
            if matches!(channel.active_command, ActiveCommand::FinishedSentinel) {
                return Ok(false);
            }
        }
        SetFreqEnvPtr => {
            channel.freq_env.ptr = u16::from_le_bytes([args[0], args[1]]);
            channel.freq_env.pos = channel.freq_env.ptr;
            channel.freq_env.finished = false;
        }
        SetVolEnvPtr => {
            channel.vol_env.ptr = u16::from_le_bytes([args[0], args[1]]);
            channel.vol_env.pos = channel.vol_env.ptr;
            channel.vol_env.finished = false;
        }
        ResetTimers => {
            channel.primary_timer = 0;
            channel.secondary_timer = 0;
        }
        SetLoopCounter => channel.freq_env.loop_count = args[0],
        SetDistortionMask => channel.vol_env.dist_mask = args[0],
        OrCtlBits => channel.ctl_or_bits |= args[0],
        AndOrCtlBits => {
            channel.ctl_and_mask &= args[0];
            channel.ctl_or_bits |= args[1];
        }
        PushSegment => {
            channel.chain_ptr_a = channel.seq_ptr;
            channel.seq_ptr = u16::from_le_bytes([args[0], args[1]]);
            channel.chain_depth = channel.chain_depth.saturating_add(1);
        }
        PushAuxSegment => {
            channel.chain_ptr_b = channel.seq_ptr;
            channel.seq_ptr = u16::from_le_bytes([args[0], args[1]]);
        }
        PopSegment => {
            channel.seq_ptr = channel.chain_ptr_a;
            channel.chain_depth = channel.chain_depth.saturating_sub(1);
        }
        ModeToPsg => channel.hw_type = HwType::Psg,
        ModeToFm => channel.hw_type = HwType::Fm,
        Padding => {}
        HostOutput => outcome.effects.push(VmEffect::HostEgress(args[0])),
        ResetEnvelopes => {
            channel.vol_env = Default::default();
            channel.freq_env = Default::default();
            channel.active_command = ActiveCommand::SpecialMarker;
        }
        AbsoluteJump => channel.seq_ptr = u16::from_le_bytes([args[0], args[1]]),
        SubmitCommand => outcome.effects.push(VmEffect::SubmitCommand(args[0])),
        VarStore => classify(args[0]).set(channel, scratch, args[1]),
        ModeForcePsg => {
            channel.hw_type = HwType::Psg;
            channel.reg = 0;
        }
        VoiceLoad => {
            outcome.effects.push(VmEffect::VoiceLoad(u16::from_le_bytes([args[0], args[1]])));
        }
        FmEnvParams => {
            channel.freq_env.rate = args[0] as u16;
            channel.vol_env.dist_shape = args[1];
        }
        FmRegisterBlock => {
            let base = u16::from_le_bytes([args[0], args[1]]).wrapping_add(0x29);
            channel.reg = rom.read_u8(base)?;
        }
        AluFreqOffset => channel.base_freq = channel.base_freq.wrapping_add(args[0] as u16),
        AluDetuneNegate => channel.reg = (args[0] as i8).wrapping_neg() as u8,
        AluOr => channel.reg |= args[0],
        AluXor => channel.reg ^= args[0],
        VarPairLoad => {
            classify(args[0] & 0x3F).set(channel, scratch, args[1]);
        }
        ShiftNop => {}
        ShiftLeft => channel.reg <<= args[0].min(7),
        FreqAdd => {
            channel.portamento = channel.portamento.wrapping_add(args[0] as i8 as i16);
        }
        SetReleaseRate => channel.vol_env.mod_accum = args[0],
        VarAdd => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur.wrapping_add(args[1]));
        }
        VarSub => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur.wrapping_sub(args[1]));
        }
        VarAnd => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur & args[1]);
        }
        VarOr => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur | args[1]);
        }
        VarXor => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur ^ args[1]);
        }
        IndexedJump | IndexedJumpAndIncrement => {
            // `read_args` has already located the var-th table entry's
            // pointer bytes in `args[1..=2]`, whether by reading it
            // directly (`var == 0`) or by skipping `2 * var` bytes to reach
            // it. Either way the jump always happens; `var` only selects
            // which entry (`spec.md` §4.5.4).
            let selector = args[0];
            let var = classify(selector & 0x3F);
            if matches!(op, IndexedJumpAndIncrement) {
                let value = var.get(channel, scratch, random_byte);
                var.set(channel, scratch, value.wrapping_add(1));
            }
            channel.seq_ptr = u16::from_le_bytes([args[1], args[2]]);
        }
        VarReadToRegister => channel.reg = classify(args[0]).get(channel, scratch, random_byte),
        VarApply => classify(args[0]).set(channel, scratch, channel.reg),
        VarClassify => channel.reg = args[0] & 0x3F,
        VarShiftRight => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur >> 1);
        }
        VarShiftLeft => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur << 1);
        }
        BranchIfEqual | BranchIfNotEqual | BranchIfPlus | BranchIfMinus => {
            let var = classify(args[0] & 0x3F);
            let value = var.get(channel, scratch, random_byte) as i8;
            let taken = match op {
                BranchIfEqual => value == 0,
                BranchIfNotEqual => value != 0,
                BranchIfPlus => value >= 0,
                BranchIfMinus => value < 0,
                _ => unreachable!(),
            };
            if taken {
                channel.seq_ptr = u16::from_le_bytes([args[1], args[2]]);
            }
        }
        VarSubAssign => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            v.set(channel, scratch, cur.wrapping_sub(args[1]));
        }
        VarSubStore => {
            let v = classify(args[0]);
            let cur = v.get(channel, scratch, random_byte);
            channel.reg = cur.wrapping_sub(args[1]);
        }
    }

    Ok(true)
}

/// Read an opcode's argument bytes from ROM (without yet advancing
/// `seq_ptr` past the opcode byte itself, which the caller already
/// consumed via `byte0`). Returns the arguments (zero-padded to 3) and how
/// many bytes to advance `seq_ptr` by.
fn read_args(
    channel: &mut Channel,
    rom: &RomImage,
    scratch: &mut Scratch,
    random_byte: u8,
    op: Opcode,
) -> Result<([u8; 3], u16)> {
    channel.seq_ptr = channel.seq_ptr.wrapping_add(1); // past the opcode byte
    let mut args = [0u8; 3];

    if matches!(op, Opcode::IndexedJump | Opcode::IndexedJumpAndIncrement) {
        let selector = rom.read_u8(channel.seq_ptr)?;
        args[0] = selector;
        let var = classify(selector & 0x3F);
        let value = var.get(channel, scratch, random_byte);
        if value == 0 {
            args[1] = rom.read_u8(channel.seq_ptr.wrapping_add(1))?;
            args[2] = rom.read_u8(channel.seq_ptr.wrapping_add(2))?;
            return Ok((args, 3));
        }
        // Skip 2*var bytes, then the pointer follows.
        let skip = 2u16 * value as u16;
        let ptr_addr = channel.seq_ptr.wrapping_add(1).wrapping_add(skip);
        args[1] = rom.read_u8(ptr_addr)?;
        args[2] = rom.read_u8(ptr_addr.wrapping_add(1))?;
        return Ok((args, 1 + skip + 2));
    }

    let n = op.fixed_arg_count().expect("non-variable opcode");
    for (i, slot) in args.iter_mut().enumerate().take(n) {
        *slot = rom.read_u8(channel.seq_ptr.wrapping_add(i as u16))?;
    }
    Ok((args, n as u16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::RomImageBuilder;

    fn rom_with_sequence(bytes: &[u8]) -> (RomImage, u16) {
        let mut builder = RomImageBuilder::new();
        let addr = builder.push_data(bytes);
        (builder.build().unwrap(), addr)
    }

    #[test]
    fn note_frame_sets_primary_timer_from_duration_table() {
        let (rom, addr) = rom_with_sequence(&[0x45, 0x00, 0xFF]);
        let mut channel = Channel::new(0);
        channel.status_live = true;
        channel.tempo = 1;
        channel.seq_ptr = addr;
        let mut scratch = Scratch::new();
        let mut flags = ErrorFlags::default();
        let out = step(&mut channel, &rom, &mut scratch, 0, &mut flags, 8).unwrap();
        assert!(!out.terminated);
        assert_eq!(channel.note, 0x45);
    }

    #[test]
    fn end_of_sequence_terminates_channel() {
        let (rom, addr) = rom_with_sequence(&[0xFF]);
        let mut channel = Channel::new(0);
        channel.status_live = true;
        channel.seq_ptr = addr;
        let mut scratch = Scratch::new();
        let mut flags = ErrorFlags::default();
        let out = step(&mut channel, &rom, &mut scratch, 0, &mut flags, 8).unwrap();
        assert!(out.terminated);
        assert!(!channel.status_live);
    }

    #[test]
    fn padding_opcodes_chain_into_the_next_frame() {
        let (rom, addr) = rom_with_sequence(&[0x92, 0x93, 0x20, 0x00, 0xFF]);
        let mut channel = Channel::new(0);
        channel.status_live = true;
        channel.tempo = 1;
        channel.seq_ptr = addr;
        let mut scratch = Scratch::new();
        let mut flags = ErrorFlags::default();
        let out = step(&mut channel, &rom, &mut scratch, 0, &mut flags, 8).unwrap();
        assert!(!out.terminated);
        assert_eq!(channel.note, 0x20);
    }

    #[test]
    fn runaway_sequence_trips_the_frame_budget() {
        let (rom, addr) = rom_with_sequence(&[0x92; 64]);
        let mut channel = Channel::new(0);
        channel.status_live = true;
        channel.seq_ptr = addr;
        let mut scratch = Scratch::new();
        let mut flags = ErrorFlags::default();
        let result = step(&mut channel, &rom, &mut scratch, 0, &mut flags, 8);
        assert!(result.is_err());
        assert!(flags.contains(ErrorFlags::GENERAL_ERROR));
    }

    #[test]
    fn host_output_opcode_emits_effect() {
        let (rom, addr) = rom_with_sequence(&[0x96, 0x7A, 0x20, 0x00, 0xFF]);
        let mut channel = Channel::new(0);
        channel.status_live = true;
        channel.tempo = 1;
        channel.seq_ptr = addr;
        let mut scratch = Scratch::new();
        let mut flags = ErrorFlags::default();
        let out = step(&mut channel, &rom, &mut scratch, 0, &mut flags, 8).unwrap();
        assert_eq!(out.effects, vec![VmEffect::HostEgress(0x7A)]);
    }

    #[test]
    fn voice_load_opcode_emits_deferred_effect() {
        let (rom, addr) = rom_with_sequence(&[0x9D, 0x34, 0x12, 0xFF]);
        let mut channel = Channel::new(0);
        channel.status_live = true;
        channel.tempo = 1;
        channel.seq_ptr = addr;
        let mut scratch = Scratch::new();
        let mut flags = ErrorFlags::default();
        let out = step(&mut channel, &rom, &mut scratch, 0, &mut flags, 8).unwrap();
        assert_eq!(out.effects, vec![VmEffect::VoiceLoad(0x1234)]);
    }
}
