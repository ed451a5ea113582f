//! YM2151 writer (`spec.md` §4.8), run on even ticks.
//!
//! The four FM hints (`8..11`) each back up to two physical FM channels —
//! the first two members of that hint's priority-ordered active list — for
//! 8 physical channels total, iterated in descending index order as
//! `spec.md` §4.8 specifies. Unlike the PSG pair, FM channels are not mixed:
//! each physical channel gets its own logical channel's output, or silence
//! if that slot is unoccupied.

use crate::allocator::ActiveLists;
use crate::channel::Channel;
use crate::chip::FmSink;
use crate::config::EngineConfig;
use crate::envelope::{step_frequency_envelope, step_volume_envelope};
use crate::error::{ErrorFlags, Result};
use crate::rom::RomImage;
use crate::vm::variable::Scratch;
use crate::vm::{self, VmEffect};

/// Number of physical FM channels (`spec.md` §4.8).
pub const FM_CHANNEL_COUNT: usize = 8;
/// The 4 hints that feed the FM group (`spec.md` §3.3, §4.4).
const FM_HINTS: [u8; 4] = [8, 9, 10, 11];

const REG_CONNECTION: u8 = 0x20;
const REG_DT1_MUL: u8 = 0x30;
const REG_TOTAL_LEVEL: u8 = 0x38;
const REG_NOISE_LFO: u8 = 0x28;
const REG_KEY_ON: u8 = 0x08;

/// Per-register mirror of what has been written to the YM2151, so VM
/// opcodes (`load_voice`, §4.8 "Voice load") and the writer agree on the
/// chip's current register contents without re-reading the chip itself.
#[derive(Debug, Clone)]
pub struct FmShadow {
    regs: [u8; 256],
}

impl Default for FmShadow {
    fn default() -> Self {
        Self { regs: [0; 256] }
    }
}

impl FmShadow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, register: u8) -> u8 {
        self.regs[register as usize]
    }

    pub fn set(&mut self, register: u8, value: u8) {
        self.regs[register as usize] = value;
    }
}

/// Poll `sink.ready()` up to `budget` times; on timeout, proceed anyway and
/// flag it (`spec.md` §4.8 step 4).
fn write_with_busy_wait(sink: &mut dyn FmSink, error_flags: &mut ErrorFlags, budget: u16, register: u8, value: u8) {
    let mut polls = 0u16;
    while !sink.ready() && polls < budget {
        polls += 1;
    }
    if polls >= budget {
        error_flags.insert(ErrorFlags::FM_BUSY_TIMEOUT);
    }
    sink.write(register, value);
}

fn physical_slot(active: &ActiveLists, channels: &[Channel], pch: usize) -> Option<u8> {
    let hint = FM_HINTS[pch % FM_HINTS.len()];
    let slot = pch / FM_HINTS.len();
    active.list(hint).iter(channels).nth(slot)
}

/// Run one even-tick YM2151 write pass (`spec.md` §4.8).
#[allow(clippy::too_many_arguments)]
pub fn run(
    channels: &mut [Channel],
    active: &ActiveLists,
    rom: &RomImage,
    scratch: &mut Scratch,
    random_byte: u8,
    error_flags: &mut ErrorFlags,
    config: &EngineConfig,
    shadow: &mut FmShadow,
    sink: &mut dyn FmSink,
) -> Result<Vec<VmEffect>> {
    let mut effects = Vec::new();

    for pch in (0..FM_CHANNEL_COUNT).rev() {
        let Some(idx) = physical_slot(active, channels, pch) else { continue };
        let channel = &mut channels[idx as usize];
        let ch = pch as u8;

        if channel.primary_timer == 0 {
            let outcome = vm::step(channel, rom, scratch, random_byte, error_flags, config.per_tick_opcode_budget)?;
            for effect in outcome.effects {
                if let VmEffect::VoiceLoad(pointer) = effect {
                    load_voice(rom, pointer, ch, shadow, error_flags, config.fm_busy_poll_budget, sink)?;
                } else {
                    effects.push(effect);
                }
            }
        }
        step_frequency_envelope(channel, rom)?;
        let volctl = step_volume_envelope(channel, rom);

        let connection = channel.ctl_or_bits & !channel.ctl_and_mask;
        let connection = connection | (channel.ctl_or_bits & 0x07);
        shadow.set(REG_CONNECTION.wrapping_add(ch), connection);
        write_with_busy_wait(sink, error_flags, config.fm_busy_poll_budget, REG_CONNECTION.wrapping_add(ch), connection);

        let dt1_mul = channel.reg;
        shadow.set(REG_DT1_MUL.wrapping_add(ch), dt1_mul);
        write_with_busy_wait(sink, error_flags, config.fm_busy_poll_budget, REG_DT1_MUL.wrapping_add(ch), dt1_mul);

        shadow.set(REG_TOTAL_LEVEL.wrapping_add(ch), volctl);
        write_with_busy_wait(sink, error_flags, config.fm_busy_poll_budget, REG_TOTAL_LEVEL.wrapping_add(ch), volctl);

        if channel.secondary_timer == 0 {
            write_with_busy_wait(sink, error_flags, config.fm_busy_poll_budget, REG_KEY_ON, ch);
        }

        if channel.is_live() {
            let noise_lfo = channel.note;
            shadow.set(REG_NOISE_LFO.wrapping_add(ch), noise_lfo);
            write_with_busy_wait(sink, error_flags, config.fm_busy_poll_budget, REG_NOISE_LFO.wrapping_add(ch), noise_lfo);
        }
    }

    Ok(effects)
}

/// Load the 4-operator voice definition pointed at by `pointer` into the
/// shadow and chip for physical FM channel `ch` (`spec.md` §4.8 "Voice
/// load"): a Key-Off, then 6 bytes per operator at the fixed offsets, then
/// a Key-On.
pub fn load_voice(
    rom: &RomImage,
    pointer: u16,
    ch: u8,
    shadow: &mut FmShadow,
    error_flags: &mut ErrorFlags,
    budget: u16,
    sink: &mut dyn FmSink,
) -> Result<()> {
    const OPERATOR_BASES: [u8; 4] = [0x40, 0x48, 0x50, 0x58];
    const OPERATOR_SECONDARY_BASES: [u8; 4] = [0x60, 0x68, 0x70, 0x78];

    write_with_busy_wait(sink, error_flags, budget, REG_KEY_ON, 0x00 | ch);

    for (op_index, &base) in OPERATOR_BASES.iter().enumerate() {
        let addr = pointer.wrapping_add(op_index as u16 * 6);
        for b in 0..6u16 {
            let reg = if b < 3 { base } else { OPERATOR_SECONDARY_BASES[op_index] }.wrapping_add(ch);
            let value = rom.read_u8(addr.wrapping_add(b))?;
            shadow.set(reg, value);
            write_with_busy_wait(sink, error_flags, budget, reg, value);
        }
    }

    let connection = rom.read_u8(pointer.wrapping_add(24))?;
    shadow.set(REG_CONNECTION.wrapping_add(ch), connection);
    write_with_busy_wait(sink, error_flags, budget, REG_CONNECTION.wrapping_add(ch), connection);

    write_with_busy_wait(sink, error_flags, budget, REG_KEY_ON, ch);
    Ok(())
}

/// The first FM hint, and so the physical channel number of a hint's list
/// head (`spec.md` §3.3, §4.4: hints 8..11 feed the FM group at slot 0).
pub const FM_HINT_BASE: u8 = FM_HINTS[0];

/// Silence physical FM channel `ch` by running the voice-load write
/// sequence with an all-zero patch (`spec.md` §4.10 "Natural end ... FM:
/// run voice-load with zero patch"), used on channel termination instead of
/// `load_voice` since there is no ROM-resident "silent" voice to point at.
pub fn silence_channel(ch: u8, shadow: &mut FmShadow, error_flags: &mut ErrorFlags, budget: u16, sink: &mut dyn FmSink) {
    const OPERATOR_BASES: [u8; 4] = [0x40, 0x48, 0x50, 0x58];
    const OPERATOR_SECONDARY_BASES: [u8; 4] = [0x60, 0x68, 0x70, 0x78];

    write_with_busy_wait(sink, error_flags, budget, REG_KEY_ON, ch);

    for (base, secondary_base) in OPERATOR_BASES.iter().zip(OPERATOR_SECONDARY_BASES.iter()) {
        for &reg_base in &[*base, *secondary_base] {
            let reg = reg_base.wrapping_add(ch);
            shadow.set(reg, 0);
            write_with_busy_wait(sink, error_flags, budget, reg, 0);
        }
    }

    shadow.set(REG_CONNECTION.wrapping_add(ch), 0);
    write_with_busy_wait(sink, error_flags, budget, REG_CONNECTION.wrapping_add(ch), 0);

    write_with_busy_wait(sink, error_flags, budget, REG_KEY_ON, ch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::writes::RecordingSink;
    use crate::chip::ChipWrite;
    use crate::rom::RomImageBuilder;

    fn fresh_channels() -> Vec<Channel> {
        (0..crate::channel::CHANNEL_COUNT as u8).map(Channel::new).collect()
    }

    #[test]
    fn unoccupied_physical_channels_produce_no_writes() {
        let rom = RomImageBuilder::new().build().unwrap();
        let mut channels = fresh_channels();
        let active = ActiveLists::new();
        let mut scratch = Scratch::default();
        let mut error_flags = ErrorFlags::empty();
        let config = EngineConfig::default();
        let mut shadow = FmShadow::new();
        let mut sink = RecordingSink::default();

        run(&mut channels, &active, &rom, &mut scratch, 0, &mut error_flags, &config, &mut shadow, &mut sink).unwrap();

        assert!(sink.writes.is_empty());
    }

    #[test]
    fn occupied_channel_writes_connection_dt1mul_and_total_level() {
        let rom = RomImageBuilder::new().build().unwrap();
        let mut channels = fresh_channels();
        channels[5].status_live = true;
        channels[5].priority = 5;
        channels[5].primary_timer = 1;
        channels[5].secondary_timer = 1;
        channels[5].next_active = crate::channel::LINK_NONE;

        let mut active = ActiveLists::new();
        active.list_mut(8).push_front(&mut channels, 5);

        let mut scratch = Scratch::default();
        let mut error_flags = ErrorFlags::empty();
        let config = EngineConfig::default();
        let mut shadow = FmShadow::new();
        let mut sink = RecordingSink::default();

        run(&mut channels, &active, &rom, &mut scratch, 0, &mut error_flags, &config, &mut shadow, &mut sink).unwrap();

        let wrote_connection = sink.writes.iter().any(|w| matches!(w, ChipWrite::Fm { register, .. } if *register == REG_CONNECTION));
        let wrote_tl = sink.writes.iter().any(|w| matches!(w, ChipWrite::Fm { register, .. } if *register == REG_TOTAL_LEVEL));
        assert!(wrote_connection);
        assert!(wrote_tl);
    }

    #[test]
    fn opcode_voice_load_is_applied_through_the_fm_writer() {
        let mut builder = RomImageBuilder::new();
        let patch: Vec<u8> = (1..=25u8).collect(); // 4 operators * 6 bytes + connection byte
        let patch_ptr = builder.push_data(&patch);
        let seq = builder.push_data(&[0x9D, (patch_ptr & 0xFF) as u8, (patch_ptr >> 8) as u8, 0xFF]);
        let rom = builder.build().unwrap();

        let mut channels = fresh_channels();
        channels[5].status_live = true;
        channels[5].priority = 5;
        channels[5].primary_timer = 0;
        channels[5].secondary_timer = 1;
        channels[5].seq_ptr = seq;
        channels[5].next_active = crate::channel::LINK_NONE;

        let mut active = ActiveLists::new();
        active.list_mut(8).push_front(&mut channels, 5);

        let mut scratch = Scratch::default();
        let mut error_flags = ErrorFlags::empty();
        let config = EngineConfig::default();
        let mut shadow = FmShadow::new();
        let mut sink = RecordingSink::default();

        let effects =
            run(&mut channels, &active, &rom, &mut scratch, 0, &mut error_flags, &config, &mut shadow, &mut sink).unwrap();

        // The voice-load effect is fully applied here, not bubbled up.
        assert!(effects.is_empty());
        // Each operator register is written 3 times (one per patch byte in
        // its half), so the shadow holds the last byte written to it.
        assert_eq!(shadow.get(0x40), 3);
        assert_eq!(shadow.get(0x78), 24);
        assert_eq!(shadow.get(REG_CONNECTION), 25);
        let key_on_writes = sink
            .writes
            .iter()
            .filter(|w| matches!(w, ChipWrite::Fm { register, value } if *register == REG_KEY_ON && *value == 0))
            .count();
        assert!(key_on_writes >= 1, "expected at least one key-off/key-on pulse for channel 0");
    }

    #[test]
    fn busy_timeout_sets_error_flag() {
        struct NeverReady;
        impl FmSink for NeverReady {
            fn ready(&self) -> bool {
                false
            }
            fn write(&mut self, _register: u8, _value: u8) {}
        }
        let mut sink = NeverReady;
        let mut flags = ErrorFlags::empty();
        write_with_busy_wait(&mut sink, &mut flags, 4, 0x20, 0x00);
        assert!(flags.contains(ErrorFlags::FM_BUSY_TIMEOUT));
    }
}
