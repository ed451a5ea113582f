//! POKEY mixer and writer (`spec.md` §4.7), run on odd ticks.
//!
//! Four physical voices are driven by two pairs of logical channels, one
//! pair per hint group (hints 4/5 feed pair 0, hints 6/7 feed pair 1). Each
//! pair's VM is advanced for its primary then secondary channel, the louder
//! one wins the (frequency, volume) pair actually written, and the two
//! channels' AUDCTL contributions merge by ANDing their clear-masks and
//! ORing their set-bits.

use crate::allocator::ActiveLists;
use crate::channel::Channel;
use crate::chip::PsgSink;
use crate::envelope::{frequency_output, step_frequency_envelope, step_volume_envelope};
use crate::error::{ErrorFlags, Result};
use crate::rom::RomImage;
use crate::vm::variable::Scratch;
use crate::vm::{self, VmEffect};

/// AUDF1/AUDC1 .. AUDF4/AUDC4 register numbers, plus AUDCTL (`spec.md` §6.3).
pub const AUDF: [u8; 4] = [0, 1, 2, 3];
pub const AUDC: [u8; 4] = [4, 5, 6, 7];
pub const AUDCTL: u8 = 8;

/// One (primary hint, secondary hint) pairing feeding one pair of physical
/// voices (`spec.md` §4.7).
const HINT_PAIRS: [(u8, u8); 2] = [(4, 5), (6, 7)];

struct MixResult {
    freq: u16,
    volctl: u8,
    and_mask: u8,
    or_bits: u8,
}

/// Advance both logical channels of one pair and step them through their
/// envelopes for this tick, returning VM effects so the caller can apply
/// them against shared engine state.
#[allow(clippy::too_many_arguments)]
fn advance_pair_member(
    channels: &mut [Channel],
    active: &ActiveLists,
    hint: u8,
    rom: &RomImage,
    scratch: &mut Scratch,
    random_byte: u8,
    error_flags: &mut ErrorFlags,
    frame_budget: u8,
    effects: &mut Vec<VmEffect>,
) -> Result<Option<u8>> {
    let Some(idx) = active.list(hint).head() else {
        return Ok(None);
    };
    let channel = &mut channels[idx as usize];
    if channel.primary_timer == 0 {
        let outcome = vm::step(channel, rom, scratch, random_byte, error_flags, frame_budget)?;
        effects.extend(outcome.effects);
    }
    step_frequency_envelope(channel, rom)?;
    step_volume_envelope(channel, rom);
    Ok(Some(idx))
}

fn mix_pair(
    channels: &[Channel],
    primary_idx: Option<u8>,
    secondary_idx: Option<u8>,
    music_filter_threshold: u8,
    rom: &RomImage,
) -> MixResult {
    let primary = primary_idx.map(|i| &channels[i as usize]);
    let secondary = secondary_idx.map(|i| &channels[i as usize]);

    let primary_vol = primary.map(|c| c.base_volume).unwrap_or(0);
    let secondary_vol = secondary.map(|c| c.base_volume).unwrap_or(0);

    let primary_louder = primary.is_some()
        && (secondary.is_none()
            || primary_vol.max(music_filter_threshold) >= secondary_vol);

    let winner = if primary_louder { primary } else { secondary };

    let Some(winner) = winner else {
        return MixResult { freq: 0, volctl: 0, and_mask: 0xFF, or_bits: 0 };
    };

    let freq = frequency_output(winner);
    let volctl = crate::envelope::volume_output(winner, rom);

    let and_mask = primary.map(|c| c.ctl_and_mask).unwrap_or(0xFF)
        & secondary.map(|c| c.ctl_and_mask).unwrap_or(0xFF);
    let or_bits = primary.map(|c| c.ctl_or_bits).unwrap_or(0) | secondary.map(|c| c.ctl_or_bits).unwrap_or(0);

    MixResult { freq, volctl, and_mask, or_bits }
}

/// Run one odd-tick POKEY mix/write pass, returning the VM effects produced
/// by both pairs (`spec.md` §4.7).
#[allow(clippy::too_many_arguments)]
pub fn run(
    channels: &mut [Channel],
    active: &ActiveLists,
    rom: &RomImage,
    scratch: &mut Scratch,
    random_byte: u8,
    error_flags: &mut ErrorFlags,
    frame_budget: u8,
    music_filter_threshold: u8,
    sink: &mut dyn PsgSink,
) -> Result<Vec<VmEffect>> {
    let mut effects = Vec::new();
    let mut audctl = 0xFFu8;
    let mut audctl_or = 0u8;

    for (pair_index, (primary_hint, secondary_hint)) in HINT_PAIRS.iter().enumerate() {
        let primary_idx = advance_pair_member(
            channels, active, *primary_hint, rom, scratch, random_byte, error_flags, frame_budget, &mut effects,
        )?;
        let secondary_idx = advance_pair_member(
            channels, active, *secondary_hint, rom, scratch, random_byte, error_flags, frame_budget, &mut effects,
        )?;

        let mixed = mix_pair(channels, primary_idx, secondary_idx, music_filter_threshold, rom);
        audctl &= mixed.and_mask;
        audctl_or |= mixed.or_bits;

        let voice_a = pair_index * 2;
        let voice_b = voice_a + 1;
        sink.write(AUDF[voice_a], (mixed.freq & 0xFF) as u8);
        sink.write(AUDC[voice_a], mixed.volctl);
        sink.write(AUDF[voice_b], (mixed.freq & 0xFF) as u8);
        sink.write(AUDC[voice_b], mixed.volctl);
    }

    sink.write(AUDCTL, audctl | audctl_or);
    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::writes::RecordingSink;
    use crate::rom::RomImageBuilder;

    fn fresh_channels() -> Vec<Channel> {
        (0..crate::channel::CHANNEL_COUNT as u8).map(Channel::new).collect()
    }

    #[test]
    fn empty_pairs_still_write_all_registers() {
        let rom = RomImageBuilder::new().build().unwrap();
        let mut channels = fresh_channels();
        let active = ActiveLists::new();
        let mut scratch = Scratch::default();
        let mut error_flags = ErrorFlags::empty();
        let mut sink = RecordingSink::default();

        run(&mut channels, &active, &rom, &mut scratch, 0, &mut error_flags, 8, 0, &mut sink).unwrap();

        assert_eq!(sink.writes.len(), 4 * 2 + 1);
    }

    #[test]
    fn louder_channel_wins_the_pair() {
        let rom = RomImageBuilder::new().build().unwrap();
        let mut channels = fresh_channels();
        channels[0].status_live = true;
        channels[0].base_volume = 3;
        channels[0].base_freq = 0x10;
        channels[0].primary_timer = 1;
        channels[0].next_active = crate::channel::LINK_NONE;

        channels[1].status_live = true;
        channels[1].base_volume = 12;
        channels[1].base_freq = 0x20;
        channels[1].primary_timer = 1;
        channels[1].next_active = crate::channel::LINK_NONE;

        let mut active = ActiveLists::new();
        active.list_mut(4).push_front(&mut channels, 0);
        active.list_mut(5).push_front(&mut channels, 1);

        let mut scratch = Scratch::default();
        let mut error_flags = ErrorFlags::empty();
        let mut sink = RecordingSink::default();

        run(&mut channels, &active, &rom, &mut scratch, 0, &mut error_flags, 8, 0, &mut sink).unwrap();

        let audf0 = sink
            .writes
            .iter()
            .find_map(|w| match w {
                crate::chip::ChipWrite::Psg { register, value } if *register == AUDF[0] => Some(*value),
                _ => None,
            })
            .unwrap();
        assert_eq!(audf0, 0x20);
    }
}
