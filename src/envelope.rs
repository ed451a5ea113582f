//! Frequency and volume envelope evaluation (`spec.md` §4.6).
//!
//! Both envelopes are driven once per channel per tick, when the channel's
//! secondary timer reaches zero (`spec.md` §4.5.2 "update flag"). Each
//! holds its own cursor into a read-only ROM table and an explicit
//! finished/loop state; there is no shared mutable envelope state, so two
//! channels referencing the same table position never interfere.

use crate::channel::Channel;
use crate::error::Result;
use crate::rom::RomImage;

/// Rate byte value that marks a frequency-envelope entry as a loop
/// instruction rather than a (duration, rate) pair (`spec.md` §4.6).
const FREQ_LOOP_MARKER: u8 = 0xFF;
/// Byte value that marks the end of a volume-envelope table (`spec.md`
/// §4.6, §8.3 "Envelope termination").
const VOL_END_MARKER: u8 = 0xFF;

/// Advance the frequency envelope by one trigger (`spec.md` §4.6).
pub fn step_frequency_envelope(channel: &mut Channel, rom: &RomImage) -> Result<()> {
    let env = &mut channel.freq_env;
    if env.finished || env.ptr == 0 {
        return Ok(());
    }

    if env.frame_counter == 0 {
        let duration = rom.read_u8(env.pos)?;
        let rate_byte = rom.read_u8(env.pos.wrapping_add(1))?;

        if rate_byte == FREQ_LOOP_MARKER {
            let loop_count = rom.read_u8(env.pos.wrapping_add(2))?;
            let backwards_offset = rom.read_u8(env.pos.wrapping_add(3))?;
            if env.loop_count == 0 {
                env.loop_count = loop_count;
            }
            if env.loop_count == 0 {
                env.finished = true;
                return Ok(());
            }
            env.loop_count -= 1;
            env.pos = env.pos.wrapping_sub(backwards_offset as u16);
            return Ok(());
        }

        env.frame_counter = duration;
        env.rate = rate_byte as u16;
        env.pos = env.pos.wrapping_add(2);
    } else {
        env.frame_counter -= 1;
        let shape = rom.freq_shape_byte(env.fraction as usize).unwrap_or(1);
        let delta = (env.rate as u8 as i8 as i32).wrapping_mul(shape as i32);
        let next = (env.accumulator as i64 + delta as i64).rem_euclid(1 << 24);
        env.accumulator = next as u32;
        env.fraction = env.fraction.wrapping_add(1);
    }
    Ok(())
}

/// Synthesized chip frequency for a channel: base note frequency, plus the
/// envelope accumulator's upper byte, plus portamento (`spec.md` §4.6
/// "The final frequency applied to the chip").
pub fn frequency_output(channel: &Channel) -> u16 {
    let accumulator_upper = ((channel.freq_env.accumulator >> 16) & 0xFF) as u16;
    channel
        .base_freq
        .wrapping_add(accumulator_upper)
        .wrapping_add(channel.portamento as u16)
}

/// Advance the volume envelope by one tick and return the resulting
/// control byte (clamped volume OR'd with the distortion mask, `spec.md`
/// §4.6).
pub fn step_volume_envelope(channel: &mut Channel, rom: &RomImage) -> u8 {
    let env = &mut channel.vol_env;
    if !env.finished && env.ptr != 0 {
        if let Ok(byte) = rom.read_u8(env.pos) {
            if byte == VOL_END_MARKER {
                env.finished = true;
            } else {
                env.mod_accum = env.mod_accum.saturating_add(byte);
                env.pos = env.pos.wrapping_add(1);
            }
        }
    }
    volume_output(channel, rom)
}

/// Read the current volume envelope state into a control byte without
/// advancing it (used by chip writers on ticks that don't trigger a new
/// envelope step).
pub fn volume_output(channel: &Channel, rom: &RomImage) -> u8 {
    let env = &channel.vol_env;
    let shape = rom.vol_shape_byte(env.dist_shape as usize).unwrap_or(0x10);
    let scaled = ((env.mod_accum as u16 * shape as u16) >> 4).min(15) as u8;
    scaled | env.dist_mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::RomImageBuilder;

    #[test]
    fn freq_loop_marker_with_zero_count_finishes_in_one_tick() {
        let mut builder = RomImageBuilder::new();
        let ptr = builder.push_data(&[0x00, 0xFF, 0x00, 0x00]);
        let rom = builder.build().unwrap();
        let mut channel = Channel::new(0);
        channel.freq_env.ptr = ptr;
        channel.freq_env.pos = ptr;
        step_frequency_envelope(&mut channel, &rom).unwrap();
        assert!(channel.freq_env.finished);
    }

    #[test]
    fn vol_end_marker_sets_finished() {
        let mut builder = RomImageBuilder::new();
        let ptr = builder.push_data(&[0x05, 0xFF]);
        let rom = builder.build().unwrap();
        let mut channel = Channel::new(0);
        channel.vol_env.ptr = ptr;
        channel.vol_env.pos = ptr;
        step_volume_envelope(&mut channel, &rom);
        assert!(!channel.vol_env.finished);
        step_volume_envelope(&mut channel, &rom);
        assert!(channel.vol_env.finished);
    }

    #[test]
    fn distortion_mask_is_always_ored_into_output() {
        let rom = RomImageBuilder::new().build().unwrap();
        let mut channel = Channel::new(0);
        channel.vol_env.dist_mask = 0x40;
        let byte = volume_output(&channel, &rom);
        assert_eq!(byte & 0x40, 0x40);
    }
}
