//! Command router: two-level command → handler-type → handler dispatch
//! (`spec.md` §4.3).

use crate::allocator::{self, ActiveLists};
use crate::channel::{ActiveCommand, Channel, ChannelList, CHANNEL_COUNT};
use crate::ingress::Ingress;
use crate::rom::RomImage;
use crate::speech::SpeechQueue;

/// Handler-type values actually reached from the default command table
/// (`spec.md` §3.2, §4.3).
pub const TYPE_PARAM_PRESHIFT: u8 = 0;
pub const TYPE_INDIRECT_JUMP: u8 = 3;
pub const TYPE_STOP_BY_COMMAND: u8 = 5;
pub const TYPE_PSG_SFX: u8 = 7;
pub const TYPE_EGRESS: u8 = 8;
pub const TYPE_FADE_BY_COMMAND: u8 = 9;
pub const TYPE_FADE_BY_STATUS: u8 = 10;
pub const TYPE_MUSIC_SPEECH_START: u8 = 11;
pub const TYPE_VOLUME_MIXER: u8 = 13;

/// The mutable state the router dispatches against, gathered so call
/// sites don't have to thread five parameters through every handler.
pub struct RouterContext<'a> {
    pub rom: &'a RomImage,
    pub channels: &'a mut [Channel; CHANNEL_COUNT],
    pub free: &'a mut ChannelList,
    pub active: &'a mut ActiveLists,
    pub ingress: &'a mut Ingress,
    pub speech: &'a mut SpeechQueue,
    pub mixer_byte: &'a mut u8,
    pub quiet_during_fade: bool,
}

/// Outcome of a single `dispatch` call, surfaced to the caller mainly for
/// test assertions; the engine tick loop mostly ignores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored,
    Allocated(Vec<allocator::AllocOutcome>),
    Stopped(usize),
    Faded(usize),
    Egress,
    MixerUpdated,
    MusicStarted,
    MusicQueued,
}

/// Dispatch a host command byte (`spec.md` §4.3).
pub fn dispatch(ctx: &mut RouterContext, command: u8) -> DispatchOutcome {
    if command as usize >= crate::rom::tables::COMMAND_COUNT {
        return DispatchOutcome::Ignored;
    }
    let handler_type = ctx.rom.handler_type(command);
    if handler_type == crate::rom::HANDLER_TYPE_INVALID {
        return DispatchOutcome::Ignored;
    }
    let param = ctx.rom.param(command);
    dispatch_typed(ctx, command, handler_type, param)
}

fn dispatch_typed(ctx: &mut RouterContext, command: u8, handler_type: u8, param: u8) -> DispatchOutcome {
    match handler_type {
        TYPE_PARAM_PRESHIFT => dispatch_typed(ctx, command, canonical_entry_for_preshift(), param.wrapping_shl(2)),
        TYPE_INDIRECT_JUMP => dispatch_indirect(ctx, command, param),
        TYPE_STOP_BY_COMMAND => {
            let n = stop_by_command(ctx.channels, param);
            DispatchOutcome::Stopped(n)
        }
        TYPE_PSG_SFX => {
            let outcomes = allocator::allocate_sfx(ctx.rom, ctx.channels, ctx.free, ctx.active, command, param);
            DispatchOutcome::Allocated(outcomes)
        }
        TYPE_EGRESS => {
            ctx.ingress.push_egress(param);
            DispatchOutcome::Egress
        }
        TYPE_FADE_BY_COMMAND => {
            let n = fade_by_command(ctx.channels, ctx.rom, param);
            DispatchOutcome::Faded(n)
        }
        TYPE_FADE_BY_STATUS => {
            let n = fade_by_status(ctx.channels, ctx.rom, param);
            DispatchOutcome::Faded(n)
        }
        TYPE_MUSIC_SPEECH_START => dispatch_music_or_speech(ctx, command, param),
        TYPE_VOLUME_MIXER => {
            dispatch_volume_mixer(ctx, param);
            DispatchOutcome::MixerUpdated
        }
        _ => DispatchOutcome::Ignored,
    }
}

/// Type 0 falls through to a "canonical entry" after pre-shifting its
/// parameter (`spec.md` §4.3). The entry it falls through to is the PSG
/// SFX allocator, the only handler-type-0 use in the command table;
/// see `DESIGN.md`.
fn canonical_entry_for_preshift() -> u8 {
    TYPE_PSG_SFX
}

/// Type 3: indirect via a small secondary jump table, used only by command
/// 0x00 ("stop all", `spec.md` §4.3). This port models the secondary table
/// as "stop every live channel" since that is the only documented use.
fn dispatch_indirect(ctx: &mut RouterContext, command: u8, _param: u8) -> DispatchOutcome {
    if command == 0x00 {
        let mut n = 0;
        for ch in ctx.channels.iter_mut() {
            if ch.status_live {
                ch.active_command = ActiveCommand::FinishedSentinel;
                n += 1;
            }
        }
        return DispatchOutcome::Stopped(n);
    }
    DispatchOutcome::Ignored
}

/// Type 5: mark every live channel whose active-command equals `param` as
/// finished-sentinel (`spec.md` §4.3, §4.10).
pub fn stop_by_command(channels: &mut [Channel; CHANNEL_COUNT], param: u8) -> usize {
    let mut n = 0;
    for ch in channels.iter_mut() {
        if ch.status_live && matches!(ch.active_command, ActiveCommand::Live(id) if id == param) {
            ch.active_command = ActiveCommand::FinishedSentinel;
            n += 1;
        }
    }
    n
}

/// Type 9: same match as Type 5, but installs a decay envelope and arms
/// the special-marker guard instead of killing outright (`spec.md` §4.3).
fn fade_by_command(channels: &mut [Channel; CHANNEL_COUNT], rom: &RomImage, param: u8) -> usize {
    let mut n = 0;
    for ch in channels.iter_mut() {
        if ch.status_live
            && matches!(ch.active_command, ActiveCommand::Live(id) if id == param)
        {
            install_fade(ch, rom);
            n += 1;
        }
    }
    n
}

/// Type 10: matches channels whose synthesized status byte, shifted right
/// 2, equals `param` (`spec.md` §4.3).
fn fade_by_status(channels: &mut [Channel; CHANNEL_COUNT], rom: &RomImage, param: u8) -> usize {
    let mut n = 0;
    for ch in channels.iter_mut() {
        if ch.status_live && (ch.status_byte() >> 2) == param {
            install_fade(ch, rom);
            n += 1;
        }
    }
    n
}

fn install_fade(channel: &mut Channel, rom: &RomImage) {
    let ptr = rom.fade_envelope_ptr();
    channel.vol_env.ptr = ptr;
    channel.vol_env.pos = ptr;
    channel.vol_env.finished = false;
    channel.active_command = ActiveCommand::SpecialMarker;
}

/// Type 11: start music/speech playback if nothing is active, else enqueue
/// into the priority speech queue (`spec.md` §4.3, §4.9, §8.5 scenario 3).
fn dispatch_music_or_speech(ctx: &mut RouterContext, command: u8, _param: u8) -> DispatchOutcome {
    let Some(entry) = ctx.rom.music_entry(command) else {
        return DispatchOutcome::Ignored;
    };
    let priority = entry.flags & 0x0F;
    let was_idle = ctx.speech.is_idle();
    crate::speech::dispatch_with_rom(ctx.speech, ctx.rom, command, entry, priority);
    if was_idle {
        DispatchOutcome::MusicStarted
    } else {
        DispatchOutcome::MusicQueued
    }
}

/// Type 13: split the parameter into (speech, effects, music) fields and
/// write the mixer sink, unless fading is in progress and the engine was
/// built with "quiet during fade" (`spec.md` §4.3).
fn dispatch_volume_mixer(ctx: &mut RouterContext, param: u8) {
    if ctx.quiet_during_fade {
        return;
    }
    *ctx.mixer_byte = param;
}
