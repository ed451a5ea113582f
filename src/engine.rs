//! `Engine`: ties the tick scheduler, ingress, router, VM, envelope
//! pipeline, and the three chip writers together (`spec.md` §2, §5).
//!
//! This is the single-threaded, run-to-completion stepping function the
//! "either is valid" allowance in `spec.md` §5 asks for: [`Engine::tick`]
//! performs one full tick (timer decrement, one command dequeue/dispatch,
//! the alternating PSG/FM pass, and four speech-streamer sub-ticks), and
//! [`Engine::push_command`] is the ingress side, callable at any point
//! between ticks (or, for NMI-validated commands, handled synchronously
//! inline, `spec.md` §4.2).

use crate::allocator::{self, ActiveLists};
use crate::channel::{ActiveCommand, Channel, ChannelList, HwType, CHANNEL_COUNT};
use crate::chip::{FmSink, MixerSink, PsgSink, SpeechSink};
use crate::config::EngineConfig;
use crate::error::{ErrorFlags, Result};
use crate::fm::{self, FmShadow};
use crate::ingress::{HostStatus, Ingress};
use crate::psg;
use crate::rom::RomImage;
use crate::router::{self, DispatchOutcome, RouterContext};
use crate::speech::SpeechQueue;
use crate::vm::variable::Scratch;
use crate::vm::VmEffect;

/// The four hint values feeding the two POKEY pairs, plus the four feeding
/// the eight FM channels (`spec.md` §3.3, §4.4: hint ∈ 4..11).
const ALL_HINTS: [u8; 8] = [4, 5, 6, 7, 8, 9, 10, 11];

/// A non-zero xorshift32 seed for the PSG random-register stand-in
/// (`spec.md` §4.5.5 selector 5). Any fixed non-zero value works; this one
/// is arbitrary.
const RNG_SEED: u32 = 0xACE1_u32 as u32;

/// The sequencer/synthesizer engine (`spec.md` §2).
///
/// Owns all 30 channels, the free/active lists, the command ingress ring,
/// the speech/music queue, and the FM shadow. Stateless across power
/// cycles per `spec.md` §6.4: everything here is produced by
/// [`Engine::new`] from a [`RomImage`] and an [`EngineConfig`].
pub struct Engine {
    rom: RomImage,
    config: EngineConfig,
    channels: [Channel; CHANNEL_COUNT],
    free: ChannelList,
    active: ActiveLists,
    ingress: Ingress,
    speech: SpeechQueue,
    fm_shadow: FmShadow,
    scratch: Scratch,
    error_flags: ErrorFlags,
    mixer_byte: u8,
    tick_count: u64,
    rng: u32,
}

impl Engine {
    /// Build a fresh engine: all 30 channels free, ingress/egress/speech
    /// queues empty, mixer byte zero.
    pub fn new(rom: RomImage, config: EngineConfig) -> Self {
        let mut channels: Vec<Channel> = (0..CHANNEL_COUNT as u8).map(Channel::new).collect();
        let mut free = ChannelList::new();
        for idx in 0..CHANNEL_COUNT as u8 {
            free.push_front(&mut channels, idx);
        }
        let channels: [Channel; CHANNEL_COUNT] =
            channels.try_into().unwrap_or_else(|_| unreachable!("exactly CHANNEL_COUNT channels constructed"));

        Self {
            rom,
            config,
            channels,
            free,
            active: ActiveLists::new(),
            ingress: Ingress::new(),
            speech: SpeechQueue::new(),
            fm_shadow: FmShadow::new(),
            scratch: Scratch::new(),
            error_flags: ErrorFlags::empty(),
            mixer_byte: 0,
            tick_count: 0,
            rng: RNG_SEED,
        }
    }

    /// The ROM image this engine was built from.
    pub fn rom(&self) -> &RomImage {
        &self.rom
    }

    /// Current engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process-level recoverable error flags (`spec.md` §6.2, §7).
    pub fn error_flags(&self) -> ErrorFlags {
        self.error_flags
    }

    /// Number of full ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Number of entries waiting in the speech/music queue behind whatever
    /// is currently playing (`spec.md` §4.9, §8.1 queue discipline).
    pub fn speech_queued_len(&self) -> usize {
        self.speech.queued_len()
    }

    /// `true` when nothing is currently playing through the speech/music
    /// streamer.
    pub fn speech_is_idle(&self) -> bool {
        self.speech.is_idle()
    }

    /// Read-only view of the 30 channel records, mainly for inspection and
    /// tests (`spec.md` §8.1 invariants).
    pub fn channels(&self) -> &[Channel; CHANNEL_COUNT] {
        &self.channels
    }

    /// Number of channels currently on the free list.
    pub fn free_channel_count(&self) -> usize {
        self.free.iter(&self.channels).count()
    }

    /// Pop one byte from the host egress (output) ring, if any
    /// (`spec.md` §4.3 Type 8, §6.1).
    pub fn pop_egress(&mut self) -> Option<u8> {
        self.ingress.pop_egress()
    }

    /// Host-visible status byte (`spec.md` §6.2). Coin/self-test bits are
    /// owned by the cabinet wiring the engine never models; the caller
    /// supplies their current value.
    pub fn host_status(&self, coin_bits: u8, self_test: bool, speech_ready: bool) -> HostStatus {
        HostStatus {
            coin_bits,
            self_test,
            speech_ready,
            sound_buffer_full: self.ingress.is_full(),
            host_output_buffer_full: self.ingress.egress_full(),
        }
    }

    /// Queue a host command byte (`spec.md` §4.2 "push").
    ///
    /// Commands whose NMI-validation class is `0..2` are handled
    /// synchronously, pre-empting normal queueing, exactly as `spec.md`
    /// §4.2 describes; everything else is stored in the ingress ring
    /// (oldest-dropped on overflow, per [`Ingress::enqueue_command`]).
    pub fn push_command(&mut self, cmd: u8) {
        if (cmd as usize) < crate::rom::tables::COMMAND_COUNT {
            let class = self.rom.nmi_class(cmd);
            if class != crate::rom::NMI_CLASS_ENQUEUE {
                self.dispatch_command(cmd);
                return;
            }
        }
        self.ingress.enqueue_command(cmd);
    }

    fn dispatch_command(&mut self, command: u8) -> DispatchOutcome {
        let quiet_during_fade = self
            .channels
            .iter()
            .any(|ch| matches!(ch.active_command, ActiveCommand::SpecialMarker));
        let mut ctx = RouterContext {
            rom: &self.rom,
            channels: &mut self.channels,
            free: &mut self.free,
            active: &mut self.active,
            ingress: &mut self.ingress,
            speech: &mut self.speech,
            mixer_byte: &mut self.mixer_byte,
            quiet_during_fade,
        };
        router::dispatch(&mut ctx, command)
    }

    fn next_random(&mut self) -> u8 {
        // xorshift32 (`spec.md` §4.5.5 selector 5, "a chip status register
        // (PSG random)"); the original hardware reads POKEY's noise
        // register, which this port has no chip model for, so a small PRNG
        // stands in.
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x & 0xFF) as u8
    }

    /// Decrement every live channel's primary/secondary timers by its
    /// tempo, saturating at 0 (`spec.md` §4.5.2).
    fn decrement_timers(&mut self) {
        for channel in self.channels.iter_mut() {
            if !channel.status_live {
                continue;
            }
            let tempo = channel.tempo.max(1) as u16;
            channel.primary_timer = channel.primary_timer.saturating_sub(tempo);
            channel.secondary_timer = channel.secondary_timer.saturating_sub(tempo);
        }
    }

    /// Release any active-list head that is no longer playing: a natural
    /// end (`vm::step` already cleared `status_live`), an explicit stop
    /// (active-command was set to the finished sentinel), or a fade whose
    /// volume envelope has run to completion (`spec.md` §4.10).
    ///
    /// Only list heads are examined because only a hint's head channel is
    /// ever advanced by the VM (`spec.md` §4.7, §4.8); a lower-priority
    /// channel queued behind it is inert until promoted to head, at which
    /// point this same check catches it on a later tick.
    fn release_terminated_channels(&mut self, fm_sink: &mut dyn FmSink) {
        for hint in ALL_HINTS {
            let Some(idx) = self.active.list(hint).head() else {
                continue;
            };
            let channel = &self.channels[idx as usize];
            let dead = !channel.status_live
                || matches!(channel.active_command, ActiveCommand::FinishedSentinel)
                || (matches!(channel.active_command, ActiveCommand::SpecialMarker) && channel.vol_env.finished);
            if dead {
                if matches!(channel.hw_type, HwType::Fm) {
                    // Only a hint's list head is ever the physical channel
                    // at slot 0 (see the doc comment above), so the
                    // physical FM channel number is just the hint offset.
                    let ch = hint - fm::FM_HINT_BASE;
                    fm::silence_channel(ch, &mut self.fm_shadow, &mut self.error_flags, self.config.fm_busy_poll_budget, fm_sink);
                }
                allocator::release_channel(&mut self.channels, &mut self.active, &mut self.free, idx);
            }
        }
    }

    fn apply_effects(&mut self, effects: Vec<VmEffect>) {
        for effect in effects {
            match effect {
                VmEffect::HostEgress(byte) => self.ingress.push_egress(byte),
                VmEffect::SubmitCommand(cmd) => {
                    self.dispatch_command(cmd);
                }
                // Opcode `0x9D` only has a physical register destination on
                // the FM side; `fm::run` already applies it there. A PSG
                // channel executing it (e.g. before a mode-switch opcode)
                // has no FM shadow slot to target, so it is dropped here.
                VmEffect::VoiceLoad(_) => {}
            }
        }
    }

    /// Run one full tick (`spec.md` §5 ordering): decrement timers, dequeue
    /// and dispatch one ingress command, stream three speech sub-ticks,
    /// alternate the POKEY/YM2151 pass by tick parity, release any channel
    /// that finished this tick, stream the fourth speech sub-tick, and
    /// finally write the coarse mixer byte.
    pub fn tick(
        &mut self,
        psg_sink: &mut dyn PsgSink,
        fm_sink: &mut dyn FmSink,
        speech_sink: &mut dyn SpeechSink,
        mixer_sink: &mut dyn MixerSink,
    ) -> Result<()> {
        self.decrement_timers();

        if let Some(cmd) = self.ingress.pop_command() {
            self.dispatch_command(cmd);
        }
        self.release_terminated_channels(fm_sink);

        for _ in 0..3 {
            self.speech.stream_tick(speech_sink, &self.rom);
        }

        self.tick_count += 1;
        let random_byte = self.next_random();
        let effects = if self.tick_count % 2 == 1 {
            psg::run(
                &mut self.channels,
                &self.active,
                &self.rom,
                &mut self.scratch,
                random_byte,
                &mut self.error_flags,
                self.config.per_tick_opcode_budget,
                self.config.music_filter_threshold,
                psg_sink,
            )?
        } else {
            fm::run(
                &mut self.channels,
                &self.active,
                &self.rom,
                &mut self.scratch,
                random_byte,
                &mut self.error_flags,
                &self.config,
                &mut self.fm_shadow,
                fm_sink,
            )?
        };

        self.release_terminated_channels(fm_sink);
        self.apply_effects(effects);
        self.release_terminated_channels(fm_sink);

        self.speech.stream_tick(speech_sink, &self.rom);

        if self.ingress.take_egress_overflow() {
            self.error_flags.insert(ErrorFlags::HOST_EGRESS_OVERFLOW);
        }

        mixer_sink.write(self.mixer_byte);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::writes::RecordingSink;
    use crate::chip::{ChipWrite, NullSink};
    use crate::rom::{MusicEntry, RomImageBuilder, SfxEntry};
    use crate::router::{TYPE_MUSIC_SPEECH_START, TYPE_PSG_SFX, TYPE_STOP_BY_COMMAND};

    fn sfx_rom() -> RomImage {
        let mut builder = RomImageBuilder::new();
        let seq = builder.push_data(&[0x45, 0x80, 0xFF]);
        builder
            .command(0x0D, TYPE_PSG_SFX, 0x1D, crate::rom::NMI_CLASS_ENQUEUE)
            .command(0x05, TYPE_STOP_BY_COMMAND, 0x0D, crate::rom::NMI_CLASS_ENQUEUE)
            .sfx(SfxEntry {
                flags: 0,
                priority: 8,
                hint: 4,
                primary_ptr: seq,
                alternate_ptr: seq,
                chain_next: 0,
            })
            .build()
            .expect("build")
    }

    #[test]
    fn sfx_command_allocates_a_channel_within_two_ticks() {
        let rom = sfx_rom();
        let mut engine = Engine::new(rom, EngineConfig::default());
        engine.push_command(0x0D);

        let mut psg = NullSink;
        let mut fm = NullSink;
        let mut speech = NullSink;
        let mut mixer = NullSink;
        for _ in 0..2 {
            engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();
        }

        assert!(engine.channels().iter().any(|c| c.status_live));
        assert_eq!(engine.free_channel_count(), CHANNEL_COUNT - 1);
    }

    #[test]
    fn stop_by_command_returns_channel_to_free_list() {
        let rom = sfx_rom();
        let mut engine = Engine::new(rom, EngineConfig::default());
        engine.push_command(0x0D);

        let mut psg = NullSink;
        let mut fm = NullSink;
        let mut speech = NullSink;
        let mut mixer = NullSink;
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();

        assert_eq!(engine.free_channel_count(), CHANNEL_COUNT - 1);

        engine.push_command(0x05);
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();

        assert_eq!(engine.free_channel_count(), CHANNEL_COUNT);

        // Repeated stop is a no-op (`spec.md` §8.2 "Play then stop").
        engine.push_command(0x05);
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();
        assert_eq!(engine.free_channel_count(), CHANNEL_COUNT);
    }

    #[test]
    fn duplicate_sfx_command_does_not_allocate_twice() {
        let rom = sfx_rom();
        let mut engine = Engine::new(rom, EngineConfig::default());
        let mut psg = NullSink;
        let mut fm = NullSink;
        let mut speech = NullSink;
        let mut mixer = NullSink;

        engine.push_command(0x0D);
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();
        let after_first = engine.free_channel_count();

        engine.push_command(0x0D);
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();
        assert_eq!(engine.free_channel_count(), after_first);
    }

    #[test]
    fn volume_mixer_command_writes_mixer_sink() {
        let rom = RomImageBuilder::new()
            .command(0xD7, crate::router::TYPE_VOLUME_MIXER, 0b111_01_010, crate::rom::NMI_CLASS_ENQUEUE)
            .build()
            .unwrap();
        let mut engine = Engine::new(rom, EngineConfig::default());
        engine.push_command(0xD7);

        let mut psg = NullSink;
        let mut fm = NullSink;
        let mut speech = NullSink;
        let mut mixer = RecordingSink::new();
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();

        assert_eq!(mixer.writes, vec![ChipWrite::Mixer(0b111_01_010)]);
    }

    #[test]
    fn speech_command_streams_exact_byte_count() {
        let mut builder = RomImageBuilder::new();
        let data = builder.push_data(&[1, 2, 3, 4, 5]);
        let seq_index = builder.push_sequence_slot(crate::rom::SequenceSlot { pointer: data, length: 5 });
        let rom = builder
            .command(0x5A, TYPE_MUSIC_SPEECH_START, 0, crate::rom::NMI_CLASS_ENQUEUE)
            .music(
                0x5A,
                MusicEntry {
                    flags: 0x80,
                    tempo: 0,
                    sequence_table_index: seq_index,
                },
            )
            .build()
            .unwrap();
        let mut engine = Engine::new(rom, EngineConfig::default());
        engine.push_command(0x5A);

        let mut psg = NullSink;
        let mut fm = NullSink;
        let mut speech = RecordingSink::new();
        let mut mixer = NullSink;
        // 4 sub-ticks per tick; 5 bytes need at least 2 ticks.
        for _ in 0..2 {
            engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();
        }

        let speech_bytes: Vec<u8> = speech
            .writes
            .iter()
            .filter_map(|w| match w {
                ChipWrite::Speech(b) => Some(*b),
                _ => None,
            })
            .collect();
        assert_eq!(speech_bytes, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn invalid_command_is_silently_ignored() {
        let rom = RomImageBuilder::new().build().unwrap();
        let mut engine = Engine::new(rom, EngineConfig::default());
        engine.push_command(0x06);

        let mut psg = NullSink;
        let mut fm = NullSink;
        let mut speech = NullSink;
        let mut mixer = NullSink;
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();

        assert_eq!(engine.free_channel_count(), CHANNEL_COUNT);
        assert!(engine.error_flags().is_empty());
    }

    #[test]
    fn fm_channel_termination_silences_the_voice() {
        let mut builder = RomImageBuilder::new();
        let seq = builder.push_data(&[0x45, 0x80, 0xFF]);
        let rom = builder
            .command(0x0D, TYPE_PSG_SFX, 0x1D, crate::rom::NMI_CLASS_ENQUEUE)
            .command(0x05, TYPE_STOP_BY_COMMAND, 0x0D, crate::rom::NMI_CLASS_ENQUEUE)
            .sfx(SfxEntry {
                flags: 0,
                priority: 8,
                hint: 8, // an FM hint, not a PSG one
                primary_ptr: seq,
                alternate_ptr: seq,
                chain_next: 0,
            })
            .build()
            .expect("build");
        let mut engine = Engine::new(rom, EngineConfig::default());
        engine.push_command(0x0D);

        let mut psg = NullSink;
        let mut fm = RecordingSink::new();
        let mut speech = NullSink;
        let mut mixer = NullSink;
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();

        engine.push_command(0x05);
        engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer).unwrap();

        assert_eq!(engine.free_channel_count(), CHANNEL_COUNT);
        // Silencing writes a zero connection byte to the freed channel's
        // physical FM register (`spec.md` §4.10).
        let wrote_silent_connection = fm.writes.iter().any(|w| matches!(w, ChipWrite::Fm { register, value } if *register == 0x20 && *value == 0));
        assert!(wrote_silent_connection);
    }
}
