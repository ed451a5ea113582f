//! End-to-end engine scenarios (`spec.md` §8.5).
//!
//! Each test builds a small synthetic ROM with [`RomImageBuilder`] and
//! drives a real [`Engine`] through [`Engine::push_command`]/
//! [`Engine::tick`], exactly as a host CPU would — no internal module is
//! touched directly.

use soundrom_engine::chip::NullSink;
use soundrom_engine::config::EngineConfig;
use soundrom_engine::engine::Engine;
use soundrom_engine::rom::{MusicEntry, RomImageBuilder, SequenceSlot, SfxEntry};
use soundrom_engine::router::{
    TYPE_FADE_BY_COMMAND, TYPE_MUSIC_SPEECH_START, TYPE_PSG_SFX, TYPE_STOP_BY_COMMAND, TYPE_VOLUME_MIXER,
};

const NMI_ENQUEUE: u8 = soundrom_engine::rom::NMI_CLASS_ENQUEUE;

fn run_ticks(engine: &mut Engine, n: u64) {
    for _ in 0..n {
        engine
            .tick(&mut NullSink, &mut NullSink, &mut NullSink, &mut NullSink)
            .expect("tick should not produce a fatal error in these fixtures");
    }
}

/// Scenario 1: "Food Eaten". A Type 7 command whose chain walks two SFX
/// offsets on two different hints becomes two live channels within two
/// ticks, each with the SFX entry's encoded priority.
#[test]
fn food_eaten_chain_expands_to_two_live_channels() {
    let mut builder = RomImageBuilder::new();
    let seq = builder.push_data(&[0xBB]); // immediate end-of-sequence
    let rom = builder
        .command(0x0D, TYPE_PSG_SFX, 0, NMI_ENQUEUE)
        .sfx(SfxEntry {
            flags: 0xFF,
            priority: 8,
            hint: 4,
            primary_ptr: seq,
            alternate_ptr: seq,
            chain_next: 1,
        })
        .sfx(SfxEntry {
            flags: 0xFF,
            priority: 8,
            hint: 5,
            primary_ptr: seq,
            alternate_ptr: seq,
            chain_next: 0,
        })
        .build()
        .unwrap();

    let mut engine = Engine::new(rom, EngineConfig::default());
    engine.push_command(0x0D);
    run_ticks(&mut engine, 2);

    let live: Vec<_> = engine.channels().iter().filter(|c| c.status_live).collect();
    assert_eq!(live.len(), 2);
    for channel in live {
        assert_eq!(channel.encoded_priority(), (8 << 1) | 1);
    }
}

/// Scenario 3: music command starts playback; a duplicate push while it is
/// still active enqueues (equal priority, so no flush) rather than
/// re-triggering.
#[test]
fn music_command_then_duplicate_enqueues_without_flush() {
    let mut builder = RomImageBuilder::new();
    let data = builder.push_data(&[1, 2, 3, 4]);
    let seq_index = builder.push_sequence_slot(SequenceSlot { pointer: data, length: 4 });
    let rom = builder
        .command(0x04, TYPE_MUSIC_SPEECH_START, 0, NMI_ENQUEUE)
        .music(
            0x04,
            MusicEntry {
                flags: 0x03, // music (bit 7 clear), priority 3
                tempo: 0,
                sequence_table_index: seq_index,
            },
        )
        .build()
        .unwrap();

    let mut engine = Engine::new(rom, EngineConfig::default());
    engine.push_command(0x04);
    run_ticks(&mut engine, 1);
    assert!(!engine.speech_is_idle());
    assert_eq!(engine.speech_queued_len(), 0);

    engine.push_command(0x04);
    run_ticks(&mut engine, 1);
    assert_eq!(engine.speech_queued_len(), 1);

    // Equal-priority enqueues append rather than flush the queue
    // (`spec.md` §8.5 scenario 3).
    engine.push_command(0x04);
    run_ticks(&mut engine, 1);
    assert_eq!(engine.speech_queued_len(), 2);
}

/// Scenario 4: a speech command streams exactly the byte count recorded in
/// its sequence slot, and nothing more.
#[test]
fn speech_command_streams_exact_byte_count() {
    let mut builder = RomImageBuilder::new();
    let data = builder.push_data(&[0xAA; 12]);
    let seq_index = builder.push_sequence_slot(SequenceSlot { pointer: data, length: 12 });
    let rom = builder
        .command(0x5A, TYPE_MUSIC_SPEECH_START, 0, NMI_ENQUEUE)
        .music(
            0x5A,
            MusicEntry {
                flags: 0x80, // speech (bit 7 set)
                tempo: 0,
                sequence_table_index: seq_index,
            },
        )
        .build()
        .unwrap();

    let mut engine = Engine::new(rom, EngineConfig::default());
    engine.push_command(0x5A);

    struct CountingSpeech(usize);
    impl soundrom_engine::chip::SpeechSink for CountingSpeech {
        fn ready(&self) -> bool {
            true
        }
        fn write(&mut self, _byte: u8) {
            self.0 += 1;
        }
    }
    let mut speech = CountingSpeech(0);

    for _ in 0..8 {
        engine
            .tick(&mut NullSink, &mut NullSink, &mut speech, &mut NullSink)
            .unwrap();
    }

    assert_eq!(speech.0, 12);
}

/// Scenario 5: the volume-mixer handler splits its parameter byte straight
/// through to the mixer sink, unchanged.
#[test]
fn volume_mixer_command_passes_parameter_through() {
    let rom = RomImageBuilder::new()
        .command(0xD7, TYPE_VOLUME_MIXER, 0b111_01_010, NMI_ENQUEUE)
        .build()
        .unwrap();

    let mut engine = Engine::new(rom, EngineConfig::default());
    engine.push_command(0xD7);

    struct CapturingMixer(Option<u8>);
    impl soundrom_engine::chip::MixerSink for CapturingMixer {
        fn write(&mut self, value: u8) {
            self.0 = Some(value);
        }
    }
    let mut mixer = CapturingMixer(None);
    engine.tick(&mut NullSink, &mut NullSink, &mut NullSink, &mut mixer).unwrap();

    assert_eq!(mixer.0, Some(0b111_01_010));
}

/// Scenario 6: a maximum-priority SFX preempts a channel when all 30 slots
/// are occupied at a lower priority.
#[test]
fn higher_priority_sfx_preempts_when_all_channels_are_busy() {
    use soundrom_engine::channel::CHANNEL_COUNT;

    let mut builder = RomImageBuilder::new();
    let seq = builder.push_data(&[0xBB]);
    let low_entry = SfxEntry {
        flags: 0xFF,
        priority: 8, // encoded 0x11
        hint: 4,
        primary_ptr: seq,
        alternate_ptr: seq,
        chain_next: 0,
    };
    let high_entry = SfxEntry {
        flags: 0xFF,
        priority: 0x0F, // encoded 0x1F, maximum
        hint: 4,
        primary_ptr: seq,
        alternate_ptr: seq,
        chain_next: 0,
    };

    // Offset 0 is the shared low-priority entry; every command 1..=30
    // points at it, each a distinct command id so the duplicate check
    // never blocks a fresh allocation. Offset 1 is the preempting entry.
    builder = builder.sfx(low_entry).sfx(high_entry);
    for cmd in 1..=CHANNEL_COUNT as u8 {
        builder = builder.command(cmd, TYPE_PSG_SFX, 0, NMI_ENQUEUE);
    }
    builder = builder.command(200, TYPE_PSG_SFX, 1, NMI_ENQUEUE);
    let rom = builder.build().unwrap();

    let mut engine = Engine::new(rom, EngineConfig::default());
    for cmd in 1..=CHANNEL_COUNT as u8 {
        engine.push_command(cmd);
    }
    run_ticks(&mut engine, 1);
    assert_eq!(engine.free_channel_count(), 0);

    engine.push_command(200);
    run_ticks(&mut engine, 1);

    let max_encoded = (0x0F << 1) | 1;
    assert!(engine.channels().iter().any(|c| c.status_live && c.encoded_priority() == max_encoded));
}

/// `spec.md` §8.2 "Play then stop": a Type 7 command followed by a Type 5
/// stop with a matching parameter returns the channel to the free list;
/// repeating the stop is a no-op.
#[test]
fn play_then_stop_returns_channel_to_free_list() {
    let mut builder = RomImageBuilder::new();
    let seq = builder.push_data(&[0xBB]);
    let rom = builder
        .command(0x0D, TYPE_PSG_SFX, 0, NMI_ENQUEUE)
        .command(0x05, TYPE_STOP_BY_COMMAND, 0x0D, NMI_ENQUEUE)
        .sfx(SfxEntry {
            flags: 0,
            priority: 8,
            hint: 4,
            primary_ptr: seq,
            alternate_ptr: seq,
            chain_next: 0,
        })
        .build()
        .unwrap();

    let mut engine = Engine::new(rom, EngineConfig::default());
    engine.push_command(0x0D);
    run_ticks(&mut engine, 1);
    assert_eq!(engine.free_channel_count(), soundrom_engine::channel::CHANNEL_COUNT - 1);

    engine.push_command(0x05);
    run_ticks(&mut engine, 1);
    assert_eq!(engine.free_channel_count(), soundrom_engine::channel::CHANNEL_COUNT);

    engine.push_command(0x05);
    run_ticks(&mut engine, 1);
    assert_eq!(engine.free_channel_count(), soundrom_engine::channel::CHANNEL_COUNT);
}

/// `spec.md` §4.10 / Type 9: fading a live channel installs the canonical
/// decay envelope and the channel is released once the envelope finishes.
#[test]
fn fade_by_command_eventually_releases_the_channel() {
    let mut builder = RomImageBuilder::new();
    let seq = builder.push_data(&[0xBB]);
    // The builder reserves a canonical fade envelope by default: a single
    // step straight to the end-of-envelope marker.
    let rom = builder
        .command(0x0D, TYPE_PSG_SFX, 0, NMI_ENQUEUE)
        .command(0x3C, TYPE_FADE_BY_COMMAND, 0x0D, NMI_ENQUEUE)
        .sfx(SfxEntry {
            flags: 0,
            priority: 8,
            hint: 4,
            primary_ptr: seq,
            alternate_ptr: seq,
            chain_next: 0,
        })
        .build()
        .unwrap();

    let mut engine = Engine::new(rom, EngineConfig::default());
    engine.push_command(0x0D);
    run_ticks(&mut engine, 1);
    assert_eq!(engine.free_channel_count(), soundrom_engine::channel::CHANNEL_COUNT - 1);

    engine.push_command(0x3C);
    // The fade envelope finishes on its first step; give it a few ticks to
    // be released by the termination sweep.
    run_ticks(&mut engine, 4);
    assert_eq!(engine.free_channel_count(), soundrom_engine::channel::CHANNEL_COUNT);
}
