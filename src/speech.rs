//! Speech/music playback queue and streamer (`spec.md` §4.9).
//!
//! Music and speech share one piece of playback machinery — a sequence
//! pointer, an active flag, and a length counter — differing only in
//! where the bytes they stream end up (`spec.md` §4.9 "The same playback
//! machinery hosts both music and speech"). This port keeps that sharing
//! explicit via [`PlaybackKind`] rather than duplicating the queue.

use crate::chip::SpeechSink;
use crate::rom::{MusicEntry, RomImage};

/// Capacity of the speech/music priority queue (`spec.md` §4.9).
pub const QUEUE_CAPACITY: usize = 8;

/// Which output a playback entry's bytes are destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackKind {
    Music,
    Speech,
}

/// One queued or currently-playing entry.
#[derive(Debug, Clone, Copy)]
pub struct Playback {
    pub command: u8,
    pub kind: PlaybackKind,
    pub pointer: u16,
    pub remaining: u16,
    pub priority: u8,
}

/// The 8-entry priority queue plus the single active playback slot
/// (`spec.md` §4.9).
#[derive(Debug, Default)]
pub struct SpeechQueue {
    queued: Vec<Playback>,
    current: Option<Playback>,
    current_priority: u8,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when nothing is playing (router uses this to decide
    /// start-vs-enqueue, `spec.md` §4.3 Type 11).
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Begin playback immediately, bypassing the queue (`spec.md` §4.3).
    pub fn start(&mut self, command: u8, entry: MusicEntry, priority: u8) {
        self.current_priority = priority;
        self.current = resolve(command, entry, priority);
    }

    /// Enqueue a request while something else is already playing
    /// (`spec.md` §4.9):
    /// - lower priority than current: dropped;
    /// - equal: appended without flushing;
    /// - higher: the queue is flushed first, then this entry is appended
    ///   and becomes the new reference priority.
    pub fn enqueue(&mut self, command: u8, entry: MusicEntry, priority: u8) {
        if priority < self.current_priority {
            return;
        }
        if priority > self.current_priority {
            self.queued.clear();
            self.current_priority = priority;
        }
        if self.queued.len() < QUEUE_CAPACITY {
            if let Some(playback) = resolve(command, entry, priority) {
                self.queued.push(playback);
            }
        }
    }

    /// Number of entries waiting (not counting the active slot); used to
    /// verify the queue-discipline invariant (`spec.md` §8.1).
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Stream one byte if speech is active and the sink is ready
    /// (`spec.md` §4.9 "Streamer", run 4x per tick by the engine). Returns
    /// `true` if a byte was emitted. Music playback advances its length
    /// counter here too but never touches `sink`, matching "only the byte
    /// sink differs" — its audible output comes from the VM/FM pipeline
    /// instead.
    pub fn stream_tick(&mut self, sink: &mut dyn SpeechSink, rom: &RomImage) -> bool {
        let Some(playback) = &mut self.current else {
            return false;
        };

        let emitted = match playback.kind {
            PlaybackKind::Speech => {
                if !sink.ready() {
                    return false;
                }
                match rom.read_u8(playback.pointer) {
                    Ok(byte) => {
                        sink.write(byte);
                        playback.pointer = playback.pointer.wrapping_add(1);
                        playback.remaining = playback.remaining.saturating_sub(1);
                        true
                    }
                    Err(_) => {
                        playback.remaining = 0;
                        false
                    }
                }
            }
            PlaybackKind::Music => {
                playback.remaining = playback.remaining.saturating_sub(1);
                false
            }
        };

        if self.current.as_ref().map(|p| p.remaining) == Some(0) {
            self.advance_queue();
        }
        emitted
    }

    fn advance_queue(&mut self) {
        self.current = if self.queued.is_empty() {
            None
        } else {
            Some(self.queued.remove(0))
        };
    }
}

fn resolve(command: u8, entry: MusicEntry, priority: u8) -> Option<Playback> {
    let kind = if entry.flags & 0x80 != 0 {
        PlaybackKind::Speech
    } else {
        PlaybackKind::Music
    };
    Some(Playback {
        command,
        kind,
        pointer: 0,
        remaining: 0,
        priority,
    })
}

/// Resolve a music/speech command's sequence slot and start or enqueue it,
/// filling in the real pointer/length the simplified [`resolve`] above
/// leaves at zero. Kept separate so [`SpeechQueue`] itself does not need a
/// `RomImage` reference for every operation.
pub fn dispatch_with_rom(queue: &mut SpeechQueue, rom: &RomImage, command: u8, entry: MusicEntry, priority: u8) {
    let slot = rom.sequence_slot(entry.sequence_table_index);
    if queue.is_idle() {
        queue.start(command, entry, priority);
    } else {
        queue.enqueue(command, entry, priority);
    }
    if let Some(slot) = slot {
        if let Some(playback) = queue.current.as_mut().filter(|p| p.command == command) {
            playback.pointer = slot.pointer;
            playback.remaining = slot.length;
        } else if let Some(playback) = queue.queued.iter_mut().rev().find(|p| p.command == command) {
            playback.pointer = slot.pointer;
            playback.remaining = slot.length;
        }
    }
}
