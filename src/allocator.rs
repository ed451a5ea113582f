//! Channel allocator: PSG/FM SFX voice allocation, preemption, and
//! multi-channel chain expansion (`spec.md` §4.4).

use crate::channel::{ActiveCommand, Channel, ChannelList, HwType, CHANNEL_COUNT};
use crate::rom::{RomImage, SfxEntry};

/// Number of distinct hint values (`spec.md` §3.3: hint ∈ 4..11).
const HINT_COUNT: usize = 8;
const HINT_BASE: u8 = 4;

/// Per-hardware-group active lists, one per hint value (`spec.md` §3.1,
/// §4.4 step 6).
#[derive(Debug, Clone)]
pub struct ActiveLists {
    lists: [ChannelList; HINT_COUNT],
}

impl ActiveLists {
    /// All lists empty.
    pub fn new() -> Self {
        Self {
            lists: [ChannelList::new(); HINT_COUNT],
        }
    }

    fn slot(hint: u8) -> usize {
        (hint.saturating_sub(HINT_BASE) as usize).min(HINT_COUNT - 1)
    }

    /// The active list rooted at `hint`.
    pub fn list(&self, hint: u8) -> &ChannelList {
        &self.lists[Self::slot(hint)]
    }

    /// Mutable access to the active list rooted at `hint`.
    pub fn list_mut(&mut self, hint: u8) -> &mut ChannelList {
        &mut self.lists[Self::slot(hint)]
    }

    /// Iterate every hint's list alongside its hint value.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &ChannelList)> {
        self.lists
            .iter()
            .enumerate()
            .map(|(i, l)| (HINT_BASE + i as u8, l))
    }
}

impl Default for ActiveLists {
    fn default() -> Self {
        Self::new()
    }
}

/// Default mixer byte and control mask the allocator writes into a freshly
/// claimed channel (`spec.md` §4.4 step 5); the low nibble of the mixer byte
/// seeds the channel's base volume before any volume envelope runs.
const DEFAULT_MIXER_BYTE: u8 = 0xA0;
const DEFAULT_AUDCTL_MASK: u8 = 0xFF;
const DEFAULT_ENVELOPE_PTR: u16 = 0x31;

/// Outcome of a single allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocOutcome {
    /// A channel was claimed at this index.
    Allocated(u8),
    /// `spec.md` §4.4 step 2: the sound is already playing and duplicate
    /// checking applies.
    DuplicateSkipped,
    /// `spec.md` §4.4 step 4: no free slot and no preemptable candidate.
    NoSlot,
}

/// Allocate channels for a Type 7 PSG SFX command, walking the chain table
/// until it terminates (`spec.md` §4.4 step 7). Returns every outcome, one
/// per offset visited, in chain order.
pub fn allocate_sfx(
    rom: &RomImage,
    channels: &mut [Channel; CHANNEL_COUNT],
    free: &mut ChannelList,
    active: &mut ActiveLists,
    command_id: u8,
    mut offset: u8,
) -> Vec<AllocOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let Some(entry) = rom.sfx_entry(offset) else {
            break;
        };
        let outcome = allocate_one(channels, free, active, command_id, &entry);
        outcomes.push(outcome);
        if entry.chain_next == 0 {
            break;
        }
        offset = entry.chain_next;
    }
    outcomes
}

fn allocate_one(
    channels: &mut [Channel; CHANNEL_COUNT],
    free: &mut ChannelList,
    active: &mut ActiveLists,
    command_id: u8,
    entry: &SfxEntry,
) -> AllocOutcome {
    // Step 1: choose primary vs. alternate sequence pointer. The original
    // 6502 inherits a carry from unrelated prior arithmetic; this port uses
    // a deterministic per-offset function instead of replicating carry
    // propagation: the priority byte's MSB (see `DESIGN.md`).
    let seq_ptr = if entry.priority & 0x80 != 0 {
        entry.alternate_ptr
    } else {
        entry.primary_ptr
    };

    // Step 2: duplicate check.
    if entry.flags != 0xFF {
        let already_playing = channels.iter().any(|ch| {
            ch.status_live && matches!(ch.active_command, ActiveCommand::Live(id) if id == command_id)
        });
        if already_playing {
            return AllocOutcome::DuplicateSkipped;
        }
    }

    // Step 3: find a free channel by descending index.
    let mut claimed: Option<u8> = None;
    for idx in (0..CHANNEL_COUNT as u8).rev() {
        if !channels[idx as usize].status_live {
            free.remove(channels, idx);
            claimed = Some(idx);
            break;
        }
    }

    // Step 4: preempt if nothing free.
    let new_encoded_priority = (entry.priority << 1) | 1;
    if claimed.is_none() {
        let list = active.list(entry.hint);
        let mut victim = None;
        for idx in list.iter(channels) {
            if new_encoded_priority >= channels[idx as usize].encoded_priority() {
                victim = Some(idx);
                break;
            }
        }
        match victim {
            Some(idx) => {
                active.list_mut(entry.hint).remove(channels, idx);
                claimed = Some(idx);
            }
            None => return AllocOutcome::NoSlot,
        }
    }

    let idx = claimed.expect("claimed set by one of the branches above");

    // Step 5: initialize defaults.
    channels[idx as usize].clear();
    let ch = &mut channels[idx as usize];
    ch.status_live = true;
    ch.active_command = ActiveCommand::Live(command_id);
    ch.priority = entry.priority;
    ch.hw_type = hw_type_for_hint(entry.hint);
    ch.seq_ptr = seq_ptr;
    ch.base_volume = DEFAULT_MIXER_BYTE & 0x0F;
    ch.ctl_and_mask = DEFAULT_AUDCTL_MASK;
    ch.vol_env.ptr = DEFAULT_ENVELOPE_PTR;

    // Step 6: link into the active list in priority order.
    active.list_mut(entry.hint).insert_by_priority(channels, idx);

    AllocOutcome::Allocated(idx)
}

fn hw_type_for_hint(hint: u8) -> HwType {
    // Hints 4..7 address the two POKEY pairs (spec.md §4.7); 8..11 address
    // the eight FM channels (spec.md §4.8, one hint per pair of voices).
    if hint < 8 {
        HwType::Psg
    } else {
        HwType::Fm
    }
}

/// Release a channel back to the free list, silencing it first
/// (`spec.md` §4.10 "Natural end").
pub fn release_channel(channels: &mut [Channel; CHANNEL_COUNT], active: &mut ActiveLists, free: &mut ChannelList, idx: u8) {
    for hint in HINT_BASE..HINT_BASE + HINT_COUNT as u8 {
        active.list_mut(hint).remove(channels, idx);
    }
    channels[idx as usize].clear();
    free.push_front(channels, idx);
}
