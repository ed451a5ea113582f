//! Fixed-layout ROM table parsing.
//!
//! The original ROM is a 48 KiB image with command/SFX/envelope tables at
//! fixed addresses (`spec.md` §3.2–§3.5, §6.5). This module defines its own
//! compact, documented header layout (a small fixed preamble of table
//! *lengths and offsets*, followed by the tables themselves) rather than
//! guessing at the real 6502 memory map. Anything that consumes a
//! `RomImage` only depends on the accessors in `rom::mod`, not on this
//! layout, so the header can be revised without touching the rest of the
//! engine.

use nom::multi::count;
use nom::number::complete::{le_u16, u8 as nom_u8};
use nom::IResult;

/// Number of host commands (`spec.md` §3.2): 0..218 inclusive.
pub const COMMAND_COUNT: usize = 219;
/// Number of duration-table entries (`spec.md` §3.5).
pub const DURATION_COUNT: usize = 16;
/// Number of FM frequency-table entries (`spec.md` §3.5, §8.3).
pub const FM_FREQ_COUNT: usize = 128;
/// Sentinel used for "no handler"/invalid command (`spec.md` §3.2).
pub const HANDLER_TYPE_INVALID: u8 = 0xFF;
/// Sentinel meaning "enqueue to the main ingress buffer" for NMI validation
/// class (`spec.md` §3.2, §4.2).
pub const NMI_CLASS_ENQUEUE: u8 = 0xFF;

/// One entry of the SFX metadata table (`spec.md` §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfxEntry {
    /// `0xFF` = immediate-play-no-duplicate-check, `0` = duplicate check.
    pub flags: u8,
    /// Priority 0..15.
    pub priority: u8,
    /// Physical-channel hint, 4..11.
    pub hint: u8,
    /// Primary sequence pointer into the sequence data region.
    pub primary_ptr: u16,
    /// Alternate sequence pointer.
    pub alternate_ptr: u16,
    /// Next-offset chain byte; `0` ends the chain.
    pub chain_next: u8,
}

/// One entry of the music/speech metadata table (`spec.md` §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicEntry {
    /// Bit 7 = special mode; bits 0..3 = volume computation field.
    pub flags: u8,
    /// Tempo override.
    pub tempo: u8,
    /// Index into the sequence table (pointer, length) pairs.
    pub sequence_table_index: u8,
}

/// A (pointer, length) pair resolved from a sequence-table index
/// (`spec.md` §3.4, §8.5 scenario 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSlot {
    /// Pointer into the sequence data region.
    pub pointer: u16,
    /// Length in bytes.
    pub length: u16,
}

pub(super) fn parse_duration_table(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    count(le_u16, DURATION_COUNT)(input)
}

pub(super) fn parse_fm_freq_table(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    count(le_u16, FM_FREQ_COUNT)(input)
}

fn parse_sfx_entry(input: &[u8]) -> IResult<&[u8], SfxEntry> {
    let (input, flags) = nom_u8(input)?;
    let (input, priority) = nom_u8(input)?;
    let (input, hint) = nom_u8(input)?;
    let (input, primary_ptr) = le_u16(input)?;
    let (input, alternate_ptr) = le_u16(input)?;
    let (input, chain_next) = nom_u8(input)?;
    Ok((
        input,
        SfxEntry {
            flags,
            priority,
            hint,
            primary_ptr,
            alternate_ptr,
            chain_next,
        },
    ))
}

pub(super) fn parse_sfx_table(input: &[u8], n: usize) -> IResult<&[u8], Vec<SfxEntry>> {
    count(parse_sfx_entry, n)(input)
}

fn parse_music_entry(input: &[u8]) -> IResult<&[u8], MusicEntry> {
    let (input, flags) = nom_u8(input)?;
    let (input, tempo) = nom_u8(input)?;
    let (input, sequence_table_index) = nom_u8(input)?;
    Ok((
        input,
        MusicEntry {
            flags,
            tempo,
            sequence_table_index,
        },
    ))
}

pub(super) fn parse_music_table(input: &[u8], n: usize) -> IResult<&[u8], Vec<MusicEntry>> {
    count(parse_music_entry, n)(input)
}

fn parse_sequence_slot(input: &[u8]) -> IResult<&[u8], SequenceSlot> {
    let (input, pointer) = le_u16(input)?;
    let (input, length) = le_u16(input)?;
    Ok((input, SequenceSlot { pointer, length }))
}

pub(super) fn parse_sequence_table(input: &[u8], n: usize) -> IResult<&[u8], Vec<SequenceSlot>> {
    count(parse_sequence_slot, n)(input)
}
