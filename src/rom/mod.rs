//! ROM image loading (`spec.md` §3.2–§3.5, §6.5).
//!
//! All engine behavior is driven by data read from a ROM image supplied by
//! the caller; this module is the only place that interprets raw bytes as
//! tables. A compact header (see `tables.rs`) records each table's offset
//! and, where the table is variable-length, its entry count. Every pointer
//! stored inside a table (sequence pointers, envelope pointers, voice
//! pointers) is an absolute byte offset into the full ROM image, exactly as
//! the original 6502 firmware addresses its own ROM.

pub mod tables;

use std::collections::HashMap;

use nom::number::complete::{le_u16, u8 as nom_u8};
use nom::IResult;

pub use tables::{MusicEntry, SequenceSlot, SfxEntry, DURATION_COUNT, FM_FREQ_COUNT, HANDLER_TYPE_INVALID, NMI_CLASS_ENQUEUE};

use crate::error::{EngineError, Result};

/// A parsed, immutable ROM image.
///
/// Construct with [`RomImage::load`] from a real image, or with
/// [`RomImageBuilder`] for tests.
#[derive(Debug, Clone)]
pub struct RomImage {
    raw: Vec<u8>,
    command_handler_types: Vec<u8>,
    command_params: Vec<u8>,
    command_nmi_class: Vec<u8>,
    sfx_table: Vec<SfxEntry>,
    music_table: HashMap<u8, MusicEntry>,
    sequence_table: Vec<SequenceSlot>,
    duration_table: Vec<u16>,
    fm_freq_table: Vec<u16>,
    freq_shape_off: usize,
    freq_shape_len: usize,
    vol_shape_off: usize,
    vol_shape_len: usize,
    fade_envelope_ptr: u16,
}

/// Canonical size of the original ROM image. A caller-supplied image need
/// not match exactly (see [`RomImage::load`]); this is exposed for tooling
/// that wants to sanity-check a dump before loading it.
pub const CANONICAL_ROM_SIZE: usize = 48 * 1024;

fn parse_header(input: &[u8]) -> IResult<&[u8], HeaderFields> {
    let (input, command_handler_types_off) = le_u16(input)?;
    let (input, command_params_off) = le_u16(input)?;
    let (input, command_nmi_class_off) = le_u16(input)?;
    let (input, sfx_table_off) = le_u16(input)?;
    let (input, sfx_count) = nom_u8(input)?;
    let (input, music_table_off) = le_u16(input)?;
    let (input, music_count) = nom_u8(input)?;
    let (input, sequence_table_off) = le_u16(input)?;
    let (input, sequence_count) = le_u16(input)?;
    let (input, duration_table_off) = le_u16(input)?;
    let (input, fm_freq_table_off) = le_u16(input)?;
    let (input, freq_shape_off) = le_u16(input)?;
    let (input, freq_shape_len) = le_u16(input)?;
    let (input, vol_shape_off) = le_u16(input)?;
    let (input, vol_shape_len) = le_u16(input)?;
    let (input, fade_envelope_ptr) = le_u16(input)?;
    Ok((
        input,
        HeaderFields {
            command_handler_types_off,
            command_params_off,
            command_nmi_class_off,
            sfx_table_off,
            sfx_count,
            music_table_off,
            music_count,
            sequence_table_off,
            sequence_count,
            duration_table_off,
            fm_freq_table_off,
            freq_shape_off,
            freq_shape_len,
            vol_shape_off,
            vol_shape_len,
            fade_envelope_ptr,
        },
    ))
}

struct HeaderFields {
    command_handler_types_off: u16,
    command_params_off: u16,
    command_nmi_class_off: u16,
    sfx_table_off: u16,
    sfx_count: u8,
    music_table_off: u16,
    music_count: u8,
    sequence_table_off: u16,
    sequence_count: u16,
    duration_table_off: u16,
    fm_freq_table_off: u16,
    freq_shape_off: u16,
    freq_shape_len: u16,
    vol_shape_off: u16,
    vol_shape_len: u16,
    fade_envelope_ptr: u16,
}

/// Byte length of the fixed header preamble.
pub const HEADER_LEN: usize = 32;

impl RomImage {
    /// Parse a ROM image from raw bytes.
    ///
    /// The image need not be exactly [`CANONICAL_ROM_SIZE`] — only large
    /// enough to hold the header and every table/pointer it declares — but a
    /// size far from canonical is logged as a warning by callers that care
    /// (the CLI does; this library call does not reject it outright, since
    /// a reduced fixture image is the normal case in tests).
    pub fn load(raw: &[u8]) -> Result<Self> {
        let (rest, header) = parse_header(raw)
            .map_err(|_| EngineError::RomLayout("ROM image shorter than header".into()))?;
        let _ = rest;

        let command_handler_types = slice_at(
            raw,
            header.command_handler_types_off as usize,
            tables::COMMAND_COUNT,
            "command handler-type table",
        )?
        .to_vec();
        let command_params = slice_at(
            raw,
            header.command_params_off as usize,
            tables::COMMAND_COUNT,
            "command parameter table",
        )?
        .to_vec();
        let command_nmi_class = slice_at(
            raw,
            header.command_nmi_class_off as usize,
            tables::COMMAND_COUNT,
            "command NMI-validation table",
        )?
        .to_vec();

        let sfx_bytes = slice_at(
            raw,
            header.sfx_table_off as usize,
            header.sfx_count as usize * 9,
            "SFX metadata table",
        )?;
        let (_, sfx_table) = tables::parse_sfx_table(sfx_bytes, header.sfx_count as usize)
            .map_err(|_| EngineError::RomLayout("malformed SFX metadata table".into()))?;

        let music_bytes = slice_at(
            raw,
            header.music_table_off as usize,
            header.music_count as usize * 4,
            "music metadata table",
        )?;
        let mut music_table = HashMap::new();
        let mut cursor = music_bytes;
        for _ in 0..header.music_count {
            let (rest, command_id) = nom_u8::<_, nom::error::Error<&[u8]>>(cursor)
                .map_err(|_| EngineError::RomLayout("malformed music metadata table".into()))?;
            let (rest, entry) = tables::parse_music_table(rest, 1)
                .map_err(|_| EngineError::RomLayout("malformed music metadata table".into()))?;
            music_table.insert(command_id, entry[0]);
            cursor = rest;
        }

        let sequence_bytes = slice_at(
            raw,
            header.sequence_table_off as usize,
            header.sequence_count as usize * 4,
            "sequence-slot table",
        )?;
        let (_, sequence_table) =
            tables::parse_sequence_table(sequence_bytes, header.sequence_count as usize)
                .map_err(|_| EngineError::RomLayout("malformed sequence-slot table".into()))?;

        let duration_bytes = slice_at(
            raw,
            header.duration_table_off as usize,
            DURATION_COUNT * 2,
            "duration table",
        )?;
        let (_, duration_table) = tables::parse_duration_table(duration_bytes)
            .map_err(|_| EngineError::RomLayout("malformed duration table".into()))?;

        let fm_freq_bytes = slice_at(
            raw,
            header.fm_freq_table_off as usize,
            FM_FREQ_COUNT * 2,
            "FM frequency table",
        )?;
        let (_, fm_freq_table) = tables::parse_fm_freq_table(fm_freq_bytes)
            .map_err(|_| EngineError::RomLayout("malformed FM frequency table".into()))?;

        // Validate the shape tables are in bounds without copying them; the
        // envelope pipeline reads them lazily by address.
        slice_at(
            raw,
            header.freq_shape_off as usize,
            header.freq_shape_len as usize,
            "frequency shape table",
        )?;
        slice_at(
            raw,
            header.vol_shape_off as usize,
            header.vol_shape_len as usize,
            "volume/distortion shape table",
        )?;

        Ok(Self {
            raw: raw.to_vec(),
            command_handler_types,
            command_params,
            command_nmi_class,
            sfx_table,
            music_table,
            sequence_table,
            duration_table,
            fm_freq_table,
            freq_shape_off: header.freq_shape_off as usize,
            freq_shape_len: header.freq_shape_len as usize,
            vol_shape_off: header.vol_shape_off as usize,
            vol_shape_len: header.vol_shape_len as usize,
            fade_envelope_ptr: header.fade_envelope_ptr,
        })
    }

    /// Handler-type for a command id, or [`HANDLER_TYPE_INVALID`] if the id
    /// is out of range (`spec.md` §8.4: commands `0xDB..=0xFF` are ignored).
    pub fn handler_type(&self, command: u8) -> u8 {
        self.command_handler_types
            .get(command as usize)
            .copied()
            .unwrap_or(HANDLER_TYPE_INVALID)
    }

    /// Parameter byte for a command id.
    pub fn param(&self, command: u8) -> u8 {
        self.command_params.get(command as usize).copied().unwrap_or(0)
    }

    /// NMI-validation class for a command id (`spec.md` §4.2).
    pub fn nmi_class(&self, command: u8) -> u8 {
        self.command_nmi_class
            .get(command as usize)
            .copied()
            .unwrap_or(NMI_CLASS_ENQUEUE)
    }

    /// SFX metadata entry at a given offset.
    pub fn sfx_entry(&self, offset: u8) -> Option<SfxEntry> {
        self.sfx_table.get(offset as usize).copied()
    }

    /// Music/speech metadata entry for a command id.
    pub fn music_entry(&self, command: u8) -> Option<MusicEntry> {
        self.music_table.get(&command).copied()
    }

    /// (pointer, length) pair for a sequence-table index.
    pub fn sequence_slot(&self, index: u8) -> Option<SequenceSlot> {
        self.sequence_table.get(index as usize).copied()
    }

    /// Duration table (16 entries, `spec.md` §3.5, §8.3).
    pub fn duration(&self, index: u8) -> u16 {
        self.duration_table[(index & 0x0F) as usize]
    }

    /// FM frequency table (128 entries; index 0 is rest, `spec.md` §8.3).
    pub fn fm_frequency(&self, note: u8) -> u16 {
        self.fm_freq_table[(note as usize) % FM_FREQ_COUNT]
    }

    /// The canonical decay envelope pointer Type 9/10 fades install
    /// (`spec.md` §4.3, §4.10 "a known rate-pair"): a fixed address baked
    /// into the ROM header, the same way the original firmware's fade
    /// handlers reference one constant envelope table rather than building
    /// one on the fly.
    pub fn fade_envelope_ptr(&self) -> u16 {
        self.fade_envelope_ptr
    }

    /// Read one byte at an absolute ROM address.
    pub fn read_u8(&self, addr: u16) -> Result<u8> {
        self.raw
            .get(addr as usize)
            .copied()
            .ok_or_else(|| EngineError::RomLayout(format!("read past end of ROM at {addr:#06x}")))
    }

    /// Read a little-endian 16-bit value at an absolute ROM address.
    pub fn read_u16(&self, addr: u16) -> Result<u16> {
        let lo = self.read_u8(addr)? as u16;
        let hi = self.read_u8(addr.wrapping_add(1))? as u16;
        Ok(lo | (hi << 8))
    }

    /// Read one byte from the frequency-shape table (multipliers,
    /// `0xFF`-terminated, `spec.md` §3.5).
    pub fn freq_shape_byte(&self, index: usize) -> Option<u8> {
        if index >= self.freq_shape_len {
            return None;
        }
        self.raw.get(self.freq_shape_off + index).copied()
    }

    /// Read one byte from the volume/distortion-shape table.
    pub fn vol_shape_byte(&self, index: usize) -> Option<u8> {
        if index >= self.vol_shape_len {
            return None;
        }
        self.raw.get(self.vol_shape_off + index).copied()
    }

    /// Total size in bytes of the loaded image.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the loaded image is empty (always false for a successfully
    /// loaded image; present for API symmetry).
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

fn slice_at<'a>(raw: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    raw.get(offset..offset + len)
        .ok_or_else(|| EngineError::RomLayout(format!("{what} out of bounds (offset {offset}, len {len})")))
}

/// Builder for synthetic ROM images used in tests (`SPEC_FULL.md` §3.7).
///
/// Produces the same byte layout [`RomImage::load`] expects, without
/// requiring a real 48 KiB dump.
#[derive(Debug, Default)]
pub struct RomImageBuilder {
    command_handler_types: Vec<u8>,
    command_params: Vec<u8>,
    command_nmi_class: Vec<u8>,
    sfx_table: Vec<SfxEntry>,
    music_table: Vec<(u8, MusicEntry)>,
    sequence_table: Vec<SequenceSlot>,
    duration_table: Vec<u16>,
    fm_freq_table: Vec<u16>,
    freq_shape: Vec<u8>,
    vol_shape: Vec<u8>,
    data: Vec<u8>,
    data_base: u16,
    fade_envelope_ptr: u16,
}

/// Default canonical decay envelope bytes: a single terminator, i.e. the
/// volume envelope finishes (and the fading channel is released) on its
/// very first step (`spec.md` §4.6 "Envelope termination"). Real ROM
/// content would ramp volume down over several steps before this byte;
/// this port doesn't need a multi-step ramp to exercise the fade lifecycle.
const DEFAULT_FADE_ENVELOPE: [u8; 1] = [0xFF];

impl RomImageBuilder {
    /// Start a builder with all-invalid command tables and empty data.
    ///
    /// The data region (sequence/envelope/voice bytes pushed via
    /// [`Self::push_data`]) is laid out immediately after the header, at the
    /// fixed address [`HEADER_LEN`]. Every other table follows it. Placing
    /// data first means its addresses are stable the moment [`Self::push_data`]
    /// returns, independent of how many SFX/music/sequence entries are added
    /// afterward.
    ///
    /// The canonical fade envelope (`spec.md` §4.3 Type 9/10) is reserved as
    /// the very first data bytes, so its address is fixed and never collides
    /// with caller-pushed sequence/voice data regardless of what else is
    /// built (see [`Self::fade_envelope`] to override it).
    pub fn new() -> Self {
        let mut builder = Self {
            command_handler_types: vec![HANDLER_TYPE_INVALID; tables::COMMAND_COUNT],
            command_params: vec![0; tables::COMMAND_COUNT],
            command_nmi_class: vec![NMI_CLASS_ENQUEUE; tables::COMMAND_COUNT],
            duration_table: vec![0; DURATION_COUNT],
            fm_freq_table: (0..FM_FREQ_COUNT as u32)
                .map(|n| if n == 0 { 0 } else { (440.0 * 2f64.powf((n as f64 - 70.0) / 12.0)) as u16 })
                .collect(),
            data_base: HEADER_LEN as u16,
            ..Default::default()
        };
        builder.fade_envelope_ptr = builder.push_data(&DEFAULT_FADE_ENVELOPE);
        builder
    }

    /// Override the canonical fade envelope's bytes and/or address,
    /// appending them to the data region like [`Self::push_data`].
    pub fn fade_envelope(mut self, bytes: &[u8]) -> Self {
        self.fade_envelope_ptr = self.push_data(bytes);
        self
    }

    /// Set the handler-type, parameter and NMI class for a command.
    pub fn command(mut self, command: u8, handler_type: u8, param: u8, nmi_class: u8) -> Self {
        self.command_handler_types[command as usize] = handler_type;
        self.command_params[command as usize] = param;
        self.command_nmi_class[command as usize] = nmi_class;
        self
    }

    /// Append a sequence of arbitrary bytes (sequence/envelope/voice data) to
    /// the ROM's data region and return the absolute address it starts at.
    pub fn push_data(&mut self, bytes: &[u8]) -> u16 {
        let addr = self.data_base + self.data.len() as u16;
        self.data.extend_from_slice(bytes);
        addr
    }

    /// Append an SFX metadata entry (index == its offset).
    pub fn sfx(mut self, entry: SfxEntry) -> Self {
        self.sfx_table.push(entry);
        self
    }

    /// Append a music/speech metadata entry for a command.
    pub fn music(mut self, command: u8, entry: MusicEntry) -> Self {
        self.music_table.push((command, entry));
        self
    }

    /// Append a (pointer, length) sequence slot, returning its index.
    pub fn push_sequence_slot(&mut self, slot: SequenceSlot) -> u8 {
        let index = self.sequence_table.len() as u8;
        self.sequence_table.push(slot);
        index
    }

    /// Overwrite the duration table.
    pub fn durations(mut self, table: [u16; DURATION_COUNT]) -> Self {
        self.duration_table = table.to_vec();
        self
    }

    /// Overwrite the frequency-shape table bytes.
    pub fn freq_shape(mut self, bytes: &[u8]) -> Self {
        self.freq_shape = bytes.to_vec();
        self
    }

    /// Overwrite the volume/distortion-shape table bytes.
    pub fn vol_shape(mut self, bytes: &[u8]) -> Self {
        self.vol_shape = bytes.to_vec();
        self
    }

    /// Finalize and parse the assembled image.
    pub fn build(self) -> Result<RomImage> {
        let mut raw = vec![0u8; HEADER_LEN];
        raw.extend_from_slice(&self.data);

        let command_handler_types_off = raw.len() as u16;
        raw.extend_from_slice(&self.command_handler_types);
        let command_params_off = raw.len() as u16;
        raw.extend_from_slice(&self.command_params);
        let command_nmi_class_off = raw.len() as u16;
        raw.extend_from_slice(&self.command_nmi_class);

        let sfx_table_off = raw.len() as u16;
        for entry in &self.sfx_table {
            raw.push(entry.flags);
            raw.push(entry.priority);
            raw.push(entry.hint);
            raw.extend_from_slice(&entry.primary_ptr.to_le_bytes());
            raw.extend_from_slice(&entry.alternate_ptr.to_le_bytes());
            raw.push(entry.chain_next);
        }

        let music_table_off = raw.len() as u16;
        for (command, entry) in &self.music_table {
            raw.push(*command);
            raw.push(entry.flags);
            raw.push(entry.tempo);
            raw.push(entry.sequence_table_index);
        }

        let sequence_table_off = raw.len() as u16;
        for slot in &self.sequence_table {
            raw.extend_from_slice(&slot.pointer.to_le_bytes());
            raw.extend_from_slice(&slot.length.to_le_bytes());
        }

        let duration_table_off = raw.len() as u16;
        for d in &self.duration_table {
            raw.extend_from_slice(&d.to_le_bytes());
        }

        let fm_freq_table_off = raw.len() as u16;
        for f in &self.fm_freq_table {
            raw.extend_from_slice(&f.to_le_bytes());
        }

        let freq_shape_off = raw.len() as u16;
        raw.extend_from_slice(&self.freq_shape);
        let vol_shape_off = raw.len() as u16;
        raw.extend_from_slice(&self.vol_shape);

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&command_handler_types_off.to_le_bytes());
        header.extend_from_slice(&command_params_off.to_le_bytes());
        header.extend_from_slice(&command_nmi_class_off.to_le_bytes());
        header.extend_from_slice(&sfx_table_off.to_le_bytes());
        header.push(self.sfx_table.len() as u8);
        header.extend_from_slice(&music_table_off.to_le_bytes());
        header.push(self.music_table.len() as u8);
        header.extend_from_slice(&sequence_table_off.to_le_bytes());
        header.extend_from_slice(&(self.sequence_table.len() as u16).to_le_bytes());
        header.extend_from_slice(&duration_table_off.to_le_bytes());
        header.extend_from_slice(&fm_freq_table_off.to_le_bytes());
        header.extend_from_slice(&freq_shape_off.to_le_bytes());
        header.extend_from_slice(&(self.freq_shape.len() as u16).to_le_bytes());
        header.extend_from_slice(&vol_shape_off.to_le_bytes());
        header.extend_from_slice(&(self.vol_shape.len() as u16).to_le_bytes());
        header.extend_from_slice(&self.fade_envelope_ptr.to_le_bytes());
        debug_assert_eq!(header.len(), HEADER_LEN);
        raw[..HEADER_LEN].copy_from_slice(&header);

        RomImage::load(&raw)
    }

    /// Absolute address the data region starts at, i.e. [`HEADER_LEN`].
    /// Exposed for callers that want to compute an address without having
    /// pushed anything yet.
    pub fn data_base_hint(&self) -> u16 {
        self.data_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_command_tables() {
        let rom = RomImageBuilder::new()
            .command(0x0D, 7, 0x1D, NMI_CLASS_ENQUEUE)
            .build()
            .expect("build");
        assert_eq!(rom.handler_type(0x0D), 7);
        assert_eq!(rom.param(0x0D), 0x1D);
        assert_eq!(rom.handler_type(0xDB), HANDLER_TYPE_INVALID);
    }

    #[test]
    fn sfx_and_sequence_round_trip() {
        let mut builder = RomImageBuilder::new();
        let seq_addr = builder.push_data(&[0x3C, 0x40, 0xBB]);
        let rom = builder
            .sfx(SfxEntry {
                flags: 0,
                priority: 8,
                hint: 4,
                primary_ptr: seq_addr,
                alternate_ptr: seq_addr,
                chain_next: 0,
            })
            .build()
            .expect("build");
        let entry = rom.sfx_entry(0).expect("entry");
        assert_eq!(entry.primary_ptr, seq_addr);
        assert_eq!(rom.read_u8(seq_addr).unwrap(), 0x3C);
    }

    #[test]
    fn out_of_bounds_pointer_is_rejected_lazily() {
        let rom = RomImageBuilder::new().build().expect("build");
        assert!(rom.read_u8(0xFFFF).is_err());
    }
}
