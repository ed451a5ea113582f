//! CLI frontend for the sound engine (`spec.md` §6.5).
//!
//! Loads a ROM image, optionally drives it with a list of command bytes,
//! runs a fixed number of ticks, and optionally writes every chip register
//! write to a trace file. A thin driver over [`soundrom_engine::Engine`];
//! it owns no engine logic of its own.

use std::cell::RefCell;
use std::env;
use std::fs;
use std::io::Write as _;
use std::process::ExitCode;

use soundrom_engine::chip::{FmSink, MixerSink, PsgSink, SpeechSink};
use soundrom_engine::{Engine, EngineConfig, EngineError, RomImage};

struct Args {
    rom_path: String,
    trace_path: Option<String>,
    drive: Vec<u8>,
    ticks: u64,
}

impl Args {
    fn parse() -> Result<Self, String> {
        let mut rom_path = None;
        let mut trace_path = None;
        let mut drive = Vec::new();
        let mut ticks = 245u64;

        let mut iter = env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--rom" => {
                    rom_path = Some(iter.next().ok_or("--rom requires a path")?);
                }
                "--trace" => {
                    trace_path = Some(iter.next().ok_or("--trace requires a path")?);
                }
                "--drive" => {
                    let list = iter.next().ok_or("--drive requires a comma-separated list")?;
                    drive = parse_drive_list(&list)?;
                }
                "--ticks" => {
                    let n = iter.next().ok_or("--ticks requires a number")?;
                    ticks = n.parse().map_err(|_| format!("invalid --ticks value: {n}"))?;
                }
                other => return Err(format!("unrecognized argument: {other}")),
            }
        }

        Ok(Self {
            rom_path: rom_path.ok_or("--rom is required")?,
            trace_path,
            drive,
            ticks,
        })
    }
}

fn parse_drive_list(list: &str) -> Result<Vec<u8>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|_| format!("invalid command byte: {s}")))
        .collect()
}

/// Buffers one tick's worth of chip register writes as text lines.
///
/// A plain text log of register writes, one per line; full VGM framing
/// is out of scope here. Buffered (rather than written
/// directly) because all four chip ports need to log concurrently during
/// one [`Engine::tick`] call, and a `RefCell` behind a shared reference is
/// the simplest way to let four independent sink wrappers share it.
#[derive(Default)]
struct TraceLog {
    tick: u64,
    lines: RefCell<Vec<String>>,
}

impl TraceLog {
    fn log(&self, line: std::fmt::Arguments) {
        self.lines.borrow_mut().push(format!("{:>8} {}", self.tick, line));
    }

    fn drain_to(&self, file: &mut fs::File) -> std::io::Result<()> {
        for line in self.lines.borrow_mut().drain(..) {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

struct TracingPsg<'a>(&'a TraceLog);
struct TracingFm<'a>(&'a TraceLog);
struct TracingSpeech<'a>(&'a TraceLog);
struct TracingMixer<'a>(&'a TraceLog);

impl PsgSink for TracingPsg<'_> {
    fn write(&mut self, register: u8, value: u8) {
        self.0.log(format_args!("psg reg={register:#04x} value={value:#04x}"));
    }
}

impl FmSink for TracingFm<'_> {
    fn ready(&self) -> bool {
        true
    }
    fn write(&mut self, register: u8, value: u8) {
        self.0.log(format_args!("fm reg={register:#04x} value={value:#04x}"));
    }
}

impl SpeechSink for TracingSpeech<'_> {
    fn ready(&self) -> bool {
        true
    }
    fn write(&mut self, byte: u8) {
        self.0.log(format_args!("speech byte={byte:#04x}"));
    }
}

impl MixerSink for TracingMixer<'_> {
    fn write(&mut self, value: u8) {
        self.0.log(format_args!("mixer value={value:#04x}"));
    }
}

fn run(args: Args) -> Result<ExitCode, EngineError> {
    let raw = fs::read(&args.rom_path).map_err(|e| EngineError::RomLayout(format!("failed to read {}: {e}", args.rom_path)))?;
    if raw.len() != soundrom_engine::rom::CANONICAL_ROM_SIZE {
        return Err(EngineError::RomSize {
            expected: soundrom_engine::rom::CANONICAL_ROM_SIZE,
            actual: raw.len(),
        });
    }
    let rom = RomImage::load(&raw)?;
    log::info!("loaded ROM image ({} bytes)", rom.len());

    let mut engine = Engine::new(rom, EngineConfig::default());

    for cmd in &args.drive {
        log::debug!("driving command {cmd:#04x}");
        engine.push_command(*cmd);
    }

    let mut trace_file = match &args.trace_path {
        Some(path) => Some(fs::File::create(path).map_err(|e| EngineError::RomLayout(format!("failed to create {path}: {e}")))?),
        None => None,
    };

    for tick in 0..args.ticks {
        if let Some(file) = trace_file.as_mut() {
            let log = TraceLog { tick, ..TraceLog::default() };
            let mut psg = TracingPsg(&log);
            let mut fm = TracingFm(&log);
            let mut speech = TracingSpeech(&log);
            let mut mixer = TracingMixer(&log);
            engine.tick(&mut psg, &mut fm, &mut speech, &mut mixer)?;
            log.drain_to(file).map_err(|e| EngineError::RomLayout(format!("trace write failed: {e}")))?;
        } else {
            engine.tick(&mut NullPsg, &mut NullFm, &mut NullSpeech, &mut NullMixer)?;
        }

        while let Some(byte) = engine.pop_egress() {
            log::trace!("host egress byte {byte:#04x}");
        }
    }

    if !engine.error_flags().is_empty() {
        log::warn!("engine reported recoverable error flags: {:?}", engine.error_flags());
    }

    Ok(ExitCode::SUCCESS)
}

struct NullPsg;
impl PsgSink for NullPsg {
    fn write(&mut self, _register: u8, _value: u8) {}
}
struct NullFm;
impl FmSink for NullFm {
    fn ready(&self) -> bool {
        true
    }
    fn write(&mut self, _register: u8, _value: u8) {}
}
struct NullSpeech;
impl SpeechSink for NullSpeech {
    fn ready(&self) -> bool {
        true
    }
    fn write(&mut self, _byte: u8) {}
}
struct NullMixer;
impl MixerSink for NullMixer {
    fn write(&mut self, _value: u8) {}
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::parse() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("soundrom-engine: {message}");
            return ExitCode::from(1);
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(err @ (EngineError::RomSize { .. } | EngineError::RomLayout(_))) => {
            eprintln!("soundrom-engine: {err}");
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("soundrom-engine: {err}");
            ExitCode::from(2)
        }
    }
}
