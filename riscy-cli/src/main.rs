mod console;
mod frame;

use clap::{Parser, ValueEnum};
use console::{RawModeGuard, TerminalConsole};
use log::{debug, error, info, warn};
use riscy_core::board::{Board, Config};
use riscy_core::core::{EcallMode, FatalError, SelfTestOutcome};
use riscy_core::resources::clint::Timebase;
use std::fs::File;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Number of steps the engine runs between checks of the quit flag.
const STEPS_PER_SLICE: u64 = 10_000;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Increase the log verbosity, can be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Load the image as an ELF file instead of a raw binary.
    #[arg(short, long)]
    elf: bool,
    /// What the `ecall` instruction does.
    #[arg(long, value_enum, default_value_t = Ecall::SelfTest)]
    ecall: Ecall,
    /// Periodically write the framebuffer to this file, as a PPM image.
    #[arg(long)]
    frame_dump: Option<PathBuf>,
    /// Milliseconds between two framebuffer dumps.
    #[arg(long, default_value_t = 1000)]
    frame_interval_ms: u64,
    /// Stop after executing this many instructions.
    #[arg(long)]
    max_steps: Option<u64>,
    /// Image file to execute.
    image: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Ecall {
    SelfTest,
    Ignore,
    Trap,
}

impl From<Ecall> for EcallMode {
    fn from(value: Ecall) -> Self {
        match value {
            Ecall::SelfTest => EcallMode::SelfTest,
            Ecall::Ignore => EcallMode::Ignore,
            Ecall::Trap => EcallMode::Trap,
        }
    }
}

/// Why the engine stopped.
#[derive(Debug)]
enum Exit {
    SelfTest(SelfTestOutcome),
    StepLimit,
    Interrupted,
}

#[tokio::main]
async fn main() -> io::Result<ExitCode> {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(usize::from(args.verbose))
        .modules([module_path!(), "riscy_core"])
        .init()
        .map_err(io::Error::other)?;

    let mut buf = Vec::new();
    File::open(&args.image)?.read_to_end(&mut buf)?;

    let raw = io::stdin().is_terminal();
    let (key_sender, key_receiver) = mpsc::unbounded_channel();
    let console = TerminalConsole::new(key_receiver, raw);

    let timebase = Timebase::new();
    let config = Config {
        ecall_mode: args.ecall.into(),
        ..Config::default()
    };
    let mut board = Board::new(config.clone(), Box::new(console), timebase.clone())
        .map_err(io::Error::other)?;

    if args.elf {
        if let Err(e) = load_elf(&mut board, &buf, config.ram_base) {
            error!("cannot load {}: {e}", args.image.display());
            eprintln!("cannot load {}: {e}", args.image.display());
            return Ok(ExitCode::FAILURE);
        }
    } else {
        board.load_physical(config.ram_base, &buf);
    }

    let quit = Arc::new(AtomicBool::new(false));

    tokio::spawn(tick_timebase(timebase));
    if let Some(path) = args.frame_dump {
        let period = Duration::from_millis(args.frame_interval_ms.max(1));
        tokio::spawn(frame::dump_frames(board.framebuffer_handle(), path, period));
    }

    let raw_mode = if raw {
        let guard = RawModeGuard::new()?;
        let stop = quit.clone();
        tokio::task::spawn_blocking(move || console::forward_keys(key_sender, stop));
        Some(guard)
    } else {
        let stop = quit.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::Relaxed);
            }
        });
        None
    };

    let engine_quit = quit.clone();
    let max_steps = args.max_steps;
    let result = tokio::task::spawn_blocking(move || run(&mut board, max_steps, &engine_quit))
        .await
        .map_err(io::Error::other)?;

    // Also stops the key forwarder
    quit.store(true, Ordering::Relaxed);
    drop(raw_mode);

    Ok(match result {
        Ok(Exit::SelfTest(outcome)) => {
            println!("{outcome}");
            match outcome {
                SelfTestOutcome::Passed => ExitCode::SUCCESS,
                SelfTestOutcome::Failed { .. } => ExitCode::FAILURE,
            }
        }
        Ok(Exit::StepLimit) => {
            info!("step limit reached");
            ExitCode::SUCCESS
        }
        Ok(Exit::Interrupted) => {
            info!("interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            error!("{e}");
            match std::error::Error::source(&e) {
                Some(source) => eprintln!("{e}: {source}"),
                None => eprintln!("{e}"),
            }
            ExitCode::FAILURE
        }
    })
}

/// Drives the board in slices, so that `quit` is honoured within a bounded number of steps.
fn run(board: &mut Board, max_steps: Option<u64>, quit: &AtomicBool) -> Result<Exit, FatalError> {
    loop {
        if quit.load(Ordering::Relaxed) {
            return Ok(Exit::Interrupted);
        }
        let slice = match max_steps {
            Some(max) if board.steps() >= max => return Ok(Exit::StepLimit),
            Some(max) => (max - board.steps()).min(STEPS_PER_SLICE),
            None => STEPS_PER_SLICE,
        };
        if let Some(outcome) = board.run(Some(slice))? {
            return Ok(Exit::SelfTest(outcome));
        }
    }
}

/// Stores the milliseconds elapsed since start in `timebase`, every millisecond.
async fn tick_timebase(timebase: Timebase) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        timebase.set(elapsed);
    }
}

fn load_elf(board: &mut Board, program_elf: &[u8], entry: u32) -> Result<(), goblin::error::Error> {
    let elf_header = goblin::elf::Elf::parse(program_elf)?;

    if elf_header.entry != u64::from(entry) {
        warn!(
            "ELF entry point {:#010x} differs from the reset vector {entry:#010x}",
            elf_header.entry
        );
    }

    // copy all in-memory sections from the ELF file into system RAM
    let sections = elf_header
        .section_headers
        .iter()
        .filter(|h| h.is_alloc() && h.sh_type != goblin::elf::section_header::SHT_NOBITS);

    for h in sections {
        let Some(range) = h.file_range() else {
            continue;
        };
        let Some(buf) = program_elf.get(range) else {
            return Err(goblin::error::Error::Malformed(format!(
                "section at {:#010x} extends past the end of the file",
                h.sh_addr
            )));
        };
        debug!(
            "loading section {:?} into memory from [{:#010x?}..{:#010x?}]",
            elf_header.shdr_strtab.get_at(h.sh_name).unwrap_or("?"),
            h.sh_addr,
            h.sh_addr + h.sh_size,
        );
        board.load_physical(h.sh_addr as u32, buf);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use riscy_core::resources::uart::BufferConsole;

    const RAM_BASE: u32 = 0x8000_0000;

    fn board(program: &[u32]) -> Board {
        let mut board = Board::new(
            Config::default(),
            Box::new(BufferConsole::default()),
            Timebase::new(),
        )
        .unwrap();
        let bytes: Vec<u8> = program.iter().flat_map(|w| w.to_le_bytes()).collect();
        board.load_physical(RAM_BASE, &bytes);
        board
    }

    #[test]
    fn test_run_respects_step_limit() {
        // jal x0, 0
        let mut board = board(&[0x0000_006F]);
        let quit = AtomicBool::new(false);
        let exit = run(&mut board, Some(STEPS_PER_SLICE + 5), &quit).unwrap();
        assert!(matches!(exit, Exit::StepLimit));
        assert_eq!(STEPS_PER_SLICE + 5, board.steps());
    }

    #[test]
    fn test_run_stops_on_quit() {
        let mut board = board(&[0x0000_006F]);
        let quit = AtomicBool::new(true);
        assert!(matches!(run(&mut board, None, &quit).unwrap(), Exit::Interrupted));
        assert_eq!(0, board.steps());
    }

    #[test]
    fn test_run_reports_self_test() {
        // addi a0, x0, 42; ecall
        let mut board = board(&[0x02A0_0513, 0x0000_0073]);
        let quit = AtomicBool::new(false);
        let exit = run(&mut board, None, &quit).unwrap();
        assert!(matches!(exit, Exit::SelfTest(SelfTestOutcome::Passed)));
    }

    #[test]
    fn test_run_reports_fatal_error() {
        let mut board = board(&[]);
        let quit = AtomicBool::new(false);
        assert_eq!(
            FatalError::EmptyInstruction { pc: RAM_BASE },
            run(&mut board, None, &quit).unwrap_err()
        );
    }

    #[test]
    fn test_load_elf_rejects_garbage() {
        let mut board = board(&[]);
        assert!(load_elf(&mut board, b"not an elf", RAM_BASE).is_err());
    }
}
