use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::{debug, error};
use riscy_core::board::{Board, Config};
use riscy_core::core::SelfTestOutcome;
use riscy_core::resources::clint::Timebase;
use riscy_core::resources::ram::Ram;
use riscy_core::resources::uart::Console;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Increase the log verbosity, can be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Signature file to output signature to.
    #[arg(long, short)]
    signature: Option<PathBuf>,
    /// Elf file to run.
    elf: PathBuf,
}

/// Guest output goes straight to stdout, there is never any input.
#[derive(Debug)]
struct StdoutConsole;

impl Console for StdoutConsole {
    fn write_byte(&mut self, byte: u8) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(&[byte]).and_then(|()| stdout.flush());
    }

    fn read_byte(&mut self) -> Option<u8> {
        None
    }
}

fn main() -> io::Result<ExitCode> {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(usize::from(args.verbose))
        .modules([module_path!(), "riscy_core"])
        .init()
        .map_err(io::Error::other)?;

    let mut buf = Vec::new();
    File::open(&args.elf)?.read_to_end(&mut buf)?;

    let elf_header = match Elf::parse(&buf) {
        Ok(elf_header) => elf_header,
        Err(e) => {
            error!("failed to parse elf file: {e}");
            eprintln!("failed to parse elf file {}: {e}", args.elf.display());
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut board = Board::new(Config::default(), Box::new(StdoutConsole), Timebase::new())
        .map_err(io::Error::other)?;

    for h in elf_header
        .program_headers
        .iter()
        .filter(|h| h.p_type == PT_LOAD)
    {
        let Some(segment) = buf.get(h.file_range()) else {
            eprintln!("segment at {:#010x} extends past the end of the file", h.p_paddr);
            return Ok(ExitCode::FAILURE);
        };
        debug!("loading segment at {:#010x} ({} bytes)", h.p_paddr, segment.len());
        board.load_physical(h.p_paddr as u32, segment);
    }

    let outcome = match board.run(None) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if let Some(path) = args.signature {
        let Some(signature) = signature(&elf_header, board.ram()) else {
            eprintln!("missing or misaligned `begin_signature`/`end_signature` symbols");
            return Ok(ExitCode::FAILURE);
        };
        let mut file = File::create(path)?;
        for word in signature {
            writeln!(file, "{word:08x}")?;
        }
    }

    Ok(match outcome {
        Some(outcome @ SelfTestOutcome::Passed) => {
            println!("{outcome}");
            ExitCode::SUCCESS
        }
        Some(outcome @ SelfTestOutcome::Failed { .. }) => {
            println!("{outcome}");
            ExitCode::FAILURE
        }
        // The run loop only stops without a verdict when given a step limit
        None => ExitCode::FAILURE,
    })
}

/// The words of RAM between the `begin_signature` and `end_signature` symbols.
fn signature(elf_header: &Elf, ram: &Ram) -> Option<Vec<u32>> {
    let mut signature_start = None;
    let mut signature_end = None;
    for sym in elf_header.syms.iter() {
        let Some(name) = elf_header.strtab.get_at(sym.st_name) else {
            continue;
        };
        if name == "begin_signature" {
            signature_start = Some(sym.st_value as u32);
        } else if name == "end_signature" {
            signature_end = Some(sym.st_value as u32);
        }
    }
    let (start, end) = (signature_start?, signature_end?);
    if start % 16 != 0 || end % 4 != 0 || start > end {
        return None;
    }

    let words = (start..end)
        .step_by(4)
        .map(|address| {
            let mut word = [0; 4];
            ram.read(&mut word, address);
            u32::from_le_bytes(word)
        })
        .collect();
    Some(words)
}
