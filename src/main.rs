//! Interactive front end for the simulator
//!
//! Parses a small command language and drives the processor's
//! inspection and control operations. Numeric arguments accept
//! decimal or 0x-prefixed hexadecimal.

use clap::Parser;
use clap_num::maybe_hex;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;

use rv32sim::csr::csr_is_valid;
use rv32sim::decode::instruction_to_assembly;
use rv32sim::hex_utils::{load_hex, HexError};
use rv32sim::memory::Memory;
use rv32sim::processor::Processor;

/// Simulate a 32-bit RISC-V processor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to an Intel HEX image to load at startup
    image: Option<String>,

    /// Enable the machine/user privilege model (CSRs and traps)
    #[arg(short, long)]
    privileged: bool,

    /// Print step-by-step execution diagnostics
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Error)]
enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad number '{0}': {1}")]
    BadNumber(String, String),
    #[error("bad register '{0}' (expected x0..x31)")]
    BadRegister(String),
    #[error("privilege level must be 0 (user) or 3 (machine)")]
    BadPrivilege,
    #[error("unknown command '{0}' (try help)")]
    UnknownCommand(String),
    #[error(transparent)]
    Hex(#[from] HexError),
}

fn parse_u32(token: &str) -> Result<u32, CommandError> {
    maybe_hex::<u32>(token).map_err(|e| CommandError::BadNumber(token.to_string(), e))
}

fn parse_u16(token: &str) -> Result<u16, CommandError> {
    maybe_hex::<u16>(token).map_err(|e| CommandError::BadNumber(token.to_string(), e))
}

fn parse_reg(token: &str) -> Result<u8, CommandError> {
    let bad = || CommandError::BadRegister(token.to_string());
    let number = token.strip_prefix('x').ok_or_else(bad)?;
    let number: u8 = number.parse().map_err(|_| bad())?;
    if number > 31 {
        return Err(bad());
    }
    Ok(number)
}

fn print_help() {
    println!(
        "commands:
  pc [value]           show or set the program counter
  x<n> [value]         show or set register n
  regs                 show the non-zero registers
  csr <code> [value]   show or set a CSR by its 12-bit code
  prv [0|3]            show or set the privilege level
  step [n]             execute n instructions (default 1), honouring breakpoints
  break <addr>         set the breakpoint
  clear                clear the breakpoint
  load <file>          load an Intel HEX image and jump to its start address
  mem <addr> [n]       show n words of memory (default 8)
  dis <addr> [n]       disassemble n words of memory (default 8)
  count                show the executed-instruction count
  quit                 leave the simulator"
    );
}

/// Run one command line. Returns true when the user asked to quit.
fn run_command(cpu: &mut Processor, line: &str) -> Result<bool, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = tokens.split_first() else {
        return Ok(false);
    };

    match command {
        "pc" => match args {
            [] => cpu.show_pc(),
            [value] => cpu.set_pc(parse_u32(value)?),
            _ => return Err(CommandError::Usage("pc [value]")),
        },
        "regs" => cpu.show_registers(),
        "csr" => match args {
            [code] => cpu.show_csr(parse_u16(code)?),
            [code, value] => {
                let code = parse_u16(code)?;
                if !csr_is_valid(code) {
                    println!("Illegal CSR number");
                } else {
                    cpu.set_csr(code, parse_u32(value)?, false);
                }
            }
            _ => return Err(CommandError::Usage("csr <code> [value]")),
        },
        "prv" => match args {
            [] => cpu.show_prv(),
            [level] => {
                let level = parse_u32(level)?;
                if level != 0 && level != 3 {
                    return Err(CommandError::BadPrivilege);
                }
                cpu.set_prv(level);
            }
            _ => return Err(CommandError::Usage("prv [0|3]")),
        },
        "step" | "s" => {
            let num = match args {
                [] => 1,
                [num] => parse_u32(num)?,
                _ => return Err(CommandError::Usage("step [n]")),
            };
            cpu.execute(num, true);
        }
        "break" | "b" => match args {
            [address] => cpu.set_breakpoint(parse_u32(address)?),
            _ => return Err(CommandError::Usage("break <addr>")),
        },
        "clear" => cpu.clear_breakpoint(),
        "load" => match args {
            [file_name] => {
                let start_address = load_hex(&mut cpu.memory, file_name)?;
                println!("start address = {start_address:08x}");
                cpu.set_pc(start_address);
            }
            _ => return Err(CommandError::Usage("load <file>")),
        },
        "mem" | "dis" => {
            let (base, count) = match args {
                [base] => (parse_u32(base)?, 8),
                [base, count] => (parse_u32(base)?, parse_u32(count)?),
                _ => return Err(CommandError::Usage("mem <addr> [n]")),
            };
            for n in 0..count {
                let address = base.wrapping_add(4 * n);
                let word = cpu.memory.read_word(address);
                if command == "mem" {
                    println!("{address:08x}: {word:08x}");
                } else {
                    println!("{address:08x}: {}", instruction_to_assembly(word));
                }
            }
        }
        "count" => println!("{}", cpu.get_instruction_count()),
        "help" => print_help(),
        "quit" | "exit" | "q" => return Ok(true),
        register if register.starts_with('x') => {
            let reg_num = parse_reg(register)?;
            match args {
                [] => cpu.show_reg(reg_num),
                [value] => cpu.set_reg(reg_num, parse_u32(value)?),
                _ => return Err(CommandError::Usage("x<n> [value]")),
            }
        }
        _ => return Err(CommandError::UnknownCommand(command.to_string())),
    }

    Ok(false)
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .init();

    let mut cpu = Processor::new(Memory::new(), args.privileged);

    if let Some(image) = &args.image {
        match load_hex(&mut cpu.memory, image) {
            Ok(start_address) => {
                println!("start address = {start_address:08x}");
                cpu.set_pc(start_address);
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("failed to start line editor: {e}");
            std::process::exit(1);
        }
    };

    loop {
        match editor.readline("rv32sim> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                match run_command(&mut cpu, &line) {
                    Ok(true) => break,
                    Ok(false) => (),
                    Err(e) => println!("{e}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("input error: {e}");
                break;
            }
        }
    }
}
