mod tui;

use basalt_core::asm::{assemble, Program};
use basalt_core::registers::Specifier;
use basalt_core::system_bus::SystemBus;
use basalt_core::{Interpreter, StateDump, StepResult};
use clap::{Parser, Subcommand};
use log::warn;
use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about = "RV32I + Zicsr emulator with a built-in assembler")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a program and run it until it halts.
    Run {
        /// Assembly source file.
        source: String,
        /// Load address of the image (and base of RAM).
        #[arg(short, long, default_value = "0x1000", value_parser = parse_u32)]
        origin: u32,
        /// RAM size in bytes.
        #[arg(short, long, default_value_t = 1 << 20)]
        memory: usize,
        /// Upper bound on executed steps.
        #[arg(long, default_value_t = 10_000_000)]
        max_steps: u64,
    },
    /// Assemble a program and print its disassembly listing.
    Dump {
        source: String,
        #[arg(short, long, default_value = "0x1000", value_parser = parse_u32)]
        origin: u32,
    },
    /// Step through a program interactively.
    Tui {
        source: String,
        #[arg(short, long, default_value = "0x1000", value_parser = parse_u32)]
        origin: u32,
        #[arg(short, long, default_value_t = 1 << 20)]
        memory: usize,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let result = match args.command {
        Command::Run {
            source,
            origin,
            memory,
            max_steps,
        } => run_batch(&source, origin, memory, max_steps),
        Command::Dump { source, origin } => {
            load_program(&source, origin).map(|program| print!("{}", program.dump))
        }
        Command::Tui {
            source,
            origin,
            memory,
        } => load_program(&source, origin)
            .and_then(|program| boot(&program, origin, memory).map(|interp| (program, interp)))
            .and_then(|(program, interp)| {
                tui::run(program, interp).map_err(|err| err.to_string())
            }),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn parse_u32(text: &str) -> Result<u32, String> {
    let (radix, digits) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(rest) => (16, rest),
        None => (10, text),
    };
    u32::from_str_radix(digits, radix).map_err(|err| err.to_string())
}

/// Reads and assembles a source file, rendering all assembly errors into one
/// message.
fn load_program(path: &str, origin: u32) -> Result<Program, String> {
    let source = fs::read_to_string(path).map_err(|err| format!("{path}: {err}"))?;
    assemble(&source, origin).map_err(|errors| {
        let mut message = format!("{path}: assembly failed\n");
        for error in &errors {
            message.push_str(&format!("  {error}\n"));
        }
        message.pop();
        message
    })
}

/// Builds the default machine: RAM at the origin with the image loaded, pc
/// at the entry point, sp at the top of RAM.
fn boot(program: &Program, origin: u32, memory: usize) -> Result<Interpreter<SystemBus>, String> {
    let mut bus =
        SystemBus::new(origin, memory).ok_or_else(|| format!("invalid RAM size {memory:#x}"))?;
    if !bus.load_image(origin, &program.image) {
        return Err(format!(
            "image of {} bytes does not fit in {memory:#x} bytes of RAM",
            program.image.len()
        ));
    }
    let mut interp = Interpreter::new(bus);
    *interp.registers_mut().pc_mut() = program.entry();
    interp
        .registers_mut()
        .set_x(Specifier::SP, origin.wrapping_add(memory as u32));
    Ok(interp)
}

fn run_batch(path: &str, origin: u32, memory: usize, max_steps: u64) -> Result<(), String> {
    let program = load_program(path, origin)?;
    let mut interp = boot(&program, origin, memory)?;
    let mut stdout = io::stdout();
    let mut halted = false;
    for _ in 0..max_steps {
        let result = interp.step();
        let output = interp.bus_mut().console_mut().take_output();
        if !output.is_empty() {
            let _ = stdout.write_all(&output);
            let _ = stdout.flush();
        }
        match result {
            StepResult::Retired => {}
            // Traps are architectural events the guest may handle; keep
            // stepping and let the guest decide.
            StepResult::Trap { cause, epc } => {
                warn!("trap {cause:?} at {epc:#010x}");
            }
            StepResult::Halted => {
                halted = true;
                break;
            }
        }
    }
    if !halted {
        warn!("stopped after {max_steps} steps without halting");
    }
    print_dump(&interp.dump_state());
    Ok(())
}

fn print_dump(dump: &StateDump) {
    println!();
    for row in 0..8 {
        let mut line = String::new();
        for column in 0..4 {
            let index = (column * 8 + row) as u8;
            let specifier = Specifier::new(index).unwrap();
            line.push_str(&format!(
                "x{index:<2} {:>4} {:08x}    ",
                specifier.abi_name(),
                dump.regs[index as usize]
            ));
        }
        println!("{}", line.trim_end());
    }
    println!();
    println!(
        "pc {:08x}  priv {}  mpp {}  cycle {}  instret {}",
        dump.pc, dump.privilege, dump.mpp, dump.cycle, dump.instret
    );
    println!(
        "mstatus {:08x}  mscratch {:08x}  mtvec {:08x}  mepc {:08x}  mtval {:08x}  mcause {:08x}",
        (dump.mpp as u32) << 11,
        dump.mscratch,
        dump.mtvec,
        dump.mepc,
        dump.mtval,
        dump.mcause
    );
}
