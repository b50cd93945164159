use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use loxvm::vm::error::{Diagnostic, InterpretError};
use loxvm::{Config, VirtualMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Release,
    Debug,
    Trace,
}

#[derive(Parser)]
#[command(name = "loxvm")]
#[command(version = "1.0")]
#[command(about = "A bytecode interpreter for a small dynamically typed scripting language", long_about = None)]
struct Cli {
    /// Script to run. Omit to start a REPL.
    input: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = LogLevel::Release)]
    mode: LogLevel,

    /// Force a garbage collection before every allocation.
    #[arg(long)]
    stress_gc: bool,
}

const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = if cli.stress_gc {
        Config::stress_gc()
    } else {
        Config::default()
    };
    let mut vm = VirtualMachine::with_config(config);
    vm.trace_execution = cli.mode == LogLevel::Trace;

    match &cli.input {
        Some(path) => run_file(&mut vm, path, cli.mode),
        None => {
            run_repl(&mut vm, cli.mode);
            ExitCode::SUCCESS
        }
    }
}

fn run_file(vm: &mut VirtualMachine, path: &PathBuf, mode: LogLevel) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {}", path.display(), err);
            return ExitCode::from(EX_SOFTWARE);
        }
    };

    if mode != LogLevel::Release {
        println!("[loxvm] running {}", path.display());
    }

    match vm.interpret(&source) {
        Ok(()) => {
            if mode == LogLevel::Trace {
                print_vm_state(vm);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err);
            match err {
                InterpretError::Compile(_) => ExitCode::from(EX_DATAERR),
                InterpretError::Runtime(_) => ExitCode::from(EX_SOFTWARE),
            }
        }
    }
}

fn run_repl(vm: &mut VirtualMachine, mode: LogLevel) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return;
        }
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                println!();
                return;
            }
            Ok(_) => {}
            Err(_) => return,
        }

        if let Err(err) = vm.interpret(&line) {
            report(&err);
        } else if mode == LogLevel::Trace {
            print_vm_state(vm);
        }
    }
}

fn report(err: &InterpretError) {
    err.report(&mut io::stderr());
}

fn print_vm_state(vm: &VirtualMachine) {
    println!("{:-<60}", "-- vm state ");
    println!("stack depth: {}", vm.stack_depth());
    println!("call frames: {}", vm.frame_count());
    println!("heap bytes allocated: {}", vm.heap_bytes_allocated());
    println!("{:-<60}", "");
}
