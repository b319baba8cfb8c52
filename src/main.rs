// File: src/main.rs
//
// Entry point: parses the command line and dispatches to either the file
// runner or the interactive REPL (§6).

mod chunk;
mod compiler;
mod debug;
mod errors;
mod gc;
mod lexer;
mod natives;
mod object;
mod repl;
mod table;
mod value;
mod vm;

use clap::{Parser as ClapParser, Subcommand};
use std::fs;
use std::path::PathBuf;

use vm::Vm;

#[derive(ClapParser)]
#[command(
    name = "tallow",
    about = "tallow: a bytecode compiler, VM, and GC for a small scripting language",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file
    Run {
        /// Path to the source file
        file: PathBuf,

        /// Print each instruction as it executes
        #[arg(long)]
        trace: bool,
    },

    /// Launch the interactive REPL
    Repl {
        /// Print each instruction as it executes
        #[arg(long)]
        trace: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Some(Commands::Run { file, trace }) => run_file(&file, trace),
        Some(Commands::Repl { trace }) => run_repl(trace),
        None => run_repl(false),
    };

    std::process::exit(code);
}

fn run_file(path: &PathBuf, trace: bool) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Can't open file \"{}\": {}", path.display(), err);
            return 74;
        }
    };

    let mut vm = Vm::new();
    vm.set_trace(trace);
    let result = vm.interpret(&source);
    errors::exit_code(&result)
}

fn run_repl(trace: bool) -> i32 {
    match repl::Repl::new() {
        Ok(repl) => {
            if let Err(err) = repl.with_trace(trace).run() {
                eprintln!("REPL error: {}", err);
                return 1;
            }
            0
        }
        Err(err) => {
            eprintln!("Failed to start REPL: {}", err);
            1
        }
    }
}
