// File: src/errors.rs
//
// Error reporting sink: turns a compiler's collected messages or a runtime
// failure's stack trace into coloured terminal output, and maps an
// `InterpretResult` to the process exit code the driver returns (§6).

use colored::Colorize;

use crate::vm::InterpretResult;

/// One `"[line N] Error at 'lexeme': message"` line from the compiler.
pub fn report_compile_error(message: &str) {
    eprintln!("{}", message.red());
}

/// A runtime failure: the error message followed by a `[line N] in <name>`
/// frame for every call still on the stack when it happened (§7).
pub fn report_runtime_error(message: &str) {
    let mut lines = message.lines();
    if let Some(first) = lines.next() {
        eprintln!("{}", first.red().bold());
    }
    for line in lines {
        eprintln!("{}", line.dimmed());
    }
}

/// Unix-style exit codes: 0 success, 65 compile-time data error, 70 runtime
/// failure, matching `sysexits.h`'s `EX_DATAERR`/`EX_SOFTWARE` (§6).
pub fn exit_code(result: &InterpretResult) -> i32 {
    match result {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => 65,
        InterpretResult::RuntimeError => 70,
    }
}
