// File: src/repl.rs
//
// Interactive REPL (Read-Eval-Print Loop). A single `Vm` persists across
// every line entered, so a variable or function declared in one line is
// still visible on the next (§6) — `Vm::interpret` only resets the operand
// stack and call frames, never the globals table or heap.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::vm::Vm;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: Vm::new(), editor })
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.vm.set_trace(trace);
        self
    }

    fn show_banner(&self) {
        println!("{}", "tallow REPL".bright_cyan().bold());
        println!("  {} Ctrl+D to exit.", "Tip:".bright_magenta());
        println!();
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { "> ".bright_green().to_string() } else { ".. ".bright_blue().to_string() };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_input_complete(&buffer) {
                        self.vm.interpret(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "\nGoodbye!".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "Error:".bright_red(), err);
                    break;
                }
            }
        }

        Ok(())
    }
}

/// True once every brace/paren is balanced and we're not mid-string — the
/// same bracket-counting approach as the source driver's line editor, pared
/// down to the delimiters this grammar actually has (§4.1, §6).
fn is_input_complete(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return true;
    }

    let mut braces = 0i32;
    let mut parens = 0i32;
    let mut in_string = false;
    let mut in_line_comment = false;
    let mut chars = trimmed.chars().peekable();

    while let Some(c) = chars.next() {
        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        match c {
            '"' => in_string = !in_string,
            '/' if !in_string && chars.peek() == Some(&'/') => in_line_comment = true,
            '{' if !in_string => braces += 1,
            '}' if !in_string => braces -= 1,
            '(' if !in_string => parens += 1,
            ')' if !in_string => parens -= 1,
            _ => {}
        }
    }

    !in_string && braces <= 0 && parens <= 0
}

