//! Auxilliary functions for reporting status to the terminal.

use std::io::stderr;

use colored::Colorize;
use crossterm::{
    cursor,
    terminal::{Clear, ClearType},
    ExecutableCommand,
};

fn indent_with(header: colored::ColoredString, msg: String) {
    let _ = stderr().execute(Clear(ClearType::CurrentLine));
    let _ = stderr().execute(cursor::MoveToColumn(0));

    eprint!("{:>12} ", header);
    for (i, line) in msg.lines().enumerate() {
        if i == 0 {
            eprintln!("{}", line);
        } else {
            eprintln!("{:>12} {}", " ", line);
        }
    }
}

pub fn status(header: &str, msg: String) {
    indent_with(header.green().bold(), msg);
}

pub fn warn(msg: String) {
    indent_with("Warning".yellow().bold(), msg);
}

pub fn err(msg: String) {
    indent_with("Error".red().bold(), msg);
}

pub fn hint(msg: String) {
    indent_with("Hint".blue().bold(), msg);
}

/// Rewrites the current line in place; used for live polling output.
pub fn cont_status(header: &str, msg: String) {
    let _ = stderr().execute(Clear(ClearType::CurrentLine));
    let _ = stderr().execute(cursor::MoveToColumn(0));
    eprint!("{:>12} {}", header.green().bold(), msg);
}
