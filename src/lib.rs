//! Serial-port configuration and I/O for Linux, directly over the
//! termios interface.
//!
//! A [`SerialPort`] owns an opened terminal device and splits it in two:
//! the data path (plain [`std::io::Read`]/[`std::io::Write`] on the
//! device file) and the control path, a local copy of the kernel's
//! `termios` record ([`PortSettings`]) that is mutated in memory and
//! pushed with an explicit commit. Nothing is synchronized behind the
//! caller's back: a setting that has not been committed has no effect
//! on the wire.
//!
//! Baud rates outside the classic enumerated table (50..38400) are
//! applied through the kernel's extended `termios2` ioctl interface,
//! which accepts arbitrary numeric rates.
//!
//! No type herein is thread-aware: all configuration methods take
//! `&mut self`, and a port shared between threads must be wrapped in a
//! `Mutex` by the caller.

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

pub mod consts;
pub mod modem;
pub mod port;
pub mod settings;
pub mod sys;

pub use modem::ModemLines;
pub use port::SerialPort;
pub use settings::{Handshake, Parity, PortSettings, ReadTimeout};

/// An error which may suggest fixes or workarounds to the end-user.
pub trait DiagnosableError: std::error::Error {
    /// A list of user-friendly suggestions, if any.
    fn diagnose(&self) -> Vec<String> {
        vec![]
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    /// The device special file could not be opened.
    #[error("Failed to open {}: {}", .0.display(), .1)]
    Open(PathBuf, #[source] std::io::Error),

    /// A termios or ioctl request was rejected by the kernel. Carries
    /// the platform's error description.
    #[error("Terminal control request failed: {0}")]
    Control(#[from] Errno),

    /// The requested configuration has no encoding on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(String),

    /// The argument was rejected before any system call was attempted.
    #[error("{0}")]
    OutOfRange(String),
}

impl DiagnosableError for PortError {
    fn diagnose(&self) -> Vec<String> {
        match self {
            Self::Open(path, e) if e.kind() == std::io::ErrorKind::PermissionDenied => vec![
                format!(
                    "Is your user allowed to access {}? Serial devices are commonly owned by the dialout or uucp group.",
                    path.display()
                ),
            ],
            Self::Control(Errno::ENOTTY) => vec![
                "The device is not a terminal. USB serial adapters usually enumerate as /dev/ttyUSB* or /dev/ttyACM*.".to_string(),
            ],
            _ => vec![],
        }
    }
}
