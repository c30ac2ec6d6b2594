//! Subprocess transport implementation using Claude Code CLI
//!
//! This module provides a transport implementation that spawns the Claude Code CLI
//! as a subprocess and communicates with it via stdin/stdout, watching stderr
//! for resume failures.

mod command;
mod config;
mod lifecycle;
mod reader;
mod transport;

// Re-export public types
pub use command::LaunchParams;
pub use config::{DEFAULT_CLOSE_TIMEOUT, DEFAULT_MAX_BUFFER_SIZE, EXIT_GRACE};
pub use transport::{ProcessMonitor, SubprocessTransport};
