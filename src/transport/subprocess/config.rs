//! Configuration constants for subprocess transport

use std::time::Duration;

/// Default maximum length of one stdout line (1MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Default time `close` waits for the CLI before killing it
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an ended output stream waits for exit status and stderr
pub const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Stderr text the CLI prints when `--resume` names an unknown session
pub const SESSION_NOT_FOUND_MARKER: &str = "No conversation found with session ID";

/// Dangerous environment variables that should not be passed to subprocess
///
/// These variables can affect how the subprocess loads and executes code,
/// potentially creating security vulnerabilities.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

/// Allowed extra CLI flags (allowlist approach)
///
/// Only these flags can be passed through the `extra_args` option.
pub const ALLOWED_EXTRA_FLAGS: &[&str] = &[
    "add-dir",
    "allowedTools",
    "append-system-prompt",
    "disallowedTools",
    "max-turns",
    "settings",
];
