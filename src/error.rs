//! Error types for the Claude relay

use thiserror::Error;

/// Main error type for the Claude relay
#[derive(Error, Debug)]
pub enum ClaudeError {
    /// Claude Code CLI not found or not installed
    #[error("Claude Code CLI not found: {0}")]
    CliNotFound(String),

    /// Failure while spawning the agent subprocess
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pipe write/read failure (the subprocess has most likely exited)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The subprocess exited before finishing the exchange
    #[error("Process error (exit code {exit_code}): {message}")]
    Process {
        /// Error message
        message: String,
        /// Process exit code (-1 when killed by a signal)
        exit_code: i32,
    },

    /// The subprocess does not know the session it was asked to resume
    #[error("Stale session {session_id}: no conversation found, needs fresh start")]
    StaleSession {
        /// Session identifier that was requested for resume
        session_id: String,
    },

    /// The exchange was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON encode/decode error
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// A line that is not a recognized protocol event
    #[error("Message parse error: {message}")]
    MessageParse {
        /// Error message
        message: String,
        /// Raw line that failed to parse
        line: Option<String>,
    },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Permission callback HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Permission bridge error
    #[error("Permission error: {0}")]
    Permission(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, ClaudeError>;

impl ClaudeError {
    /// Create a CLI not found error
    #[must_use]
    pub fn cli_not_found() -> Self {
        Self::CliNotFound(
            "Claude Code not found. Install with:\n\
             npm install -g @anthropic-ai/claude-code\n\
             \n\
             Or point KODEGEN_RELAY_CLAUDE at the binary"
                .to_string(),
        )
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>, exit_code: i32) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
        }
    }

    /// Create a stale session error
    pub fn stale_session(session_id: impl Into<String>) -> Self {
        Self::StaleSession {
            session_id: session_id.into(),
        }
    }

    /// Create a message parse error
    pub fn message_parse(msg: impl Into<String>, line: Option<String>) -> Self {
        Self::MessageParse {
            message: msg.into(),
            line,
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a permission bridge error
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether the failure means the resume target no longer exists
    #[must_use]
    pub const fn is_stale_session(&self) -> bool {
        matches!(self, Self::StaleSession { .. })
    }

    /// Whether the failure was a caller-requested cancellation
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for ClaudeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
