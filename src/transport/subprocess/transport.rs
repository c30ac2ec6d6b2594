//! Subprocess transport implementation using Claude Code CLI

use parking_lot::Mutex;
use std::env;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Transport;
use crate::error::{ClaudeError, Result};
use crate::types::identifiers::ConversationKey;
use crate::types::options::RelayOptions;

use super::command::LaunchParams;

/// Shared view of the CLI process state
///
/// Cloned out of the transport so liveness and stderr signals can be read
/// without holding the session's I/O lock.
#[derive(Debug, Clone, Default)]
pub struct ProcessMonitor {
    pub(super) child: Arc<Mutex<Option<Child>>>,
    pub(super) status: Arc<Mutex<Option<ExitStatus>>>,
    pub(super) session_not_found: Arc<AtomicBool>,
}

impl ProcessMonitor {
    /// True iff the process was spawned and has not exited
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let mut guard = self.child.lock();
        let Some(child) = guard.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                *self.status.lock() = Some(status);
                false
            }
            Err(_) => false,
        }
    }

    /// Exit status, if the process has exited
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        if self.is_alive() {
            return None;
        }
        *self.status.lock()
    }

    /// Whether stderr reported that the resumed session does not exist
    #[must_use]
    pub fn session_not_found(&self) -> bool {
        self.session_not_found.load(Ordering::SeqCst)
    }

    /// Send a kill signal without waiting for the process to exit
    pub fn kill(&self) {
        if let Some(child) = self.child.lock().as_mut() {
            let _ = child.start_kill();
        }
    }

    pub(super) fn record_exit(&self, status: ExitStatus) {
        *self.status.lock() = Some(status);
    }
}

/// Subprocess transport for Claude Code CLI
pub struct SubprocessTransport {
    pub(super) key: ConversationKey,
    pub(super) options: RelayOptions,
    pub(super) launch: LaunchParams,
    pub(super) cli_path: PathBuf,
    pub(super) monitor: ProcessMonitor,
    pub(super) stdin: Option<ChildStdin>,
    pub(super) stdout: Option<ChildStdout>,
    pub(super) ready: Arc<AtomicBool>,
    pub(super) reader_task: Option<JoinHandle<()>>,
    pub(super) stderr_task: Option<JoinHandle<()>>,
}

impl SubprocessTransport {
    /// Create a new subprocess transport
    ///
    /// # Arguments
    /// * `key` - Conversation the process serves (used in logs)
    /// * `options` - Relay-wide options
    /// * `launch` - Per-session parameters (resume target, cwd, bridge)
    ///
    /// # Errors
    /// Returns error if CLI cannot be found
    pub fn new(key: ConversationKey, options: RelayOptions, launch: LaunchParams) -> Result<Self> {
        let cli_path = if let Some(ref path) = options.cli_path {
            path.clone()
        } else {
            Self::find_cli()?
        };

        Ok(Self {
            key,
            options,
            launch,
            cli_path,
            monitor: ProcessMonitor::default(),
            stdin: None,
            stdout: None,
            ready: Arc::new(AtomicBool::new(false)),
            reader_task: None,
            stderr_task: None,
        })
    }

    /// Find Claude Code CLI binary
    ///
    /// # Errors
    /// Returns error if CLI cannot be found in PATH or common locations
    pub fn find_cli() -> Result<PathBuf> {
        // Try using 'which' crate first
        if let Ok(path) = which::which("claude") {
            return Ok(path);
        }

        // Manual search in common locations
        let home = env::var("HOME").unwrap_or_else(|_| String::from("/root"));
        let locations = vec![
            PathBuf::from(home.clone()).join(".claude/local/claude"),
            PathBuf::from(home.clone()).join(".npm-global/bin/claude"),
            PathBuf::from("/usr/local/bin/claude"),
            PathBuf::from("/opt/homebrew/bin/claude"),
            PathBuf::from(home.clone()).join(".local/bin/claude"),
            PathBuf::from(home).join("node_modules/.bin/claude"),
        ];

        for path in locations {
            if path.exists() && path.is_file() {
                return Ok(path);
            }
        }

        Err(ClaudeError::cli_not_found())
    }

    /// Shared handle on process liveness and stderr signals
    #[must_use]
    pub fn monitor(&self) -> ProcessMonitor {
        self.monitor.clone()
    }

    /// Launch parameters this transport was created with
    #[must_use]
    pub const fn launch(&self) -> &LaunchParams {
        &self.launch
    }
}

impl Transport for SubprocessTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connect_impl().await
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(ClaudeError::transport("Transport is not ready for writing"));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ClaudeError::transport("stdin not available"))?;

        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| ClaudeError::transport(format!("Failed to write to stdin: {e}")))?;

        stdin
            .flush()
            .await
            .map_err(|e| ClaudeError::transport(format!("Failed to flush stdin: {e}")))?;

        Ok(())
    }

    async fn end_input(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| ClaudeError::transport(format!("Failed to close stdin: {e}")))?;
        }
        Ok(())
    }

    fn read_lines(&mut self) -> mpsc::UnboundedReceiver<Result<String>> {
        self.read_lines_impl()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        self.close_impl().await
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.drop_impl();
    }
}
