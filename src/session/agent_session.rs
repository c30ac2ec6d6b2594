//! One live agent process and its protocol state

use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::Transport;
use crate::error::{ClaudeError, Result};
use crate::transport::subprocess::EXIT_GRACE;
use crate::transport::{LaunchParams, ProcessMonitor, SubprocessTransport};
use crate::types::events::ExchangeOutcome;
use crate::types::identifiers::{ConversationKey, SessionId};
use crate::types::messages::UserTurn;
use crate::types::options::RelayOptions;

use super::decoder::ExchangeDecoder;
use super::handler::ResponseHandler;
use super::prompt::format_prompt;

/// Mutable facts about the session, readable without the I/O lock
#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<SessionId>,
    slash_commands: Vec<String>,
}

/// Pipes and decoder, held for the duration of an exchange
struct SessionIo {
    transport: SubprocessTransport,
    lines: mpsc::UnboundedReceiver<Result<String>>,
    decoder: ExchangeDecoder,
}

/// A persistent Claude Code process serving one conversation
pub struct AgentSession {
    key: ConversationKey,
    skill_prefix: Option<String>,
    requested: Option<SessionId>,
    working_dir: Option<PathBuf>,
    monitor: ProcessMonitor,
    state: Mutex<SessionState>,
    io: AsyncMutex<SessionIo>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("key", &self.key)
            .field("requested", &self.requested)
            .field("working_dir", &self.working_dir)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    /// Spawn the agent process
    ///
    /// # Errors
    /// Returns error if the CLI cannot be found or fails to start
    pub async fn spawn(
        key: ConversationKey,
        options: &RelayOptions,
        launch: LaunchParams,
    ) -> Result<Self> {
        let requested = launch.resume.clone();
        let working_dir = launch.cwd.clone();

        let mut transport = SubprocessTransport::new(key.clone(), options.clone(), launch)?;
        transport.connect().await?;
        let lines = transport.read_lines();
        let monitor = transport.monitor();

        Ok(Self {
            key: key.clone(),
            skill_prefix: options.skill_prefix.clone(),
            requested,
            working_dir,
            monitor,
            state: Mutex::new(SessionState::default()),
            io: AsyncMutex::new(SessionIo {
                transport,
                lines,
                decoder: ExchangeDecoder::new(key),
            }),
        })
    }

    /// Conversation this session serves
    #[must_use]
    pub const fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Session the process was asked to resume
    #[must_use]
    pub const fn requested_session(&self) -> Option<&SessionId> {
        self.requested.as_ref()
    }

    /// Session id assigned by the agent, once its init event was read
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.state.lock().session_id.clone()
    }

    /// Slash commands the agent advertised
    #[must_use]
    pub fn slash_commands(&self) -> Vec<String> {
        self.state.lock().slash_commands.clone()
    }

    /// Working directory the process runs in
    #[must_use]
    pub const fn working_directory(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// True iff the process has not exited
    #[must_use]
    pub fn alive(&self) -> bool {
        self.monitor.is_alive()
    }

    /// Whether the agent reported that the resumed session does not exist
    #[must_use]
    pub fn session_not_found(&self) -> bool {
        self.monitor.session_not_found()
    }

    /// Write one user turn
    ///
    /// # Errors
    /// Returns a transport error if the process has exited
    pub async fn send(&self, message: &str) -> Result<()> {
        let mut io = self.io.lock().await;
        self.write_turn(&mut io, message).await
    }

    /// Drain output until a terminal event
    ///
    /// Cancellation returns [`ClaudeError::Cancelled`] and leaves the process
    /// and decoder untouched; a later call picks up where this one stopped.
    ///
    /// # Errors
    /// Returns `StaleSession` when the resume target was unknown, `Process`
    /// when the agent exited, `Transport` when output ended otherwise
    pub async fn read_responses(
        &self,
        handler: &mut dyn ResponseHandler,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome> {
        let mut io = self.io.lock().await;
        self.drain(&mut io, handler, cancel).await
    }

    /// Send a message and drain its response under one lock
    ///
    /// A token cancelled before the turn is written leaves the agent untouched.
    ///
    /// # Errors
    /// See [`AgentSession::send`] and [`AgentSession::read_responses`]
    pub async fn exchange(
        &self,
        message: &str,
        handler: &mut dyn ResponseHandler,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome> {
        let mut io = self.io.lock().await;
        if cancel.is_cancelled() {
            log::debug!("[{}] Exchange cancelled before sending", self.key);
            return Err(ClaudeError::Cancelled);
        }
        self.write_turn(&mut io, message).await?;
        self.drain(&mut io, handler, cancel).await
    }

    /// Close stdin, wait for the process and reap it
    ///
    /// A session busy in an exchange is killed so the exchange unblocks.
    ///
    /// # Errors
    /// Returns error if waiting on the process fails
    pub async fn close(&self) -> Result<()> {
        let mut io = if let Ok(io) = self.io.try_lock() {
            io
        } else {
            log::info!("[{}] Session busy, killing process to close it", self.key);
            self.monitor.kill();
            self.io.lock().await
        };
        io.transport.close().await
    }

    async fn write_turn(&self, io: &mut SessionIo, message: &str) -> Result<()> {
        let prompt = format_prompt(message, self.skill_prefix.as_deref());
        log::debug!("[{}] Sending prompt: {}", self.key, prompt);

        let mut line = serde_json::to_string(&UserTurn::new(&prompt))?;
        line.push('\n');
        io.transport.write(&line).await
    }

    async fn drain(
        &self,
        io: &mut SessionIo,
        handler: &mut dyn ResponseHandler,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome> {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    log::debug!("[{}] Read cancelled", self.key);
                    return Err(ClaudeError::Cancelled);
                }
                next = io.lines.recv() => next,
            };

            match next {
                Some(Ok(line)) => {
                    let outcome = io.decoder.feed_line(&line, handler);
                    self.sync_state(&io.decoder);
                    if let Some(outcome) = outcome {
                        return Ok(outcome);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Err(self.output_ended(io).await),
            }
        }
    }

    fn sync_state(&self, decoder: &ExchangeDecoder) {
        let mut state = self.state.lock();
        if state.session_id.as_ref() != decoder.session_id() {
            state.session_id = decoder.session_id().cloned();
        }
        if state.slash_commands.is_empty() && !decoder.slash_commands().is_empty() {
            state.slash_commands = decoder.slash_commands().to_vec();
        }
    }

    /// Classify an output stream that ended without a terminal event
    async fn output_ended(&self, io: &mut SessionIo) -> ClaudeError {
        io.transport.finish_stderr(EXIT_GRACE).await;
        let status = io.transport.wait_for_exit(EXIT_GRACE).await;

        if self.monitor.session_not_found() {
            let session_id = self
                .requested
                .as_ref()
                .map_or_else(String::new, |id| id.as_str().to_string());
            log::warn!("[{}] Session {} not found, needs fresh start", self.key, session_id);
            return ClaudeError::stale_session(session_id);
        }

        match status {
            Some(status) => {
                log::warn!("[{}] Claude process exited unexpectedly: {}", self.key, status);
                ClaudeError::process("Claude process exited unexpectedly", status.code().unwrap_or(-1))
            }
            None => ClaudeError::transport("Claude output ended without result event"),
        }
    }
}
