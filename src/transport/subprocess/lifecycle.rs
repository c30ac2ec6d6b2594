//! Lifecycle management for subprocess transport (connect, close)

use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::VERSION;
use crate::error::{ClaudeError, Result};

use super::command::CommandBuilder;
use super::config::{DANGEROUS_ENV_VARS, SESSION_NOT_FOUND_MARKER};
use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Connect to the subprocess transport
    ///
    /// This method spawns the Claude Code CLI process, sets up stdio pipes and
    /// starts the stderr watcher.
    ///
    /// # Errors
    /// Returns error if process spawning fails or stdio handles cannot be obtained
    pub(super) async fn connect_impl(&mut self) -> Result<()> {
        if self.monitor.child.lock().is_some() {
            return Ok(());
        }

        let builder = CommandBuilder::new(&self.cli_path, &self.options, &self.launch);
        let mut cmd = builder.build();

        // Only add user-provided env vars that are not in the dangerous list
        for (key, value) in &self.options.env {
            if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                log::warn!("Refusing to pass {} to the Claude process", key);
            } else {
                cmd.env(key, value);
            }
        }

        cmd.env("CLAUDE_CODE_ENTRYPOINT", "sdk-rust");
        cmd.env("KODEGEN_RELAY_VERSION", VERSION);

        if let Some(ref cwd) = self.launch.cwd {
            cmd.env("PWD", cwd);
            cmd.current_dir(cwd);
        }

        // Pipe stderr instead of inheriting so the watcher can read it and the
        // child cannot touch the parent terminal.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.launch.cwd
                && !cwd.exists()
            {
                return ClaudeError::connection(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                ));
            }
            ClaudeError::connection(format!("Failed to start Claude Code: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClaudeError::connection("Failed to get stdin handle"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClaudeError::connection("Failed to get stdout handle"))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClaudeError::connection("Failed to get stderr handle"))?;

        // Watch stderr for the resume failure signal
        let key = self.key.clone();
        let not_found = self.monitor.session_not_found.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new());
            while let Some(line) = lines.next().await {
                let Ok(line) = line else { break };
                if line.contains(SESSION_NOT_FOUND_MARKER) {
                    not_found.store(true, Ordering::SeqCst);
                    log::warn!("[{}] Session not found, will use new session: {}", key, line);
                } else if !line.trim().is_empty() {
                    log::debug!("[{}] claude stderr: {}", key, line);
                }
            }
        });

        log::info!(
            "[{}] Started Claude process (pid {:?}, resume {:?})",
            self.key,
            child.id(),
            self.launch.resume.as_ref().map(|s| s.as_str())
        );

        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        *self.monitor.child.lock() = Some(child);
        self.stderr_task = Some(stderr_task);
        self.ready.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Wait up to `grace` for the stderr watcher to reach end of stream
    ///
    /// Called once stdout has ended so the session-not-found flag is settled
    /// before the failure is classified.
    pub async fn finish_stderr(&mut self, grace: Duration) {
        if let Some(mut task) = self.stderr_task.take()
            && tokio::time::timeout(grace, &mut task).await.is_err()
        {
            self.stderr_task = Some(task);
        }
    }

    /// Wait up to `grace` for the process to exit
    pub async fn wait_for_exit(&self, grace: Duration) -> Option<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if let Some(status) = self.monitor.exit_status() {
                return Some(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Close the transport and clean up resources
    ///
    /// Closes stdin, waits up to the close timeout for the process to exit and
    /// kills it otherwise.
    ///
    /// # Errors
    /// Returns error if waiting on the process fails
    pub(super) async fn close_impl(&mut self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        // Close stdin to signal the process to exit gracefully
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        let child = self.monitor.child.lock().take();
        let mut result = Ok(());
        if let Some(mut child) = child {
            match tokio::time::timeout(self.options.close_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    log::debug!("[{}] Claude process exited: {}", self.key, status);
                    self.monitor.record_exit(status);
                }
                Ok(Err(e)) => {
                    result = Err(ClaudeError::Io(e));
                }
                Err(_) => {
                    log::warn!(
                        "[{}] Claude process did not exit within {:?}, killing",
                        self.key,
                        self.options.close_timeout
                    );
                    let _ = child.kill().await;
                    if let Ok(status) = child.wait().await {
                        self.monitor.record_exit(status);
                    }
                }
            }
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.finish_stderr(Duration::from_millis(500)).await;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.stdout = None;
        result
    }

    /// Handle Drop cleanup
    pub(super) fn drop_impl(&mut self) {
        // Dropping stdin closes it
        self.stdin.take();

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        if let Some(mut child) = self.monitor.child.lock().take() {
            let _ = child.start_kill();
        }
    }
}
