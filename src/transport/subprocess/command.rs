//! CLI command building logic for subprocess transport

use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::types::identifiers::SessionId;
use crate::types::options::RelayOptions;

use super::config::ALLOWED_EXTRA_FLAGS;

/// Per-session launch parameters
#[derive(Debug, Clone, Default)]
pub struct LaunchParams {
    /// Session to resume with `--resume`
    pub resume: Option<SessionId>,
    /// Working directory for the CLI process
    pub cwd: Option<PathBuf>,
    /// MCP config file passed with `--mcp-config`
    pub mcp_config: Option<PathBuf>,
    /// Tool named with `--permission-prompt-tool`
    pub permission_prompt_tool: Option<String>,
}

/// Command builder for Claude CLI
pub struct CommandBuilder<'a> {
    cli_path: &'a Path,
    options: &'a RelayOptions,
    launch: &'a LaunchParams,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new command builder
    pub fn new(cli_path: &'a Path, options: &'a RelayOptions, launch: &'a LaunchParams) -> Self {
        Self {
            cli_path,
            options,
            launch,
        }
    }

    /// Build the complete CLI command with all arguments
    pub fn build(&self) -> Command {
        let mut cmd = Command::new(self.cli_path);
        cmd.args(self.args());
        cmd
    }

    /// Argument list, in the order the CLI receives it
    pub fn args(&self) -> Vec<String> {
        let mut args = self.options.program_args.clone();

        // Persistent bidirectional stream-json session
        args.extend(
            [
                "--print",
                "--verbose",
                "--input-format",
                "stream-json",
                "--output-format",
                "stream-json",
            ]
            .map(String::from),
        );

        if self.options.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        self.add_session_args(&mut args);
        self.add_bridge_args(&mut args);
        self.add_extra_args(&mut args);

        args
    }

    /// Add session-related arguments
    fn add_session_args(&self, args: &mut Vec<String>) {
        if let Some(ref session_id) = self.launch.resume {
            args.push("--resume".to_string());
            args.push(session_id.as_str().to_string());
        }

        if let Some(ref model) = self.options.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
    }

    /// Add permission bridge arguments
    fn add_bridge_args(&self, args: &mut Vec<String>) {
        if let Some(ref path) = self.launch.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        if let Some(ref tool) = self.launch.permission_prompt_tool {
            args.push("--permission-prompt-tool".to_string());
            args.push(tool.clone());
        }
    }

    /// Add allow-listed extra arguments
    fn add_extra_args(&self, args: &mut Vec<String>) {
        let mut extra: Vec<_> = self.options.extra_args.iter().collect();
        extra.sort_by(|a, b| a.0.cmp(b.0));

        for (flag, value) in extra {
            if ALLOWED_EXTRA_FLAGS.contains(&flag.as_str()) {
                args.push(format!("--{flag}"));
                if let Some(v) = value {
                    args.push(v.clone());
                }
            } else {
                log::warn!("Ignoring extra CLI flag not on the allow list: --{}", flag);
            }
        }
    }
}
