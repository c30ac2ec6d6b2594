//! Relay options and configuration
//!
//! This module contains the tunables shared by every agent session the relay
//! spawns, including a builder pattern and environment loading.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ClaudeError, Result};
use crate::transport::subprocess::{DEFAULT_CLOSE_TIMEOUT, DEFAULT_MAX_BUFFER_SIZE};

/// Environment variable naming the Claude Code CLI binary
pub const ENV_CLAUDE_PATH: &str = "KODEGEN_RELAY_CLAUDE";
/// Environment variable selecting the model
pub const ENV_MODEL: &str = "KODEGEN_RELAY_MODEL";
/// Environment variable enabling `--dangerously-skip-permissions`
pub const ENV_SKIP_PERMISSIONS: &str = "KODEGEN_RELAY_SKIP_PERMISSIONS";
/// Environment variable overriding the skill prefix
pub const ENV_SKILL_PREFIX: &str = "KODEGEN_RELAY_SKILL_PREFIX";
/// Environment variable overriding the session store path
pub const ENV_SESSIONS_PATH: &str = "KODEGEN_RELAY_SESSIONS";

/// Default permission wait budget
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Relay Options
// ============================================================================

/// Options applied to every agent session
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Path to the Claude Code CLI (searched for when `None`)
    pub cli_path: Option<PathBuf>,
    /// Arguments placed before the protocol flags (e.g. a script path)
    pub program_args: Vec<String>,
    /// Pass `--dangerously-skip-permissions`
    pub skip_permissions: bool,
    /// AI model to use
    pub model: Option<String>,
    /// Environment variables for the CLI process
    pub env: HashMap<String, String>,
    /// Extra CLI arguments to pass (allow-listed)
    pub extra_args: HashMap<String, Option<String>>,
    /// Skill invocation prefixed to plain messages (e.g. `/relay`)
    pub skill_prefix: Option<String>,
    /// Maximum length of one stdout line
    pub max_buffer_size: usize,
    /// How long a permission request waits for a human
    pub permission_timeout: Duration,
    /// How long `close` waits for the CLI to exit before killing it
    pub close_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            cli_path: None,
            program_args: Vec::new(),
            skip_permissions: false,
            model: None,
            env: HashMap::new(),
            extra_args: HashMap::new(),
            skill_prefix: None,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl RelayOptions {
    /// Create a new builder for `RelayOptions`
    #[must_use]
    pub fn builder() -> RelayOptionsBuilder {
        RelayOptionsBuilder::default()
    }

    /// Load options from `KODEGEN_RELAY_*` environment variables
    ///
    /// Unset variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Some(path) = non_empty_var(ENV_CLAUDE_PATH) {
            options.cli_path = Some(PathBuf::from(path));
        }
        options.model = non_empty_var(ENV_MODEL);
        options.skill_prefix = non_empty_var(ENV_SKILL_PREFIX);
        options.skip_permissions = non_empty_var(ENV_SKIP_PERMISSIONS)
            .is_some_and(|value| parse_flag(&value));

        options
    }
}

/// The user's home directory from `HOME`
///
/// # Errors
/// Returns `InvalidConfig` when `HOME` is unset or empty
pub fn home_dir() -> Result<PathBuf> {
    non_empty_var("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| ClaudeError::invalid_config("HOME is not set"))
}

/// Default session store location: `$HOME/.config/kodegen-relay/sessions.json`
///
/// `KODEGEN_RELAY_SESSIONS` overrides it.
///
/// # Errors
/// Returns `InvalidConfig` when neither the override nor `HOME` is set
pub fn default_sessions_path() -> Result<PathBuf> {
    sessions_path(non_empty_var(ENV_SESSIONS_PATH), home_dir())
}

fn sessions_path(override_path: Option<String>, home: Result<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return Ok(PathBuf::from(path));
    }
    Ok(home?
        .join(".config")
        .join("kodegen-relay")
        .join("sessions.json"))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ============================================================================
// Builder for RelayOptions
// ============================================================================

/// Builder for `RelayOptions`
#[derive(Debug, Default)]
pub struct RelayOptionsBuilder {
    options: RelayOptions,
}

impl RelayOptionsBuilder {
    /// Set the CLI path
    #[must_use]
    pub fn cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cli_path = Some(path.into());
        self
    }

    /// Set arguments placed before the protocol flags
    #[must_use]
    pub fn program_args(mut self, args: Vec<impl Into<String>>) -> Self {
        self.options.program_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Skip the CLI's own permission prompts
    #[must_use]
    pub const fn skip_permissions(mut self, skip: bool) -> Self {
        self.options.skip_permissions = skip;
        self
    }

    /// Set the model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    /// Add an environment variable for the CLI process
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.insert(key.into(), value.into());
        self
    }

    /// Add an extra CLI flag
    #[must_use]
    pub fn extra_arg(mut self, flag: impl Into<String>, value: Option<String>) -> Self {
        self.options.extra_args.insert(flag.into(), value);
        self
    }

    /// Set the skill prefix
    #[must_use]
    pub fn skill_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.skill_prefix = Some(prefix.into());
        self
    }

    /// Set the maximum stdout line length
    #[must_use]
    pub const fn max_buffer_size(mut self, size: usize) -> Self {
        self.options.max_buffer_size = size;
        self
    }

    /// Set the permission wait budget
    #[must_use]
    pub const fn permission_timeout(mut self, timeout: Duration) -> Self {
        self.options.permission_timeout = timeout;
        self
    }

    /// Set the graceful close timeout
    #[must_use]
    pub const fn close_timeout(mut self, timeout: Duration) -> Self {
        self.options.close_timeout = timeout;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> RelayOptions {
        self.options
    }
}
