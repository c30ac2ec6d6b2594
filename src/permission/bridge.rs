//! Per-conversation MCP config that wires the agent to the permission helper

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::callback::{ENV_CALLBACK_PORT, ENV_CHAT_ID};
use crate::error::Result;
use crate::types::identifiers::ConversationKey;

/// MCP server name the agent sees
pub const SERVER_NAME: &str = "relay";

/// Fully-qualified tool name passed to `--permission-prompt-tool`
pub const PERMISSION_TOOL: &str = "mcp__relay__prompt_permission";

/// Flag that switches the binary into helper mode
pub const MCP_SERVER_FLAG: &str = "--mcp-server";

/// Writes and caches one MCP config file per conversation
///
/// Files live in a private temp directory removed on drop.
#[derive(Debug)]
pub struct BridgeConfig {
    program: PathBuf,
    callback_port: u16,
    dir: TempDir,
    written: Mutex<HashMap<ConversationKey, PathBuf>>,
}

impl BridgeConfig {
    /// Bridge to the helper at `program`, reporting back to `callback_port`
    ///
    /// # Errors
    /// Returns error if the temp directory cannot be created
    pub fn new(program: impl Into<PathBuf>, callback_port: u16) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("kodegen-relay-mcp-")
            .tempdir()?;
        Ok(Self {
            program: program.into(),
            callback_port,
            dir,
            written: Mutex::new(HashMap::new()),
        })
    }

    /// Tool name for `--permission-prompt-tool`
    #[must_use]
    pub const fn tool_name(&self) -> &'static str {
        PERMISSION_TOOL
    }

    /// Directory holding the generated configs
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Config file for `key`, written on first use
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn config_path(&self, key: &ConversationKey) -> Result<PathBuf> {
        let mut written = self.written.lock();
        if let Some(path) = written.get(key) {
            return Ok(path.clone());
        }

        let path = self
            .dir
            .path()
            .join(format!("mcp-{}-{}.json", written.len(), file_stem(key)));
        let config = json!({
            "mcpServers": {
                SERVER_NAME: {
                    "command": self.program,
                    "args": [MCP_SERVER_FLAG],
                    "env": {
                        ENV_CALLBACK_PORT: self.callback_port.to_string(),
                        ENV_CHAT_ID: key.as_str(),
                    },
                }
            }
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&config)?)?;

        log::debug!("[{}] Wrote MCP config {}", key, path.display());
        written.insert(key.clone(), path.clone());
        Ok(path)
    }
}

fn file_stem(key: &ConversationKey) -> String {
    key.as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
