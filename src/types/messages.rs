//! Stream-json protocol type definitions
//!
//! This module contains the line-level events the Claude Code CLI writes to
//! stdout in `--output-format stream-json` mode, and the user turn it reads
//! from stdin in `--input-format stream-json` mode.

use super::events::PermissionDenial;
use super::identifiers::SessionId;
use serde::{Deserialize, Serialize};

// ============================================================================
// Inbound Events (stdout)
// ============================================================================

/// Content value for tool results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
    /// String content
    String(String),
    /// Structured content blocks
    Blocks(Vec<serde_json::Value>),
}

impl ContentValue {
    /// Flatten the value into readable text
    ///
    /// Strings are returned as-is; block lists contribute the `text` field of
    /// each block that has one, joined by newlines.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(serde_json::Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Assistant content block types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content block
    Text {
        /// Text content
        #[serde(default)]
        text: String,
    },
    /// Thinking content block (extended thinking)
    Thinking {
        /// Thinking content
        #[serde(default)]
        thinking: String,
    },
    /// Tool use request
    ToolUse {
        /// Tool use ID
        #[serde(default)]
        id: String,
        /// Tool name
        #[serde(default)]
        name: String,
        /// Tool input parameters
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Any block kind this relay does not act on
    #[serde(other)]
    Other,
}

/// Assistant message content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessageContent {
    /// Model that generated the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Message content blocks
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// Content blocks carried by `user` events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContentBlock {
    /// Tool execution result
    ToolResult {
        /// ID of the tool use this is a result for
        #[serde(default)]
        tool_use_id: String,
        /// Result content
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ContentValue>,
        /// Whether this is an error result
        #[serde(default)]
        is_error: bool,
    },
    /// Any other block kind
    #[serde(other)]
    Other,
}

/// User content can be string or blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Plain string content
    String(String),
    /// Structured content blocks
    Blocks(Vec<UserContentBlock>),
}

/// User message content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMessageContent {
    /// Message role (always "user")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Message content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<UserContent>,
}

/// One stdout line of the stream-json protocol
///
/// Decoded by its `type` discriminator. Unknown kinds land in
/// [`StreamEvent::Unrecognized`] and are skipped by the decoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// System event (`subtype: "init"` carries session and command data)
    System {
        /// System message subtype
        #[serde(default)]
        subtype: String,
        /// Session assigned by the CLI
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Slash commands the CLI advertises
        #[serde(default)]
        slash_commands: Vec<String>,
    },
    /// Assistant message
    Assistant {
        /// Message content
        #[serde(default)]
        message: AssistantMessageContent,
    },
    /// User message (tool results)
    User {
        /// Message content
        #[serde(default)]
        message: UserMessageContent,
        /// Top-level tool result summary (error text when a tool failed)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_result: Option<serde_json::Value>,
    },
    /// End of an exchange
    Result {
        /// Result subtype
        #[serde(default)]
        subtype: String,
        /// Whether this is an error result
        #[serde(default)]
        is_error: bool,
        /// Tool uses the CLI refused during the exchange
        #[serde(default)]
        permission_denials: Vec<PermissionDenial>,
        /// Session ID
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Result message, usually a string
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    /// The CLI is waiting on a human answer for a tool
    InputRequest {
        /// Tool use waiting for input
        #[serde(default)]
        tool_use_id: String,
    },
    /// Any event kind this relay does not know
    #[serde(other)]
    Unrecognized,
}

// ============================================================================
// Outbound Messages (stdin)
// ============================================================================

/// One stdin line: a user turn
#[derive(Debug, Clone, Serialize)]
pub struct UserTurn<'a> {
    /// Always "user"
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Turn body
    pub message: UserTurnBody<'a>,
}

/// Body of a user turn
#[derive(Debug, Clone, Serialize)]
pub struct UserTurnBody<'a> {
    /// Always "user"
    pub role: &'static str,
    /// Prompt text
    pub content: &'a str,
}

impl<'a> UserTurn<'a> {
    /// Create a user turn carrying the given prompt
    #[must_use]
    pub const fn new(content: &'a str) -> Self {
        Self {
            kind: "user",
            message: UserTurnBody {
                role: "user",
                content,
            },
        }
    }
}
