//! Semantic events delivered to the response callback surface
//!
//! The decoder turns raw stream-json lines into these values, in the order
//! the UI layer must present them.

use serde::{Deserialize, Serialize};

// ============================================================================
// Tool Events
// ============================================================================

/// A tool invocation announced by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Tool use ID
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool input parameters
    pub input: serde_json::Value,
}

/// Completion of a previously announced tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool use ID
    pub tool_id: String,
    /// Whether the tool failed
    pub is_error: bool,
}

/// Error text reported for a failed tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    /// Tool use ID
    pub tool_id: String,
    /// Tool name, when the tool was announced in this session
    pub tool_name: Option<String>,
    /// Best-available error text
    pub message: String,
}

// ============================================================================
// Progress Events
// ============================================================================

/// One entry of a `TodoWrite` list
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Todo {
    /// Task description
    #[serde(default)]
    pub content: String,
    /// `pending`, `in_progress` or `completed`
    #[serde(default)]
    pub status: String,
    /// Present-continuous form shown while the task runs
    #[serde(default, rename = "activeForm")]
    pub active_form: String,
}

impl Todo {
    /// Normalize the `todos` array of a `TodoWrite` input
    ///
    /// Entries that are not objects are dropped; missing fields become empty
    /// strings. Returns `None` when the input carries no `todos` array.
    #[must_use]
    pub fn list_from_input(input: &serde_json::Value) -> Option<Vec<Self>> {
        let entries = input.get("todos")?.as_array()?;
        Some(
            entries
                .iter()
                .filter_map(|entry| {
                    let obj = entry.as_object()?;
                    let field = |name: &str| {
                        obj.get(name)
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    };
                    Some(Self {
                        content: field("content"),
                        status: field("status"),
                        active_form: field("activeForm"),
                    })
                })
                .collect(),
        )
    }
}

/// A tool use the agent refused to run
///
/// The CLI reports denials either as bare tool names or as detailed objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionDenial {
    /// Bare tool name
    Named(String),
    /// Detailed denial record
    Detailed {
        /// Tool name
        tool_name: String,
        /// Tool use ID
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        /// Input the tool was called with
        #[serde(default)]
        tool_input: serde_json::Value,
    },
    /// Any other shape, kept as raw JSON
    Other(serde_json::Value),
}

impl PermissionDenial {
    /// Name of the denied tool
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Detailed { tool_name, .. } => tool_name,
            Self::Other(raw) => raw
                .get("tool_name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown"),
        }
    }
}

// ============================================================================
// Exchange Outcome
// ============================================================================

/// How a `read_responses` call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// A `result` event closed the exchange
    Completed,
    /// An `input_request` suspended the exchange until the next send
    AwaitingInput {
        /// Tool waiting for the human answer
        tool_use_id: String,
    },
}

impl ExchangeOutcome {
    /// Whether the exchange is waiting for a human answer
    #[must_use]
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::AwaitingInput { .. })
    }
}
