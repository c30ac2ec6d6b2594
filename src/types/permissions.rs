//! Permission-related type definitions
//!
//! This module contains the wire shapes shared by the permission RPC helper,
//! the loopback callback endpoint and the supervisor-side broker.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::identifiers::{ConversationKey, RequestId};

// ============================================================================
// Permission Types
// ============================================================================

/// Permission behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionBehavior {
    /// Allow this call
    Allow,
    /// Allow this call and remember the choice
    AllowAlways,
    /// Deny the call
    Deny,
}

impl PermissionBehavior {
    /// Whether the tool call may proceed
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow | Self::AllowAlways)
    }
}

/// Answer to a permission request: `{behavior, updatedInput?, message?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDecision {
    /// Decision
    pub behavior: PermissionBehavior,
    /// Input the tool should run with
    #[serde(
        rename = "updatedInput",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_input: Option<serde_json::Value>,
    /// Explanation, mostly for denials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PermissionDecision {
    /// Allow this call
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            behavior: PermissionBehavior::Allow,
            updated_input: None,
            message: None,
        }
    }

    /// Allow this call and remember the choice
    #[must_use]
    pub const fn allow_always() -> Self {
        Self {
            behavior: PermissionBehavior::AllowAlways,
            updated_input: None,
            message: None,
        }
    }

    /// Deny with an explanation
    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            behavior: PermissionBehavior::Deny,
            updated_input: None,
            message: Some(message.into()),
        }
    }

    /// Run the tool with modified input
    #[must_use]
    pub fn with_updated_input(mut self, input: serde_json::Value) -> Self {
        self.updated_input = Some(input);
        self
    }
}

/// Body of `POST /permission`: `{chat_id, tool_name, input}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Conversation the request belongs to
    pub chat_id: ConversationKey,
    /// Tool awaiting approval
    pub tool_name: String,
    /// Input the tool was called with
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Arguments of the `prompt_permission` RPC tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptPermissionArgs {
    /// The name of the tool being requested
    pub tool_name: String,
    /// The input parameters for the tool
    #[serde(default)]
    pub input: serde_json::Value,
}

/// A pending request as presented to the human-facing prompter
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionPrompt {
    /// Correlation handle for `respond_to`
    pub request_id: RequestId,
    /// Conversation the request belongs to
    pub key: ConversationKey,
    /// Tool awaiting approval
    pub tool_name: String,
    /// Input the tool was called with
    pub input: serde_json::Value,
}
