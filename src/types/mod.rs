//! Type definitions for the Claude relay
//!
//! This module contains the type definitions used throughout the relay,
//! organized into logical submodules:
//!
//! - [`identifiers`] - Type-safe ID wrappers (`ConversationKey`, `SessionId`, `RequestId`)
//! - [`messages`] - Stream-json protocol events and the outbound user turn
//! - [`events`] - Semantic events delivered to the response callback surface
//! - [`permissions`] - Permission requests and decisions
//! - [`options`] - Relay configuration options

pub mod events;
pub mod identifiers;
pub mod messages;
pub mod options;
pub mod permissions;

// Re-export commonly used types
pub use events::{ExchangeOutcome, PermissionDenial, Todo, ToolError, ToolResult, ToolUse};
pub use identifiers::{ConversationKey, RequestId, SessionId};
pub use messages::{ContentBlock, ContentValue, StreamEvent, UserContent, UserContentBlock};
pub use options::{RelayOptions, RelayOptionsBuilder};
pub use permissions::{
    PermissionBehavior, PermissionDecision, PermissionPrompt, PermissionRequest,
    PromptPermissionArgs,
};
