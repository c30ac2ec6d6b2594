//! Human-in-the-loop permission bridge
//!
//! ```text
//! agent ──stdio JSON-RPC──▶ helper (--mcp-server) ──HTTP POST──▶ CallbackServer ──▶ PermissionBroker ──▶ prompter
//! ```
//!
//! - [`BridgeConfig`] writes the MCP config that makes the agent spawn the helper
//! - [`PermissionRpcServer`] is the helper, answering `prompt_permission`
//! - [`CallbackClient`] / [`CallbackServer`] carry requests over loopback
//! - [`PermissionBroker`] parks each request until a human decides

mod bridge;
mod broker;
mod callback;
mod rpc;

pub use bridge::{BridgeConfig, MCP_SERVER_FLAG, PERMISSION_TOOL, SERVER_NAME};
pub use broker::{NO_HANDLER_MESSAGE, PermissionBroker, PermissionPrompter};
pub use callback::{CallbackClient, CallbackServer, ENV_CALLBACK_PORT, ENV_CHAT_ID, PERMISSION_PATH};
pub use rpc::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROMPT_TOOL, PROTOCOL_VERSION,
    PermissionRpcServer, PermissionSource,
};
