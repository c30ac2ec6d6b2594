//! # Claude Relay
//!
//! Supervises one persistent Claude Code process per conversation and turns
//! its stream-json output into ordered callbacks for a chat front end.
//! Sessions survive process death and program restarts, and tool calls that
//! need a human decision are routed through a permission bridge.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use kodegen_claude_relay::{
//!     ConversationKey, RelayOptions, ResponseHandler, SessionRegistry, SessionStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! struct Printer;
//!
//! impl ResponseHandler for Printer {
//!     fn on_text(&mut self, text: &str, is_final: bool) {
//!         log::info!("{}{}", text, if is_final { "" } else { " …" });
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SessionStore::load("sessions.json")?);
//! let registry = SessionRegistry::new(RelayOptions::from_env(), store);
//!
//! let key = ConversationKey::from(42_i64);
//! registry
//!     .send(&key, "hello", &mut Printer, &CancellationToken::new())
//!     .await?;
//!
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`types`]: identifiers, protocol events, callback payloads, options
//! - [`message`]: stream-json line parsing
//! - [`transport`]: the Claude Code subprocess and its pipes
//! - [`session`]: one live agent per conversation and the event decoder
//! - [`registry`]: keyed session pool with resume and retry
//! - [`store`]: durable conversation → session mapping
//! - [`permission`]: JSON-RPC helper, loopback callback and broker
//! - [`discovery`]: listing past sessions from the Claude projects directory
//! - [`error`]: error types
//!
//! ## Requirements
//!
//! - Claude Code: `npm install -g @anthropic-ai/claude-code`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod discovery;
pub mod error;
pub mod message;
pub mod permission;
pub mod registry;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use discovery::{SessionDiscovery, SessionInfo, format_time_ago};
pub use error::{ClaudeError, Result};
pub use message::parse_event;
pub use permission::{
    BridgeConfig, CallbackClient, CallbackServer, PermissionBroker, PermissionPrompter,
    PermissionRpcServer,
};
pub use registry::SessionRegistry;
pub use session::{AgentSession, ExchangeDecoder, ResponseEvent, ResponseHandler};
pub use store::{SessionMapping, SessionStore};
pub use transport::{LaunchParams, SubprocessTransport, Transport};
pub use types::events::{ExchangeOutcome, PermissionDenial, Todo, ToolError, ToolResult, ToolUse};
pub use types::identifiers::{ConversationKey, RequestId, SessionId};
pub use types::options::{RelayOptions, RelayOptionsBuilder};
pub use types::permissions::{
    PermissionBehavior, PermissionDecision, PermissionPrompt, PermissionRequest,
};

/// Version of the relay
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
