//! Agent sessions: one persistent Claude Code process per conversation
//!
//! - [`AgentSession`] owns the process pipes and drives exchanges
//! - [`ExchangeDecoder`] turns stream-json lines into ordered callbacks
//! - [`ResponseHandler`] is the callback surface the decoder drives
//! - [`format_prompt`] frames chat messages as agent prompts

mod agent_session;
mod decoder;
mod handler;
mod prompt;

pub use agent_session::AgentSession;
pub use decoder::ExchangeDecoder;
pub use handler::{ResponseEvent, ResponseHandler};
pub use prompt::{format_prompt, silent_command_confirmation};
