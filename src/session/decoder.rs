//! Stream-json exchange decoder
//!
//! Turns the interleaved event stream of one agent process into ordered
//! callbacks. The ordering rules:
//!
//! - At most one assistant text is buffered. It is flushed as non-final
//!   when newer text or a tool use arrives, and as final on `result`.
//! - New text or a new tool use implicitly completes every pending tool.
//! - A failed `tool_result` completes its tool as failed.
//! - `result` completes every pending tool and ends the exchange.
//! - `input_request` completes every pending tool except the one waiting,
//!   and suspends the exchange.
//!
//! The decoder lives as long as its agent process, so a cancelled read or a
//! suspended exchange resumes with its state intact.

use std::collections::HashMap;

use crate::message::{parse_event, salvage_result};
use crate::types::events::{ExchangeOutcome, PermissionDenial, Todo, ToolError, ToolResult, ToolUse};
use crate::types::identifiers::{ConversationKey, SessionId};
use crate::types::messages::{ContentBlock, StreamEvent, UserContent, UserContentBlock};

use super::handler::ResponseHandler;

/// Tool whose progress list gets a dedicated callback
const TODO_WRITE_TOOL: &str = "TodoWrite";

/// Per-process protocol state
#[derive(Debug)]
pub struct ExchangeDecoder {
    key: ConversationKey,
    /// Pending tool ids in the order they started
    pending: Vec<String>,
    /// Names of tools seen during the current exchange
    tool_names: HashMap<String, String>,
    buffered: Option<String>,
    session_id: Option<SessionId>,
    slash_commands: Option<Vec<String>>,
}

impl ExchangeDecoder {
    /// Create a decoder for one agent process
    #[must_use]
    pub fn new(key: ConversationKey) -> Self {
        Self {
            key,
            pending: Vec::new(),
            tool_names: HashMap::new(),
            buffered: None,
            session_id: None,
            slash_commands: None,
        }
    }

    /// Session id assigned by the agent
    #[must_use]
    pub const fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Commands advertised in the init event
    #[must_use]
    pub fn slash_commands(&self) -> &[String] {
        self.slash_commands.as_deref().unwrap_or_default()
    }

    /// Tool ids started but not yet completed
    #[must_use]
    pub fn pending_tools(&self) -> &[String] {
        &self.pending
    }

    /// Whether a text is held back waiting for its final flag
    #[must_use]
    pub const fn has_buffered_text(&self) -> bool {
        self.buffered.is_some()
    }

    /// Decode one raw stdout line
    ///
    /// Lines that are not protocol events are logged and skipped.
    pub fn feed_line(
        &mut self,
        line: &str,
        handler: &mut dyn ResponseHandler,
    ) -> Option<ExchangeOutcome> {
        match parse_event(line) {
            Ok(event) => self.feed(event, handler),
            Err(e) => match salvage_result(line) {
                Some(event) => {
                    log::warn!("[{}] Result event with unexpected fields: {}", self.key, e);
                    self.feed(event, handler)
                }
                None => {
                    log::debug!("[{}] Skipping unparseable line: {}", self.key, e);
                    None
                }
            },
        }
    }

    /// Apply one event, returning the outcome when it ends the exchange
    pub fn feed(
        &mut self,
        event: StreamEvent,
        handler: &mut dyn ResponseHandler,
    ) -> Option<ExchangeOutcome> {
        match event {
            StreamEvent::System {
                subtype,
                session_id,
                slash_commands,
            } => {
                self.on_system(&subtype, session_id, slash_commands);
                None
            }
            StreamEvent::Assistant { message } => {
                self.on_assistant(message.content, handler);
                None
            }
            StreamEvent::User {
                message,
                tool_use_result,
            } => {
                if let Some(UserContent::Blocks(blocks)) = message.content {
                    self.on_tool_results(blocks, tool_use_result.as_ref(), handler);
                }
                None
            }
            StreamEvent::Result {
                subtype,
                permission_denials,
                session_id,
                ..
            } => {
                self.on_result(&subtype, &permission_denials, session_id, handler);
                Some(ExchangeOutcome::Completed)
            }
            StreamEvent::InputRequest { tool_use_id } => {
                self.on_input_request(&tool_use_id, handler);
                Some(ExchangeOutcome::AwaitingInput { tool_use_id })
            }
            StreamEvent::Unrecognized => {
                log::debug!("[{}] Skipping unrecognized event", self.key);
                None
            }
        }
    }

    fn on_system(
        &mut self,
        subtype: &str,
        session_id: Option<SessionId>,
        slash_commands: Vec<String>,
    ) {
        if subtype != "init" || self.slash_commands.is_some() {
            return;
        }
        log::debug!(
            "[{}] Captured init data: session {:?}, {} commands",
            self.key,
            session_id.as_ref().map(SessionId::as_str),
            slash_commands.len()
        );
        if session_id.is_some() {
            self.session_id = session_id;
        }
        self.slash_commands = Some(slash_commands);
    }

    fn on_assistant(&mut self, blocks: Vec<ContentBlock>, handler: &mut dyn ResponseHandler) {
        let mut tools = Vec::new();

        // Text first, so it reaches the handler before tools from the same line
        for block in blocks {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => {
                    self.complete_all(handler);
                    self.flush(handler, false);
                    self.buffered = Some(text);
                }
                ContentBlock::ToolUse { id, name, input } if !name.is_empty() => {
                    tools.push(ToolUse { id, name, input });
                }
                _ => {}
            }
        }

        for tool in tools {
            self.complete_all(handler);
            self.flush(handler, false);

            self.pending.push(tool.id.clone());
            self.tool_names.insert(tool.id.clone(), tool.name.clone());

            if tool.name == TODO_WRITE_TOOL
                && let Some(todos) = Todo::list_from_input(&tool.input)
            {
                handler.on_todo_update(&todos);
            }

            log::debug!("[{}] Tool use: {} ({})", self.key, tool.name, tool.id);
            handler.on_tool_use(&tool);
        }
    }

    fn on_tool_results(
        &mut self,
        blocks: Vec<UserContentBlock>,
        tool_use_result: Option<&serde_json::Value>,
        handler: &mut dyn ResponseHandler,
    ) {
        for block in blocks {
            let UserContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            else {
                continue;
            };
            if !is_error {
                continue;
            }

            self.complete(&tool_use_id, true, handler);

            let mut message = content.map(|c| c.text()).unwrap_or_default();
            if message.is_empty() {
                message = tool_use_result.map(value_text).unwrap_or_default();
            }
            if message.is_empty() {
                continue;
            }

            log::debug!("[{}] Tool error for {}: {}", self.key, tool_use_id, message);
            handler.on_tool_error(&ToolError {
                tool_name: self.tool_names.get(&tool_use_id).cloned(),
                tool_id: tool_use_id,
                message,
            });
        }
    }

    fn on_result(
        &mut self,
        subtype: &str,
        denials: &[PermissionDenial],
        session_id: Option<SessionId>,
        handler: &mut dyn ResponseHandler,
    ) {
        self.complete_all(handler);

        if self.session_id.is_none() {
            self.session_id = session_id;
        }

        if !denials.is_empty() {
            log::info!(
                "[{}] Permission denials in result: {:?}",
                self.key,
                denials.iter().map(PermissionDenial::tool_name).collect::<Vec<_>>()
            );
            handler.on_permission_denial(denials);
        }

        log::debug!(
            "[{}] Result received ({}), final message: {}",
            self.key,
            subtype,
            self.buffered.is_some()
        );
        self.flush(handler, true);
        self.tool_names.clear();
    }

    fn on_input_request(&mut self, tool_use_id: &str, handler: &mut dyn ResponseHandler) {
        log::debug!("[{}] Waiting for input on {}", self.key, tool_use_id);

        let pending = std::mem::take(&mut self.pending);
        for id in pending {
            if id == tool_use_id {
                self.pending.push(id);
            } else {
                handler.on_tool_result(&ToolResult {
                    tool_id: id,
                    is_error: false,
                });
            }
        }

        self.flush(handler, false);
        handler.on_input_request(tool_use_id);
    }

    fn complete(&mut self, tool_id: &str, is_error: bool, handler: &mut dyn ResponseHandler) {
        if let Some(pos) = self.pending.iter().position(|id| id == tool_id) {
            let id = self.pending.remove(pos);
            handler.on_tool_result(&ToolResult {
                tool_id: id,
                is_error,
            });
        }
    }

    fn complete_all(&mut self, handler: &mut dyn ResponseHandler) {
        for id in self.pending.drain(..) {
            handler.on_tool_result(&ToolResult {
                tool_id: id,
                is_error: false,
            });
        }
    }

    fn flush(&mut self, handler: &mut dyn ResponseHandler, is_final: bool) {
        if let Some(text) = self.buffered.take() {
            handler.on_text(&text, is_final);
        }
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::handler::ResponseEvent;

    fn decoder() -> ExchangeDecoder {
        ExchangeDecoder::new(ConversationKey::from("test"))
    }

    fn run(decoder: &mut ExchangeDecoder, lines: &[&str]) -> (Vec<ResponseEvent>, Option<ExchangeOutcome>) {
        let mut events = Vec::new();
        let mut outcome = None;
        for line in lines {
            if let Some(done) = decoder.feed_line(line, &mut events) {
                outcome = Some(done);
                break;
            }
        }
        (events, outcome)
    }

    fn text(text: &str, is_final: bool) -> ResponseEvent {
        ResponseEvent::Text {
            text: text.to_string(),
            is_final,
        }
    }

    fn done(id: &str, is_error: bool) -> ResponseEvent {
        ResponseEvent::ToolResult(ToolResult {
            tool_id: id.to_string(),
            is_error,
        })
    }

    const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"sess-1","slash_commands":["compact"]}"#;
    const RESULT: &str = r#"{"type":"result","subtype":"success","is_error":false}"#;

    #[test]
    fn test_single_text_is_final() {
        let mut d = decoder();
        let (events, outcome) = run(
            &mut d,
            &[
                INIT,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello!"}]}}"#,
                RESULT,
            ],
        );
        assert_eq!(outcome, Some(ExchangeOutcome::Completed));
        assert_eq!(events, vec![text("Hello!", true)]);
        assert_eq!(d.session_id().unwrap().as_str(), "sess-1");
        assert_eq!(d.slash_commands(), ["compact".to_string()]);
        assert!(d.pending_tools().is_empty());
    }

    #[test]
    fn test_text_precedes_tool_in_same_line() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{}},{"type":"text","text":"Running it"}]}}"#,
                RESULT,
            ],
        );
        assert_eq!(events[0], text("Running it", false));
        assert!(matches!(&events[1], ResponseEvent::ToolUse(t) if t.id == "t1"));
        assert_eq!(events[2], done("t1", false));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_new_activity_completes_pending_tools() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"first"}]}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Read","input":{}}]}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"second"}]}}"#,
                RESULT,
            ],
        );
        assert_eq!(
            events,
            vec![
                text("first", false),
                ResponseEvent::ToolUse(ToolUse {
                    id: "t1".into(),
                    name: "Read".into(),
                    input: serde_json::json!({}),
                }),
                done("t1", false),
                text("second", true),
            ]
        );
    }

    #[test]
    fn test_final_text_at_most_once_and_last() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"c"}]}}"#,
                RESULT,
            ],
        );
        let finals: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ResponseEvent::Text { is_final: true, .. }))
            .collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(events.last(), Some(&text("c", true)));
        assert_eq!(events[0], text("a", false));
        assert_eq!(events[1], text("b", false));
    }

    #[test]
    fn test_tool_error_completes_as_failure() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"false"}}]}}"#,
                r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":[{"type":"text","text":"exit 1"}],"is_error":true}]}}"#,
                RESULT,
            ],
        );
        assert_eq!(events[1], done("t1", true));
        assert_eq!(
            events[2],
            ResponseEvent::ToolError(ToolError {
                tool_id: "t1".into(),
                tool_name: Some("Bash".into()),
                message: "exit 1".into(),
            })
        );
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_tool_error_falls_back_to_top_level_result() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Edit","input":{}}]}}"#,
                r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","is_error":true}]},"tool_use_result":"Error: file not found"}"#,
            ],
        );
        assert!(events.contains(&ResponseEvent::ToolError(ToolError {
            tool_id: "t1".into(),
            tool_name: Some("Edit".into()),
            message: "Error: file not found".into(),
        })));
    }

    #[test]
    fn test_successful_tool_result_keeps_tool_pending() {
        let mut d = decoder();
        run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Read","input":{}}]}}"#,
                r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#,
            ],
        );
        assert_eq!(d.pending_tools(), ["t1".to_string()]);
    }

    #[test]
    fn test_todo_write_emits_normalized_list() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"TodoWrite","input":{"todos":[{"content":"Plan","status":"completed","activeForm":"Planning"},{"content":"Build","status":"in_progress","activeForm":"Building"},{"content":"Ship","status":"pending","activeForm":"Shipping"}]}}]}}"#,
                RESULT,
            ],
        );
        let todo_updates: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ResponseEvent::TodoUpdate(todos) => Some(todos),
                _ => None,
            })
            .collect();
        assert_eq!(todo_updates.len(), 1);
        let todos = todo_updates[0];
        assert_eq!(todos.len(), 3);
        assert_eq!(todos[0].status, "completed");
        assert_eq!(todos[1].status, "in_progress");
        assert_eq!(todos[1].active_form, "Building");
        assert_eq!(todos[2].content, "Ship");
        // Progress update precedes the tool notification
        assert!(matches!(events[0], ResponseEvent::TodoUpdate(_)));
        assert!(matches!(&events[1], ResponseEvent::ToolUse(t) if t.name == "TodoWrite"));
    }

    #[test]
    fn test_permission_denials_before_final_text() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"I could not write"}]}}"#,
                r#"{"type":"result","subtype":"success","permission_denials":[{"tool_name":"Write","tool_use_id":"t9","tool_input":{}}]}"#,
            ],
        );
        assert!(matches!(&events[0], ResponseEvent::PermissionDenial(d) if d[0].tool_name() == "Write"));
        assert_eq!(events[1], text("I could not write", true));
    }

    #[test]
    fn test_malformed_result_still_ends_exchange() {
        let mut d = decoder();
        let (events, outcome) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"done"}]}}"#,
                r#"{"type":"result","subtype":"success","permission_denials":[{"tool_use_id":"t9","tool_input":{}}]}"#,
            ],
        );
        assert_eq!(outcome, Some(ExchangeOutcome::Completed));
        assert!(matches!(&events[0], ResponseEvent::PermissionDenial(d) if d[0].tool_name() == "unknown"));
        assert_eq!(events[1], text("done", true));

        let (events, outcome) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"again"}]}}"#,
                r#"{"type":"result","subtype":"success","is_error":"no","result":42}"#,
            ],
        );
        assert_eq!(outcome, Some(ExchangeOutcome::Completed));
        assert_eq!(events, vec![text("again", true)]);
        assert!(!d.has_buffered_text());
    }

    #[test]
    fn test_input_request_suspends_and_keeps_waiting_tool() {
        let mut d = decoder();
        let (events, outcome) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Which one?"},{"type":"tool_use","id":"t1","name":"Read","input":{}},{"type":"tool_use","id":"t2","name":"AskUserQuestion","input":{}}]}}"#,
                r#"{"type":"input_request","tool_use_id":"t2"}"#,
                RESULT,
            ],
        );
        assert_eq!(
            outcome,
            Some(ExchangeOutcome::AwaitingInput {
                tool_use_id: "t2".into()
            })
        );
        assert_eq!(events.last(), Some(&ResponseEvent::InputRequest("t2".into())));
        assert!(events.contains(&text("Which one?", false)));
        assert!(!events.iter().any(|e| matches!(e, ResponseEvent::Text { is_final: true, .. })));

        // The next exchange completes the suspended tool
        let (events, outcome) = run(&mut d, &[RESULT]);
        assert_eq!(outcome, Some(ExchangeOutcome::Completed));
        assert_eq!(events, vec![done("t2", false)]);
    }

    #[test]
    fn test_input_request_with_pending_tools() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t2","name":"AskUserQuestion","input":{}}]}}"#,
                r#"{"type":"input_request","tool_use_id":"t2"}"#,
            ],
        );
        assert!(!events.contains(&done("t2", false)));
        assert_eq!(d.pending_tools(), ["t2".to_string()]);
    }

    #[test]
    fn test_unknown_and_invalid_lines_are_skipped() {
        let mut d = decoder();
        let (events, outcome) = run(
            &mut d,
            &[
                "not json at all",
                r#"{"type":"stream_event","event":{"delta":"x"}}"#,
                r#"{"no_type":true}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"still fine"}]}}"#,
                RESULT,
            ],
        );
        assert_eq!(outcome, Some(ExchangeOutcome::Completed));
        assert_eq!(events, vec![text("still fine", true)]);
    }

    #[test]
    fn test_init_captured_once() {
        let mut d = decoder();
        run(
            &mut d,
            &[
                INIT,
                r#"{"type":"system","subtype":"init","session_id":"sess-2","slash_commands":[]}"#,
            ],
        );
        assert_eq!(d.session_id().unwrap().as_str(), "sess-1");
        assert_eq!(d.slash_commands().len(), 1);
    }

    #[test]
    fn test_every_pending_tool_completed_once() {
        let mut d = decoder();
        let (events, _) = run(
            &mut d,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"a","name":"Read","input":{}},{"type":"tool_use","id":"b","name":"Grep","input":{}}]}}"#,
                r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"b","content":"bad","is_error":true}]}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"c","name":"Bash","input":{}}]}}"#,
                RESULT,
            ],
        );
        for id in ["a", "b", "c"] {
            let completions = events
                .iter()
                .filter(|e| matches!(e, ResponseEvent::ToolResult(r) if r.tool_id == id))
                .count();
            assert_eq!(completions, 1, "tool {id}");
        }
        assert!(d.pending_tools().is_empty());
    }
}
