//! Response callback surface
//!
//! [`ResponseHandler`] is the seam between the decoder and whatever presents
//! the conversation (chat bot, console, tests).

use crate::types::events::{PermissionDenial, Todo, ToolError, ToolResult, ToolUse};

/// Receives the ordered semantic events of one exchange
///
/// Every method has a no-op default so implementors only override what they
/// render. Calls arrive in presentation order: text that precedes a tool use
/// is delivered before that tool use, and the final text comes last.
pub trait ResponseHandler: Send {
    /// Assistant text; `is_final` marks the last text of a completed exchange
    fn on_text(&mut self, _text: &str, _is_final: bool) {}

    /// A tool started
    fn on_tool_use(&mut self, _tool: &ToolUse) {}

    /// A tool finished, successfully or not
    fn on_tool_result(&mut self, _result: &ToolResult) {}

    /// A tool reported an error
    fn on_tool_error(&mut self, _error: &ToolError) {}

    /// The assistant rewrote its todo list
    fn on_todo_update(&mut self, _todos: &[Todo]) {}

    /// The agent is waiting for a human answer for this tool
    fn on_input_request(&mut self, _tool_use_id: &str) {}

    /// The agent refused some tool uses during the exchange
    fn on_permission_denial(&mut self, _denials: &[PermissionDenial]) {}
}

/// One recorded callback invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// `on_text`
    Text {
        /// Text
        text: String,
        /// Final flag
        is_final: bool,
    },
    /// `on_tool_use`
    ToolUse(ToolUse),
    /// `on_tool_result`
    ToolResult(ToolResult),
    /// `on_tool_error`
    ToolError(ToolError),
    /// `on_todo_update`
    TodoUpdate(Vec<Todo>),
    /// `on_input_request`
    InputRequest(String),
    /// `on_permission_denial`
    PermissionDenial(Vec<PermissionDenial>),
}

/// Records every callback in arrival order
impl ResponseHandler for Vec<ResponseEvent> {
    fn on_text(&mut self, text: &str, is_final: bool) {
        self.push(ResponseEvent::Text {
            text: text.to_string(),
            is_final,
        });
    }

    fn on_tool_use(&mut self, tool: &ToolUse) {
        self.push(ResponseEvent::ToolUse(tool.clone()));
    }

    fn on_tool_result(&mut self, result: &ToolResult) {
        self.push(ResponseEvent::ToolResult(result.clone()));
    }

    fn on_tool_error(&mut self, error: &ToolError) {
        self.push(ResponseEvent::ToolError(error.clone()));
    }

    fn on_todo_update(&mut self, todos: &[Todo]) {
        self.push(ResponseEvent::TodoUpdate(todos.to_vec()));
    }

    fn on_input_request(&mut self, tool_use_id: &str) {
        self.push(ResponseEvent::InputRequest(tool_use_id.to_string()));
    }

    fn on_permission_denial(&mut self, denials: &[PermissionDenial]) {
        self.push(ResponseEvent::PermissionDenial(denials.to_vec()));
    }
}
