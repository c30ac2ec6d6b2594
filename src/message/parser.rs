//! Line parser for the stream-json protocol

use serde_json::Value;

use crate::error::{ClaudeError, Result};
use crate::types::events::PermissionDenial;
use crate::types::identifiers::SessionId;
use crate::types::messages::StreamEvent;

/// Parse one stdout line into a typed event
///
/// # Arguments
/// * `line` - Raw line from CLI output, without the trailing newline
///
/// # Returns
/// Parsed event; unknown `type` values yield [`StreamEvent::Unrecognized`]
///
/// # Errors
/// Returns `ClaudeError::MessageParse` if the line is not a JSON object with a
/// `type` discriminator, or a known event kind carries fields of the wrong shape
pub fn parse_event(line: &str) -> Result<StreamEvent> {
    serde_json::from_str(line).map_err(|e| {
        ClaudeError::message_parse(
            format!("Failed to parse event: {e}"),
            Some(line.to_string()),
        )
    })
}

/// Rebuild a `result` event whose fields did not match the typed shape
///
/// A `result` line always ends its exchange, so fields of the wrong shape
/// fall back to their defaults instead of dropping the whole event.
#[must_use]
pub fn salvage_result(line: &str) -> Option<StreamEvent> {
    let raw: Value = serde_json::from_str(line).ok()?;
    if raw.get("type").and_then(Value::as_str) != Some("result") {
        return None;
    }

    let text = |name: &str| raw.get(name).and_then(Value::as_str).map(str::to_string);
    let permission_denials = raw
        .get("permission_denials")
        .and_then(Value::as_array)
        .map(|denials| {
            denials
                .iter()
                .map(|d| {
                    serde_json::from_value(d.clone())
                        .unwrap_or_else(|_| PermissionDenial::Other(d.clone()))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(StreamEvent::Result {
        subtype: text("subtype").unwrap_or_default(),
        is_error: raw.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        permission_denials,
        session_id: text("session_id").map(SessionId::new),
        result: raw.get("result").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::messages::{ContentBlock, UserContent, UserContentBlock};

    #[test]
    fn test_parse_init() {
        let event = parse_event(
            r#"{"type":"system","subtype":"init","session_id":"abc","slash_commands":["compact","review"],"tools":[]}"#,
        )
        .unwrap();
        match event {
            StreamEvent::System {
                subtype,
                session_id,
                slash_commands,
            } => {
                assert_eq!(subtype, "init");
                assert_eq!(session_id.unwrap().as_str(), "abc");
                assert_eq!(slash_commands, vec!["compact", "review"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_assistant_blocks() {
        let event = parse_event(
            r#"{"type":"assistant","message":{"model":"m","content":[{"type":"text","text":"hi"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}},{"type":"server_tool_use","id":"x"}]}}"#,
        )
        .unwrap();
        let StreamEvent::Assistant { message } = event else {
            panic!("expected assistant event");
        };
        assert_eq!(message.content.len(), 3);
        assert!(matches!(&message.content[0], ContentBlock::Text { text } if text == "hi"));
        assert!(matches!(&message.content[1], ContentBlock::ToolUse { name, .. } if name == "Bash"));
        assert!(matches!(message.content[2], ContentBlock::Other));
    }

    #[test]
    fn test_parse_user_tool_result() {
        let event = parse_event(
            r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"boom","is_error":true}]},"tool_use_result":"Error: boom"}"#,
        )
        .unwrap();
        let StreamEvent::User {
            message,
            tool_use_result,
        } = event
        else {
            panic!("expected user event");
        };
        let Some(UserContent::Blocks(blocks)) = message.content else {
            panic!("expected block content");
        };
        assert!(matches!(
            &blocks[0],
            UserContentBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "t1"
        ));
        assert_eq!(tool_use_result.unwrap(), "Error: boom");
    }

    #[test]
    fn test_parse_result_with_mixed_denials() {
        let event = parse_event(
            r#"{"type":"result","subtype":"success","is_error":false,"session_id":"abc","permission_denials":["Write",{"tool_name":"Bash","tool_use_id":"t2","tool_input":{}}]}"#,
        )
        .unwrap();
        let StreamEvent::Result {
            permission_denials, ..
        } = event
        else {
            panic!("expected result event");
        };
        assert_eq!(permission_denials.len(), 2);
        assert_eq!(permission_denials[0], PermissionDenial::Named("Write".into()));
        assert_eq!(permission_denials[1].tool_name(), "Bash");
    }

    #[test]
    fn test_result_tolerates_odd_field_shapes() {
        let event = parse_event(
            r#"{"type":"result","subtype":"success","result":{"text":"done"},"permission_denials":[{"tool_use_id":"t9","tool_input":{}}]}"#,
        )
        .unwrap();
        let StreamEvent::Result {
            permission_denials,
            result,
            ..
        } = event
        else {
            panic!("expected result event");
        };
        assert!(matches!(permission_denials[0], PermissionDenial::Other(_)));
        assert_eq!(permission_denials[0].tool_name(), "unknown");
        assert_eq!(result.unwrap()["text"], "done");
    }

    #[test]
    fn test_salvage_result_with_wrong_field_types() {
        let line = r#"{"type":"result","subtype":7,"is_error":"yes","session_id":"abc","permission_denials":["Write"]}"#;
        assert!(parse_event(line).is_err());

        let Some(StreamEvent::Result {
            subtype,
            is_error,
            permission_denials,
            session_id,
            ..
        }) = salvage_result(line)
        else {
            panic!("expected salvaged result");
        };
        assert_eq!(subtype, "");
        assert!(!is_error);
        assert_eq!(permission_denials, vec![PermissionDenial::Named("Write".into())]);
        assert_eq!(session_id.unwrap().as_str(), "abc");

        assert!(salvage_result(r#"{"type":"assistant","message":5}"#).is_none());
        assert!(salvage_result("not json").is_none());
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let event = parse_event(r#"{"type":"stream_event","event":{}}"#).unwrap();
        assert!(matches!(event, StreamEvent::Unrecognized));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_event("not json").unwrap_err();
        assert!(matches!(err, ClaudeError::MessageParse { line: Some(_), .. }));
    }
}
