//! Stdio JSON-RPC helper the agent calls for permission decisions
//!
//! The agent spawns this binary with `--mcp-server` and talks JSON-RPC 2.0
//! over its stdin/stdout, one object per line. The single tool,
//! `prompt_permission`, forwards to a [`PermissionSource`] (the loopback
//! callback in production) and always answers with a decision, so a broken
//! bridge turns into a denial instead of a hung tool call.

use futures::StreamExt;
use rmcp::model::{CallToolResult, Content};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, LinesCodec};

use super::broker::NO_HANDLER_MESSAGE;
use super::callback::CallbackClient;
use crate::error::Result;
use crate::types::permissions::{PermissionDecision, PromptPermissionArgs};

/// Tool name exposed over RPC
pub const PROMPT_TOOL: &str = "prompt_permission";

/// Protocol version answered when the client does not name one
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const SERVER_NAME: &str = "kodegen-claude-relay-permissions";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
}

/// A JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Mirrors the request id
    pub id: Value,
}

/// A JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
}

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Decision source
// ---------------------------------------------------------------------------

/// Where the helper gets decisions from
pub trait PermissionSource: Send + Sync {
    /// Ask for a decision on one tool call
    fn request_permission(
        &self,
        tool_name: &str,
        input: Value,
    ) -> impl Future<Output = Result<PermissionDecision>> + Send;
}

impl PermissionSource for CallbackClient {
    fn request_permission(
        &self,
        tool_name: &str,
        input: Value,
    ) -> impl Future<Output = Result<PermissionDecision>> + Send {
        Self::request_permission(self, tool_name, input)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Line-oriented JSON-RPC server exposing `prompt_permission`
pub struct PermissionRpcServer<S> {
    source: Option<S>,
}

impl<S: PermissionSource> PermissionRpcServer<S> {
    /// Serve decisions from `source`
    pub const fn new(source: S) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// Serve without a source; every call is denied
    pub const fn unconfigured() -> Self {
        Self { source: None }
    }

    /// Run until `reader` reaches EOF
    ///
    /// # Errors
    /// Returns error only if writing a response fails
    pub async fn serve(
        &self,
        reader: impl AsyncRead + Unpin,
        mut writer: impl AsyncWrite + Unpin,
    ) -> Result<()> {
        let mut lines = FramedRead::new(reader, LinesCodec::new());

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Permission RPC input error: {}", e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => {
                    log::debug!("Permission RPC parse error: {}", e);
                    let response = JsonRpcResponse::failure(Value::Null, PARSE_ERROR, "Parse error");
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            // Notifications get no reply
            let Some(id) = request.id else {
                log::debug!("Permission RPC notification: {}", request.method);
                continue;
            };

            let response = match request.method.as_str() {
                "initialize" => Self::handle_initialize(id, request.params.as_ref()),
                "tools/list" => Self::handle_tools_list(id),
                "tools/call" => self.handle_tools_call(id, request.params).await,
                "ping" => JsonRpcResponse::success(id, json!({})),
                other => JsonRpcResponse::failure(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                ),
            };

            write_response(&mut writer, &response).await?;
        }

        log::debug!("Permission RPC input closed");
        Ok(())
    }

    fn handle_initialize(id: Value, params: Option<&Value>) -> JsonRpcResponse {
        let version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": version,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": crate::VERSION,
                },
            }),
        )
    }

    fn handle_tools_list(id: Value) -> JsonRpcResponse {
        let schema = match serde_json::to_value(schemars::schema_for!(PromptPermissionArgs)) {
            Ok(schema) => schema,
            Err(e) => {
                return JsonRpcResponse::failure(id, INTERNAL_ERROR, format!("Schema error: {e}"));
            }
        };

        JsonRpcResponse::success(
            id,
            json!({
                "tools": [{
                    "name": PROMPT_TOOL,
                    "description": "Request permission from the user for a tool operation",
                    "inputSchema": schema,
                }]
            }),
        )
    }

    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or(Value::Null);

        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        if name != PROMPT_TOOL {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {name}"));
        }

        let args: PromptPermissionArgs = match params
            .get("arguments")
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(args)) => args,
            Some(Err(e)) => {
                return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Invalid params: {e}"));
            }
            None => return JsonRpcResponse::failure(id, INVALID_PARAMS, "Invalid params"),
        };

        let decision = self.decide(args).await;
        let text = match serde_json::to_string(&decision) {
            Ok(text) => text,
            Err(e) => {
                return JsonRpcResponse::failure(id, INTERNAL_ERROR, format!("Encode error: {e}"));
            }
        };

        match serde_json::to_value(CallToolResult::success(vec![Content::text(text)])) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, format!("Encode error: {e}")),
        }
    }

    async fn decide(&self, args: PromptPermissionArgs) -> PermissionDecision {
        let Some(source) = &self.source else {
            return PermissionDecision::deny(NO_HANDLER_MESSAGE);
        };

        log::info!("Permission requested for {}", args.tool_name);
        match source.request_permission(&args.tool_name, args.input).await {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("Permission request for {} failed: {}", args.tool_name, e);
                PermissionDecision::deny(format!("Error: {e}"))
            }
        }
    }
}

async fn write_response(
    writer: &mut (impl AsyncWrite + Unpin),
    response: &JsonRpcResponse,
) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
