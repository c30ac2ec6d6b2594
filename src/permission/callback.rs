//! Loopback HTTP leg of the permission bridge
//!
//! The supervisor listens on `127.0.0.1:<ephemeral>` for `POST /permission`.
//! The RPC helper, a separate process spawned by the agent, posts each
//! request there and blocks until the decision comes back.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::broker::PermissionBroker;
use crate::error::{ClaudeError, Result};
use crate::types::identifiers::ConversationKey;
use crate::types::options::DEFAULT_PERMISSION_TIMEOUT;
use crate::types::permissions::{PermissionDecision, PermissionRequest};

/// Env var carrying the callback port into the helper
pub const ENV_CALLBACK_PORT: &str = "KODEGEN_RELAY_CALLBACK_PORT";

/// Env var carrying the conversation key into the helper
pub const ENV_CHAT_ID: &str = "KODEGEN_RELAY_CHAT_ID";

/// Route served by [`CallbackServer`]
pub const PERMISSION_PATH: &str = "/permission";

/// Slack on top of the broker's wait budget before the helper gives up
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

// ============================================================================
// SERVER
// ============================================================================

#[derive(Clone)]
struct CallbackState {
    broker: Arc<PermissionBroker>,
    shutdown: CancellationToken,
}

/// Supervisor-side endpoint that feeds requests to the broker
pub struct CallbackServer {
    port: u16,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind an ephemeral loopback port and start serving
    ///
    /// # Errors
    /// Returns error if the listener cannot be bound
    pub async fn start(broker: Arc<PermissionBroker>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let shutdown = CancellationToken::new();

        let app = Router::new()
            .route(PERMISSION_PATH, post(permission_handler))
            .with_state(CallbackState {
                broker,
                shutdown: shutdown.clone(),
            });

        let stop = shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await;
            if let Err(e) = served {
                log::error!("Permission callback server failed: {}", e);
            }
        });

        log::info!("Permission callback listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            shutdown,
            task,
        })
    }

    /// Bound port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Deny in-flight requests and stop serving
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            log::warn!("Permission callback task ended abnormally: {}", e);
        }
    }
}

/// A dropped connection drops this future, which clears the pending entry
async fn permission_handler(
    State(state): State<CallbackState>,
    Json(request): Json<PermissionRequest>,
) -> Json<PermissionDecision> {
    log::debug!(
        "[{}] Permission callback for {}",
        request.chat_id,
        request.tool_name
    );
    Json(state.broker.request(request, &state.shutdown).await)
}

// ============================================================================
// CLIENT
// ============================================================================

/// Helper-side client that forwards a tool's request to the supervisor
#[derive(Debug, Clone)]
pub struct CallbackClient {
    url: String,
    key: ConversationKey,
    client: reqwest::Client,
}

impl CallbackClient {
    /// Create a client for `127.0.0.1:<port>`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(port: u16, key: ConversationKey) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_PERMISSION_TIMEOUT + CLIENT_TIMEOUT_SLACK)
            .build()?;
        Ok(Self {
            url: format!("http://127.0.0.1:{port}{PERMISSION_PATH}"),
            key,
            client,
        })
    }

    /// Create a client from the bridge env vars
    ///
    /// # Errors
    /// Returns `InvalidConfig` if either var is missing or the port is bad
    pub fn from_env() -> Result<Self> {
        let port = std::env::var(ENV_CALLBACK_PORT)
            .map_err(|_| ClaudeError::invalid_config(format!("{ENV_CALLBACK_PORT} not set")))?;
        let port: u16 = port.trim().parse().map_err(|_| {
            ClaudeError::invalid_config(format!("{ENV_CALLBACK_PORT} is not a port: {port}"))
        })?;
        let key = std::env::var(ENV_CHAT_ID)
            .map_err(|_| ClaudeError::invalid_config(format!("{ENV_CHAT_ID} not set")))?;
        Self::new(port, ConversationKey::new(key))
    }

    /// Conversation this client asks for
    #[must_use]
    pub const fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Post one request and wait for the decision
    ///
    /// # Errors
    /// Returns `Http` on connection failure or any non-200 reply
    pub async fn request_permission(
        &self,
        tool_name: &str,
        input: Value,
    ) -> Result<PermissionDecision> {
        let body = PermissionRequest {
            chat_id: self.key.clone(),
            tool_name: tool_name.to_string(),
            input,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return Err(ClaudeError::http(format!("callback returned {status}: {text}")));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_url() {
        let client = CallbackClient::new(4242, ConversationKey::from("9")).unwrap();
        assert_eq!(client.url, "http://127.0.0.1:4242/permission");
        assert_eq!(client.key().as_str(), "9");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        // Bind then drop so the port is very likely closed
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = CallbackClient::new(port, ConversationKey::from("9")).unwrap();
        let err = client
            .request_permission("Bash", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaudeError::Http(_)));
    }
}
