//! Supervisor-side permission broker
//!
//! Parks a tool call that needs human approval until a decision arrives, the
//! request is cancelled, or the wait budget runs out. Every path ends in a
//! decision, so a blocked tool call is never left hanging.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::identifiers::{ConversationKey, RequestId};
use crate::types::options::DEFAULT_PERMISSION_TIMEOUT;
use crate::types::permissions::{PermissionDecision, PermissionPrompt, PermissionRequest};

/// Renders a permission prompt to a human
///
/// Returning an error (e.g. the chat rejected the message) denies the request.
pub type PermissionPrompter =
    Arc<dyn Fn(PermissionPrompt) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Deny message when no prompter is registered
pub const NO_HANDLER_MESSAGE: &str = "No permission handler configured";

struct PendingPermission {
    prompt: PermissionPrompt,
    responder: oneshot::Sender<PermissionDecision>,
}

/// Removes the pending entry when the waiting request goes away
struct PendingGuard<'a> {
    broker: &'a PermissionBroker,
    key: ConversationKey,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.broker.pending.lock();
        if pending
            .get(&self.key)
            .is_some_and(|p| p.prompt.request_id == self.request_id)
        {
            pending.remove(&self.key);
        }
    }
}

/// At most one outstanding permission request per conversation
pub struct PermissionBroker {
    pending: Mutex<HashMap<ConversationKey, PendingPermission>>,
    prompter: RwLock<Option<PermissionPrompter>>,
    timeout: Duration,
}

impl Default for PermissionBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PERMISSION_TIMEOUT)
    }
}

impl PermissionBroker {
    /// Create a broker with the given wait budget and no prompter
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            prompter: RwLock::new(None),
            timeout,
        }
    }

    /// Register the function that shows prompts to humans
    pub fn set_prompter(&self, prompter: PermissionPrompter) {
        *self.prompter.write() = Some(prompter);
    }

    /// Wait budget for one request
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask a human to decide on a tool call
    ///
    /// A newer request for the same conversation supersedes and denies an
    /// older one still waiting. Allow decisions without `updatedInput` carry
    /// the original input.
    pub async fn request(
        &self,
        request: PermissionRequest,
        cancel: &CancellationToken,
    ) -> PermissionDecision {
        let PermissionRequest {
            chat_id: key,
            tool_name,
            input,
        } = request;

        let Some(prompter) = self.prompter.read().clone() else {
            log::warn!("[{}] Permission request for {} with no handler", key, tool_name);
            return PermissionDecision::deny(NO_HANDLER_MESSAGE);
        };

        let prompt = PermissionPrompt {
            request_id: RequestId::generate(),
            key: key.clone(),
            tool_name,
            input,
        };
        let (tx, mut rx) = oneshot::channel();

        let superseded = self.pending.lock().insert(
            key.clone(),
            PendingPermission {
                prompt: prompt.clone(),
                responder: tx,
            },
        );
        if let Some(old) = superseded {
            log::info!(
                "[{}] Permission request {} superseded by {}",
                key,
                old.prompt.request_id,
                prompt.request_id
            );
            let _ = old.responder.send(PermissionDecision::deny(
                "Superseded by a newer permission request",
            ));
        }

        let _guard = PendingGuard {
            broker: self,
            key: key.clone(),
            request_id: prompt.request_id.clone(),
        };

        log::info!(
            "[{}] Waiting for permission: {} ({})",
            key,
            prompt.tool_name,
            prompt.request_id
        );

        let input = prompt.input.clone();
        let deadline = tokio::time::Instant::now() + self.timeout;

        // Rendering the prompt counts against the same budget as the wait
        tokio::select! {
            shown = prompter(prompt) => {
                if let Err(e) = shown {
                    log::warn!("[{}] Failed to show permission prompt: {}", key, e);
                    return PermissionDecision::deny(format!("Could not ask for permission: {e}"));
                }
            }
            decision = &mut rx => return settled(decision, input),
            () = cancel.cancelled() => return cancelled(&key),
            () = tokio::time::sleep_until(deadline) => return self.timed_out(&key),
        }

        tokio::select! {
            decision = rx => settled(decision, input),
            () = cancel.cancelled() => cancelled(&key),
            () = tokio::time::sleep_until(deadline) => self.timed_out(&key),
        }
    }

    fn timed_out(&self, key: &ConversationKey) -> PermissionDecision {
        log::info!("[{}] Permission request timed out", key);
        PermissionDecision::deny(format!(
            "Permission request timed out after {}s",
            self.timeout.as_secs()
        ))
    }

    /// Answer the pending request of a conversation
    ///
    /// Returns `false` when nothing is pending (already answered, timed out,
    /// or never asked).
    pub fn respond(&self, key: &ConversationKey, decision: PermissionDecision) -> bool {
        let Some(pending) = self.pending.lock().remove(key) else {
            log::debug!("[{}] No pending permission to answer", key);
            return false;
        };
        pending.responder.send(decision).is_ok()
    }

    /// Answer a specific request; stale request ids are ignored
    pub fn respond_to(
        &self,
        key: &ConversationKey,
        request_id: &RequestId,
        decision: PermissionDecision,
    ) -> bool {
        let pending = {
            let mut map = self.pending.lock();
            if !map
                .get(key)
                .is_some_and(|p| &p.prompt.request_id == request_id)
            {
                log::debug!("[{}] Ignoring answer for stale request {}", key, request_id);
                return false;
            }
            map.remove(key)
        };
        pending.is_some_and(|p| p.responder.send(decision).is_ok())
    }

    /// The request currently waiting in a conversation
    #[must_use]
    pub fn pending(&self, key: &ConversationKey) -> Option<PermissionPrompt> {
        self.pending.lock().get(key).map(|p| p.prompt.clone())
    }
}

fn settled(
    decision: std::result::Result<PermissionDecision, oneshot::error::RecvError>,
    input: serde_json::Value,
) -> PermissionDecision {
    match decision {
        Ok(decision) => with_original_input(decision, input),
        Err(_) => PermissionDecision::deny("Permission request was dropped"),
    }
}

fn cancelled(key: &ConversationKey) -> PermissionDecision {
    log::info!("[{}] Permission request cancelled", key);
    PermissionDecision::deny("Permission request cancelled")
}

fn with_original_input(
    mut decision: PermissionDecision,
    input: serde_json::Value,
) -> PermissionDecision {
    if decision.behavior.is_allowed() && decision.updated_input.is_none() {
        decision.updated_input = Some(input);
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClaudeError;
    use crate::types::permissions::PermissionBehavior;
    use futures::FutureExt;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn request(key: &str) -> PermissionRequest {
        PermissionRequest {
            chat_id: ConversationKey::from(key),
            tool_name: "Bash".to_string(),
            input: json!({"command": "ls"}),
        }
    }

    /// Prompter that forwards prompts to a channel
    fn channel_prompter() -> (PermissionPrompter, mpsc::UnboundedReceiver<PermissionPrompt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let prompter: PermissionPrompter = Arc::new(move |prompt: PermissionPrompt| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(prompt);
                Ok::<(), ClaudeError>(())
            }
            .boxed()
        });
        (prompter, rx)
    }

    #[tokio::test]
    async fn test_no_handler_denies() {
        let broker = PermissionBroker::new(Duration::from_secs(5));
        let decision = broker
            .request(request("1"), &CancellationToken::new())
            .await;
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert_eq!(decision.message.as_deref(), Some(NO_HANDLER_MESSAGE));
    }

    #[tokio::test]
    async fn test_allow_fills_original_input() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(5)));
        let (prompter, mut prompts) = channel_prompter();
        broker.set_prompter(prompter);

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.request(request("1"), &CancellationToken::new()).await })
        };

        let prompt = prompts.recv().await.unwrap();
        assert_eq!(prompt.tool_name, "Bash");
        assert!(broker.pending(&prompt.key).is_some());
        assert!(broker.respond(&prompt.key, PermissionDecision::allow()));

        let decision = waiter.await.unwrap();
        assert_eq!(decision.behavior, PermissionBehavior::Allow);
        assert_eq!(decision.updated_input, Some(json!({"command": "ls"})));
        assert!(broker.pending(&prompt.key).is_none());
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(5)));
        let (prompter, mut prompts) = channel_prompter();
        broker.set_prompter(prompter);

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.request(request("1"), &CancellationToken::new()).await })
        };
        let prompt = prompts.recv().await.unwrap();

        assert!(broker.respond_to(&prompt.key, &prompt.request_id, PermissionDecision::deny("no")));
        assert!(!broker.respond(&prompt.key, PermissionDecision::allow()));

        let decision = waiter.await.unwrap();
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert_eq!(decision.message.as_deref(), Some("no"));
    }

    #[tokio::test]
    async fn test_timeout_denies_and_clears() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_millis(50)));
        let (prompter, mut prompts) = channel_prompter();
        broker.set_prompter(prompter);

        let key = ConversationKey::from("1");
        let decision = broker
            .request(request("1"), &CancellationToken::new())
            .await;
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert!(decision.message.unwrap().contains("timed out"));

        // State is cleared and a late answer is a no-op
        assert!(broker.pending(&key).is_none());
        let prompt = prompts.recv().await.unwrap();
        assert!(!broker.respond_to(&key, &prompt.request_id, PermissionDecision::allow()));
        assert!(!broker.respond(&key, PermissionDecision::allow()));
    }

    #[tokio::test]
    async fn test_cancel_denies() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(30)));
        let (prompter, mut prompts) = channel_prompter();
        broker.set_prompter(prompter);

        let cancel = CancellationToken::new();
        let waiter = {
            let broker = Arc::clone(&broker);
            let cancel = cancel.clone();
            tokio::spawn(async move { broker.request(request("1"), &cancel).await })
        };
        prompts.recv().await.unwrap();
        cancel.cancel();

        let decision = waiter.await.unwrap();
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert!(decision.message.unwrap().contains("cancelled"));
        assert!(broker.pending(&ConversationKey::from("1")).is_none());
    }

    #[tokio::test]
    async fn test_prompter_failure_denies() {
        let broker = PermissionBroker::new(Duration::from_secs(30));
        broker.set_prompter(Arc::new(|_prompt: PermissionPrompt| {
            async { Err::<(), _>(ClaudeError::http("chat rejected the message")) }.boxed()
        }));

        let decision = broker
            .request(request("1"), &CancellationToken::new())
            .await;
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert!(decision.message.unwrap().contains("chat rejected"));
        assert!(broker.pending(&ConversationKey::from("1")).is_none());
    }

    #[tokio::test]
    async fn test_stalled_prompter_times_out() {
        let broker = PermissionBroker::new(Duration::from_millis(50));
        broker.set_prompter(Arc::new(|_prompt: PermissionPrompt| {
            futures::future::pending::<Result<()>>().boxed()
        }));

        let decision = tokio::time::timeout(
            Duration::from_secs(2),
            broker.request(request("1"), &CancellationToken::new()),
        )
        .await
        .expect("stalled prompter must not block the decision");
        assert_eq!(decision.behavior, PermissionBehavior::Deny);
        assert!(decision.message.unwrap().contains("timed out"));
        assert!(broker.pending(&ConversationKey::from("1")).is_none());
    }

    #[tokio::test]
    async fn test_stalled_prompter_still_takes_answers() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(30)));
        broker.set_prompter(Arc::new(|_prompt: PermissionPrompt| {
            futures::future::pending::<Result<()>>().boxed()
        }));

        let cancel = CancellationToken::new();
        let waiter = {
            let broker = Arc::clone(&broker);
            let cancel = cancel.clone();
            tokio::spawn(async move { broker.request(request("1"), &cancel).await })
        };

        let key = ConversationKey::from("1");
        while broker.pending(&key).is_none() {
            tokio::task::yield_now().await;
        }
        assert!(broker.respond(&key, PermissionDecision::deny("answered anyway")));

        let decision = waiter.await.unwrap();
        assert_eq!(decision.message.as_deref(), Some("answered anyway"));
    }

    #[tokio::test]
    async fn test_stalled_prompter_is_cancellable() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(30)));
        broker.set_prompter(Arc::new(|_prompt: PermissionPrompt| {
            futures::future::pending::<Result<()>>().boxed()
        }));

        let cancel = CancellationToken::new();
        let waiter = {
            let broker = Arc::clone(&broker);
            let cancel = cancel.clone();
            tokio::spawn(async move { broker.request(request("1"), &cancel).await })
        };
        let key = ConversationKey::from("1");
        while broker.pending(&key).is_none() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        let decision = waiter.await.unwrap();
        assert!(decision.message.unwrap().contains("cancelled"));
        assert!(broker.pending(&key).is_none());
    }

    #[tokio::test]
    async fn test_newer_request_supersedes() {
        let broker = Arc::new(PermissionBroker::new(Duration::from_secs(5)));
        let (prompter, mut prompts) = channel_prompter();
        broker.set_prompter(prompter);

        let first = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.request(request("1"), &CancellationToken::new()).await })
        };
        let first_prompt = prompts.recv().await.unwrap();

        let second = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.request(request("1"), &CancellationToken::new()).await })
        };
        let second_prompt = prompts.recv().await.unwrap();
        assert_ne!(first_prompt.request_id, second_prompt.request_id);

        let first = first.await.unwrap();
        assert_eq!(first.behavior, PermissionBehavior::Deny);

        assert_eq!(
            broker.pending(&second_prompt.key).map(|p| p.request_id),
            Some(second_prompt.request_id.clone())
        );
        assert!(broker.respond(&second_prompt.key, PermissionDecision::allow_always()));
        assert_eq!(second.await.unwrap().behavior, PermissionBehavior::AllowAlways);
    }
}
