//! Session registry: one live agent per conversation key
//!
//! Owns creation, reuse and eviction of [`AgentSession`]s and the
//! resume-on-restart policy backed by the [`SessionStore`].

use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::permission::BridgeConfig;
use crate::session::{AgentSession, ResponseHandler};
use crate::store::SessionStore;
use crate::transport::LaunchParams;
use crate::types::events::ExchangeOutcome;
use crate::types::identifiers::{ConversationKey, SessionId};
use crate::types::options::RelayOptions;

/// Attempts per `send`, counting the first
const MAX_ATTEMPTS: u32 = 2;

type SessionMap = HashMap<ConversationKey, Arc<AgentSession>>;

/// Keyed pool of agent sessions
///
/// Constructed once at startup and shared by reference. The map lock is only
/// held for lookups and spawns; exchanges run on the session's own lock, so
/// one conversation's I/O never blocks another's lookup.
pub struct SessionRegistry {
    sessions: RwLock<SessionMap>,
    options: RelayOptions,
    store: Arc<SessionStore>,
    bridge: Option<Arc<BridgeConfig>>,
    spawn_count: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry that resumes from and persists to `store`
    #[must_use]
    pub fn new(options: RelayOptions, store: Arc<SessionStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            options,
            store,
            bridge: None,
            spawn_count: AtomicU64::new(0),
        }
    }

    /// Route tool permission prompts through the bridge
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<BridgeConfig>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Backing store
    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Live session for `key`, if any
    pub async fn get(&self, key: &ConversationKey) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Live session for `key`, spawning one if needed
    ///
    /// A new session resumes the persisted session id in the persisted
    /// working directory.
    ///
    /// # Errors
    /// Returns error if the agent cannot be spawned
    pub async fn get_or_create(&self, key: &ConversationKey) -> Result<Arc<AgentSession>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(key)
                && session.alive()
            {
                return Ok(Arc::clone(session));
            }
        }

        let mut sessions = self.sessions.write().await;

        // Another caller may have spawned while we waited for the write lock
        if let Some(session) = sessions.get(key) {
            if session.alive() {
                return Ok(Arc::clone(session));
            }
            log::info!("[{}] Session process exited, replacing it", key);
            if let Some(dead) = sessions.remove(key) {
                close_logged(&dead).await;
            }
        }

        let session = Arc::new(self.spawn(key, self.store.get(key)).await?);
        sessions.insert(key.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Replace the session for `key` with one pinned to `session_id`
    ///
    /// The pinned id is persisted immediately.
    ///
    /// # Errors
    /// Returns error if the agent cannot be spawned
    pub async fn get_or_create_with_session(
        &self,
        key: &ConversationKey,
        session_id: SessionId,
    ) -> Result<Arc<AgentSession>> {
        let mut sessions = self.sessions.write().await;

        if let Some(old) = sessions.remove(key) {
            log::info!("[{}] Switching session to {}", key, session_id.short());
            close_logged(&old).await;
        }

        let session = Arc::new(self.spawn(key, Some(session_id.clone())).await?);
        sessions.insert(key.clone(), Arc::clone(&session));
        drop(sessions);

        self.store.set(key, session_id);
        Ok(session)
    }

    /// Send a message and drain the response
    ///
    /// A failed exchange evicts the session and is retried once with a fresh
    /// one. A stale resume target also drops the persisted mapping so the
    /// retry starts a new conversation. Cancellation is returned as-is and
    /// leaves the session in place.
    ///
    /// # Errors
    /// Returns the second failure, a spawn failure, or `Cancelled`
    pub async fn send(
        &self,
        key: &ConversationKey,
        message: &str,
        handler: &mut dyn ResponseHandler,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome> {
        let mut attempt = 1;
        loop {
            let session = self.get_or_create(key).await?;

            match session.exchange(message, handler, cancel).await {
                Ok(outcome) => {
                    if let Some(session_id) = session.session_id() {
                        self.store.set(key, session_id);
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    log::warn!(
                        "[{}] Exchange failed (attempt {}/{}): {}",
                        key,
                        attempt,
                        MAX_ATTEMPTS,
                        e
                    );
                    self.evict(key, &session).await;

                    if e.is_stale_session() || session.session_not_found() {
                        log::info!("[{}] Dropping stale session mapping", key);
                        self.store.delete(key);
                    }

                    if attempt >= MAX_ATTEMPTS {
                        return Err(e);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Terminate the session and forget its mapping
    pub async fn reset(&self, key: &ConversationKey) {
        let removed = self.sessions.write().await.remove(key);
        if let Some(session) = removed {
            close_logged(&session).await;
        }
        self.store.delete(key);
        log::info!("[{}] Session reset", key);
    }

    /// Move the conversation to `dir`, keeping its session id
    ///
    /// The live process is terminated; the next exchange resumes the same
    /// conversation in the new directory.
    pub async fn set_working_directory(&self, key: &ConversationKey, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        let removed = self.sessions.write().await.remove(key);
        if let Some(session) = removed {
            close_logged(&session).await;
        }
        log::info!("[{}] Working directory set to {}", key, dir.display());
        self.store.set_working_directory_preserving_session(key, dir);
    }

    /// Working directory the conversation runs in
    pub async fn working_directory(&self, key: &ConversationKey) -> Option<PathBuf> {
        if let Some(dir) = self.store.working_directory(key) {
            return Some(dir);
        }
        self.get(key)
            .await
            .and_then(|s| s.working_directory().cloned())
    }

    /// Slash commands advertised by any live session
    pub async fn slash_commands(&self) -> Vec<String> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.alive())
            .map(|s| s.slash_commands())
            .find(|commands| !commands.is_empty())
            .unwrap_or_default()
    }

    /// Number of sessions in the pool
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Total agent processes spawned by this registry
    #[must_use]
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count.load(Ordering::Relaxed)
    }

    /// Terminate every session
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        log::info!("Shutting down {} session(s)", sessions.len());

        join_all(sessions.iter().map(|(_, session)| close_logged(session))).await;

        if let Err(e) = self.store.save().await {
            log::warn!("Failed to save session store on shutdown: {}", e);
        }
        log::info!("Session registry shutdown complete");
    }

    async fn spawn(
        &self,
        key: &ConversationKey,
        resume: Option<SessionId>,
    ) -> Result<AgentSession> {
        let mut launch = LaunchParams {
            resume,
            cwd: self.store.working_directory(key),
            ..LaunchParams::default()
        };
        if let Some(bridge) = &self.bridge {
            launch.mcp_config = Some(bridge.config_path(key)?);
            launch.permission_prompt_tool = Some(bridge.tool_name().to_string());
        }

        log::info!(
            "[{}] Spawning agent (resume: {}, cwd: {})",
            key,
            launch
                .resume
                .as_ref()
                .map_or_else(|| "none".to_string(), |id| id.short().to_string()),
            launch
                .cwd
                .as_ref()
                .map_or_else(|| "inherited".to_string(), |d| d.display().to_string()),
        );

        let session = AgentSession::spawn(key.clone(), &self.options, launch).await?;
        self.spawn_count.fetch_add(1, Ordering::Relaxed);
        Ok(session)
    }

    /// Remove `session` if it is still the one mapped to `key`, then close it
    async fn evict(&self, key: &ConversationKey, session: &Arc<AgentSession>) {
        {
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(key);
            }
        }
        close_logged(session).await;
    }
}

async fn close_logged(session: &AgentSession) {
    if let Err(e) = session.close().await {
        log::warn!("[{}] Failed to close session: {}", session.key(), e);
    }
}
