//! Durable conversation → session mapping
//!
//! Loaded once at startup and rewritten after every mutation. Readers use
//! the in-memory copy; disk writes run in the background and only log on
//! failure, so a broken disk degrades cross-restart resume and nothing else.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::types::identifiers::{ConversationKey, SessionId};

// ============================================================================
// ON-DISK LAYOUT
// ============================================================================

/// One persisted conversation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMapping {
    /// Conversation key
    pub conversation_key: ConversationKey,
    /// Last session id the agent assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// When the mapping was last written
    pub last_active: DateTime<Utc>,
    /// Working directory the agent runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    sessions: Vec<SessionMapping>,
}

// ============================================================================
// SESSION STORE
// ============================================================================

/// JSON-file backed session mapping store
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    mappings: RwLock<HashMap<ConversationKey, SessionMapping>>,
    save_lock: tokio::sync::Mutex<()>,
}

impl SessionStore {
    /// Create an empty store that will save to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mappings: RwLock::new(HashMap::new()),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the store from `path`; a missing file yields an empty store
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(path);

        let data = match std::fs::read_to_string(&store.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No session store at {}, starting empty", store.path.display());
                return Ok(store);
            }
            Err(e) => return Err(e.into()),
        };

        let file: StoreFile = serde_json::from_str(&data)?;
        {
            let mut mappings = store.mappings.write();
            for mapping in file.sessions {
                mappings.insert(mapping.conversation_key.clone(), mapping);
            }
        }

        log::info!(
            "Loaded {} session mappings from {}",
            store.len(),
            store.path.display()
        );
        Ok(store)
    }

    /// Path the store saves to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.read().len()
    }

    /// Whether the store holds no mappings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.read().is_empty()
    }

    /// Session id persisted for `key`
    #[must_use]
    pub fn get(&self, key: &ConversationKey) -> Option<SessionId> {
        self.mappings
            .read()
            .get(key)
            .and_then(|m| m.session_id.clone())
    }

    /// Working directory persisted for `key`
    #[must_use]
    pub fn working_directory(&self, key: &ConversationKey) -> Option<PathBuf> {
        self.mappings
            .read()
            .get(key)
            .and_then(|m| m.working_directory.clone())
    }

    /// Full record for `key`
    #[must_use]
    pub fn mapping(&self, key: &ConversationKey) -> Option<SessionMapping> {
        self.mappings.read().get(key).cloned()
    }

    /// Every record, sorted by conversation key
    #[must_use]
    pub fn get_all(&self) -> Vec<SessionMapping> {
        let mut all: Vec<_> = self.mappings.read().values().cloned().collect();
        all.sort_by(|a, b| a.conversation_key.cmp(&b.conversation_key));
        all
    }

    /// Record the session id for `key`, keeping its working directory
    pub fn set(self: &Arc<Self>, key: &ConversationKey, session_id: SessionId) {
        {
            let mut mappings = self.mappings.write();
            let working_directory = mappings.get(key).and_then(|m| m.working_directory.clone());
            mappings.insert(
                key.clone(),
                SessionMapping {
                    conversation_key: key.clone(),
                    session_id: Some(session_id),
                    last_active: Utc::now(),
                    working_directory,
                },
            );
        }
        self.save_in_background();
    }

    /// Forget `key`
    pub fn delete(self: &Arc<Self>, key: &ConversationKey) {
        let removed = self.mappings.write().remove(key).is_some();
        if removed {
            self.save_in_background();
        }
    }

    /// Change the working directory for `key` without touching its session id
    pub fn set_working_directory_preserving_session(
        self: &Arc<Self>,
        key: &ConversationKey,
        dir: impl Into<PathBuf>,
    ) {
        {
            let mut mappings = self.mappings.write();
            let session_id = mappings.get(key).and_then(|m| m.session_id.clone());
            mappings.insert(
                key.clone(),
                SessionMapping {
                    conversation_key: key.clone(),
                    session_id,
                    last_active: Utc::now(),
                    working_directory: Some(dir.into()),
                },
            );
        }
        self.save_in_background();
    }

    /// Write the current mappings to disk
    ///
    /// Writes go to a sibling temp file that is renamed into place.
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be written
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        // Snapshot under the save lock so the last writer saves the newest state
        let data = serde_json::to_vec_pretty(&StoreFile {
            sessions: self.get_all(),
        })?;

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        log::debug!("Saved session store to {}", self.path.display());
        Ok(())
    }

    fn save_in_background(self: &Arc<Self>) {
        let store = Arc::clone(self);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.save().await {
                        log::warn!(
                            "Failed to save session store to {}: {}",
                            store.path.display(),
                            e
                        );
                    }
                });
            }
            Err(_) => {
                log::warn!(
                    "No async runtime, session store {} not saved",
                    store.path.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(s: &str) -> ConversationKey {
        ConversationKey::from(s)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.json");

        let store = Arc::new(SessionStore::new(&path));
        store.set(&key("42"), SessionId::new("sess-a"));
        store.set_working_directory_preserving_session(&key("42"), "/work/project");
        store.set(&key("7"), SessionId::new("sess-b"));
        store.save().await.unwrap();

        let reloaded = SessionStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(&key("42")), Some(SessionId::new("sess-a")));
        assert_eq!(
            reloaded.working_directory(&key("42")),
            Some(PathBuf::from("/work/project"))
        );

        let before = store.mapping(&key("42")).unwrap();
        let after = reloaded.mapping(&key("42")).unwrap();
        assert_eq!(before, after);
        assert!((after.last_active - Utc::now()).num_seconds().abs() < 60);
    }

    #[tokio::test]
    async fn test_mutations_save_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = Arc::new(SessionStore::new(&path));
        store.set(&key("1"), SessionId::new("s1"));

        let mut saved = false;
        for _ in 0..200 {
            if let Ok(loaded) = SessionStore::load(&path)
                && loaded.get(&key("1")).is_some()
            {
                saved = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saved, "background save never landed");
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new(dir.path().join("s.json")));
        store.set(&key("1"), SessionId::new("s1"));
        store.delete(&key("1"));
        assert!(store.get(&key("1")).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_set_keeps_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new(dir.path().join("s.json")));
        store.set_working_directory_preserving_session(&key("1"), "/tmp/a");
        assert!(store.get(&key("1")).is_none());

        store.set(&key("1"), SessionId::new("s1"));
        assert_eq!(
            store.working_directory(&key("1")),
            Some(PathBuf::from("/tmp/a"))
        );

        store.set_working_directory_preserving_session(&key("1"), "/tmp/b");
        assert_eq!(store.get(&key("1")), Some(SessionId::new("s1")));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::load(dir.path().join("absent.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SessionStore::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_save_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // Parent "directory" is a regular file
        let store = Arc::new(SessionStore::new(blocker.join("sessions.json")));
        store.set(&key("1"), SessionId::new("s1"));
        assert!(store.save().await.is_err());
        assert_eq!(store.get(&key("1")), Some(SessionId::new("s1")));
    }

    #[test]
    fn test_file_layout() {
        let mapping = SessionMapping {
            conversation_key: key("42"),
            session_id: Some(SessionId::new("abc")),
            last_active: Utc::now(),
            working_directory: None,
        };
        let value = serde_json::to_value(StoreFile {
            sessions: vec![mapping],
        })
        .unwrap();
        let record = &value["sessions"][0];
        assert_eq!(record["conversation_key"], "42");
        assert_eq!(record["session_id"], "abc");
        assert!(record["last_active"].is_string());
        assert!(record.get("working_directory").is_none());
    }
}
