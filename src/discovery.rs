//! Discovery of past Claude Code sessions on disk
//!
//! Claude Code keeps one JSONL transcript per session under
//! `<claude_dir>/projects/<encoded project path>/<session id>.jsonl`.
//! Discovered sessions are the targets offered for
//! [`SessionRegistry::get_or_create_with_session`](crate::SessionRegistry::get_or_create_with_session).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::identifiers::SessionId;

/// Longest summary shown for a session, in characters
const SUMMARY_MAX_CHARS: usize = 60;

/// Metadata of one discovered session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Full session id
    pub id: SessionId,
    /// First eight characters of the id
    pub short_id: String,
    /// Decoded project path (e.g. `/home/me/code/relay`)
    pub project_path: PathBuf,
    /// Last path component of the project
    pub project_name: String,
    /// Summary entry, or the first user message
    pub summary: String,
    /// Newest timestamp in the transcript
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptEntry {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    message: Option<TranscriptMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: serde_json::Value,
}

/// Finds sessions in a Claude config directory
#[derive(Debug)]
pub struct SessionDiscovery {
    claude_dir: PathBuf,
    last_sessions: Mutex<Vec<SessionInfo>>,
}

impl SessionDiscovery {
    /// Create a discovery over `claude_dir` (usually `~/.claude`)
    pub fn new(claude_dir: impl Into<PathBuf>) -> Self {
        Self {
            claude_dir: claude_dir.into(),
            last_sessions: Mutex::new(Vec::new()),
        }
    }

    /// Recent sessions across all projects, newest first
    ///
    /// `limit == 0` returns everything. The result is cached for
    /// [`SessionDiscovery::lookup_short_id`].
    ///
    /// # Errors
    /// Returns error if the projects directory exists but cannot be listed
    pub fn discover(&self, limit: usize) -> Result<Vec<SessionInfo>> {
        let projects_dir = self.claude_dir.join("projects");
        let entries = match std::fs::read_dir(&projects_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.last_sessions.lock() = Vec::new();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let project_dir = entry.path();
            if !project_dir.is_dir() {
                continue;
            }

            let encoded = entry.file_name().to_string_lossy().into_owned();
            let project_path = decode_project_path(&encoded);
            let project_name = project_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let Ok(files) = std::fs::read_dir(&project_dir) else {
                log::warn!("Cannot list session files in {}", project_dir.display());
                continue;
            };

            for file in files.flatten() {
                let path = file.path();
                if path.extension().is_none_or(|ext| ext != "jsonl") {
                    continue;
                }
                match parse_session_file(&path, &project_path, &project_name) {
                    Some(info) => sessions.push(info),
                    None => log::debug!("Skipping session file {}", path.display()),
                }
            }
        }

        sessions.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        if limit > 0 {
            sessions.truncate(limit);
        }

        *self.last_sessions.lock() = sessions.clone();
        Ok(sessions)
    }

    /// Find a session from the last `discover` call by its short id
    #[must_use]
    pub fn lookup_short_id(&self, short_id: &str) -> Option<SessionInfo> {
        self.last_sessions
            .lock()
            .iter()
            .find(|s| s.short_id == short_id)
            .cloned()
    }

    /// Last assistant text recorded in the session's transcript
    #[must_use]
    pub fn last_assistant_message(&self, session_id: &SessionId) -> Option<String> {
        let projects_dir = self.claude_dir.join("projects");
        let entries = std::fs::read_dir(projects_dir).ok()?;

        entries.flatten().find_map(|entry| {
            let path = entry
                .path()
                .join(format!("{}.jsonl", session_id.as_str()));
            parse_last_assistant_message(&path)
        })
    }
}

/// Human-readable age of `then`: `now`, `5m`, `3h`, `2d`, `1w`
#[must_use]
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(then);
    if diff.num_minutes() < 1 {
        "now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h", diff.num_hours())
    } else if diff.num_days() < 7 {
        format!("{}d", diff.num_days())
    } else {
        format!("{}w", diff.num_weeks())
    }
}

/// `-home-me-code-relay` → `/home/me/code/relay`
fn decode_project_path(encoded: &str) -> PathBuf {
    let decoded = encoded.replace('-', "/");
    PathBuf::from(decoded)
}

fn parse_session_file(path: &Path, project_path: &Path, project_name: &str) -> Option<SessionInfo> {
    let id = path.file_stem()?.to_string_lossy().into_owned();
    let file = File::open(path).ok()?;

    let mut summary = String::new();
    let mut first_user = String::new();
    let mut last_active: Option<DateTime<Utc>> = None;

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<TranscriptEntry>(&line) else {
            continue;
        };

        if entry.kind == "summary" && summary.is_empty() {
            summary = entry.summary.clone();
        }

        if entry.kind == "user"
            && first_user.is_empty()
            && let Some(ref message) = entry.message
            && message.role == "user"
            && let Some(text) = content_text(&message.content)
        {
            first_user = truncate(command_args(&text).trim(), SUMMARY_MAX_CHARS);
        }

        if let Some(ts) = entry.timestamp.as_deref()
            && let Ok(ts) = DateTime::parse_from_rfc3339(ts)
        {
            let ts = ts.with_timezone(&Utc);
            if last_active.is_none_or(|current| ts > current) {
                last_active = Some(ts);
            }
        }
    }

    let last_active = last_active?;
    if summary.is_empty() {
        summary = first_user;
    }

    let short_id = id.chars().take(8).collect();
    Some(SessionInfo {
        id: SessionId::new(id),
        short_id,
        project_path: project_path.to_path_buf(),
        project_name: project_name.to_string(),
        summary,
        last_active,
    })
}

fn parse_last_assistant_message(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut last = None;

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let Ok(entry) = serde_json::from_str::<TranscriptEntry>(&line) else {
            continue;
        };
        if entry.kind != "assistant" {
            continue;
        }
        if let Some(message) = entry.message
            && message.role == "assistant"
            && let Some(text) = content_text(&message.content)
        {
            last = Some(text);
        }
    }

    last
}

/// Text of a message: the string itself or its first non-empty text block
fn content_text(content: &serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Array(blocks) => blocks.iter().find_map(|block| {
            if block.get("type").and_then(serde_json::Value::as_str) != Some("text") {
                return None;
            }
            block
                .get("text")
                .and_then(serde_json::Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        }),
        _ => None,
    }
}

/// Arguments of a slash-command transcript entry, or the text unchanged
fn command_args(text: &str) -> &str {
    const OPEN: &str = "<command-args>";
    const CLOSE: &str = "</command-args>";
    if let Some(start) = text.find(OPEN) {
        let rest = &text[start + OPEN.len()..];
        if let Some(end) = rest.find(CLOSE) {
            return &rest[..end];
        }
    }
    text
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
