use crate::domain::{Message, Session, SessionHeaderScan, parse_claude_message};
use crate::infra::{
    ClaudeLayout, FileSystem, HEADER_SCAN_BYTES, SESSION_LOG_EXTENSION, list_project_dir_names,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;
use tracing::{debug, trace};

#[derive(Clone, Debug)]
struct CachedMessages {
    bytes_read: u64,
    messages: Arc<Vec<Message>>,
}

/// Parsed messages per session, keyed by the log size they were parsed at.
///
/// A hit requires the cached size to be at least the current size; growth
/// forces a whole-file re-parse.
#[derive(Debug, Default)]
pub struct MessageCache {
    entries: Mutex<HashMap<String, CachedMessages>>,
}

impl MessageCache {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedMessages>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, session_id: &str, current_size: u64) -> Option<Arc<Vec<Message>>> {
        let entries = self.lock();
        let cached = entries.get(session_id)?;
        (cached.bytes_read >= current_size).then(|| Arc::clone(&cached.messages))
    }

    fn store(&self, session_id: &str, bytes_read: u64, messages: Arc<Vec<Message>>) {
        self.lock().insert(
            session_id.to_string(),
            CachedMessages {
                bytes_read,
                messages,
            },
        );
    }

    pub fn invalidate(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SessionLogReader {
    fs: Arc<dyn FileSystem>,
    layout: ClaudeLayout,
    cache: MessageCache,
}

impl SessionLogReader {
    pub fn new(fs: Arc<dyn FileSystem>, layout: ClaudeLayout) -> Self {
        Self {
            fs,
            layout,
            cache: MessageCache::default(),
        }
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }

    /// Summarizes a session log from its first [`HEADER_SCAN_BYTES`].
    pub fn read_header(&self, file_path: &Path, fallback_project_path: &Path) -> Option<Session> {
        let prefix = match self.fs.read_prefix(file_path, HEADER_SCAN_BYTES) {
            Ok(prefix) => prefix,
            Err(error) => {
                debug!(path = %file_path.display(), %error, "session log not readable");
                return None;
            }
        };
        if prefix.is_empty() {
            return None;
        }

        let text = String::from_utf8_lossy(&prefix);
        let mut scan = SessionHeaderScan::new(fallback_project_path);
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                trace!(path = %file_path.display(), "skipping malformed header line");
                continue;
            };
            if scan.observe(&value) {
                break;
            }
        }

        let stat = self.fs.stat(file_path).ok()?;
        let last_message_at = stat.modified_at().unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let started_at = scan
            .timestamp()
            .or_else(|| stat.created_at())
            .unwrap_or(last_message_at);

        Some(Session {
            id: session_id_from_path(file_path)?,
            project_path: scan.project_path().to_path_buf(),
            started_at,
            last_message_at,
            preview: scan.preview().to_string(),
            message_count: 0,
            git_branch: None,
        })
    }

    /// Looks in every project directory for `<session_id>.jsonl`.
    pub fn find_session_path(&self, session_id: &str) -> Option<PathBuf> {
        let projects_dir = self.layout.projects_dir();
        let file_name = format!("{session_id}.{SESSION_LOG_EXTENSION}");
        list_project_dir_names(self.fs.as_ref(), &self.layout)
            .into_iter()
            .map(|dir_name| projects_dir.join(dir_name).join(&file_name))
            .find(|candidate| self.fs.stat(candidate).is_ok())
    }

    pub fn read_messages(&self, session_id: &str) -> Vec<Message> {
        self.read_messages_shared(session_id)
            .map(|messages| messages.as_ref().clone())
            .unwrap_or_default()
    }

    /// Like [`Self::read_messages`], without copying a cached list.
    pub fn read_messages_shared(&self, session_id: &str) -> Option<Arc<Vec<Message>>> {
        let path = self.find_session_path(session_id)?;
        let stat = match self.fs.stat(&path) {
            Ok(stat) => stat,
            Err(error) => {
                debug!(path = %path.display(), %error, "session log vanished");
                return None;
            }
        };

        if let Some(cached) = self.cache.lookup(session_id, stat.size) {
            trace!(session_id, "message cache hit");
            return Some(cached);
        }

        let content = match self.fs.read_to_string(&path) {
            Ok(content) => content,
            Err(error) => {
                debug!(path = %path.display(), %error, "session log not readable");
                return None;
            }
        };

        let messages = Arc::new(parse_session_messages(&content, session_id));
        debug!(session_id, count = messages.len(), "parsed session log");
        self.cache.store(session_id, stat.size, Arc::clone(&messages));
        Some(messages)
    }

    pub fn invalidate(&self, session_id: &str) {
        if self.cache.invalidate(session_id) {
            trace!(session_id, "message cache invalidated");
        }
    }
}

/// Parses every message of a log. Records without a usable timestamp take
/// the previous message's.
pub fn parse_session_messages(content: &str, session_id: &str) -> Vec<Message> {
    let mut last_timestamp = OffsetDateTime::UNIX_EPOCH;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|value| {
            let message = parse_claude_message(&value, session_id, last_timestamp)?;
            last_timestamp = message.timestamp;
            Some(message)
        })
        .collect()
}

pub fn session_id_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}
