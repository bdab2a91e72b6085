use crate::domain::{
    ClaudeSessionsIndex, ClaudeSessionsIndexEntry, PREVIEW_MAX_CHARS, Session,
    parse_claude_sessions_index, parse_rfc3339, truncate_chars,
};
use crate::infra::{
    AGENT_FILE_PREFIX, ClaudeLayout, FileSystem, SESSIONS_INDEX_FILE, SessionLogReader,
    decode_project_path, is_session_log_path, list_project_dir_names, session_id_from_path,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

/// Builds the session list from `sessions-index.json` plus the raw logs the
/// index does not know about yet.
pub struct SessionIndexMerger {
    fs: Arc<dyn FileSystem>,
    layout: ClaudeLayout,
    reader: Arc<SessionLogReader>,
}

struct LoadedIndex {
    index: ClaudeSessionsIndex,
    modified_at: OffsetDateTime,
}

impl SessionIndexMerger {
    pub fn new(fs: Arc<dyn FileSystem>, layout: ClaudeLayout, reader: Arc<SessionLogReader>) -> Self {
        Self { fs, layout, reader }
    }

    pub fn list_sessions(&self, project_filter: Option<&str>) -> Vec<Session> {
        let projects_dir = self.layout.projects_dir();
        let mut sessions: HashMap<String, Session> = HashMap::new();

        for dir_name in list_project_dir_names(self.fs.as_ref(), &self.layout) {
            if project_filter.is_some_and(|filter| filter != dir_name) {
                continue;
            }

            let project_dir = projects_dir.join(&dir_name);
            let decoded_root = decode_project_path(self.fs.as_ref(), &dir_name).into_path_buf();

            if let Some(loaded) = self.load_index(&project_dir) {
                for entry in &loaded.index.entries {
                    if let Some(session) =
                        session_from_index_entry(entry, &decoded_root, loaded.modified_at)
                    {
                        sessions.insert(session.id.clone(), session);
                    }
                }
            }

            for log_path in self.session_log_paths(&project_dir) {
                let Some(session_id) = session_id_from_path(&log_path) else {
                    continue;
                };
                if sessions.contains_key(&session_id) {
                    continue;
                }
                if let Some(session) = self.reader.read_header(&log_path, &decoded_root) {
                    sessions.insert(session_id, session);
                }
            }
        }

        let mut sessions: Vec<Session> = sessions.into_values().collect();
        sessions.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions
    }

    /// Every session id named by any index file.
    pub fn valid_session_ids(&self) -> HashSet<String> {
        let projects_dir = self.layout.projects_dir();
        list_project_dir_names(self.fs.as_ref(), &self.layout)
            .into_iter()
            .filter_map(|dir_name| self.load_index(&projects_dir.join(dir_name)))
            .flat_map(|loaded| loaded.index.entries)
            .filter_map(|entry| entry.session_id)
            .collect()
    }

    fn load_index(&self, project_dir: &Path) -> Option<LoadedIndex> {
        let path = project_dir.join(SESSIONS_INDEX_FILE);
        let text = self.fs.read_to_string(&path).ok()?;
        let index = match parse_claude_sessions_index(&text) {
            Ok(index) => index,
            Err(error) => {
                debug!(path = %path.display(), %error, "ignoring invalid sessions index");
                return None;
            }
        };
        let modified_at = self
            .fs
            .stat(&path)
            .ok()
            .and_then(|stat| stat.modified_at())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Some(LoadedIndex { index, modified_at })
    }

    fn session_log_paths(&self, project_dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = self.fs.read_dir(project_dir) else {
            return Vec::new();
        };
        entries
            .into_iter()
            .filter(|entry| !entry.is_dir && !entry.name.starts_with(AGENT_FILE_PREFIX))
            .map(|entry| project_dir.join(entry.name))
            .filter(|path| is_session_log_path(path))
            .collect()
    }
}

fn session_from_index_entry(
    entry: &ClaudeSessionsIndexEntry,
    decoded_root: &Path,
    index_modified_at: OffsetDateTime,
) -> Option<Session> {
    let id = entry
        .session_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())?
        .to_string();

    let created = entry.created.as_deref().and_then(parse_rfc3339);
    let modified = entry.modified.as_deref().and_then(parse_rfc3339);
    let started_at = created.or(modified).unwrap_or(index_modified_at);
    let last_message_at = modified.or(created).unwrap_or(index_modified_at);

    let project_path = entry
        .project_path
        .as_deref()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| decoded_root.to_path_buf());

    Some(Session {
        id,
        project_path,
        started_at,
        last_message_at,
        preview: truncate_chars(
            entry.first_prompt.as_deref().unwrap_or(""),
            PREVIEW_MAX_CHARS,
        ),
        message_count: entry.message_count.unwrap_or(0),
        git_branch: entry.git_branch.clone().filter(|branch| !branch.is_empty()),
    })
}
