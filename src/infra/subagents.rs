use crate::domain::{
    RawTodo, Subagent, SubagentSnapshot, Todo, build_subagent, find_last_todo_write,
    first_record_timestamp, parse_todo_list, sort_subagents, to_todos,
};
use crate::infra::{
    AGENT_FILE_PREFIX, ClaudeLayout, FileSystem, SESSION_LOG_EXTENSION, SUBAGENTS_DIR,
    SessionIndexMerger, SessionLogReader, TODO_EXTENSION, is_session_dir_name,
    list_project_dir_names, parse_agent_log_name, parse_todo_file_name,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, trace};

pub struct SubagentStatusResolver {
    fs: Arc<dyn FileSystem>,
    layout: ClaudeLayout,
    reader: Arc<SessionLogReader>,
    merger: Arc<SessionIndexMerger>,
    stale_threshold: Duration,
    show_empty: bool,
}

struct AgentLog {
    session_id: String,
    agent_id: String,
    path: PathBuf,
}

impl SubagentStatusResolver {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        layout: ClaudeLayout,
        reader: Arc<SessionLogReader>,
        merger: Arc<SessionIndexMerger>,
    ) -> Self {
        Self {
            fs,
            layout,
            reader,
            merger,
            stale_threshold: crate::domain::DEFAULT_STALE_THRESHOLD,
            show_empty: false,
        }
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_show_empty(mut self, show_empty: bool) -> Self {
        self.show_empty = show_empty;
        self
    }

    pub fn list_active(&self) -> Vec<Subagent> {
        self.list_active_at(OffsetDateTime::now_utc())
    }

    /// Same as [`Self::list_active`] with an explicit clock.
    pub fn list_active_at(&self, now: OffsetDateTime) -> Vec<Subagent> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut subagents = Vec::new();

        for log in self.agent_logs(None) {
            let Some(snapshot) = self.snapshot_from_agent_log(&log) else {
                continue;
            };
            seen.insert(log.agent_id);
            subagents.push(build_subagent(snapshot, now, self.stale_threshold));
        }

        for snapshot in self.snapshots_from_todo_files(&seen) {
            subagents.push(build_subagent(snapshot, now, self.stale_threshold));
        }

        if !self.show_empty {
            subagents.retain(|subagent| subagent.total_tasks > 0);
        }
        sort_subagents(&mut subagents);
        debug!(count = subagents.len(), "resolved subagents");
        subagents
    }

    /// Todos for a session: the flat todo files first, else the agent logs.
    pub fn get_todos(&self, session_id: &str) -> Vec<Todo> {
        let todos_dir = self.layout.todos_dir();
        let mut todos = Vec::new();

        let suffix = format!(".{TODO_EXTENSION}");
        if let Ok(entries) = self.fs.read_dir(&todos_dir) {
            for entry in entries {
                if entry.is_dir || !entry.name.starts_with(session_id) {
                    continue;
                }
                let Some(prefix) = entry.name.strip_suffix(&suffix) else {
                    continue;
                };
                let Some(raw) = self.read_todo_file(&todos_dir.join(&entry.name)) else {
                    continue;
                };
                todos.extend(to_todos(&raw, prefix));
            }
        }

        if !todos.is_empty() {
            return todos;
        }

        self.agent_logs(Some(session_id))
            .into_iter()
            .filter_map(|log| {
                let raw = self.latest_todos_in_log(&log.path)?;
                Some(to_todos(&raw, &log.agent_id))
            })
            .flatten()
            .collect()
    }

    pub fn get_agent_todos(&self, session_id: &str, agent_id: &str) -> Vec<Todo> {
        let flat = self
            .layout
            .todos_dir()
            .join(format!("{session_id}-agent-{agent_id}.{TODO_EXTENSION}"));
        if let Some(raw) = self.read_todo_file(&flat).filter(|raw| !raw.is_empty()) {
            return to_todos(&raw, agent_id);
        }

        let file_name = format!("{AGENT_FILE_PREFIX}{agent_id}.{SESSION_LOG_EXTENSION}");
        let projects_dir = self.layout.projects_dir();
        list_project_dir_names(self.fs.as_ref(), &self.layout)
            .into_iter()
            .map(|dir_name| {
                projects_dir
                    .join(dir_name)
                    .join(session_id)
                    .join(SUBAGENTS_DIR)
                    .join(&file_name)
            })
            .find_map(|path| self.latest_todos_in_log(&path))
            .map(|raw| to_todos(&raw, agent_id))
            .unwrap_or_default()
    }

    /// `projects/*/<session>/subagents/agent-<id>.jsonl`, optionally for one
    /// session only.
    fn agent_logs(&self, only_session: Option<&str>) -> Vec<AgentLog> {
        let projects_dir = self.layout.projects_dir();
        let mut logs = Vec::new();

        for dir_name in list_project_dir_names(self.fs.as_ref(), &self.layout) {
            let project_dir = projects_dir.join(&dir_name);
            let Ok(entries) = self.fs.read_dir(&project_dir) else {
                continue;
            };
            for session_dir in entries {
                if !session_dir.is_dir || !is_session_dir_name(&session_dir.name) {
                    continue;
                }
                if only_session.is_some_and(|id| id != session_dir.name) {
                    continue;
                }
                let subagents_dir = project_dir.join(&session_dir.name).join(SUBAGENTS_DIR);
                let Ok(files) = self.fs.read_dir(&subagents_dir) else {
                    continue;
                };
                for file in files.into_iter().filter(|file| !file.is_dir) {
                    let Some(agent_id) = parse_agent_log_name(&file.name) else {
                        continue;
                    };
                    logs.push(AgentLog {
                        session_id: session_dir.name.clone(),
                        agent_id: agent_id.to_string(),
                        path: subagents_dir.join(&file.name),
                    });
                }
            }
        }
        logs
    }

    fn snapshot_from_agent_log(&self, log: &AgentLog) -> Option<SubagentSnapshot> {
        let stat = self.fs.stat(&log.path).ok()?;
        let modified_at = stat.modified_at().unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let text = match self.fs.read_to_string(&log.path) {
            Ok(text) => text,
            Err(error) => {
                debug!(path = %log.path.display(), %error, "agent log not readable");
                return None;
            }
        };

        Some(SubagentSnapshot {
            agent_id: log.agent_id.clone(),
            session_id: log.session_id.clone(),
            todos: find_last_todo_write(text.lines()).unwrap_or_default(),
            started_at: first_record_timestamp(&text).unwrap_or(modified_at),
            modified_at,
        })
    }

    fn snapshots_from_todo_files(&self, seen: &HashSet<String>) -> Vec<SubagentSnapshot> {
        let todos_dir = self.layout.todos_dir();
        let Ok(entries) = self.fs.read_dir(&todos_dir) else {
            return Vec::new();
        };

        let mut valid_sessions: Option<HashSet<String>> = None;
        let mut snapshots = Vec::new();

        for entry in entries.into_iter().filter(|entry| !entry.is_dir) {
            let Some((session_id, agent_id)) = parse_todo_file_name(&entry.name) else {
                continue;
            };
            if seen.contains(agent_id) {
                continue;
            }

            let valid = valid_sessions.get_or_insert_with(|| self.merger.valid_session_ids());
            if !valid.contains(session_id) && self.reader.find_session_path(session_id).is_none()
            {
                trace!(session_id, agent_id, "skipping todo file of unknown session");
                continue;
            }

            let path = todos_dir.join(&entry.name);
            let Some(todos) = self.read_todo_file(&path) else {
                continue;
            };
            let Ok(stat) = self.fs.stat(&path) else {
                continue;
            };
            let modified_at = stat.modified_at().unwrap_or(OffsetDateTime::UNIX_EPOCH);

            snapshots.push(SubagentSnapshot {
                agent_id: agent_id.to_string(),
                session_id: session_id.to_string(),
                todos,
                started_at: stat.created_at().unwrap_or(modified_at),
                modified_at,
            });
        }
        snapshots
    }

    fn read_todo_file(&self, path: &Path) -> Option<Vec<RawTodo>> {
        let text = self.fs.read_to_string(path).ok()?;
        match parse_todo_list(&text) {
            Ok(todos) => Some(todos),
            Err(error) => {
                debug!(path = %path.display(), %error, "ignoring invalid todo file");
                None
            }
        }
    }

    fn latest_todos_in_log(&self, path: &Path) -> Option<Vec<RawTodo>> {
        let text = self.fs.read_to_string(path).ok()?;
        find_last_todo_write(text.lines())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SubagentStatus, TodoStatus};
    use crate::infra::{OsFileSystem, SESSIONS_INDEX_FILE};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const SESSION: &str = "0b7e6c3a-3f1e-4f3a-9d7c-2f1e0d9c8b7a";

    fn resolver(dir: &TempDir) -> SubagentStatusResolver {
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem);
        let layout = ClaudeLayout::new(dir.path());
        let reader = Arc::new(SessionLogReader::new(fs.clone(), layout.clone()));
        let merger = Arc::new(SessionIndexMerger::new(
            fs.clone(),
            layout.clone(),
            reader.clone(),
        ));
        SubagentStatusResolver::new(fs, layout, reader, merger)
    }

    fn todo_write_line(todos: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"u","timestamp":"2026-02-19T10:00:00Z","message":{{"role":"assistant","content":[{{"type":"tool_use","id":"t","name":"TodoWrite","input":{{"todos":{todos}}}}}]}}}}"#
        )
    }

    fn write_agent_log(dir: &TempDir, agent_id: &str, lines: &[String]) -> PathBuf {
        let subagents = dir
            .path()
            .join("projects")
            .join("-proj")
            .join(SESSION)
            .join(SUBAGENTS_DIR);
        fs::create_dir_all(&subagents).expect("mkdir");
        let path = subagents.join(format!("agent-{agent_id}.jsonl"));
        fs::write(&path, lines.join("\n")).expect("write");
        path
    }

    fn write_todo_file(dir: &TempDir, session_id: &str, agent_id: &str, body: &str) {
        let todos = dir.path().join("todos");
        fs::create_dir_all(&todos).expect("mkdir");
        fs::write(
            todos.join(format!("{session_id}-agent-{agent_id}.json")),
            body,
        )
        .expect("write");
    }

    fn register_session(dir: &TempDir, session_id: &str) {
        let project = dir.path().join("projects").join("-proj");
        fs::create_dir_all(&project).expect("mkdir");
        fs::write(
            project.join(SESSIONS_INDEX_FILE),
            format!(r#"{{"entries":[{{"sessionId":"{session_id}"}}]}}"#),
        )
        .expect("write");
    }

    #[test]
    fn agent_log_uses_latest_todo_write() {
        let dir = tempdir().expect("tempdir");
        write_agent_log(
            &dir,
            "a1",
            &[
                todo_write_line(r#"[{"content":"Old","status":"pending"}]"#),
                todo_write_line(
                    r#"[{"content":"Plan","status":"completed"},{"content":"Build","status":"in_progress","activeForm":"Building"}]"#,
                ),
                r#"{"type":"user","uuid":"x","timestamp":"2026-02-19T10:01:00Z","message":{"role":"user","content":"ok"}}"#.to_string(),
            ],
        );

        let subagents = resolver(&dir).list_active();
        assert_eq!(subagents.len(), 1);
        let agent = &subagents[0];
        assert_eq!(agent.id, "a1");
        assert_eq!(agent.session_id, SESSION);
        assert_eq!(agent.status, SubagentStatus::Running);
        assert_eq!(agent.name, "Plan");
        assert_eq!(agent.description, "Building");
        assert_eq!(agent.total_tasks, 2);
        assert_eq!(agent.completed_tasks, 1);
        assert_eq!(
            agent.started_at,
            time::macros::datetime!(2026-02-19 10:00 UTC)
        );
    }

    #[test]
    fn stale_incomplete_agent_is_failed() {
        let dir = tempdir().expect("tempdir");
        write_agent_log(
            &dir,
            "a1",
            &[todo_write_line(r#"[{"content":"Build","status":"in_progress"}]"#)],
        );

        let later = OffsetDateTime::now_utc() + time::Duration::minutes(10);
        let subagents = resolver(&dir).list_active_at(later);
        assert_eq!(subagents[0].status, SubagentStatus::Failed);
    }

    #[test]
    fn empty_agents_are_hidden_unless_requested() {
        let dir = tempdir().expect("tempdir");
        write_agent_log(
            &dir,
            "a1",
            &[r#"{"type":"user","uuid":"x","timestamp":"2026-02-19T10:00:00Z","message":{"role":"user","content":"go"}}"#.to_string()],
        );

        assert!(resolver(&dir).list_active().is_empty());

        let shown = resolver(&dir).with_show_empty(true).list_active();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].status, SubagentStatus::Initializing);
        assert_eq!(shown[0].name, "Initializing...");
    }

    #[test]
    fn todo_files_supplement_agent_logs() {
        let dir = tempdir().expect("tempdir");
        write_agent_log(
            &dir,
            "a1",
            &[todo_write_line(r#"[{"content":"From log","status":"pending"}]"#)],
        );
        register_session(&dir, SESSION);
        write_todo_file(&dir, SESSION, "a1", r#"[{"content":"Ignored","status":"pending"}]"#);
        write_todo_file(&dir, SESSION, "b2", r#"[{"content":"Flat","status":"completed"}]"#);
        write_todo_file(&dir, "dead", "c3", r#"[{"content":"Gone","status":"pending"}]"#);
        write_todo_file(&dir, SESSION, "d4", "not json");

        let subagents = resolver(&dir).list_active();
        let ids: Vec<&str> = subagents.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "a1");
        assert_eq!(ids[1], "b2");
        assert_eq!(subagents[0].name, "From log");
        assert_eq!(subagents[1].status, SubagentStatus::Completed);
        assert!(subagents[1].completed_at.is_some());
        assert_eq!(subagents[1].cached_todos.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn todo_file_of_unindexed_session_with_log_is_kept() {
        let dir = tempdir().expect("tempdir");
        let project = dir.path().join("projects").join("-proj");
        fs::create_dir_all(&project).expect("mkdir");
        fs::write(project.join("feed.jsonl"), "{}\n").expect("write");
        write_todo_file(&dir, "feed", "a1", r#"[{"content":"Work","status":"pending"}]"#);

        let subagents = resolver(&dir).list_active();
        assert_eq!(subagents.len(), 1);
        assert_eq!(subagents[0].session_id, "feed");
    }

    #[test]
    fn get_todos_prefers_flat_files() {
        let dir = tempdir().expect("tempdir");
        write_todo_file(
            &dir,
            SESSION,
            "a1",
            r#"[{"content":"One","status":"pending"},{"content":"Two","status":"completed","id":"t2"}]"#,
        );
        write_agent_log(
            &dir,
            "b2",
            &[todo_write_line(r#"[{"content":"Log","status":"pending"}]"#)],
        );

        let todos = resolver(&dir).get_todos(SESSION);
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].id, format!("{SESSION}-agent-a1-0"));
        assert_eq!(todos[1].id, "t2");
        assert_eq!(todos[1].status, TodoStatus::Completed);
    }

    #[test]
    fn get_todos_ignores_files_without_the_todo_extension() {
        let dir = tempdir().expect("tempdir");
        write_todo_file(&dir, SESSION, "a1", r#"[{"content":"Real","status":"pending"}]"#);
        let todos_dir = dir.path().join("todos");
        fs::write(
            todos_dir.join(format!("{SESSION}-agent-a1.json.bak")),
            r#"[{"content":"Backup","status":"pending"}]"#,
        )
        .expect("write");
        fs::write(
            todos_dir.join(format!("{SESSION}-agent-a1.json~")),
            r#"[{"content":"Editor","status":"pending"}]"#,
        )
        .expect("write");

        let todos = resolver(&dir).get_todos(SESSION);
        let contents: Vec<&str> = todos.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["Real"]);
    }

    #[test]
    fn get_todos_falls_back_to_agent_logs() {
        let dir = tempdir().expect("tempdir");
        write_agent_log(
            &dir,
            "b2",
            &[todo_write_line(r#"[{"content":"Log","status":"pending"}]"#)],
        );

        let todos = resolver(&dir).get_todos(SESSION);
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].content, "Log");
        assert_eq!(todos[0].id, "b2-0");
    }

    #[test]
    fn get_agent_todos_checks_flat_file_then_log() {
        let dir = tempdir().expect("tempdir");
        write_todo_file(&dir, SESSION, "a1", "[]");
        write_agent_log(
            &dir,
            "a1",
            &[todo_write_line(r#"[{"content":"Log","status":"in_progress"}]"#)],
        );
        write_todo_file(&dir, SESSION, "b2", r#"[{"content":"Flat","status":"pending"}]"#);

        let resolver = resolver(&dir);
        let from_log = resolver.get_agent_todos(SESSION, "a1");
        assert_eq!(from_log.len(), 1);
        assert_eq!(from_log[0].content, "Log");

        let flat = resolver.get_agent_todos(SESSION, "b2");
        assert_eq!(flat[0].content, "Flat");

        assert!(resolver.get_agent_todos(SESSION, "ffff").is_empty());
    }
}
