mod subscribers;

use crate::domain::{ClaudeTask, Message, Project, Session, Subagent, Todo};
use crate::infra::{
    ChangeKind, ChangeNotifier, FileSystem, MonitorConfig, OsFileSystem, ScopedFileEvent,
    SessionIndexMerger, SessionLogReader, SubagentStatusResolver, WatchError, WatchScope,
    classify_change, list_projects, list_session_tasks, list_tasks,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

pub use subscribers::{Subscribers, Subscription};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesChanged {
    pub session_id: String,
}

/// Read access to the assistant's data plus change subscriptions.
///
/// Queries hit the filesystem every time (except cached message lists).
/// Watch events are queued by background threads and only dispatched from
/// [`Monitor::pump_events`] or [`Monitor::run_until`].
pub struct Monitor {
    config: MonitorConfig,
    fs: Arc<dyn FileSystem>,
    reader: Arc<SessionLogReader>,
    merger: Arc<SessionIndexMerger>,
    subagents: SubagentStatusResolver,
    notifier: ChangeNotifier,
    sessions_changed: Subscribers<Vec<Session>>,
    messages_changed: Subscribers<MessagesChanged>,
    subagents_changed: Subscribers<Vec<Subagent>>,
    tasks_changed: Subscribers<Vec<ClaudeTask>>,
    project_issues_changed: Subscribers<PathBuf>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_file_system(config, Arc::new(OsFileSystem))
    }

    pub fn with_file_system(config: MonitorConfig, fs: Arc<dyn FileSystem>) -> Self {
        let layout = config.layout.clone();
        let reader = Arc::new(SessionLogReader::new(fs.clone(), layout.clone()));
        let merger = Arc::new(SessionIndexMerger::new(
            fs.clone(),
            layout.clone(),
            reader.clone(),
        ));
        let subagents =
            SubagentStatusResolver::new(fs.clone(), layout.clone(), reader.clone(), merger.clone())
                .with_stale_threshold(config.stale_threshold)
                .with_show_empty(config.show_empty_subagents);

        Self {
            notifier: ChangeNotifier::new(layout),
            config,
            fs,
            reader,
            merger,
            subagents,
            sessions_changed: Subscribers::default(),
            messages_changed: Subscribers::default(),
            subagents_changed: Subscribers::default(),
            tasks_changed: Subscribers::default(),
            project_issues_changed: Subscribers::default(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn list_projects(&self) -> Vec<Project> {
        list_projects(self.fs.as_ref(), &self.config.layout)
    }

    pub fn list_sessions(&self, project_id: Option<&str>) -> Vec<Session> {
        self.merger.list_sessions(project_id)
    }

    pub fn get_messages(&self, session_id: &str) -> Vec<Message> {
        self.reader.read_messages(session_id)
    }

    pub fn get_session_file_path(&self, session_id: &str) -> Option<PathBuf> {
        self.reader.find_session_path(session_id)
    }

    pub fn list_active_subagents(&self) -> Vec<Subagent> {
        self.subagents.list_active()
    }

    pub fn get_todos(&self, session_id: &str) -> Vec<Todo> {
        self.subagents.get_todos(session_id)
    }

    pub fn get_agent_todos(&self, session_id: &str, agent_id: &str) -> Vec<Todo> {
        self.subagents.get_agent_todos(session_id, agent_id)
    }

    pub fn list_tasks(&self) -> Vec<ClaudeTask> {
        list_tasks(self.fs.as_ref(), &self.config.layout)
    }

    pub fn list_session_tasks(&self, session_id: &str) -> Vec<ClaudeTask> {
        list_session_tasks(self.fs.as_ref(), &self.config.layout, session_id)
    }

    pub fn on_sessions_changed(
        &self,
        callback: impl Fn(&Vec<Session>) + Send + Sync + 'static,
    ) -> Subscription {
        self.sessions_changed.subscribe(callback)
    }

    pub fn on_messages_changed(
        &self,
        callback: impl Fn(&MessagesChanged) + Send + Sync + 'static,
    ) -> Subscription {
        self.messages_changed.subscribe(callback)
    }

    pub fn on_subagents_changed(
        &self,
        callback: impl Fn(&Vec<Subagent>) + Send + Sync + 'static,
    ) -> Subscription {
        self.subagents_changed.subscribe(callback)
    }

    pub fn on_tasks_changed(
        &self,
        callback: impl Fn(&Vec<ClaudeTask>) + Send + Sync + 'static,
    ) -> Subscription {
        self.tasks_changed.subscribe(callback)
    }

    /// Called with the project root whose issue directory changed.
    pub fn on_project_issues_changed(
        &self,
        callback: impl Fn(&PathBuf) + Send + Sync + 'static,
    ) -> Subscription {
        self.project_issues_changed.subscribe(callback)
    }

    pub fn start_watching(&self) -> Result<(), WatchError> {
        self.notifier.start(WatchScope::Sessions).map(|_| ())
    }

    pub fn stop_watching(&self) {
        self.notifier.stop(&WatchScope::Sessions);
    }

    pub fn start_tasks_watching(&self) -> Result<(), WatchError> {
        self.notifier.start(WatchScope::Tasks).map(|_| ())
    }

    pub fn stop_tasks_watching(&self) {
        self.notifier.stop(&WatchScope::Tasks);
    }

    pub fn start_project_watching(&self, root: &Path) -> Result<(), WatchError> {
        self.notifier
            .start(WatchScope::Project(root.to_path_buf()))
            .map(|_| ())
    }

    pub fn stop_project_watching(&self, root: &Path) {
        self.notifier.stop(&WatchScope::Project(root.to_path_buf()));
    }

    pub fn stop_all_watching(&self) {
        self.notifier.stop_all();
    }

    /// Dispatches every queued event without blocking; returns how many were
    /// handled.
    pub fn pump_events(&self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.notifier.next_event(None) {
            self.handle_file_event(&event);
            handled += 1;
        }
        handled
    }

    /// Dispatches events until `shutdown` is set.
    pub fn run_until(&self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            if let Some(event) = self.notifier.next_event(Some(POLL_INTERVAL)) {
                self.handle_file_event(&event);
            }
        }
        debug!("event loop stopped");
    }

    /// Recomputes and broadcasts whatever `event` affects.
    pub fn handle_file_event(&self, event: &ScopedFileEvent) -> Option<ChangeKind> {
        let path = &event.event.path;
        let Some(change) = classify_change(&self.config.layout, &event.scope, path) else {
            trace!(path = %path.display(), "ignoring change");
            return None;
        };
        debug!(path = %path.display(), kind = ?event.event.kind, ?change, "file change");

        match &change {
            ChangeKind::SessionIndex => self.broadcast_sessions(),
            ChangeKind::SubagentLog | ChangeKind::TodoFile => self.broadcast_subagents(),
            ChangeKind::SessionLog { session_id } => {
                self.reader.invalidate(session_id);
                self.messages_changed.broadcast(&MessagesChanged {
                    session_id: session_id.clone(),
                });
                self.broadcast_sessions();
            }
            ChangeKind::TaskFile => {
                if !self.tasks_changed.is_empty() {
                    self.tasks_changed.broadcast(&self.list_tasks());
                }
            }
            ChangeKind::ProjectIssues { project } => {
                self.project_issues_changed.broadcast(project);
            }
        }
        Some(change)
    }

    fn broadcast_sessions(&self) {
        if !self.sessions_changed.is_empty() {
            self.sessions_changed.broadcast(&self.list_sessions(None));
        }
    }

    fn broadcast_subagents(&self) {
        if !self.subagents_changed.is_empty() {
            self.subagents_changed.broadcast(&self.list_active_subagents());
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.notifier.stop_all();
    }
}
