use crate::infra::{ClaudeLayout, PROJECT_ISSUES_DIR, SESSIONS_INDEX_FILE, SUBAGENTS_DIR};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum WatchScope {
    /// Projects root (recursive) plus the todos dir.
    Sessions,
    Tasks,
    /// The issue directory of one project root.
    Project(PathBuf),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileEventKind {
    Changed,
    Removed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScopedFileEvent {
    pub scope: WatchScope,
    pub generation: u64,
    pub event: FileEvent,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    SessionIndex,
    SubagentLog,
    SessionLog { session_id: String },
    TodoFile,
    TaskFile,
    ProjectIssues { project: PathBuf },
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Maps a changed path to what has to be recomputed; `None` means ignore.
///
/// Paths outside the scope's own directories are ignored, so a watch on a
/// parent directory (see [`ChangeNotifier::start`]) never leaks unrelated files.
pub fn classify_change(layout: &ClaudeLayout, scope: &WatchScope, path: &Path) -> Option<ChangeKind> {
    let ext = extension(path);

    if path.starts_with(layout.projects_dir()) {
        if path.file_name().and_then(|name| name.to_str()) == Some(SESSIONS_INDEX_FILE) {
            return Some(ChangeKind::SessionIndex);
        }

        if ext == Some("jsonl") {
            if path
                .components()
                .any(|component| component.as_os_str() == SUBAGENTS_DIR)
            {
                return Some(ChangeKind::SubagentLog);
            }
            let session_id = path.file_stem()?.to_str()?.to_string();
            return Some(ChangeKind::SessionLog { session_id });
        }
    }

    if ext == Some("json") && path.starts_with(layout.todos_dir()) {
        return Some(ChangeKind::TodoFile);
    }

    match scope {
        WatchScope::Tasks if ext == Some("json") && path.starts_with(layout.tasks_dir()) => {
            Some(ChangeKind::TaskFile)
        }
        WatchScope::Project(root)
            if ext == Some("md") && path.starts_with(root.join(PROJECT_ISSUES_DIR)) =>
        {
            Some(ChangeKind::ProjectIssues {
                project: root.clone(),
            })
        }
        _ => None,
    }
}

/// Directories a scope listens on.
pub fn scope_watch_targets(layout: &ClaudeLayout, scope: &WatchScope) -> Vec<(PathBuf, RecursiveMode)> {
    match scope {
        WatchScope::Sessions => vec![
            (layout.projects_dir(), RecursiveMode::Recursive),
            (layout.todos_dir(), RecursiveMode::NonRecursive),
        ],
        WatchScope::Tasks => vec![(layout.tasks_dir(), RecursiveMode::Recursive)],
        WatchScope::Project(root) => {
            vec![(root.join(PROJECT_ISSUES_DIR), RecursiveMode::NonRecursive)]
        }
    }
}

/// A watch target that did not exist when its scope started.
struct PendingTarget {
    path: PathBuf,
    recursive: bool,
    /// Nearest existing ancestor currently watched in its place.
    anchor: Option<PathBuf>,
}

impl PendingTarget {
    fn mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

struct ActiveScope {
    generation: u64,
    debouncer: Debouncer<RecommendedWatcher>,
    pending: Vec<PendingTarget>,
}

fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .find(|ancestor| ancestor.is_dir())
        .map(Path::to_path_buf)
}

/// Watches the nearest existing ancestor of `target` (non-recursive) unless it
/// is already the anchor.
fn watch_anchor(debouncer: &mut Debouncer<RecommendedWatcher>, target: &mut PendingTarget) {
    let Some(anchor) = nearest_existing_ancestor(&target.path) else {
        return;
    };
    if target.anchor.as_ref() == Some(&anchor) {
        return;
    }
    match debouncer.watcher().watch(&anchor, RecursiveMode::NonRecursive) {
        Ok(()) => {
            debug!(
                path = %target.path.display(),
                anchor = %anchor.display(),
                "waiting for watch target"
            );
            target.anchor = Some(anchor);
        }
        Err(error) => warn!(?error, anchor = %anchor.display(), "failed to watch parent dir"),
    }
}

fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_files(&path, recursive, out);
            }
        } else {
            out.push(path);
        }
    }
}

/// One debounced watcher per scope, all feeding a single queue.
///
/// Watcher threads only enqueue; the owner drains the queue with
/// [`ChangeNotifier::next_event`], which drops events of stopped or restarted
/// scopes.
pub struct ChangeNotifier {
    layout: ClaudeLayout,
    scopes: Mutex<HashMap<WatchScope, ActiveScope>>,
    next_generation: AtomicU64,
    tx: Sender<ScopedFileEvent>,
    rx: Mutex<Receiver<ScopedFileEvent>>,
}

impl ChangeNotifier {
    pub fn new(layout: ClaudeLayout) -> Self {
        let (tx, rx) = channel();
        Self {
            layout,
            scopes: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn scopes(&self) -> MutexGuard<'_, HashMap<WatchScope, ActiveScope>> {
        self.scopes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts (or restarts) the watcher of `scope`; returns its generation.
    pub fn start(&self, scope: WatchScope) -> Result<u64, WatchError> {
        self.stop(&scope);

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let tx = self.tx.clone();
        let event_scope = scope.clone();
        let mut debouncer = new_debouncer(DEBOUNCE_WINDOW, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        let kind = if event.path.exists() {
                            FileEventKind::Changed
                        } else {
                            FileEventKind::Removed
                        };
                        let scoped = ScopedFileEvent {
                            scope: event_scope.clone(),
                            generation,
                            event: FileEvent {
                                kind,
                                path: event.path,
                            },
                        };
                        if tx.send(scoped).is_err() {
                            return;
                        }
                    }
                }
                Err(error) => warn!(?error, "file watcher error"),
            }
        })?;

        let mut watched = 0usize;
        let mut pending = Vec::new();
        for (path, mode) in scope_watch_targets(&self.layout, &scope) {
            if path.is_dir() {
                debouncer.watcher().watch(&path, mode)?;
                watched += 1;
                continue;
            }
            let mut target = PendingTarget {
                path,
                recursive: matches!(mode, RecursiveMode::Recursive),
                anchor: None,
            };
            watch_anchor(&mut debouncer, &mut target);
            pending.push(target);
        }
        info!(?scope, generation, watched, pending = pending.len(), "watching");

        self.scopes().insert(
            scope,
            ActiveScope {
                generation,
                debouncer,
                pending,
            },
        );
        Ok(generation)
    }

    /// Arms pending targets of `scope` that exist by now.
    ///
    /// Files already inside a freshly armed directory are queued as `Changed`
    /// events, since they may have been written before the watch was added.
    fn arm_pending(&self, scope: &WatchScope) {
        let mut scopes = self.scopes();
        let Some(active) = scopes.get_mut(scope) else {
            return;
        };
        if active.pending.is_empty() {
            return;
        }

        let mut still_pending = Vec::new();
        let mut armed = Vec::new();
        for mut target in std::mem::take(&mut active.pending) {
            if !target.path.is_dir() {
                watch_anchor(&mut active.debouncer, &mut target);
                still_pending.push(target);
                continue;
            }
            if let Err(error) = active.debouncer.watcher().watch(&target.path, target.mode()) {
                warn!(?error, path = %target.path.display(), "failed to arm watch target");
                still_pending.push(target);
                continue;
            }
            info!(?scope, path = %target.path.display(), "watch target appeared");
            armed.push(target);
        }

        for target in &armed {
            let Some(anchor) = &target.anchor else {
                continue;
            };
            let shared = still_pending
                .iter()
                .any(|other| other.anchor.as_ref() == Some(anchor));
            if !shared {
                let _ = active.debouncer.watcher().unwatch(anchor);
            }
        }
        active.pending = still_pending;

        let generation = active.generation;
        for target in armed {
            let mut files = Vec::new();
            collect_files(&target.path, target.recursive, &mut files);
            for path in files {
                let _ = self.tx.send(ScopedFileEvent {
                    scope: scope.clone(),
                    generation,
                    event: FileEvent {
                        kind: FileEventKind::Changed,
                        path,
                    },
                });
            }
        }
    }

    /// Stops `scope`; `false` when it was not running.
    pub fn stop(&self, scope: &WatchScope) -> bool {
        let removed = self.scopes().remove(scope);
        if let Some(active) = &removed {
            debug!(?scope, generation = active.generation, "stopped watching");
        }
        removed.is_some()
    }

    pub fn stop_all(&self) {
        self.scopes().clear();
    }

    pub fn is_active(&self, scope: &WatchScope) -> bool {
        self.scopes().contains_key(scope)
    }

    pub fn is_current(&self, scope: &WatchScope, generation: u64) -> bool {
        self.scopes()
            .get(scope)
            .is_some_and(|active| active.generation == generation)
    }

    /// Next event of a live scope. `None` timeout means do not block.
    pub fn next_event(&self, timeout: Option<Duration>) -> Option<ScopedFileEvent> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let rx = self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            let event = match deadline {
                None => rx.try_recv().ok()?,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(remaining) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                            return None;
                        }
                    }
                }
            };
            if self.is_current(&event.scope, event.generation) {
                self.arm_pending(&event.scope);
                return Some(event);
            }
            trace!(scope = ?event.scope, generation = event.generation, "dropping stale event");
        }
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, event: ScopedFileEvent) {
        let _ = self.tx.send(event);
    }
}
