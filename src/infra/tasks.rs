use crate::domain::{ClaudeTask, parse_claude_task, sort_tasks};
use crate::infra::{ClaudeLayout, FileSystem, TODO_EXTENSION};
use tracing::debug;

/// Tasks of every session under `tasks/`, each session's list sorted by id.
pub fn list_tasks(fs: &dyn FileSystem, layout: &ClaudeLayout) -> Vec<ClaudeTask> {
    let Ok(entries) = fs.read_dir(&layout.tasks_dir()) else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter(|entry| entry.is_dir && !entry.name.starts_with('.'))
        .flat_map(|entry| list_session_tasks(fs, layout, &entry.name))
        .collect()
}

pub fn list_session_tasks(
    fs: &dyn FileSystem,
    layout: &ClaudeLayout,
    session_id: &str,
) -> Vec<ClaudeTask> {
    let session_dir = layout.tasks_dir().join(session_id);
    let Ok(entries) = fs.read_dir(&session_dir) else {
        return Vec::new();
    };

    let mut tasks = Vec::new();
    for entry in entries {
        if entry.is_dir || entry.name.starts_with('.') {
            continue;
        }
        let path = session_dir.join(&entry.name);
        if path.extension().and_then(|ext| ext.to_str()) != Some(TODO_EXTENSION) {
            continue;
        }
        let Ok(text) = fs.read_to_string(&path) else {
            continue;
        };
        match parse_claude_task(&text, session_id) {
            Ok(task) => tasks.push(task),
            Err(error) => debug!(path = %path.display(), %error, "skipping invalid task file"),
        }
    }

    sort_tasks(&mut tasks);
    tasks
}
