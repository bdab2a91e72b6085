use crate::domain::{Subagent, SubagentStatus, Todo, TodoStatus};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::time::Duration;
use time::OffsetDateTime;

pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);
pub const TODO_WRITE_TOOL: &str = "TodoWrite";

const INITIALIZING_NAME: &str = "Initializing...";
const STARTING_DESCRIPTION: &str = "Starting up...";

/// A todo as written by the assistant's task-list tool.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTodo {
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub active_form: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl RawTodo {
    fn label(&self) -> &str {
        self.active_form.as_deref().unwrap_or(&self.content)
    }
}

pub fn parse_todo_list(text: &str) -> Result<Vec<RawTodo>, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn to_todos(raw: &[RawTodo], id_prefix: &str) -> Vec<Todo> {
    raw.iter()
        .enumerate()
        .map(|(index, todo)| Todo {
            id: todo
                .id
                .clone()
                .unwrap_or_else(|| format!("{id_prefix}-{index}")),
            content: todo.content.clone(),
            status: todo.status,
        })
        .collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TodoProgress {
    pub total: usize,
    pub completed: usize,
    pub has_incomplete: bool,
}

impl TodoProgress {
    pub fn of(todos: &[RawTodo]) -> Self {
        Self {
            total: todos.len(),
            completed: todos
                .iter()
                .filter(|todo| todo.status == TodoStatus::Completed)
                .count(),
            has_incomplete: todos.iter().any(|todo| todo.status.is_incomplete()),
        }
    }
}

pub fn derive_subagent_status(progress: TodoProgress, stale: bool) -> SubagentStatus {
    if progress.total == 0 {
        return if stale {
            SubagentStatus::Failed
        } else {
            SubagentStatus::Initializing
        };
    }
    if progress.completed == progress.total {
        return SubagentStatus::Completed;
    }
    match (progress.has_incomplete, stale) {
        (true, true) => SubagentStatus::Failed,
        (true, false) => SubagentStatus::Running,
        (false, _) => SubagentStatus::Completed,
    }
}

pub fn is_stale(modified: OffsetDateTime, now: OffsetDateTime, threshold: Duration) -> bool {
    let Ok(threshold) = time::Duration::try_from(threshold) else {
        return false;
    };
    now - modified > threshold
}

/// Everything needed to materialize one subagent record from either source.
#[derive(Clone, Debug)]
pub struct SubagentSnapshot {
    pub agent_id: String,
    pub session_id: String,
    pub todos: Vec<RawTodo>,
    pub started_at: OffsetDateTime,
    pub modified_at: OffsetDateTime,
}

pub fn build_subagent(
    snapshot: SubagentSnapshot,
    now: OffsetDateTime,
    stale_threshold: Duration,
) -> Subagent {
    let progress = TodoProgress::of(&snapshot.todos);
    let stale = is_stale(snapshot.modified_at, now, stale_threshold);
    let status = derive_subagent_status(progress, stale);

    let todos = &snapshot.todos;
    let in_progress = todos
        .iter()
        .find(|todo| todo.status == TodoStatus::InProgress);
    let pending = todos.iter().find(|todo| todo.status == TodoStatus::Pending);
    let active = in_progress.or(pending).or_else(|| todos.first());

    let name = todos
        .first()
        .map(|todo| todo.content.clone())
        .unwrap_or_else(|| INITIALIZING_NAME.to_string());
    let description = active
        .map(|todo| todo.label().to_string())
        .unwrap_or_else(|| STARTING_DESCRIPTION.to_string());

    let completed = status == SubagentStatus::Completed;
    let cached_todos = completed.then(|| to_todos(todos, &snapshot.agent_id));

    Subagent {
        in_progress_task: in_progress.map(|todo| todo.label().to_string()),
        completed_at: completed.then_some(snapshot.modified_at),
        id: snapshot.agent_id,
        session_id: snapshot.session_id,
        status,
        name,
        description,
        started_at: snapshot.started_at,
        total_tasks: progress.total,
        completed_tasks: progress.completed,
        cached_todos,
    }
}

/// Active subagents first, then newest start first.
pub fn sort_subagents(subagents: &mut [Subagent]) {
    subagents.sort_by(|a, b| match (a.status.is_active(), b.status.is_active()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => b.started_at.cmp(&a.started_at),
    });
}

/// Todos carried by the most recent task-list tool call in a log.
///
/// Walks the lines from the end so the latest call wins; unparseable lines are
/// skipped.
pub fn find_last_todo_write<'a, I>(lines: I) -> Option<Vec<RawTodo>>
where
    I: DoubleEndedIterator<Item = &'a str>,
{
    for line in lines.rev() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        if let Some(todos) = todo_write_in_record(&value) {
            return Some(todos);
        }
    }
    None
}

fn todo_write_in_record(value: &Value) -> Option<Vec<RawTodo>> {
    let blocks = value.get("message")?.get("content")?.as_array()?;
    blocks.iter().rev().find_map(|block| {
        if block.get("name").and_then(|v| v.as_str()) != Some(TODO_WRITE_TOOL) {
            return None;
        }
        let todos = block.get("input")?.get("todos")?;
        serde_json::from_value::<Vec<RawTodo>>(todos.clone()).ok()
    })
}

/// Timestamp of the first record of a log, if it carries one.
pub fn first_record_timestamp(text: &str) -> Option<OffsetDateTime> {
    let first = text.lines().find(|line| !line.trim().is_empty())?;
    let value: Value = serde_json::from_str(first.trim()).ok()?;
    value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(crate::domain::parse_rfc3339)
}
