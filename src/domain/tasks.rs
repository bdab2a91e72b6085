use serde::{Deserialize, Serialize};

/// A native task file from `tasks/<session-id>/<task-id>.json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeTask {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    /// Owning session; taken from the directory name, never from the file.
    #[serde(default)]
    pub session_id: String,
}

pub fn parse_claude_task(text: &str, session_id: &str) -> Result<ClaudeTask, serde_json::Error> {
    let mut task: ClaudeTask = serde_json::from_str(text)?;
    task.session_id = session_id.to_string();
    Ok(task)
}

/// Numeric ids in numeric order; non-numeric ids after them, lexically.
pub fn sort_tasks(tasks: &mut [ClaudeTask]) {
    tasks.sort_by(|a, b| {
        task_order_key(&a.id)
            .cmp(&task_order_key(&b.id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn task_order_key(id: &str) -> (bool, u64) {
    match id.parse::<u64>() {
        Ok(n) => (false, n),
        Err(_) => (true, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_and_stamps_session() {
        let json = r#"{
            "id": "1",
            "subject": "Test task",
            "description": "A test task description",
            "activeForm": "Testing",
            "status": "pending",
            "blocks": ["2"],
            "blockedBy": [],
            "sessionId": "ignored"
        }"#;

        let task = parse_claude_task(json, "s1").expect("parse");
        assert_eq!(task.subject, "Test task");
        assert_eq!(task.active_form.as_deref(), Some("Testing"));
        assert_eq!(task.blocks, vec!["2"]);
        assert_eq!(task.session_id, "s1");
    }

    #[test]
    fn parses_minimal_task() {
        let task = parse_claude_task(r#"{"id":"1","subject":"Minimal"}"#, "s").expect("parse");
        assert_eq!(task.status, "");
        assert!(task.blocked_by.is_empty());
    }

    #[test]
    fn sorts_numeric_ids_numerically() {
        let mut tasks: Vec<ClaudeTask> = ["10", "2", "b", "1", "a"]
            .iter()
            .map(|id| parse_claude_task(&format!(r#"{{"id":"{id}","subject":"x"}}"#), "s"))
            .collect::<Result<_, _>>()
            .expect("parse");
        sort_tasks(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "10", "a", "b"]);
    }
}
