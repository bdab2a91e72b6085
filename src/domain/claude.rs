use crate::domain::{Message, MessageContent, MessageRole};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const PREVIEW_MAX_CHARS: usize = 100;
pub const DEFAULT_PREVIEW: &str = "New session";

#[derive(Clone, Debug, Default)]
pub struct ClaudeSessionsIndex {
    pub version: Option<u32>,
    pub original_path: Option<String>,
    pub entries: Vec<ClaudeSessionsIndexEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeSessionsIndexEntry {
    pub session_id: Option<String>,

    #[serde(default)]
    pub full_path: Option<PathBuf>,

    #[serde(default)]
    pub file_mtime: Option<i64>,

    #[serde(default)]
    pub first_prompt: Option<String>,

    #[serde(default)]
    pub message_count: Option<u64>,

    #[serde(default)]
    pub created: Option<String>,

    #[serde(default)]
    pub modified: Option<String>,

    #[serde(default)]
    pub git_branch: Option<String>,

    #[serde(default)]
    pub project_path: Option<String>,

    #[serde(default)]
    pub is_sidechain: Option<bool>,
}

/// Parses `sessions-index.json`.
///
/// Accepts both the `{ "entries": [...] }` layout and a bare array. Entries that
/// do not deserialize are dropped individually; only text that is not JSON at
/// all is an error.
pub fn parse_claude_sessions_index(text: &str) -> Result<ClaudeSessionsIndex, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;

    let (raw_entries, version, original_path) = match value {
        Value::Array(items) => (items, None, None),
        Value::Object(mut map) => {
            let version = map
                .get("version")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok());
            let original_path = map
                .get("originalPath")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let entries = match map.remove("entries") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            (entries, version, original_path)
        }
        _ => (Vec::new(), None, None),
    };

    let entries = raw_entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<ClaudeSessionsIndexEntry>(entry).ok())
        .collect();

    Ok(ClaudeSessionsIndex {
        version,
        original_path,
        entries,
    })
}

pub fn parse_rfc3339(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).ok()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Converts one `user`/`assistant` log record into a message.
///
/// Returns `None` for every other record type and for records missing the
/// `uuid` or the `message` object. A missing or invalid `timestamp` takes
/// `fallback_timestamp`.
pub fn parse_claude_message(
    value: &Value,
    fallback_session_id: &str,
    fallback_timestamp: OffsetDateTime,
) -> Option<Message> {
    let record_type = value.get("type").and_then(|v| v.as_str())?;
    if record_type != "user" && record_type != "assistant" {
        return None;
    }

    let message = value.get("message").filter(|m| m.is_object())?;
    let role = message
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(MessageRole::parse)
        .or_else(|| MessageRole::parse(record_type))?;
    let id = value.get("uuid").and_then(|v| v.as_str())?.to_string();
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(parse_rfc3339)
        .unwrap_or(fallback_timestamp);
    let session_id = value
        .get("sessionId")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_session_id)
        .to_string();

    let content = parse_message_content(message.get("content").unwrap_or(&Value::Null));

    Some(Message {
        id,
        session_id,
        role,
        content,
        timestamp,
    })
}

pub fn parse_message_content(content: &Value) -> Vec<MessageContent> {
    let items = match content {
        Value::String(text) => {
            return vec![MessageContent::Text { text: text.clone() }];
        }
        Value::Array(items) => items,
        _ => return Vec::new(),
    };

    let mut out = Vec::new();
    for block in items {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match block_type {
            "text" => {
                let text = block.get("text").and_then(|v| v.as_str()).unwrap_or("");
                if text.is_empty() {
                    continue;
                }
                out.push(MessageContent::Text {
                    text: text.to_string(),
                });
            }
            "tool_use" => {
                let id = block.get("id").and_then(|v| v.as_str());
                let name = block.get("name").and_then(|v| v.as_str());
                let (Some(id), Some(name)) = (id, name) else {
                    continue;
                };
                out.push(MessageContent::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            "tool_result" => {
                let Some(tool_use_id) = block.get("tool_use_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                out.push(MessageContent::ToolResult {
                    tool_use_id: tool_use_id.to_string(),
                    content: flatten_tool_result(block.get("content").unwrap_or(&Value::Null)),
                });
            }
            // "thinking" and anything unknown never reach the message list.
            _ => {}
        }
    }
    out
}

fn flatten_tool_result(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|block| {
                if block.get("type").and_then(|v| v.as_str()) == Some("text") {
                    return block.get("text").and_then(|v| v.as_str());
                }
                None
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// First user-authored text of a record: string content, or the first
/// non-empty `text` block.
pub fn parse_claude_user_text(value: &Value) -> Option<String> {
    if value.get("type").and_then(|v| v.as_str()) != Some("user") {
        return None;
    }

    let content = value.get("message")?.get("content")?;
    match content {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Array(items) => items.iter().find_map(|block| {
            if block.get("type").and_then(|v| v.as_str()) != Some("text") {
                return None;
            }
            block
                .get("text")
                .and_then(|v| v.as_str())
                .filter(|text| !text.is_empty())
                .map(|text| text.to_string())
        }),
        _ => None,
    }
}

/// Accumulates the header fields of a session log, one record at a time.
#[derive(Clone, Debug)]
pub struct SessionHeaderScan {
    fallback_project_path: PathBuf,
    project_path: PathBuf,
    timestamp: Option<OffsetDateTime>,
    preview: Option<String>,
}

impl SessionHeaderScan {
    pub fn new(fallback_project_path: &Path) -> Self {
        Self {
            fallback_project_path: fallback_project_path.to_path_buf(),
            project_path: fallback_project_path.to_path_buf(),
            timestamp: None,
            preview: None,
        }
    }

    /// Feeds one parsed record; returns true once every field is resolved.
    pub fn observe(&mut self, value: &Value) -> bool {
        if let Some(cwd) = value.get("cwd").and_then(|v| v.as_str()) {
            let already_within = self.project_path.to_string_lossy().contains(cwd);
            if !cwd.is_empty() && !already_within {
                self.project_path = PathBuf::from(cwd);
            }
        }

        if self.timestamp.is_none() {
            self.timestamp = value
                .get("timestamp")
                .and_then(|v| v.as_str())
                .and_then(parse_rfc3339);
        }

        if self.preview.is_none() {
            self.preview = parse_claude_user_text(value)
                .map(|text| truncate_chars(&text, PREVIEW_MAX_CHARS));
        }

        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.project_path != self.fallback_project_path
            && self.timestamp.is_some()
            && self.preview.is_some()
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        self.timestamp
    }

    pub fn preview(&self) -> &str {
        self.preview.as_deref().unwrap_or(DEFAULT_PREVIEW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_sessions_index_entries() {
        let text = r#"{
            "version": 1,
            "originalPath": "/tmp/project",
            "entries": [
                {
                    "sessionId": "s1",
                    "fullPath": "/tmp/log.jsonl",
                    "fileMtime": 1760000000000,
                    "firstPrompt": "hello world",
                    "messageCount": 3,
                    "created": "2026-02-19T00:00:00Z",
                    "modified": "2026-02-19T00:01:00Z",
                    "gitBranch": "main",
                    "projectPath": "/tmp/project",
                    "isSidechain": false
                },
                "not an entry"
            ]
        }"#;
        let parsed = parse_claude_sessions_index(text).expect("parse");
        assert_eq!(parsed.version, Some(1));
        assert_eq!(parsed.original_path.as_deref(), Some("/tmp/project"));
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].session_id.as_deref(), Some("s1"));
        assert_eq!(parsed.entries[0].message_count, Some(3));
        assert_eq!(parsed.entries[0].git_branch.as_deref(), Some("main"));
    }

    #[test]
    fn parses_bare_array_index() {
        let parsed = parse_claude_sessions_index(r#"[{"sessionId":"a"},{"sessionId":"b"}]"#)
            .expect("parse");
        assert_eq!(parsed.entries.len(), 2);
        assert!(parse_claude_sessions_index("{not json").is_err());
    }

    #[test]
    fn thinking_blocks_are_dropped_but_siblings_kept() {
        let line = json!({
            "type": "assistant",
            "uuid": "m1",
            "timestamp": "2026-02-19T00:00:00Z",
            "message": {
                "role": "assistant",
                "content": [
                    { "type": "thinking", "thinking": "hmm" },
                    { "type": "text", "text": "answer" }
                ]
            }
        });
        let message = parse_claude_message(&line, "s1", OffsetDateTime::UNIX_EPOCH).expect("message");
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.session_id, "s1");
        assert_eq!(
            message.content,
            vec![MessageContent::Text {
                text: "answer".to_string()
            }]
        );
    }

    #[test]
    fn tool_blocks_require_their_ids() {
        let content = json!([
            { "type": "tool_use", "id": "toolu_1", "name": "Bash", "input": { "cmd": "ls" } },
            { "type": "tool_use", "name": "NoId" },
            { "type": "tool_result", "tool_use_id": "toolu_1", "content": [{ "type": "text", "text": "ok" }] },
            { "type": "tool_result", "content": "orphan" },
            { "type": "text", "text": "" }
        ]);
        let blocks = parse_message_content(&content);
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            blocks[0],
            MessageContent::ToolUse {
                id: "toolu_1".to_string(),
                name: "Bash".to_string(),
                input: json!({ "cmd": "ls" }),
            }
        );
        assert_eq!(
            blocks[1],
            MessageContent::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: "ok".to_string(),
            }
        );
    }

    #[test]
    fn non_conversation_records_are_ignored() {
        let summary = json!({ "type": "summary", "summary": "x" });
        assert!(parse_claude_message(&summary, "s", OffsetDateTime::UNIX_EPOCH).is_none());

        let no_uuid = json!({
            "type": "user",
            "timestamp": "2026-02-19T00:00:00Z",
            "message": { "role": "user", "content": "hi" }
        });
        assert!(parse_claude_message(&no_uuid, "s", OffsetDateTime::UNIX_EPOCH).is_none());
    }

    #[test]
    fn missing_timestamp_takes_the_fallback() {
        let fallback = time::macros::datetime!(2026-02-19 08:30 UTC);
        let untimed = json!({
            "type": "user",
            "uuid": "m2",
            "message": { "role": "user", "content": "still here" }
        });
        let message = parse_claude_message(&untimed, "s", fallback).expect("message");
        assert_eq!(message.timestamp, fallback);

        let garbled = json!({
            "type": "assistant",
            "uuid": "m3",
            "timestamp": "yesterday",
            "message": { "role": "assistant", "content": "ok" }
        });
        let message = parse_claude_message(&garbled, "s", fallback).expect("message");
        assert_eq!(message.timestamp, fallback);
    }

    #[test]
    fn header_scan_resolves_cwd_timestamp_and_preview() {
        let mut scan = SessionHeaderScan::new(Path::new("/fallback"));
        let meta = json!({ "type": "file-history-snapshot" });
        assert!(!scan.observe(&meta));

        let first = json!({
            "type": "user",
            "cwd": "/proj",
            "timestamp": "2024-01-01T00:00:00Z",
            "message": { "role": "user", "content": [{ "type": "text", "text": "hi there" }] }
        });
        assert!(scan.observe(&first));
        assert_eq!(scan.project_path(), Path::new("/proj"));
        assert_eq!(scan.preview(), "hi there");
        assert_eq!(
            scan.timestamp(),
            Some(time::macros::datetime!(2024-01-01 00:00 UTC))
        );
    }

    #[test]
    fn header_scan_keeps_fallback_when_cwd_is_contained() {
        let mut scan = SessionHeaderScan::new(Path::new("/Users/a/my-project"));
        scan.observe(&json!({ "cwd": "/Users/a" }));
        assert_eq!(scan.project_path(), Path::new("/Users/a/my-project"));
        assert!(!scan.is_complete());
        assert_eq!(scan.preview(), DEFAULT_PREVIEW);
    }

    #[test]
    fn preview_is_truncated() {
        let long = "x".repeat(250);
        let mut scan = SessionHeaderScan::new(Path::new("/f"));
        scan.observe(&json!({ "type": "user", "message": { "content": long } }));
        assert_eq!(scan.preview().chars().count(), PREVIEW_MAX_CHARS);
    }
}
