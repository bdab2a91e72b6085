use crate::domain::DEFAULT_STALE_THRESHOLD;
use dirs::home_dir;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const SESSIONS_INDEX_FILE: &str = "sessions-index.json";
pub const SESSION_LOG_EXTENSION: &str = "jsonl";
pub const TODO_EXTENSION: &str = "json";
pub const SUBAGENTS_DIR: &str = "subagents";
pub const AGENT_FILE_PREFIX: &str = "agent-";
pub const PROJECT_ISSUES_DIR: &str = ".beans";

pub const HEADER_SCAN_BYTES: usize = 16 * 1024;

/// Where the assistant keeps its data: `<root>/projects`, `<root>/todos`,
/// `<root>/tasks`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClaudeLayout {
    root: PathBuf,
}

impl ClaudeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn todos_dir(&self) -> PathBuf {
        self.root.join("todos")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }
}

#[derive(Debug, Error)]
pub enum ResolveClaudeDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    ResolveDir(#[from] ResolveClaudeDirError),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MonitorConfig {
    pub layout: ClaudeLayout,
    pub stale_threshold: Duration,
    /// Keep subagents that never reported a todo (debugging aid).
    pub show_empty_subagents: bool,
}

impl MonitorConfig {
    pub fn new(layout: ClaudeLayout) -> Self {
        Self {
            layout,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            show_empty_subagents: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Result<Self, ConfigError> {
        let root = match lookup("CLAUDE_CONFIG_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_claude_dir()?,
        };

        let mut config = Self::new(ClaudeLayout::new(root));

        if let Some(raw) = lookup("CCDECK_STALE_SECS") {
            let text = raw.to_string_lossy().trim().to_string();
            let secs = text
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "CCDECK_STALE_SECS",
                    value: text.clone(),
                })?;
            config.stale_threshold = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("CCDECK_SHOW_EMPTY_SUBAGENTS") {
            let text = raw.to_string_lossy().trim().to_ascii_lowercase();
            config.show_empty_subagents = match text.as_str() {
                "1" | "true" | "yes" | "on" => true,
                "" | "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "CCDECK_SHOW_EMPTY_SUBAGENTS",
                        value: text,
                    });
                }
            };
        }

        Ok(config)
    }
}

pub fn default_claude_dir() -> Result<PathBuf, ResolveClaudeDirError> {
    let Some(home) = home_dir() else {
        return Err(ResolveClaudeDirError::HomeDirNotFound);
    };
    Ok(home.join(".claude"))
}

pub fn is_session_log_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(SESSION_LOG_EXTENSION)
}

/// Session directories are named by a lowercase UUID.
pub fn is_session_dir_name(name: &str) -> bool {
    name.len() == 36 && is_hex_id(name)
}

pub fn is_hex_id(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch) || ch == '-')
}

/// `agent-<id>.jsonl` → `<id>`.
pub fn parse_agent_log_name(file_name: &str) -> Option<&str> {
    let agent_id = file_name
        .strip_prefix(AGENT_FILE_PREFIX)?
        .strip_suffix(".jsonl")?;
    is_hex_id(agent_id).then_some(agent_id)
}

/// `<session>-agent-<agent>.json` → `(session, agent)`.
pub fn parse_todo_file_name(file_name: &str) -> Option<(&str, &str)> {
    let stem = file_name.strip_suffix(".json")?;
    let (session_id, agent_id) = stem.split_once("-agent-")?;
    (is_hex_id(session_id) && is_hex_id(agent_id)).then_some((session_id, agent_id))
}
