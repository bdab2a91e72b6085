use crate::domain::{DecodedProjectPath, Project, decode_project_dir_name, display_name};
use crate::infra::{
    AGENT_FILE_PREFIX, ClaudeLayout, FileSystem, SESSIONS_INDEX_FILE, is_session_log_path,
};
use std::path::Path;
use time::OffsetDateTime;
use tracing::debug;

pub fn decode_project_path(fs: &dyn FileSystem, dir_name: &str) -> DecodedProjectPath {
    decode_project_dir_name(dir_name, |candidate| fs.exists(candidate))
}

/// Names of every project directory under the projects root.
pub fn list_project_dir_names(fs: &dyn FileSystem, layout: &ClaudeLayout) -> Vec<String> {
    let projects_dir = layout.projects_dir();
    match fs.read_dir(&projects_dir) {
        Ok(entries) => entries
            .into_iter()
            .filter(|entry| entry.is_dir)
            .map(|entry| entry.name)
            .collect(),
        Err(error) => {
            debug!(dir = %projects_dir.display(), %error, "projects dir not readable");
            Vec::new()
        }
    }
}

pub fn list_projects(fs: &dyn FileSystem, layout: &ClaudeLayout) -> Vec<Project> {
    let projects_dir = layout.projects_dir();
    let mut projects: Vec<Project> = Vec::new();

    for dir_name in list_project_dir_names(fs, layout) {
        let project_dir = projects_dir.join(&dir_name);
        let Some(last_activity) = project_last_activity(fs, &project_dir) else {
            continue;
        };

        let decoded = decode_project_path(fs, &dir_name);
        projects.push(Project {
            name: display_name(decoded.path()),
            path_verified: decoded.is_verified(),
            root_path: decoded.into_path_buf(),
            id: dir_name,
            last_activity,
        });
    }

    projects.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    projects
}

/// Index file mtime, else the newest session log mtime; `None` when the
/// directory holds neither.
fn project_last_activity(fs: &dyn FileSystem, project_dir: &Path) -> Option<OffsetDateTime> {
    if let Ok(stat) = fs.stat(&project_dir.join(SESSIONS_INDEX_FILE)) {
        return Some(
            stat.modified_at()
                .unwrap_or(OffsetDateTime::UNIX_EPOCH),
        );
    }

    let entries = fs.read_dir(project_dir).ok()?;
    entries
        .iter()
        .filter(|entry| !entry.is_dir && !entry.name.starts_with(AGENT_FILE_PREFIX))
        .filter(|entry| is_session_log_path(Path::new(&entry.name)))
        .map(|entry| {
            fs.stat(&project_dir.join(&entry.name))
                .ok()
                .and_then(|stat| stat.modified_at())
                .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        })
        .max()
}
