use std::path::{Path, PathBuf};

/// A project root decoded from its directory name.
///
/// Hyphens in the encoded name are ambiguous (separator or literal), so the
/// decoder checks the filesystem. `BestEffort` means no candidate existed and
/// the naive decoding was returned instead.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodedProjectPath {
    Verified(PathBuf),
    BestEffort(PathBuf),
}

impl DecodedProjectPath {
    pub fn path(&self) -> &Path {
        match self {
            Self::Verified(path) | Self::BestEffort(path) => path,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    pub fn into_path_buf(self) -> PathBuf {
        match self {
            Self::Verified(path) | Self::BestEffort(path) => path,
        }
    }
}

pub fn encode_project_path(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|ch| if std::path::is_separator(ch) { '-' } else { ch })
        .collect()
}

pub fn decode_project_dir_name(
    dir_name: &str,
    exists: impl Fn(&Path) -> bool,
) -> DecodedProjectPath {
    let Some(rest) = dir_name.strip_prefix('-') else {
        let naive = PathBuf::from(dir_name.replace('-', "/"));
        return if exists(&naive) {
            DecodedProjectPath::Verified(naive)
        } else {
            DecodedProjectPath::BestEffort(naive)
        };
    };

    let parts: Vec<&str> = rest.split('-').collect();
    for joined_tail in 0..parts.len() {
        let split_at = parts.len() - joined_tail;
        let mut candidate = format!("/{}", parts[..split_at].join("/"));
        if joined_tail > 0 {
            candidate.push('-');
            candidate.push_str(&parts[split_at..].join("-"));
        }

        let candidate = PathBuf::from(candidate);
        if exists(&candidate) {
            return DecodedProjectPath::Verified(candidate);
        }
    }

    DecodedProjectPath::BestEffort(PathBuf::from(format!("/{}", rest.replace('-', "/"))))
}

pub fn display_name(path: &Path) -> String {
    path.to_string_lossy()
        .split(std::path::is_separator)
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(|segment| segment.to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn existing(paths: &[&str]) -> impl Fn(&Path) -> bool {
        let set: HashSet<PathBuf> = paths.iter().map(PathBuf::from).collect();
        move |path: &Path| set.contains(path)
    }

    #[test]
    fn encodes_separators_as_hyphens() {
        assert_eq!(
            encode_project_path(Path::new("/Users/a/my-project")),
            "-Users-a-my-project"
        );
    }

    #[test]
    fn decodes_hyphenated_folder_when_it_exists() {
        let decoded = decode_project_dir_name(
            "-Users-a-my-project",
            existing(&["/Users/a/my-project"]),
        );
        assert_eq!(
            decoded,
            DecodedProjectPath::Verified(PathBuf::from("/Users/a/my-project"))
        );
    }

    #[test]
    fn prefers_plain_separators_when_that_path_exists() {
        let decoded = decode_project_dir_name("-srv-app", existing(&["/srv/app", "/srv-app"]));
        assert_eq!(decoded.path(), Path::new("/srv/app"));
        assert!(decoded.is_verified());
    }

    #[test]
    fn joins_several_trailing_parts() {
        let decoded = decode_project_dir_name(
            "-home-dev-claude-center-app",
            existing(&["/home/dev-claude-center-app"]),
        );
        assert_eq!(decoded.path(), Path::new("/home/dev-claude-center-app"));
    }

    #[test]
    fn falls_back_to_naive_decoding() {
        let decoded = decode_project_dir_name("-a-b-c", |_: &Path| false);
        assert_eq!(decoded, DecodedProjectPath::BestEffort(PathBuf::from("/a/b/c")));
    }

    #[test]
    fn relative_names_decode_naively() {
        let decoded = decode_project_dir_name("a-b", |_: &Path| false);
        assert_eq!(decoded.into_path_buf(), PathBuf::from("a/b"));
    }

    #[test]
    fn display_name_is_last_segment() {
        assert_eq!(display_name(Path::new("/Users/a/my-project")), "my-project");
        assert_eq!(display_name(Path::new("/Users/a/my-project/")), "my-project");
        assert_eq!(display_name(Path::new("/")), "/");
    }
}
