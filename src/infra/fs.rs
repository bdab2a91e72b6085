use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::time::SystemTime;
use time::OffsetDateTime;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileStat {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl FileStat {
    pub fn modified_at(&self) -> Option<OffsetDateTime> {
        self.modified.map(OffsetDateTime::from)
    }

    /// Creation time where the platform records it, else modification time.
    pub fn created_at(&self) -> Option<OffsetDateTime> {
        self.created.or(self.modified).map(OffsetDateTime::from)
    }
}

/// The filesystem capabilities the ingestion core relies on.
pub trait FileSystem: Send + Sync {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Reads at most `max_bytes` from the start of the file.
    fn read_prefix(&self, path: &Path, max_bytes: usize) -> io::Result<Vec<u8>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(path)? {
            let Ok(entry) = entry else {
                continue;
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let is_dir = if file_type.is_symlink() {
                entry.path().is_dir()
            } else {
                file_type.is_dir()
            };
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = fs::metadata(path)?;
        Ok(FileStat {
            size: metadata.len(),
            modified: metadata.modified().ok(),
            created: metadata.created().ok(),
        })
    }

    fn read_prefix(&self, path: &Path, max_bytes: usize) -> io::Result<Vec<u8>> {
        let file = File::open(path)?;
        let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
        file.take(max_bytes as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the real filesystem and counts content reads.
    #[derive(Debug, Default)]
    pub(crate) struct CountingFileSystem {
        full_reads: AtomicUsize,
        prefix_reads: AtomicUsize,
    }

    impl CountingFileSystem {
        pub(crate) fn full_reads(&self) -> usize {
            self.full_reads.load(Ordering::SeqCst)
        }

        pub(crate) fn prefix_reads(&self) -> usize {
            self.prefix_reads.load(Ordering::SeqCst)
        }
    }

    impl FileSystem for CountingFileSystem {
        fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
            OsFileSystem.read_dir(path)
        }

        fn stat(&self, path: &Path) -> io::Result<FileStat> {
            OsFileSystem.stat(path)
        }

        fn read_prefix(&self, path: &Path, max_bytes: usize) -> io::Result<Vec<u8>> {
            self.prefix_reads.fetch_add(1, Ordering::SeqCst);
            OsFileSystem.read_prefix(path, max_bytes)
        }

        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            self.full_reads.fetch_add(1, Ordering::SeqCst);
            OsFileSystem.read_to_string(path)
        }

        fn exists(&self, path: &Path) -> bool {
            OsFileSystem.exists(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_prefix_is_bounded() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("big.jsonl");
        fs::write(&path, "a".repeat(100)).expect("write");

        let prefix = OsFileSystem.read_prefix(&path, 10).expect("read");
        assert_eq!(prefix.len(), 10);
        assert_eq!(OsFileSystem.stat(&path).expect("stat").size, 100);
    }

    #[test]
    fn read_dir_reports_directories() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        fs::write(dir.path().join("file.json"), "{}").expect("write");

        let entries = OsFileSystem.read_dir(dir.path()).expect("list");
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "file.json".to_string(),
                    is_dir: false
                },
                DirEntry {
                    name: "sub".to_string(),
                    is_dir: true
                },
            ]
        );
        assert!(OsFileSystem.read_dir(&dir.path().join("missing")).is_err());
    }
}
