//! File system abstraction for testability.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Base name of the entry.
    pub name: String,
    /// Full path of the entry.
    pub path: PathBuf,
    /// Size reported by the entry's own metadata (not a recursive total).
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Abstraction over file system operations for testability.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Lists the entries of a directory in the order the platform yields them.
    async fn read_dir(&self, path: &Path) -> std::io::Result<Vec<EntryInfo>>;

    /// Returns the last modification time of a path, if it exists.
    async fn modified(&self, path: &Path) -> Option<SystemTime>;

    /// Removes a directory and everything below it.
    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Removes a single file.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// Default file system implementation using `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    /// Creates a new `TokioFileSystem` instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn read_dir(&self, path: &Path) -> std::io::Result<Vec<EntryInfo>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            // Follows symlinks, matching what a stat of the path reports.
            let metadata = tokio::fs::metadata(entry.path()).await?;
            entries.push(EntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size: metadata.len(),
                is_dir: metadata.is_dir(),
            });
        }
        Ok(entries)
    }

    async fn modified(&self, path: &Path) -> Option<SystemTime> {
        tokio::fs::metadata(path).await.ok()?.modified().ok()
    }

    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn tokio_fs_read_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        let mut file = std::fs::File::create(dir.path().join("index.html")).unwrap();
        file.write_all(b"hello").unwrap();

        let fs = TokioFileSystem::new();
        let mut entries = fs.read_dir(dir.path()).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "css");
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "index.html");
        assert_eq!(entries[1].size, 5);
        assert!(!entries[1].is_dir);
    }

    #[tokio::test]
    async fn tokio_fs_read_dir_missing() {
        let dir = TempDir::new().unwrap();
        let fs = TokioFileSystem::new();
        assert!(fs.read_dir(&dir.path().join("nope")).await.is_err());
    }

    #[tokio::test]
    async fn tokio_fs_modified_and_remove() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("site.zip"), b"zip").unwrap();

        let fs = TokioFileSystem::new();
        assert!(fs.modified(&nested).await.is_some());

        fs.remove_dir_all(&dir.path().join("a")).await.unwrap();
        assert!(!dir.path().join("a").exists());
        assert!(fs.modified(&nested).await.is_none());

        fs.remove_file(&dir.path().join("site.zip")).await.unwrap();
        assert!(!dir.path().join("site.zip").exists());
    }
}
