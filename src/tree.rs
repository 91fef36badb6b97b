//! Text rendering of a finished download directory.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::Result;
use crate::fs::{EntryInfo, FileSystem};

const BRANCH: &str = "├── ";
const INDENT: &str = "│   ";

/// Renders every entry below `root` as an indented tree, one line per entry.
///
/// Each line reads `├── name (size)` where size is the entry's own metadata
/// length in bytes. Directories are listed before their contents and their
/// children are indented one level deeper. Entries appear in listing order.
///
/// # Errors
///
/// Returns an error if any directory below `root` cannot be listed.
pub async fn directory_tree<F: FileSystem + ?Sized>(fs: &F, root: &Path) -> Result<String> {
    let mut tree = String::new();
    let mut stack: Vec<(std::vec::IntoIter<EntryInfo>, String)> =
        vec![(fs.read_dir(root).await?.into_iter(), String::new())];

    while let Some((entries, prefix)) = stack.last_mut() {
        let Some(entry) = entries.next() else {
            stack.pop();
            continue;
        };
        let _ = writeln!(tree, "{prefix}{BRANCH}{} ({})", entry.name, entry.size);
        if entry.is_dir {
            let child_prefix = format!("{prefix}{INDENT}");
            let children = fs.read_dir(&entry.path).await?;
            stack.push((children.into_iter(), child_prefix));
        }
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::TokioFileSystem;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// In-memory listing keyed by directory path, preserving insertion order.
    struct MockFileSystem {
        dirs: HashMap<PathBuf, Vec<EntryInfo>>,
    }

    impl MockFileSystem {
        fn entry(parent: &str, name: &str, size: u64, is_dir: bool) -> EntryInfo {
            EntryInfo {
                name: name.to_string(),
                path: Path::new(parent).join(name),
                size,
                is_dir,
            }
        }
    }

    #[async_trait::async_trait]
    impl FileSystem for MockFileSystem {
        async fn read_dir(&self, path: &Path) -> std::io::Result<Vec<EntryInfo>> {
            self.dirs
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }

        async fn modified(&self, _path: &Path) -> Option<std::time::SystemTime> {
            None
        }

        async fn remove_dir_all(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }

        async fn remove_file(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn renders_nested_listing_in_order() {
        let mut dirs = HashMap::new();
        dirs.insert(
            PathBuf::from("/site"),
            vec![
                MockFileSystem::entry("/site", "index.html", 120, false),
                MockFileSystem::entry("/site", "css", 4096, true),
                MockFileSystem::entry("/site", "empty", 4096, true),
                MockFileSystem::entry("/site", "logo.png", 7, false),
            ],
        );
        dirs.insert(
            PathBuf::from("/site/css"),
            vec![MockFileSystem::entry("/site/css", "main.css", 33, false)],
        );
        dirs.insert(PathBuf::from("/site/empty"), vec![]);
        let fs = MockFileSystem { dirs };

        let tree = directory_tree(&fs, Path::new("/site")).await.unwrap();
        assert_eq!(
            tree,
            "├── index.html (120)\n\
             ├── css (4096)\n\
             │   ├── main.css (33)\n\
             ├── empty (4096)\n\
             ├── logo.png (7)\n"
        );
    }

    #[tokio::test]
    async fn empty_root_renders_nothing() {
        let dir = TempDir::new().unwrap();
        let tree = directory_tree(&TokioFileSystem, dir.path()).await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = directory_tree(&TokioFileSystem, &dir.path().join("gone")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn one_line_per_entry_on_disk() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("a/b/c")).unwrap();
        std::fs::create_dir_all(root.join("d")).unwrap();
        std::fs::write(root.join("index.html"), b"<html></html>").unwrap();
        std::fs::write(root.join("a/one.js"), b"1").unwrap();
        std::fs::write(root.join("a/b/two.css"), b"22").unwrap();
        std::fs::write(root.join("a/b/c/three.png"), b"333").unwrap();

        let tree = directory_tree(&TokioFileSystem, root).await.unwrap();

        let entries = walkdir::WalkDir::new(root).min_depth(1).into_iter().count();
        assert_eq!(tree.lines().count(), entries);
        assert!(tree.contains("├── index.html (13)"));
        assert!(tree.contains("│   │   │   ├── three.png (3)"));
        for name in ["a", "b", "c", "d", "one.js", "two.css"] {
            let marker = format!("├── {name} (");
            assert_eq!(tree.matches(&marker).count(), 1, "{name} listed once");
        }
    }
}
