//! Artifact listing, explicit cleanup, and the periodic sweep of stale
//! artifacts in the storage root.
//!
//! An artifact is the `<name>/` directory and `<name>.zip` archive of one
//! session; either half may be missing.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::fs::{FileSystem, TokioFileSystem};
use crate::registry::{ActiveNames, validate_directory_name};

/// One session's output on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Destination name.
    pub name: String,
    /// Whether the mirrored directory exists.
    pub has_directory: bool,
    /// Archive size, if the archive exists.
    pub archive_bytes: Option<u64>,
    /// Latest modification time of either half.
    pub modified: Option<DateTime<Utc>>,
    /// Whether a session is currently writing it.
    pub active: bool,
}

impl Artifact {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            has_directory: false,
            archive_bytes: None,
            modified: None,
            active: false,
        }
    }

    fn touch(&mut self, modified: Option<SystemTime>) {
        let modified = modified.map(DateTime::<Utc>::from);
        if modified > self.modified {
            self.modified = modified;
        }
    }

    /// Returns whether the artifact was last modified at least `max_age` ago.
    fn is_older_than(&self, max_age: Duration, now: SystemTime) -> bool {
        self.modified
            .map(SystemTime::from)
            .is_some_and(|modified| now.duration_since(modified).is_ok_and(|age| age >= max_age))
    }
}

/// Path of the archive for `name`.
#[must_use]
pub fn archive_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.zip"))
}

/// Lists every artifact below `root`, sorted by name.
///
/// Entries that do not follow the destination name rules (temporary `.part`
/// files, stray files) are skipped. A missing root yields an empty list.
///
/// # Errors
///
/// Returns an error if the root exists but cannot be listed.
pub async fn list_artifacts<F: FileSystem + ?Sized>(
    fs: &F,
    root: &Path,
    active: &ActiveNames,
) -> Result<Vec<Artifact>> {
    let entries = match fs.read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut artifacts: BTreeMap<String, Artifact> = BTreeMap::new();
    for entry in entries {
        let (name, is_archive) = if entry.is_dir {
            (entry.name.as_str(), false)
        } else if let Some(stem) = entry.name.strip_suffix(".zip") {
            (stem, true)
        } else {
            continue;
        };
        if validate_directory_name(name).is_err() {
            continue;
        }

        let modified = fs.modified(&entry.path).await;
        let artifact = artifacts
            .entry(name.to_string())
            .or_insert_with(|| Artifact::empty(name));
        if is_archive {
            artifact.archive_bytes = Some(entry.size);
        } else {
            artifact.has_directory = true;
        }
        artifact.touch(modified);
    }

    Ok(artifacts
        .into_values()
        .map(|mut artifact| {
            artifact.active = active.is_active(&artifact.name);
            artifact
        })
        .collect())
}

/// Removes both halves of the artifact `name`. Returns whether anything was
/// removed.
///
/// The name stays reserved while files are deleted, so no session can start
/// writing to it halfway through.
///
/// # Errors
///
/// Returns [`crate::Error::Validation`] for a bad name,
/// [`crate::Error::NameInUse`] if a session is running, or an I/O error.
pub async fn remove_artifact<F: FileSystem + ?Sized>(
    fs: &F,
    root: &Path,
    name: &str,
    active: &ActiveNames,
) -> Result<bool> {
    validate_directory_name(name)?;
    let _guard = active.reserve(name)?;

    let mut removed = false;
    match fs.remove_dir_all(&root.join(name)).await {
        Ok(()) => removed = true,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    match fs.remove_file(&archive_path(root, name)).await {
        Ok(()) => removed = true,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(removed)
}

/// Removes every idle artifact last modified at least `max_age` ago.
/// Returns the names removed.
///
/// # Errors
///
/// Returns an error if the root cannot be listed. Failures to remove a
/// single artifact are logged and skipped.
pub async fn sweep<F: FileSystem + ?Sized>(
    fs: &F,
    root: &Path,
    max_age: Duration,
    active: &ActiveNames,
) -> Result<Vec<String>> {
    let now = SystemTime::now();
    let mut removed = Vec::new();

    for artifact in list_artifacts(fs, root, active).await? {
        if artifact.active || !artifact.is_older_than(max_age, now) {
            continue;
        }
        match remove_artifact(fs, root, &artifact.name, active).await {
            Ok(true) => removed.push(artifact.name),
            Ok(false) => {}
            Err(e) => log::warn!("Could not remove stale artifact {}: {e}", artifact.name),
        }
    }
    Ok(removed)
}

/// Spawns the background sweeper, or returns `None` when retention is
/// disabled. The task stops when `shutdown` is cancelled.
#[must_use]
pub fn spawn_sweeper(
    config: &RetentionConfig,
    root: PathBuf,
    active: ActiveNames,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        log::info!("Artifact retention disabled");
        return None;
    }
    let max_age = config.max_age();
    let period = config.sweep_interval().max(Duration::from_secs(1));
    let fs: Arc<dyn FileSystem> = Arc::new(TokioFileSystem::new());

    log::info!(
        "Removing artifacts older than {}s every {}s",
        max_age.as_secs(),
        period.as_secs()
    );

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match sweep(fs.as_ref(), &root, max_age, &active).await {
                        Ok(removed) if !removed.is_empty() => {
                            log::info!("Removed {} stale artifacts: {}", removed.len(), removed.join(", "));
                        }
                        Ok(_) => {}
                        Err(e) => log::error!("Artifact sweep failed: {e}"),
                    }
                }
            }
        }
        log::debug!("Artifact sweeper stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    fn make_artifact(root: &Path, name: &str, with_zip: bool) {
        std::fs::create_dir_all(root.join(name).join("css")).unwrap();
        std::fs::write(root.join(name).join("index.html"), "<html></html>").unwrap();
        if with_zip {
            std::fs::write(archive_path(root, name), vec![0u8; 42]).unwrap();
        }
    }

    #[tokio::test]
    async fn lists_both_halves_sorted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_artifact(root, "beta", true);
        make_artifact(root, "alpha", false);
        std::fs::write(root.join("gamma.zip"), b"zz").unwrap();
        std::fs::write(root.join("beta.zip.part"), b"partial").unwrap();
        std::fs::write(root.join("notes.txt"), b"stray").unwrap();

        let active = ActiveNames::new();
        let _guard = active.reserve("beta").unwrap();
        let artifacts = list_artifacts(&TokioFileSystem::new(), root, &active)
            .await
            .unwrap();

        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert!(artifacts[0].has_directory);
        assert_eq!(artifacts[0].archive_bytes, None);
        assert_eq!(artifacts[1].archive_bytes, Some(42));
        assert!(artifacts[1].active);
        assert!(!artifacts[2].has_directory);
        assert!(artifacts.iter().all(|a| a.modified.is_some()));
    }

    #[tokio::test]
    async fn missing_root_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let artifacts = list_artifacts(
            &TokioFileSystem::new(),
            &dir.path().join("absent"),
            &ActiveNames::new(),
        )
        .await
        .unwrap();
        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_directory_and_archive() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_artifact(root, "site", true);
        let fs = TokioFileSystem::new();
        let active = ActiveNames::new();

        assert!(remove_artifact(&fs, root, "site", &active).await.unwrap());
        assert!(!root.join("site").exists());
        assert!(!archive_path(root, "site").exists());
        assert!(!active.is_active("site"));
        assert!(!remove_artifact(&fs, root, "site", &active).await.unwrap());
    }

    #[tokio::test]
    async fn remove_refuses_active_and_invalid_names() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_artifact(root, "busy", true);
        let fs = TokioFileSystem::new();
        let active = ActiveNames::new();
        let _guard = active.reserve("busy").unwrap();

        assert!(matches!(
            remove_artifact(&fs, root, "busy", &active).await,
            Err(Error::NameInUse { .. })
        ));
        assert!(root.join("busy").exists());
        assert!(matches!(
            remove_artifact(&fs, root, "../busy", &active).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_idle_artifacts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        make_artifact(root, "old", true);
        make_artifact(root, "running", true);
        let fs = TokioFileSystem::new();
        let active = ActiveNames::new();
        let _guard = active.reserve("running").unwrap();

        let kept = sweep(&fs, root, Duration::from_secs(3600), &active)
            .await
            .unwrap();
        assert!(kept.is_empty());
        assert!(root.join("old").exists());

        let removed = sweep(&fs, root, Duration::ZERO, &active).await.unwrap();
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(!archive_path(root, "old").exists());
        assert!(root.join("running").exists());
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        make_artifact(dir.path(), "stale", false);
        let config = RetentionConfig {
            enabled: true,
            max_age_secs: 0,
            sweep_interval_secs: 3600,
        };
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            &config,
            dir.path().to_path_buf(),
            ActiveNames::new(),
            shutdown.clone(),
        )
        .unwrap();

        // The first tick fires immediately.
        for _ in 0..50 {
            if !dir.path().join("stale").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!dir.path().join("stale").exists());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn disabled_retention_spawns_nothing() {
        let config = RetentionConfig {
            enabled: false,
            ..RetentionConfig::default()
        };
        let handle = spawn_sweeper(
            &config,
            PathBuf::from("unused"),
            ActiveNames::new(),
            CancellationToken::new(),
        );
        assert!(handle.is_none());
    }

    #[test]
    fn artifacts_serialize_camel_case() {
        let artifact = Artifact {
            archive_bytes: Some(7),
            ..Artifact::empty("site")
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["archiveBytes"], 7);
        assert_eq!(json["hasDirectory"], false);
    }
}
