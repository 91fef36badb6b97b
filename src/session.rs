//! Download sessions: one start request, from validation to a ready archive.
//!
//! A [`SessionController`] validates the request, reserves the destination
//! name, runs the crawler, relays its callbacks as [`ServerEvent`]s, then
//! reports the directory tree and zips the result. Events go to an
//! [`EventSink`], which the realtime channel drains into the socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archive::zip_directory_async;
use crate::config::CrawlConfig;
use crate::crawl::{CrawlObserver, CrawlRequest, Crawler, ResourceRecord, total_resources};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::registry::{ActiveNames, NameGuard, validate_directory_name};
use crate::retention::archive_path;
use crate::tree::directory_tree;

/// Log line sent when a start request lacks a field.
pub const MISSING_FIELDS: &str = "[Error] URL and Directory Name are required.";

/// Events pushed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A human-readable log line.
    Log(String),
    /// Saved resources against the known total.
    Progress { current: usize, total: usize },
    /// The finished directory tree.
    DirectoryTree(String),
    /// Server path of the finished archive.
    DownloadReady(String),
}

impl ServerEvent {
    /// Encodes the event as a `{"event", "data"}` text frame.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"event":"log","data":""}"#))
    }
}

/// Payload of a `startDownload` message. Missing fields deserialize empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartRequest {
    pub website_url: String,
    pub directory_name: String,
}

impl StartRequest {
    /// Creates a start request.
    #[must_use]
    pub fn new(website_url: impl Into<String>, directory_name: impl Into<String>) -> Self {
        Self {
            website_url: website_url.into(),
            directory_name: directory_name.into(),
        }
    }
}

/// Payload of a `cancelDownload` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CancelRequest {
    pub directory_name: String,
}

/// Messages received from the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    StartDownload(StartRequest),
    CancelDownload(CancelRequest),
}

impl ClientEvent {
    /// Parses a text frame. Payloads that do not fit their event's shape are
    /// read as empty, so they fail validation instead of parsing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for frames that are not JSON objects with
    /// a known `event`.
    pub fn parse(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Frame {
            event: String,
            #[serde(default)]
            data: serde_json::Value,
        }

        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| Error::Validation(format!("Malformed message: {e}")))?;
        match frame.event.as_str() {
            "startDownload" => Ok(Self::StartDownload(lenient(frame.data))),
            "cancelDownload" => Ok(Self::CancelDownload(lenient(frame.data))),
            other => Err(Error::Validation(format!("Unknown event: {other}"))),
        }
    }
}

fn lenient<T: DeserializeOwned + Default>(data: serde_json::Value) -> T {
    serde_json::from_value(data).unwrap_or_default()
}

/// Outbound half of a connection's event queue.
///
/// Sending is best-effort; events for a closed connection are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl EventSink {
    /// Wraps the sending side of a connection queue.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiver that drains it.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Queues an event.
    pub fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    /// Queues a `log` event.
    pub fn log(&self, message: impl Into<String>) {
        self.send(ServerEvent::Log(message.into()));
    }

    /// Queues a `progress` event.
    pub fn progress(&self, current: usize, total: usize) {
        self.send(ServerEvent::Progress { current, total });
    }
}

/// Per-session resource counters, shared only with that session's observer.
#[derive(Debug, Default)]
pub struct SessionProgress {
    discovered: AtomicUsize,
    saved: AtomicUsize,
    failed: AtomicUsize,
}

impl SessionProgress {
    /// Resources written so far.
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::Relaxed)
    }

    /// Resources that failed so far.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Resources expected to be saved: everything discovered minus failures.
    #[must_use]
    pub fn total(&self) -> usize {
        self.discovered
            .load(Ordering::Relaxed)
            .saturating_sub(self.failed())
    }
}

/// Translates crawler callbacks into session events.
struct SessionObserver {
    progress: Arc<SessionProgress>,
    events: EventSink,
}

impl SessionObserver {
    fn report_progress(&self) {
        let current = self.progress.saved();
        self.events.progress(current, self.progress.total().max(current));
    }
}

impl CrawlObserver for SessionObserver {
    fn on_resource_discovered(&self, _url: &str) {
        self.progress.discovered.fetch_add(1, Ordering::Relaxed);
    }

    fn on_resource_saved(&self, resource: &ResourceRecord) {
        self.progress.saved.fetch_add(1, Ordering::Relaxed);
        self.events.log(format!("Saved: {}", resource.filename));
        self.report_progress();
    }

    fn on_resource_error(&self, url: &str, error: &str) {
        self.progress.failed.fetch_add(1, Ordering::Relaxed);
        self.events.log(format!("Error saving {url}: {error}"));
        self.report_progress();
    }
}

/// Outcome of a session that produced an archive.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Session id, used in server logs.
    pub id: String,
    /// Destination name.
    pub name: String,
    /// Number of page records.
    pub pages: usize,
    /// Number of saved resources.
    pub files: usize,
    /// Archive location on disk.
    pub archive: PathBuf,
    /// Path the archive is downloaded from.
    pub download_path: String,
    /// When the request was accepted.
    pub started: DateTime<Utc>,
    /// Time from acceptance to finished archive.
    pub elapsed: Duration,
}

/// A validated start request whose destination name is reserved.
#[derive(Debug)]
pub struct Admission {
    url: Url,
    guard: NameGuard,
}

impl Admission {
    /// The reserved destination name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.guard.name()
    }

    /// The website to mirror.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

/// Runs download sessions against one storage root.
pub struct SessionController {
    crawler: Arc<dyn Crawler>,
    config: CrawlConfig,
    storage_root: PathBuf,
    active: ActiveNames,
    fs: Arc<dyn FileSystem>,
}

impl SessionController {
    /// Creates a controller writing below `storage_root`.
    #[must_use]
    pub fn new(
        crawler: Arc<dyn Crawler>,
        config: CrawlConfig,
        storage_root: PathBuf,
        active: ActiveNames,
    ) -> Self {
        Self {
            crawler,
            config,
            storage_root,
            active,
            fs: Arc::new(TokioFileSystem::new()),
        }
    }

    /// Replaces the file system used for tree reports and cleanup.
    #[must_use]
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Directory holding every session's output.
    #[must_use]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Names held by running sessions.
    #[must_use]
    pub const fn active_names(&self) -> &ActiveNames {
        &self.active
    }

    /// Checks a start request and returns the parsed URL and the name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] with the log line to show the user.
    pub fn validate(request: &StartRequest) -> Result<(Url, String)> {
        let website_url = request.website_url.trim();
        let name = request.directory_name.trim();
        if website_url.is_empty() || name.is_empty() {
            return Err(Error::Validation(MISSING_FIELDS.to_string()));
        }

        let url = Url::parse(website_url)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "[Error] Website URL must be an http(s) address: {website_url}"
                ))
            })?;
        validate_directory_name(name).map_err(|e| Error::Validation(format!("[Error] {e}")))?;
        Ok((url, name.to_string()))
    }

    /// Validates a start request and reserves its destination name.
    ///
    /// A rejected request emits exactly one `log` event and touches nothing
    /// on disk. The name stays reserved until the [`Admission`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] or [`Error::NameInUse`].
    pub fn admit(&self, request: &StartRequest, events: &EventSink) -> Result<Admission> {
        let (url, name) = Self::validate(request).inspect_err(|e| events.log(e.to_string()))?;
        let guard = self
            .active
            .reserve(&name)
            .inspect_err(|e| events.log(format!("[Error] {e}")))?;
        Ok(Admission { url, guard })
    }

    /// Runs one session to completion, emitting its events to `events`.
    ///
    /// Rejected requests emit exactly one `log` event and touch nothing on
    /// disk. Every other failure ends with one `[Error]` log line.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session.
    pub async fn run(
        &self,
        request: StartRequest,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<SessionSummary> {
        let admission = self.admit(&request, &events)?;
        self.execute(&admission, events, cancel).await
    }

    /// Crawls, reports and archives an admitted request.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session, after logging it.
    pub async fn execute(
        &self,
        admission: &Admission,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<SessionSummary> {
        let url = admission.url.clone();
        let name = admission.name().to_string();

        let id = uuid::Uuid::new_v4().to_string();
        let started = Utc::now();
        let clock = Instant::now();
        log::info!("Session {id}: downloading {url} into {name}");
        events.log("Starting download...");

        let directory = self.storage_root.join(&name);
        let progress = Arc::new(SessionProgress::default());
        let observer = Arc::new(SessionObserver {
            progress: Arc::clone(&progress),
            events: events.clone(),
        });
        let crawl_request = CrawlRequest::new(url, directory.clone(), self.config.clone());

        let crawled = self
            .crawler
            .crawl(crawl_request, observer, cancel.clone())
            .await
            .and_then(|pages| {
                if cancel.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    Ok(pages)
                }
            });
        let pages = match crawled {
            Ok(pages) => pages,
            Err(e) => {
                log::warn!("Session {id}: {name} failed: {e}");
                events.log(format!("[Error] {e}"));
                self.remove_partial(&directory).await;
                return Err(e);
            }
        };

        let total = total_resources(&pages);
        events.progress(progress.saved(), total);

        let tree = match directory_tree(self.fs.as_ref(), &directory).await {
            Ok(tree) => tree,
            Err(e) => {
                log::error!("Session {id}: cannot list {}: {e}", directory.display());
                events.log(format!("[Error] {e}"));
                return Err(e);
            }
        };
        events.send(ServerEvent::DirectoryTree(tree));

        events.log("[+] The website has been downloaded successfully!");
        events.log(format!("[+] Directory Name: {name}"));
        events.log(format!("[+] Pages: {}", pages.len()));
        events.log(format!("[+] Files: {total}"));

        let archive = archive_path(&self.storage_root, &name);
        match zip_directory_async(directory, archive.clone()).await {
            Ok(summary) => {
                log::info!(
                    "Session {id}: archived {} files ({} bytes) to {}",
                    summary.files,
                    summary.archive_bytes,
                    archive.display()
                );
            }
            Err(e) => {
                let message = match &e {
                    Error::Archive(message) => message.clone(),
                    other => other.to_string(),
                };
                log::error!("Session {id}: archive of {name} failed: {message}");
                events.log(format!("[Error] Failed to create archive: {message}"));
                return Err(e);
            }
        }

        let download_path = format!("/{name}.zip");
        events.log(format!("[+] Archive {name}.zip has been finalized."));
        events.send(ServerEvent::DownloadReady(download_path.clone()));

        Ok(SessionSummary {
            id,
            name,
            pages: pages.len(),
            files: total,
            archive,
            download_path,
            started,
            elapsed: clock.elapsed(),
        })
    }

    async fn remove_partial(&self, directory: &Path) {
        if !self.config.cleanup_on_error {
            return;
        }
        match self.fs.remove_dir_all(directory).await {
            Ok(()) => log::debug!("Removed partial output {}", directory.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {e}", directory.display()),
        }
    }
}
