//! Breadth-first HTTP crawler.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::links::{self, Reference, Rewriter};
use super::render::{PageRenderer, PassthroughRenderer};
use super::{CrawlObserver, CrawlRequest, Crawler, PageRecord, ResourceKind, ResourceRecord};
use crate::config::CrawlConfig;
use crate::error::{Error, Result};

/// Enforces a minimum delay between the start of two requests.
struct Throttle {
    interval: Duration,
    next: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut next = self.next.lock().await;
        if let Some(at) = *next {
            tokio::time::sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.interval);
    }
}

/// A queued resource.
struct Job {
    url: Url,
    kind: ResourceKind,
    depth: usize,
    local: PathBuf,
    /// Index of the page record that referenced this resource.
    referrer: Option<usize>,
}

/// Outcome of a successful fetch.
struct Fetched {
    record: ResourceRecord,
    references: Vec<Reference>,
    is_html: bool,
}

/// Per-crawl state shared by all in-flight fetches.
struct CrawlContext<'a> {
    request: &'a CrawlRequest,
    client: reqwest::Client,
    throttle: Throttle,
    cancel: CancellationToken,
}

/// Builds the HTTP client for one crawl.
fn build_client(config: &CrawlConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout())
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(config.max_concurrency.max(1))
        .build()
}

/// `/`-separated form of a relative path, as shown to users.
fn display_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Writes `content` to `{path}.part` and renames it into place.
async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);
    tokio::fs::write(&part, content).await?;
    tokio::fs::rename(&part, path).await
}

/// Message reported to observers; resource errors already carry their URL.
fn failure_message(error: &Error) -> String {
    match error {
        Error::Resource { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Rewrites a fetched document for offline use and collects its references.
fn prepare(
    request: &CrawlRequest,
    job: &Job,
    body: Bytes,
    html: Option<String>,
    is_css: bool,
) -> (Bytes, Vec<Reference>) {
    let max_depth = request.config.max_depth;
    let resolver = |url: &Url, kind: ResourceKind| {
        (request.accepts(url) && (kind != ResourceKind::Page || job.depth < max_depth))
            .then(|| links::local_path(url, kind))
    };
    let rewriter = Rewriter::new(&job.url, &job.local, &resolver, request.config.prettify_urls);

    if let Some(html) = html {
        let references = links::html_references(&html, &job.url);
        (Bytes::from(rewriter.rewrite_html(&html)), references)
    } else if is_css {
        let css = String::from_utf8_lossy(&body);
        let references = links::css_references(&css, &job.url);
        (Bytes::from(rewriter.rewrite_css(&css)), references)
    } else {
        (body, Vec::new())
    }
}

/// Crawls a site over HTTP in breadth-first waves.
///
/// Each wave fetches up to `max_concurrency` resources at once; request
/// starts are spaced by `request_interval`. Pages recurse up to `max_depth`;
/// assets referenced by an accepted page or stylesheet are always fetched.
/// Resources are deduplicated by their local path.
pub struct HttpCrawler {
    renderer: Arc<dyn PageRenderer>,
}

impl Default for HttpCrawler {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCrawler {
    /// Creates a crawler that saves pages as served.
    #[must_use]
    pub fn new() -> Self {
        Self {
            renderer: Arc::new(PassthroughRenderer),
        }
    }

    /// Creates a crawler that passes HTML pages through `renderer`.
    #[must_use]
    pub fn with_renderer(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }

    async fn fetch(&self, ctx: &CrawlContext<'_>, job: &Job) -> Result<Fetched> {
        tokio::select! {
            result = self.fetch_uncancelled(ctx, job) => result,
            () = ctx.cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn fetch_uncancelled(&self, ctx: &CrawlContext<'_>, job: &Job) -> Result<Fetched> {
        ctx.throttle.wait().await;
        let resource_error = |message: String| Error::Resource {
            url: job.url.to_string(),
            message,
        };

        let response = ctx.client.get(job.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(resource_error(format!("HTTP {status}")));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.bytes().await?;

        let is_html = content_type.contains("text/html")
            || (content_type.is_empty() && job.kind == ResourceKind::Page);
        let is_css = content_type.contains("text/css") || job.kind == ResourceKind::Stylesheet;

        let html = if is_html {
            let fetched = String::from_utf8_lossy(&body).into_owned();
            Some(self.renderer.render(&job.url, fetched).await?)
        } else {
            None
        };
        let (content, references) = prepare(ctx.request, job, body, html, is_css);

        let path = ctx.request.directory.join(&job.local);
        write_atomic(&path, &content)
            .await
            .map_err(|e| resource_error(format!("write failed: {e}")))?;

        Ok(Fetched {
            record: ResourceRecord {
                url: job.url.to_string(),
                filename: display_path(&job.local),
                kind: job.kind,
                depth: job.depth,
                size: content.len() as u64,
            },
            references,
            is_html,
        })
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    #[allow(clippy::too_many_lines)]
    async fn crawl(
        &self,
        request: CrawlRequest,
        observer: Arc<dyn CrawlObserver>,
        cancel: CancellationToken,
    ) -> Result<Vec<PageRecord>> {
        if request.urls.is_empty() {
            return Err(Error::Crawl("No URLs to download".to_string()));
        }
        tokio::fs::create_dir_all(&request.directory).await?;

        let config = &request.config;
        let ctx = CrawlContext {
            request: &request,
            client: build_client(config)?,
            throttle: Throttle::new(config.request_interval()),
            cancel,
        };

        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut pages: Vec<PageRecord> = Vec::new();
        let mut wave: Vec<Job> = Vec::new();
        let mut seed_failure: Option<String> = None;

        for url in &request.urls {
            let local = links::local_path(url, ResourceKind::Page);
            if seen.insert(local.clone()) {
                observer.on_resource_discovered(url.as_str());
                wave.push(Job {
                    url: url.clone(),
                    kind: ResourceKind::Page,
                    depth: 0,
                    local,
                    referrer: None,
                });
            }
        }

        while !wave.is_empty() {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            log::debug!("Fetching wave of {} resources", wave.len());

            let results: Vec<(Job, Result<Fetched>)> = stream::iter(wave)
                .map(|job| {
                    let ctx = &ctx;
                    async move {
                        let result = self.fetch(ctx, &job).await;
                        (job, result)
                    }
                })
                .buffer_unordered(config.max_concurrency.max(1))
                .collect()
                .await;

            let mut next = Vec::new();
            for (job, result) in results {
                let fetched = match result {
                    Ok(fetched) => fetched,
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        let message = failure_message(&e);
                        log::debug!("Failed {}: {message}", job.url);
                        observer.on_resource_error(job.url.as_str(), &message);
                        let fatal = format!("Failed to download {}: {message}", job.url);
                        if !config.ignore_errors {
                            return Err(Error::Crawl(fatal));
                        }
                        if job.depth == 0 {
                            seed_failure = Some(fatal);
                        }
                        continue;
                    }
                };

                let owner = match job.referrer {
                    Some(referrer) if !(fetched.is_html && job.kind == ResourceKind::Page) => {
                        referrer
                    }
                    _ => {
                        pages.push(PageRecord {
                            url: fetched.record.url.clone(),
                            filename: fetched.record.filename.clone(),
                            children: Vec::new(),
                        });
                        pages.len() - 1
                    }
                };
                observer.on_resource_saved(&fetched.record);
                pages[owner].children.push(fetched.record);

                let depth = job.depth + 1;
                for reference in fetched.references {
                    if !request.accepts(&reference.url)
                        || (reference.kind == ResourceKind::Page && depth > config.max_depth)
                    {
                        continue;
                    }
                    let local = links::local_path(&reference.url, reference.kind);
                    if !seen.insert(local.clone()) {
                        continue;
                    }
                    observer.on_resource_discovered(reference.url.as_str());
                    next.push(Job {
                        url: reference.url,
                        kind: reference.kind,
                        depth,
                        local,
                        referrer: Some(owner),
                    });
                }
            }
            wave = next;
        }

        if pages.is_empty() {
            return Err(Error::Crawl(
                seed_failure.unwrap_or_else(|| "Nothing could be downloaded".to_string()),
            ));
        }
        Ok(pages)
    }
}
