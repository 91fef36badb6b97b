//! Crawler contract and the built-in HTTP crawler.
//!
//! A [`Crawler`] takes a [`CrawlRequest`], saves every accepted resource
//! below the request's directory, reports each save or failure to a
//! [`CrawlObserver`] as it happens, and finally returns one [`PageRecord`]
//! per HTML page with the resources saved on its behalf.

pub mod http;
pub mod links;
pub mod render;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::CrawlConfig;
use crate::error::Result;

pub use http::HttpCrawler;
pub use render::{PageRenderer, PassthroughRenderer};

/// How a resource was referenced, which decides how it is stored and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A navigable document (`a[href]`, `iframe[src]`, seed URLs).
    Page,
    /// A stylesheet whose `url(...)` references are followed.
    Stylesheet,
    /// Any other file: images, scripts, fonts, media.
    Asset,
}

/// Everything a crawler needs for one session.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// Seed URLs, crawled at depth 0.
    pub urls: Vec<Url>,
    /// Only URLs starting with this prefix are fetched.
    pub url_prefix: String,
    /// Output directory; created if missing.
    pub directory: PathBuf,
    /// Crawl limits and identity.
    pub config: CrawlConfig,
}

impl CrawlRequest {
    /// Creates a request for a single seed URL, filtered to its own prefix.
    #[must_use]
    pub fn new(seed: Url, directory: PathBuf, config: CrawlConfig) -> Self {
        Self {
            url_prefix: seed.as_str().to_string(),
            urls: vec![seed],
            directory,
            config,
        }
    }

    /// Returns whether `url` passes the prefix filter.
    #[must_use]
    pub fn accepts(&self, url: &Url) -> bool {
        url.as_str().starts_with(&self.url_prefix)
    }
}

/// A single saved resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// Source URL.
    pub url: String,
    /// Path relative to the output directory, `/`-separated.
    pub filename: String,
    /// How the resource was referenced.
    pub kind: ResourceKind,
    /// Link depth from the seed.
    pub depth: usize,
    /// Bytes written.
    pub size: u64,
}

/// An HTML page and the resources saved on its behalf.
///
/// The page's own document is the first child, so the child counts of all
/// records add up to the number of saved resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// Page URL.
    pub url: String,
    /// Local file name of the page document.
    pub filename: String,
    /// Saved resources, starting with the page itself.
    pub children: Vec<ResourceRecord>,
}

/// Sums the child counts of all page records.
#[must_use]
pub fn total_resources(pages: &[PageRecord]) -> usize {
    pages.iter().map(|page| page.children.len()).sum()
}

/// Receives crawl events as they happen.
///
/// All methods have default no-op implementations for convenience.
pub trait CrawlObserver: Send + Sync {
    /// Called when a resource is accepted into the crawl queue.
    fn on_resource_discovered(&self, _url: &str) {}

    /// Called after a resource has been written to disk.
    fn on_resource_saved(&self, _resource: &ResourceRecord) {}

    /// Called when a resource could not be fetched or written.
    fn on_resource_error(&self, _url: &str, _error: &str) {}
}

/// A null observer that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl CrawlObserver for NoObserver {}

/// A site crawler.
#[async_trait]
pub trait Crawler: Send + Sync {
    /// Mirrors the request's seed URLs into its directory.
    ///
    /// Resolves once the crawl is complete. The token is checked before each
    /// fetch; a cancelled crawl returns [`crate::Error::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Crawl`] when the crawl as a whole fails, for
    /// instance when no seed page can be fetched.
    async fn crawl(
        &self,
        request: CrawlRequest,
        observer: Arc<dyn CrawlObserver>,
        cancel: CancellationToken,
    ) -> Result<Vec<PageRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> ResourceRecord {
        ResourceRecord {
            url: url.to_string(),
            filename: "x".to_string(),
            kind: ResourceKind::Asset,
            depth: 1,
            size: 1,
        }
    }

    #[test]
    fn request_filters_by_seed_prefix() {
        let seed = Url::parse("https://example.com/docs/").unwrap();
        let request = CrawlRequest::new(seed, PathBuf::from("out"), CrawlConfig::default());
        assert!(request.accepts(&Url::parse("https://example.com/docs/a.html").unwrap()));
        assert!(!request.accepts(&Url::parse("https://example.com/blog/").unwrap()));
        assert!(!request.accepts(&Url::parse("https://cdn.example.com/docs/").unwrap()));
    }

    #[test]
    fn total_counts_children_of_every_page() {
        let pages = vec![
            PageRecord {
                url: "a".into(),
                filename: "index.html".into(),
                children: vec![record("a"), record("b"), record("c")],
            },
            PageRecord {
                url: "d".into(),
                filename: "d/index.html".into(),
                children: vec![record("d")],
            },
        ];
        assert_eq!(total_resources(&pages), 4);
        assert_eq!(total_resources(&[]), 0);
    }

    #[test]
    fn no_observer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoObserver>();
    }
}
