//! mirror-dl - mirror websites into zip archives with live progress.
//!
//! A browser submits a website URL and a destination name over a WebSocket.
//! The server crawls the site into `<root>/<name>/`, streams progress back as
//! resources are saved, reports the resulting directory tree, zips the
//! directory and offers `<name>.zip` for download.
//!
//! The pieces can be used without the server:
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mirror_dl::{ActiveNames, CrawlConfig, EventSink, HttpCrawler, SessionController, StartRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> mirror_dl::Result<()> {
//! let controller = SessionController::new(
//!     Arc::new(HttpCrawler::new()),
//!     CrawlConfig::default(),
//!     "sites".into(),
//!     ActiveNames::new(),
//! );
//!
//! let (events, mut rx) = EventSink::channel();
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{}", event.to_json());
//!     }
//! });
//!
//! let request = StartRequest::new("https://example.com/", "example");
//! let summary = controller.run(request, events, CancellationToken::new()).await?;
//! println!("{} files archived to {}", summary.files, summary.archive.display());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod archive;
pub mod config;
pub mod crawl;
pub mod error;
pub mod fs;
pub mod registry;
pub mod retention;
pub mod server;
pub mod session;
pub mod tree;

// Re-export main types for convenience
pub use archive::{ArchiveSummary, zip_directory};
pub use config::{AppConfig, CrawlConfig, RetentionConfig, ServerConfig};
pub use crawl::{
    CrawlObserver, CrawlRequest, Crawler, HttpCrawler, NoObserver, PageRecord, ResourceKind,
    ResourceRecord,
};
pub use error::{Error, Result};
pub use fs::{FileSystem, TokioFileSystem};
pub use registry::{ActiveNames, validate_directory_name};
pub use session::{
    Admission, ClientEvent, EventSink, ServerEvent, SessionController, SessionSummary,
    StartRequest,
};
pub use tree::directory_tree;
