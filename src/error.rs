//! Error types for the mirror-dl library.

use thiserror::Error;

/// Errors that can occur while mirroring, archiving, or serving a site.
#[derive(Error, Debug)]
pub enum Error {
    /// A start request was missing a field or carried an unusable value.
    #[error("{0}")]
    Validation(String),

    /// Another in-flight session already writes to this destination.
    #[error("Directory {name} is already being downloaded")]
    NameInUse {
        /// The contested destination name.
        name: String,
    },

    /// The crawl as a whole was rejected.
    #[error("{0}")]
    Crawl(String),

    /// A single resource could not be fetched or saved.
    #[error("{url}: {message}")]
    Resource {
        /// URL of the failed resource.
        url: String,
        /// Human-readable cause.
        message: String,
    },

    /// Building the zip archive failed.
    #[error("Archive failed: {0}")]
    Archive(String),

    /// The session was cancelled before it finished.
    #[error("Download cancelled")]
    Cancelled,

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Zip writer error.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Headless browser error.
    #[cfg(feature = "headless")]
    #[error("Browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),
}

impl Error {
    /// Returns true for errors that end a session before anything is written.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NameInUse { .. })
    }
}

/// A specialized `Result` type for mirror-dl operations.
pub type Result<T> = std::result::Result<T, Error>;
