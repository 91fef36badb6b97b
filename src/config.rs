//! Configuration types for the server, the crawler, and artifact retention.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port used when neither the config file nor `PORT` sets one.
pub const DEFAULT_PORT: u16 = 3000;

/// Desktop browser identity sent with every crawl request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Headless rendering options applied to HTML pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Render pages through Chromium before extracting links.
    pub enabled: bool,
    /// Upper bound for the scroll-to-bottom phase, in seconds.
    pub scroll_timeout_secs: u64,
    /// Maximum number of viewport-height scroll steps.
    pub scroll_viewports: u32,
    /// Stop scripted navigation away from the rendered page.
    pub block_navigation: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(feature = "headless"),
            scroll_timeout_secs: 30,
            scroll_viewports: 10,
            block_navigation: true,
        }
    }
}

impl HeadlessConfig {
    /// Returns the scroll phase timeout.
    #[must_use]
    pub const fn scroll_timeout(&self) -> Duration {
        Duration::from_secs(self.scroll_timeout_secs)
    }
}

/// Configuration handed to the crawler for every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum link depth followed from the seed page.
    pub max_depth: usize,
    /// Maximum number of in-flight requests.
    pub max_concurrency: usize,
    /// Keep crawling when a single resource fails.
    pub ignore_errors: bool,
    /// Shorten rewritten links ending in `index.html` to their directory.
    pub prettify_urls: bool,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Minimum delay between the start of two requests, in milliseconds.
    pub request_interval_ms: u64,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Remove the partial output directory when a session fails.
    pub cleanup_on_error: bool,
    /// Headless rendering options.
    pub headless: HeadlessConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_concurrency: 5,
            ignore_errors: true,
            prettify_urls: true,
            request_timeout_secs: 30,
            request_interval_ms: 1000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cleanup_on_error: false,
            headless: HeadlessConfig::default(),
        }
    }
}

impl CrawlConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the minimum interval between requests.
    #[must_use]
    pub const fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    /// Sets the maximum link depth.
    #[must_use]
    pub const fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the number of concurrent requests.
    #[must_use]
    pub const fn with_max_concurrency(mut self, concurrent: usize) -> Self {
        self.max_concurrency = concurrent;
        self
    }

    /// Sets the minimum interval between requests.
    #[must_use]
    pub const fn with_request_interval_ms(mut self, millis: u64) -> Self {
        self.request_interval_ms = millis;
        self
    }

    /// Sets whether single resource failures are tolerated.
    #[must_use]
    pub const fn with_ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Sets whether partial output is removed on failure.
    #[must_use]
    pub const fn with_cleanup_on_error(mut self, cleanup: bool) -> Self {
        self.cleanup_on_error = cleanup;
        self
    }

    /// Enables or disables headless rendering.
    #[must_use]
    pub const fn with_headless(mut self, enabled: bool) -> Self {
        self.headless.enabled = enabled;
        self
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory holding mirrored sites and their archives.
    pub storage_root: PathBuf,
    /// Optional directory served under `/static`.
    pub public_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            storage_root: data_dir.join("mirror-dl").join("sites"),
            public_dir: None,
        }
    }
}

/// Lifecycle policy for artifacts left in the storage root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Whether the background sweeper runs.
    pub enabled: bool,
    /// Artifacts older than this many seconds are removed.
    pub max_age_secs: u64,
    /// Seconds between two sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_secs: 24 * 60 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl RetentionConfig {
    /// Returns the maximum artifact age.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Returns the sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server settings.
    pub server: ServerConfig,
    /// Crawl settings.
    pub crawl: CrawlConfig,
    /// Retention settings.
    pub retention: RetentionConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the config file consulted when no path is given.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mirror-dl")
            .join("config.toml")
    }

    /// Parses configuration from TOML text. Missing tables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml(text: &str) -> crate::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads configuration from `path`, or from [`Self::default_path`] when it
    /// exists, then applies the `PORT` environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be read, or if any
    /// file read fails to parse.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => {
                let path = Self::default_path();
                if path.is_file() {
                    log::info!("Loading config from {}", path.display());
                    Self::from_toml(&std::fs::read_to_string(&path)?)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_port_override(std::env::var("PORT").ok().as_deref());
        Ok(config)
    }

    /// Overrides the port with `value` when it parses as a port number.
    pub fn apply_port_override(&mut self, value: Option<&str>) {
        if let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) {
            match raw.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => log::warn!("Ignoring invalid PORT value {raw:?}"),
            }
        }
    }
}
