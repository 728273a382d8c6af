//! Client configuration.
//!
//! A single [`ClientConfig`] describes the remote endpoints and tuning knobs.
//! It builds the one shared [`reqwest::Client`] that every component clones.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Default Autodesk Platform Services host.
pub const DEFAULT_API_URL: &str = "https://developer.api.autodesk.com";

/// Default base of the object storage API.
pub const DEFAULT_STORAGE_URL: &str = "https://developer.api.autodesk.com/oss/v2";

/// Bytes fetched from each end of an archive.
///
/// Large enough for the end-of-central-directory record plus a typical comment.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024;

/// Slack added to an entry's compressed size to cover its local file header.
pub const DEFAULT_ZIP_HEADER_OFFSET: u64 = 128;

/// Remote endpoints and tuning for the resolvers.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the derivative API.
    pub api_url: Url,
    /// Base URL of the storage API that issues signed download URLs.
    pub storage_url: Url,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for range requests failing with timeouts or connect errors.
    pub max_retry: u32,
    pub chunk_size: u64,
    pub zip_header_offset: u64,
    /// Sub-manifest fetches and downloads in flight at once.
    pub max_concurrency: usize,
    /// Where sparse archives are persisted; the system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Configuration with default tuning against the given endpoints.
    pub fn with_urls(api_url: Url, storage_url: Url) -> Self {
        Self {
            api_url,
            storage_url,
            timeout_secs: 30,
            max_retry: 10,
            chunk_size: DEFAULT_CHUNK_SIZE,
            zip_header_offset: DEFAULT_ZIP_HEADER_OFFSET,
            max_concurrency: 4,
            temp_dir: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `APS_API_URL` (default: `https://developer.api.autodesk.com`)
    /// - `APS_STORAGE_URL` (default: `https://developer.api.autodesk.com/oss/v2`)
    /// - `APS_TIMEOUT_SECS` (default: 30)
    /// - `APS_MAX_RETRY` (default: 10)
    /// - `APS_CHUNK_SIZE` (default: 4096)
    /// - `APS_MAX_CONCURRENCY` (default: 4)
    /// - `APS_TEMP_DIR` (default: system temp dir)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::with_urls(
            env_url("APS_API_URL", DEFAULT_API_URL)?,
            env_url("APS_STORAGE_URL", DEFAULT_STORAGE_URL)?,
        );
        Ok(Self {
            timeout_secs: env_parse("APS_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            max_retry: env_parse("APS_MAX_RETRY").unwrap_or(defaults.max_retry),
            chunk_size: env_parse("APS_CHUNK_SIZE").unwrap_or(defaults.chunk_size),
            max_concurrency: env_parse("APS_MAX_CONCURRENCY").unwrap_or(defaults.max_concurrency),
            temp_dir: std::env::var_os("APS_TEMP_DIR").map(PathBuf::from),
            ..defaults
        })
    }

    /// Build the HTTP client shared by every component.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))
    }

    /// Validate values that would otherwise fail deep inside a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be positive".into()));
        }
        Ok(())
    }
}

fn env_url(var: &str, default: &str) -> Result<Url, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(var.to_string(), e.to_string()))
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("cannot build HTTP client: {0}")]
    Client(String),
}
