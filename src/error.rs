//! Error types shared by every component of the crate.

use crate::config::ConfigError;

/// Errors produced while locating, assembling, listing or extracting
/// remote archives and while resolving derivative manifests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object identifier does not have a `<container>/<object>` tail.
    #[error("malformed object identifier `{0}`")]
    MalformedIdentifier(String),

    /// Storage or manifest API answered with a non-2xx status or a body
    /// that does not match the expected schema.
    #[error("upstream error from {endpoint}: {message}")]
    Upstream { endpoint: String, message: String },

    /// A range request was answered with something other than 200/206.
    #[error("range fetch failed with HTTP status {status}")]
    RangeFetch { status: u16 },

    /// The storage API returned object metadata that cannot be used.
    #[error("invalid object metadata: {0}")]
    InvalidMetadata(String),

    /// A mandatory byte range could not be placed into the sparse buffer.
    #[error("archive assembly failed: {0}")]
    Assembly(String),

    /// No usable end-of-central-directory, or a malformed directory record.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("entry `{0}` not found in archive")]
    EntryNotFound(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn upstream(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptArchive(message.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
