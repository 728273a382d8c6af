//! Materializing resolved resources on disk.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::resolver::Resource;
use super::source::DerivativeSource;
use crate::Result;
use crate::composite::safe_relative_path;

/// File name the top-level manifest is saved under.
pub const MANIFEST_FILE: &str = "manifest.json";

/// A resource that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFailure {
    pub local_path: String,
    pub reason: String,
}

/// Outcome of [`ResourceDownloader::download_all`], in resource order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<DownloadFailure>,
}

enum Outcome {
    Saved(PathBuf),
    Skipped(PathBuf),
    Failed(DownloadFailure),
}

/// Writes resources below a root directory.
#[derive(Debug, Clone)]
pub struct ResourceDownloader<S> {
    source: S,
    root: PathBuf,
    max_concurrency: usize,
}

impl<S: DerivativeSource> ResourceDownloader<S> {
    pub fn new(source: S, root: impl Into<PathBuf>, max_concurrency: usize) -> Self {
        Self {
            source,
            root: root.into(),
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download every resource of model `urn`.
    ///
    /// Existing destinations are skipped without fetching. A failing item is
    /// logged and reported, the rest still run.
    pub async fn download_all(&self, urn: &str, resources: &[Resource]) -> DownloadReport {
        let outcomes: Vec<Outcome> = stream::iter(resources)
            .map(|resource| self.download_one(urn, resource))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut report = DownloadReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Saved(path) => report.saved.push(path),
                Outcome::Skipped(path) => report.skipped.push(path),
                Outcome::Failed(failure) => report.failures.push(failure),
            }
        }

        info!(
            urn,
            saved = report.saved.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "download finished"
        );
        report
    }

    /// Save the raw top-level manifest as `manifest.json` under the root.
    pub async fn save_manifest(&self, urn: &str) -> Result<PathBuf> {
        let raw = self.source.fetch_manifest_raw(urn).await?;
        let path = self.root.join(MANIFEST_FILE);
        write_atomic(&path, &raw).await?;
        Ok(path)
    }

    async fn download_one(&self, urn: &str, resource: &Resource) -> Outcome {
        let path = match safe_relative_path(&resource.local_path) {
            Ok(relative) => self.root.join(relative),
            Err(e) => {
                warn!(resource = %resource.remote_path, error = %e, "refusing local path");
                return Outcome::Failed(DownloadFailure {
                    local_path: resource.local_path.clone(),
                    reason: e.to_string(),
                });
            }
        };
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "already downloaded");
            return Outcome::Skipped(path);
        }

        let result = match self.source.fetch_derivative(urn, &resource.remote_path).await {
            Ok(data) => write_atomic(&path, &data).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(path = %path.display(), "saved");
                Outcome::Saved(path)
            }
            Err(e) => {
                warn!(resource = %resource.remote_path, error = %e, "download failed");
                Outcome::Failed(DownloadFailure {
                    local_path: resource.local_path.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Write through a sibling `.part` file that is renamed into place.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    tokio::fs::write(&partial, data).await?;
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}
