//! Listing and single-file extraction for remote composite-design archives.
//!
//! The flow for every request is: resolve the object to a signed URL,
//! assemble a sparse image from header and footer range reads, complete the
//! central directory, persist the image to a scoped temp file, and read it
//! back with the ZIP parser. Extraction additionally fetches the one entry's
//! compressed bytes before persisting.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use reqwest::Client;
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use crate::archive::{
    ArchiveEntryRecord, SparseArchiveAssembler, SparseBuffer, ZipEntryExtractor, ZipParser,
};
use crate::config::ClientConfig;
use crate::io::{RangeFetcher, ReadAt, TempArchive};
use crate::storage::{DownloadTarget, ObjectLocator, ObjectRef};
use crate::{Error, Result};

/// What to read: a storage object identifier or a plain range-capable URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Object(String),
    Url(String),
}

impl ArchiveSource {
    /// `http(s)://` inputs are URLs, everything else an object identifier.
    pub fn parse(input: &str) -> Self {
        if input.starts_with("http://") || input.starts_with("https://") {
            Self::Url(input.to_string())
        } else {
            Self::Object(input.to_string())
        }
    }
}

impl fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(id) => f.write_str(id),
            Self::Url(url) => f.write_str(url.split_once('?').map_or(url, |(base, _)| base)),
        }
    }
}

/// Result of [`CompositeDesignResolver::extract_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub size: u64,
    /// The destination already existed and nothing was fetched.
    pub skipped: bool,
}

/// A sparse image ready to be read: on disk normally, in memory when the
/// temp file could not be created.
enum Assembled {
    Disk(TempArchive),
    Memory(SparseBuffer),
}

impl Assembled {
    fn reader(&self) -> &dyn ReadAt {
        match self {
            Self::Disk(file) => file,
            Self::Memory(buffer) => buffer,
        }
    }

    fn close(self) {
        if let Self::Disk(file) = self {
            file.close();
        }
    }
}

/// Lists and extracts entries of remote ZIP archives without downloading them.
#[derive(Debug, Clone)]
pub struct CompositeDesignResolver {
    locator: ObjectLocator,
    fetcher: RangeFetcher,
    assembler: SparseArchiveAssembler,
    temp_dir: Option<PathBuf>,
}

impl CompositeDesignResolver {
    pub fn new(config: &ClientConfig, client: Client) -> Self {
        let fetcher = RangeFetcher::new(client.clone(), config.max_retry);
        Self {
            locator: ObjectLocator::new(client, config.storage_url.clone()),
            assembler: SparseArchiveAssembler::new(
                fetcher.clone(),
                config.chunk_size,
                config.zip_header_offset,
            ),
            fetcher,
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub fn fetcher(&self) -> &RangeFetcher {
        &self.fetcher
    }

    /// Resolve a source to its download URL and size.
    pub async fn target(&self, source: &ArchiveSource, credential: &str) -> Result<DownloadTarget> {
        match source {
            ArchiveSource::Object(id) => {
                let object = ObjectRef::parse(id)?;
                self.locator.resolve(&object, credential).await
            }
            ArchiveSource::Url(url) => self.fetcher.probe(url).await,
        }
    }

    /// Enumerate every entry of the archive's central directory.
    pub async fn list_contents(
        &self,
        source: &ArchiveSource,
        credential: &str,
    ) -> Result<Vec<ArchiveEntryRecord>> {
        let target = self.target(source, credential).await?;
        let buffer = self.directory(&target).await?;

        let assembled = self.persist(buffer);
        let result = ZipEntryExtractor::new(assembled.reader()).list_entries().await;
        assembled.close();

        let entries = result?;
        info!(%source, entries = entries.len(), "listed archive");
        Ok(entries)
    }

    /// Stream one entry's decompressed content into `sink`.
    pub async fn extract_to_writer<W>(
        &self,
        source: &ArchiveSource,
        credential: &str,
        entry_name: &str,
        sink: &mut W,
    ) -> Result<ArchiveEntryRecord>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let target = self.target(source, credential).await?;
        let mut buffer = self.directory(&target).await?;

        let entry = ZipParser::new(&buffer)
            .list_entries()
            .await?
            .into_iter()
            .find(|e| e.name == entry_name)
            .ok_or_else(|| Error::EntryNotFound(entry_name.to_string()))?;

        self.assembler
            .fill_entry(&target, &mut buffer, &entry)
            .await?;

        let assembled = self.persist(buffer);
        let result = ZipEntryExtractor::new(assembled.reader())
            .extract_entry(entry_name, entry.uncompressed_size, sink)
            .await;
        assembled.close();

        let written = result?;
        info!(%source, entry = entry_name, bytes = written, "extracted entry");
        Ok(entry)
    }

    /// Extract one entry to `out_dir/<entry name>`.
    ///
    /// An existing destination counts as already materialized and is
    /// returned without any network traffic.
    pub async fn extract_file(
        &self,
        source: &ArchiveSource,
        credential: &str,
        entry_name: &str,
        out_dir: &Path,
    ) -> Result<ExtractedFile> {
        let path = out_dir.join(safe_relative_path(entry_name)?);

        if let Ok(meta) = tokio::fs::metadata(&path).await {
            info!(path = %path.display(), "already extracted, skipping");
            return Ok(ExtractedFile {
                path,
                size: meta.len(),
                skipped: true,
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path).await?;
        match self
            .extract_to_writer(source, credential, entry_name, &mut file)
            .await
        {
            Ok(entry) => Ok(ExtractedFile {
                path,
                size: entry.uncompressed_size,
                skipped: false,
            }),
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %rm, "failed to remove partial file");
                }
                Err(e)
            }
        }
    }

    /// Header and footer plus whatever else the central directory needs.
    async fn directory(&self, target: &DownloadTarget) -> Result<SparseBuffer> {
        let mut buffer = self.assembler.assemble(target, None).await?;
        self.assembler
            .complete_directory(target, &mut buffer)
            .await?;
        Ok(buffer)
    }

    fn persist(&self, buffer: SparseBuffer) -> Assembled {
        match buffer.persist_in(self.temp_dir.as_deref()) {
            Ok(file) => Assembled::Disk(file),
            Err(e) => {
                warn!(error = %e, "cannot create temp archive, reading from memory");
                Assembled::Memory(buffer)
            }
        }
    }
}

/// Turn an entry name into a relative path that stays below the output dir.
pub(crate) fn safe_relative_path(entry_name: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(entry_name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidMetadata(format!(
                    "path `{entry_name}` escapes the output directory"
                )));
            }
        }
    }
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidMetadata(format!("path `{entry_name}` is empty")));
    }
    Ok(path)
}
