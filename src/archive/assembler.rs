//! Builds sparse archive images from HTTP range reads.
//!
//! A conforming reader enumerating the central directory only touches the
//! tail of the archive: the end-of-central-directory record and the
//! directory it points at. Entry payloads are dereferenced only when one
//! entry is extracted, and that entry's range is fetched explicitly.

use bytes::Bytes;
use tracing::{debug, info};

use crate::io::RangeFetcher;
use crate::storage::DownloadTarget;
use crate::{Error, Result};

use super::parser::{MAX_COMMENT_SIZE, ZipParser};
use super::sparse::{ByteRange, SparseBuffer};
use super::structures::{
    ArchiveEntryRecord, EndOfCentralDirectory, LFH_SIZE, Zip64EOCD, Zip64EOCDLocator,
};

/// Largest tail that can hold an EOCD record plus the longest legal comment.
const MAX_FOOTER: u64 = MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64;

/// Assembles [`SparseBuffer`]s for one download target at a time.
#[derive(Debug, Clone)]
pub struct SparseArchiveAssembler {
    fetcher: RangeFetcher,
    chunk_size: u64,
    zip_header_offset: u64,
}

impl SparseArchiveAssembler {
    pub fn new(fetcher: RangeFetcher, chunk_size: u64, zip_header_offset: u64) -> Self {
        Self {
            fetcher,
            chunk_size: chunk_size.max(EndOfCentralDirectory::SIZE as u64),
            zip_header_offset: zip_header_offset.max(LFH_SIZE as u64),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Fetch header, footer and the optional `extra` range concurrently and
    /// place them into a buffer of the target's full declared length.
    pub async fn assemble(
        &self,
        target: &DownloadTarget,
        extra: Option<ByteRange>,
    ) -> Result<SparseBuffer> {
        let total = target.total_size;
        if total == 0 {
            return Err(Error::Assembly("archive is empty".into()));
        }

        let header = ByteRange::new(0, self.chunk_size).clamp(total);
        let footer = ByteRange::tail(total, self.chunk_size);
        let extra = match extra {
            Some(range) if range.offset >= total => {
                return Err(Error::Assembly(format!(
                    "extra range {range} starts beyond archive size {total}"
                )));
            }
            other => other.map(|range| range.clamp(total)),
        };

        let (header_bytes, footer_bytes, extra_bytes) = tokio::try_join!(
            self.fetch_mandatory(target, header, "header"),
            self.fetch_mandatory(target, footer, "footer"),
            async {
                match extra {
                    Some(range) => self.fetch_mandatory(target, range, "extra").await.map(Some),
                    None => Ok(None),
                }
            },
        )?;

        let mut buffer = SparseBuffer::new(total);
        buffer.insert(header.offset, header_bytes)?;
        buffer.insert(footer.offset, footer_bytes)?;
        if let (Some(range), Some(bytes)) = (extra, extra_bytes) {
            buffer.insert(range.offset, bytes)?;
        }

        debug!(total, filled = ?buffer.filled_ranges(), "assembled sparse archive");
        Ok(buffer)
    }

    async fn fetch_mandatory(
        &self,
        target: &DownloadTarget,
        range: ByteRange,
        what: &str,
    ) -> Result<Bytes> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let bytes = self
            .fetcher
            .fetch_range(&target.url, range.offset, range.length)
            .await?;
        if bytes.is_empty() {
            return Err(Error::Assembly(format!("{what} range {range} returned no data")));
        }
        Ok(bytes)
    }

    /// Fetch whatever part of `range` the buffer does not hold yet.
    pub async fn fill(
        &self,
        target: &DownloadTarget,
        buffer: &mut SparseBuffer,
        range: ByteRange,
    ) -> Result<()> {
        let gaps = buffer.missing(range);
        let fetched = futures::future::try_join_all(
            gaps.iter()
                .map(|gap| self.fetch_mandatory(target, *gap, "gap")),
        )
        .await?;

        for (gap, bytes) in gaps.iter().zip(fetched) {
            debug!(%gap, received = bytes.len(), "filled gap");
            buffer.insert(gap.offset, bytes)?;
        }
        Ok(())
    }

    /// Locate the end-of-central-directory record, widening the footer
    /// when a long archive comment pushes it out of the first chunk, then
    /// make sure the ZIP64 records and the whole central directory are
    /// present.
    pub async fn complete_directory(
        &self,
        target: &DownloadTarget,
        buffer: &mut SparseBuffer,
    ) -> Result<()> {
        let total = buffer.total_size();
        let mut footer_len = self.chunk_size.min(total);

        let (eocd, eocd_offset) = loop {
            let probe = ZipParser::new(&*buffer).find_eocd().await;
            match probe {
                Ok(found) => break found,
                Err(Error::CorruptArchive(_)) if footer_len < MAX_FOOTER.min(total) => {
                    footer_len = (footer_len * 4).min(MAX_FOOTER).min(total);
                    info!(footer_len, "end of central directory not in footer, widening");
                    self.fill(target, buffer, ByteRange::tail(total, footer_len))
                        .await?;
                }
                Err(e) => return Err(e),
            }
        };

        if eocd.is_zip64() {
            let locator = ByteRange::new(
                eocd_offset.saturating_sub(Zip64EOCDLocator::SIZE as u64),
                Zip64EOCDLocator::SIZE as u64,
            );
            self.fill(target, buffer, locator).await?;
            let locator = ZipParser::new(&*buffer)
                .read_zip64_locator(eocd_offset)
                .await?;
            self.fill(
                target,
                buffer,
                ByteRange::new(locator.eocd64_offset, Zip64EOCD::MIN_SIZE as u64),
            )
            .await?;
        }

        let location = ZipParser::new(&*buffer)
            .directory_location_from(&eocd, eocd_offset)
            .await?;
        self.fill(target, buffer, ByteRange::new(location.offset, location.size))
            .await?;

        debug!(
            cd_offset = location.offset,
            cd_size = location.size,
            entries = location.total_entries,
            "central directory available"
        );
        Ok(())
    }

    /// Range to request for one entry: its local header onwards, widened by
    /// the configured header slack beyond the compressed size.
    pub fn extra_range_for(&self, entry: &ArchiveEntryRecord, total: u64) -> ByteRange {
        ByteRange::new(
            entry.local_header_offset,
            entry.compressed_size.saturating_add(self.zip_header_offset),
        )
        .clamp(total)
    }

    /// Make the entry's local header and full payload available.
    ///
    /// The widened extra range covers most entries; names or extra fields
    /// longer than the slack are topped up after reading the local header.
    pub async fn fill_entry(
        &self,
        target: &DownloadTarget,
        buffer: &mut SparseBuffer,
        entry: &ArchiveEntryRecord,
    ) -> Result<()> {
        let total = buffer.total_size();
        self.fill(target, buffer, self.extra_range_for(entry, total))
            .await?;

        let data_offset = ZipParser::new(&*buffer).data_offset(entry).await?;
        let payload = ByteRange::new(data_offset, entry.compressed_size);
        if payload.end() > total {
            return Err(Error::corrupt(format!(
                "payload of `{}` {payload} exceeds archive size {total}",
                entry.name
            )));
        }
        if !buffer.is_filled(payload) {
            debug!(entry = %entry.name, %payload, "local header exceeded slack, topping up");
            self.fill(target, buffer, payload).await?;
        }
        Ok(())
    }
}
