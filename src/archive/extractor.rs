use flate2::{Decompress, FlushDecompress, Status};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::io::ReadAt;
use crate::{Error, Result};

use super::parser::ZipParser;
use super::structures::{ArchiveEntryRecord, CompressionMethod};

/// Block size for reading compressed data and emitting decompressed data.
const BLOCK_SIZE: usize = 64 * 1024;

/// Lists and extracts entries of an assembled archive.
pub struct ZipEntryExtractor<'a, R: ReadAt + ?Sized> {
    parser: ZipParser<'a, R>,
    reader: &'a R,
}

impl<'a, R: ReadAt + ?Sized> ZipEntryExtractor<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self {
            parser: ZipParser::new(reader),
            reader,
        }
    }

    /// Enumerate the central directory.
    pub async fn list_entries(&self) -> Result<Vec<ArchiveEntryRecord>> {
        self.parser.list_entries().await
    }

    /// Look an entry up by exact name.
    pub async fn find_entry(&self, name: &str) -> Result<ArchiveEntryRecord> {
        self.list_entries()
            .await?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::EntryNotFound(name.to_string()))
    }

    /// Decompress the entry called `name` into `sink`.
    ///
    /// Exactly `declared_uncompressed_size` bytes are written. Any other count
    /// or a CRC-32 mismatch fails with [`Error::Decompression`].
    pub async fn extract_entry<W>(
        &self,
        name: &str,
        declared_uncompressed_size: u64,
        sink: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let entry = self.find_entry(name).await?;
        let data_offset = self.parser.data_offset(&entry).await?;

        let mut out = CheckedSink {
            sink,
            hasher: crc32fast::Hasher::new(),
            written: 0,
            limit: declared_uncompressed_size,
        };

        match entry.compression_method {
            CompressionMethod::Stored => self.copy_stored(&entry, data_offset, &mut out).await?,
            CompressionMethod::Deflate => self.inflate(&entry, data_offset, &mut out).await?,
            CompressionMethod::Unknown(method) => {
                return Err(Error::Decompression(format!(
                    "unsupported compression method {method} for `{name}`"
                )));
            }
        }

        out.sink.flush().await?;
        out.finish(&entry)
    }

    /// Extract file data to memory
    pub async fn extract_to_memory(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.find_entry(name).await?;
        let mut buf = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
        self.extract_entry(name, entry.uncompressed_size, &mut buf)
            .await?;
        Ok(buf)
    }

    /// End of the entry's compressed payload, which must lie inside the archive.
    fn payload_end(&self, entry: &ArchiveEntryRecord, data_offset: u64) -> Result<u64> {
        data_offset
            .checked_add(entry.compressed_size)
            .filter(|end| *end <= self.reader.size())
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "payload of `{}` ({} bytes at {data_offset}) runs past the archive end",
                    entry.name, entry.compressed_size
                ))
            })
    }

    async fn copy_stored<W>(
        &self,
        entry: &ArchiveEntryRecord,
        data_offset: u64,
        out: &mut CheckedSink<'_, W>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut pos = data_offset;
        let end = self.payload_end(entry, data_offset)?;

        while pos < end {
            let want = ((end - pos) as usize).min(BLOCK_SIZE);
            let n = self.reader.read_at(pos, &mut block[..want]).await?;
            if n == 0 {
                return Err(truncated(entry));
            }
            out.emit(&block[..n]).await?;
            pos += n as u64;
        }
        Ok(())
    }

    async fn inflate<W>(
        &self,
        entry: &ArchiveEntryRecord,
        data_offset: u64,
        out: &mut CheckedSink<'_, W>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut inflater = Decompress::new(false);
        let mut input = vec![0u8; BLOCK_SIZE];
        let mut output = vec![0u8; BLOCK_SIZE];
        let (mut in_start, mut in_end) = (0usize, 0usize);
        let mut pos = data_offset;
        let end = self.payload_end(entry, data_offset)?;

        loop {
            if in_start == in_end && pos < end {
                let want = ((end - pos) as usize).min(BLOCK_SIZE);
                let n = self.reader.read_at(pos, &mut input[..want]).await?;
                if n == 0 {
                    return Err(truncated(entry));
                }
                pos += n as u64;
                in_start = 0;
                in_end = n;
            }

            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress(&input[in_start..in_end], &mut output, FlushDecompress::None)
                .map_err(|e| Error::Decompression(format!("`{}`: {e}", entry.name)))?;
            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = (inflater.total_out() - before_out) as usize;

            in_start += consumed;
            out.emit(&output[..produced]).await?;

            if status == Status::StreamEnd {
                return Ok(());
            }
            if consumed == 0 && produced == 0 {
                // No progress: either input ran out before the final block,
                // or the stream is stuck on bad data.
                return Err(truncated(entry));
            }
        }
    }
}

fn truncated(entry: &ArchiveEntryRecord) -> Error {
    Error::Decompression(format!("compressed data of `{}` is truncated", entry.name))
}

/// Sink wrapper enforcing the declared size and tracking the CRC-32.
struct CheckedSink<'s, W: ?Sized> {
    sink: &'s mut W,
    hasher: crc32fast::Hasher,
    written: u64,
    limit: u64,
}

impl<W: AsyncWrite + Unpin + Send + ?Sized> CheckedSink<'_, W> {
    async fn emit(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if self.written + data.len() as u64 > self.limit {
            return Err(Error::Decompression(format!(
                "entry produced more than the declared {} bytes",
                self.limit
            )));
        }
        self.sink.write_all(data).await?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    fn finish(self, entry: &ArchiveEntryRecord) -> Result<u64> {
        if self.written != self.limit {
            return Err(Error::Decompression(format!(
                "`{}` produced {} bytes, declared {}",
                entry.name, self.written, self.limit
            )));
        }
        let crc = self.hasher.finalize();
        if crc != entry.crc32 {
            return Err(Error::Decompression(format!(
                "CRC-32 mismatch for `{}`: expected {:08x}, got {crc:08x}",
                entry.name, entry.crc32
            )));
        }
        debug!(entry = %entry.name, bytes = self.written, "entry extracted");
        Ok(self.written)
    }
}
