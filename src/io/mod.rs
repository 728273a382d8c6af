//! Random-access byte sources.
//!
//! Everything the ZIP parser reads from implements [`ReadAt`]: the sparse
//! buffer assembled from range requests, the temp file it is persisted to,
//! and plain in-memory bodies.

mod http;
mod temp;

pub use http::RangeFetcher;
pub use temp::TempArchive;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read, which is short only at end of data.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// A fully downloaded body, e.g. a derivative package small enough to hold.
#[async_trait]
impl ReadAt for Bytes {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}
