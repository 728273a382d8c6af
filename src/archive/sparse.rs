//! A full-length archive image populated only where it was fetched.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::io::{ReadAt, TempArchive};
use crate::{Error, Result};

/// Half-open byte range `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn from_bounds(start: u64, end: u64) -> Self {
        Self::new(start, end.saturating_sub(start))
    }

    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Trim to `[0, total)`.
    pub fn clamp(&self, total: u64) -> Self {
        let start = self.offset.min(total);
        Self::from_bounds(start, self.end().min(total))
    }

    /// The last `length` bytes of a `total`-byte object.
    pub fn tail(total: u64, length: u64) -> Self {
        Self::from_bounds(total.saturating_sub(length), total)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}

/// Owns a logical `total_size`-byte image of a remote archive.
///
/// Only fetched segments are stored; everything else is a hole that reads
/// back as zeros. Adjacent and overlapping segments are merged on insert,
/// so segments never overlap.
#[derive(Debug, Clone)]
pub struct SparseBuffer {
    total_size: u64,
    segments: BTreeMap<u64, Bytes>,
}

impl SparseBuffer {
    pub fn new(total_size: u64) -> Self {
        Self {
            total_size,
            segments: BTreeMap::new(),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Place `data` at `offset`. Later writes win where they overlap.
    pub fn insert(&mut self, offset: u64, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= self.total_size)
            .ok_or_else(|| {
                Error::Assembly(format!(
                    "segment {} does not fit an archive of {} bytes",
                    ByteRange::new(offset, data.len() as u64),
                    self.total_size
                ))
            })?;

        let touching: Vec<u64> = self
            .segments
            .range(..=end)
            .filter(|(start, seg)| **start + seg.len() as u64 >= offset)
            .map(|(start, _)| *start)
            .collect();

        if touching.is_empty() {
            self.segments.insert(offset, data);
            return Ok(());
        }

        let merged_start = touching[0].min(offset);
        let mut merged_end = end;
        for start in &touching {
            merged_end = merged_end.max(start + self.segments[start].len() as u64);
        }

        let mut merged = vec![0u8; (merged_end - merged_start) as usize];
        for start in touching {
            if let Some(seg) = self.segments.remove(&start) {
                let at = (start - merged_start) as usize;
                merged[at..at + seg.len()].copy_from_slice(&seg);
            }
        }
        let at = (offset - merged_start) as usize;
        merged[at..at + data.len()].copy_from_slice(&data);

        self.segments.insert(merged_start, Bytes::from(merged));
        Ok(())
    }

    /// Filled ranges in ascending order.
    pub fn filled_ranges(&self) -> Vec<ByteRange> {
        self.segments
            .iter()
            .map(|(start, seg)| ByteRange::new(*start, seg.len() as u64))
            .collect()
    }

    /// Sub-ranges of `range` (clamped to the archive) that are still holes.
    pub fn missing(&self, range: ByteRange) -> Vec<ByteRange> {
        let range = range.clamp(self.total_size);
        let mut gaps = Vec::new();
        let mut cursor = range.offset;

        for (start, seg) in self.segments.range(..range.end()) {
            let seg_end = start + seg.len() as u64;
            if seg_end <= cursor {
                continue;
            }
            if *start > cursor {
                gaps.push(ByteRange::from_bounds(cursor, *start));
            }
            cursor = seg_end;
            if cursor >= range.end() {
                break;
            }
        }
        if cursor < range.end() {
            gaps.push(ByteRange::from_bounds(cursor, range.end()));
        }
        gaps
    }

    pub fn is_filled(&self, range: ByteRange) -> bool {
        self.missing(range).is_empty()
    }

    /// Copy the image into `buf` starting at `offset`, zeros for holes.
    fn copy_out(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset >= self.total_size {
            return 0;
        }
        let n = buf.len().min((self.total_size - offset) as usize);
        let window = ByteRange::new(offset, n as u64);
        buf[..n].fill(0);

        for (start, seg) in self.segments.range(..window.end()) {
            let seg_end = start + seg.len() as u64;
            if seg_end <= offset {
                continue;
            }
            let from = offset.max(*start);
            let to = window.end().min(seg_end);
            let src = &seg[(from - start) as usize..(to - start) as usize];
            let dst = (from - offset) as usize;
            buf[dst..dst + src.len()].copy_from_slice(src);
        }
        n
    }

    /// Write the image to a uniquely named temp file.
    ///
    /// The file has the full declared length; holes stay zero.
    pub fn persist_in(&self, dir: Option<&Path>) -> Result<TempArchive> {
        let mut file = TempArchive::create(dir, self.total_size)?;
        for (start, seg) in &self.segments {
            file.write_at(*start, seg)?;
        }
        file.sync()?;
        Ok(file)
    }
}

#[async_trait]
impl ReadAt for SparseBuffer {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(self.copy_out(offset, buf))
    }

    fn size(&self) -> u64 {
        self.total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_out_of_bounds() {
        let mut buf = SparseBuffer::new(10);
        let err = buf.insert(8, Bytes::from_static(b"abc")).unwrap_err();
        assert!(matches!(err, Error::Assembly(_)));
    }

    #[test]
    fn overlapping_inserts_merge_and_later_wins() {
        let mut buf = SparseBuffer::new(20);
        buf.insert(0, Bytes::from_static(b"aaaa")).unwrap();
        buf.insert(10, Bytes::from_static(b"cccc")).unwrap();
        buf.insert(2, Bytes::from_static(b"bbbbbbbbb")).unwrap();
        assert_eq!(buf.filled_ranges(), vec![ByteRange::new(0, 14)]);

        let mut out = [0u8; 14];
        buf.copy_out(0, &mut out);
        assert_eq!(&out, b"aabbbbbbbbbccc");
    }

    #[test]
    fn missing_reports_holes_only() {
        let mut buf = SparseBuffer::new(100);
        buf.insert(0, Bytes::from(vec![1u8; 10])).unwrap();
        buf.insert(50, Bytes::from(vec![1u8; 10])).unwrap();

        assert_eq!(
            buf.missing(ByteRange::new(5, 90)),
            vec![ByteRange::from_bounds(10, 50), ByteRange::from_bounds(60, 95)]
        );
        assert!(buf.is_filled(ByteRange::new(52, 4)));
        assert_eq!(
            buf.missing(ByteRange::new(90, 50)),
            vec![ByteRange::from_bounds(90, 100)]
        );
    }

    #[tokio::test]
    async fn holes_read_as_zero() {
        let mut buf = SparseBuffer::new(8);
        buf.insert(6, Bytes::from_static(b"zz")).unwrap();
        let mut out = [0xFFu8; 10];
        assert_eq!(buf.read_at(4, &mut out).await.unwrap(), 4);
        assert_eq!(&out[..4], b"\0\0zz");
    }

    #[tokio::test]
    async fn persisted_file_matches_image() {
        let mut buf = SparseBuffer::new(32);
        buf.insert(0, Bytes::from_static(b"head")).unwrap();
        buf.insert(28, Bytes::from_static(b"tail")).unwrap();
        let file = buf.persist_in(None).unwrap();

        let mut expected = [0u8; 32];
        let mut actual = [0u8; 32];
        buf.read_at(0, &mut expected).await.unwrap();
        file.read_at(0, &mut actual).await.unwrap();
        assert_eq!(expected, actual);
    }
}
