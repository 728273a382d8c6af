use async_trait::async_trait;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::ReadAt;
use crate::Result;

/// A sparse archive persisted to a uniquely named temporary file.
///
/// The file is removed when the handle is dropped, on success and error
/// paths alike. [`TempArchive::close`] removes it eagerly and logs failures.
pub struct TempArchive {
    file: NamedTempFile,
    size: u64,
}

impl TempArchive {
    /// Create an empty temp file of `size` bytes inside `dir`, or the system
    /// temp dir. Unwritten regions read back as zeros.
    pub fn create(dir: Option<&Path>, size: u64) -> Result<Self> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("tmp-").suffix(".zip");
            b
        };
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.as_file().set_len(size)?;
        debug!(path = %file.path().display(), size, "created temp archive");
        Ok(Self { file, size })
    }

    /// Write `data` at `offset`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let f = self.file.as_file_mut();
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    /// Flush pending writes so reads observe them.
    pub fn sync(&mut self) -> Result<()> {
        self.file.as_file_mut().flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Delete the file now. Failures are logged, never returned.
    pub fn close(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!(path = %path.display(), error = %e, "failed to delete temp archive");
        }
    }

    fn handle(&self) -> &File {
        self.file.as_file()
    }
}

#[async_trait]
impl ReadAt for TempArchive {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut read = 0;
        while read < buf.len() {
            let n = pread(self.handle(), &mut buf[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        Ok(read)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(not(any(unix, windows)))]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::io::Read;
    let mut file = file;
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
}
