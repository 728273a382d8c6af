//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Only the directory structures at the tail are dereferenced while
//! listing, so a sparse buffer holding just the footer is enough.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::io::ReadAt;
use crate::{Error, Result};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
pub const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// Borrows its data source, so the same sparse buffer can be inspected,
/// extended and inspected again.
pub struct ZipParser<'a, R: ReadAt + ?Sized> {
    /// The underlying data source
    reader: &'a R,
    /// Total size of the archive in bytes
    size: u64,
}

impl<'a, R: ReadAt + ?Sized> ZipParser<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Read exactly `len` bytes at `offset`; a short read means the
    /// declared structure runs past the end of the archive.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.reader.read_at(offset, &mut buf).await?;
        if n < len {
            return Err(Error::corrupt(format!(
                "structure at offset {offset} ({len} bytes) runs past end of archive"
            )));
        }
        Ok(buf)
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Returns the record and its offset in the archive.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        // Try the common case of an archive without comment first.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let buf = self
                .read_exact_at(offset, EndOfCentralDirectory::SIZE)
                .await?;

            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        // EOCD not at expected location: a comment follows it.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;
        let buf = self.read_exact_at(search_start, search_size as usize).await?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len().saturating_sub(EndOfCentralDirectory::SIZE)).rev() {
            if buf.len() < EndOfCentralDirectory::SIZE {
                break;
            }
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must account for every trailing byte.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(Error::corrupt("end of central directory not found"))
    }

    /// Read the ZIP64 End of Central Directory Locator preceding the EOCD.
    pub async fn read_zip64_locator(&self, eocd_offset: u64) -> Result<Zip64EOCDLocator> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| Error::corrupt("ZIP64 locator would precede start of archive"))?;
        let buf = self
            .read_exact_at(locator_offset, Zip64EOCDLocator::SIZE)
            .await?;
        Zip64EOCDLocator::from_bytes(&buf)
    }

    /// Read the ZIP64 End of Central Directory record the locator points at.
    pub async fn read_zip64_eocd(&self, locator: &Zip64EOCDLocator) -> Result<Zip64EOCD> {
        let buf = self
            .read_exact_at(locator.eocd64_offset, Zip64EOCD::MIN_SIZE)
            .await?;
        Zip64EOCD::from_bytes(&buf)
    }

    /// Resolve the central directory's position, using ZIP64 if needed.
    pub async fn directory_location(&self) -> Result<DirectoryLocation> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        self.directory_location_from(&eocd, eocd_offset).await
    }

    pub async fn directory_location_from(
        &self,
        eocd: &EndOfCentralDirectory,
        eocd_offset: u64,
    ) -> Result<DirectoryLocation> {
        let location = if eocd.is_zip64() {
            let locator = self.read_zip64_locator(eocd_offset).await?;
            let eocd64 = self.read_zip64_eocd(&locator).await?;
            DirectoryLocation {
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                total_entries: eocd64.total_entries,
            }
        } else {
            DirectoryLocation {
                offset: eocd.cd_offset as u64,
                size: eocd.cd_size as u64,
                total_entries: eocd.total_entries as u64,
            }
        };

        if location.offset.saturating_add(location.size) > self.size {
            return Err(Error::corrupt(format!(
                "central directory [{}, +{}) exceeds archive size {}",
                location.offset, location.size, self.size
            )));
        }
        Ok(location)
    }

    /// List all entries in the ZIP archive.
    ///
    /// Reads the EOCD first, then fetches and parses the entire
    /// Central Directory.
    pub async fn list_entries(&self) -> Result<Vec<ArchiveEntryRecord>> {
        let location = self.directory_location().await?;

        // One read for the whole directory.
        let cd_data = self
            .read_exact_at(location.offset, location.size as usize)
            .await?;

        let mut entries = Vec::with_capacity(location.total_entries.min(65536) as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for index in 0..location.total_entries {
            let entry = parse_cdfh(&mut cursor).map_err(|e| {
                Error::corrupt(format!("central directory record {index}: {e}"))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Get the actual data offset for an entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    pub async fn data_offset(&self, entry: &ArchiveEntryRecord) -> Result<u64> {
        let lfh_buf = self
            .read_exact_at(entry.local_header_offset, LFH_SIZE)
            .await?;

        // Verify LFH signature (PK\x03\x04)
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(Error::corrupt(format!(
                "invalid local file header for `{}`",
                entry.name
            )));
        }

        let file_name_length = u16::from_le_bytes([lfh_buf[26], lfh_buf[27]]) as u64;
        let extra_field_length = u16::from_le_bytes([lfh_buf[28], lfh_buf[29]]) as u64;

        // Data starts after: LFH (30 bytes) + filename + extra field
        Ok(entry.local_header_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> std::io::Result<ArchiveEntryRecord> {
    use std::io::{Error as IoError, ErrorKind};

    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            "invalid central directory file header signature",
        ));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let _flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let external_attributes = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    // Non-UTF8 names are kept lossily.
    let name = String::from_utf8_lossy(&file_name_bytes).to_string();
    let is_directory = name.ends_with('/');

    // ZIP64 extended information lives in extra field 0x0001.
    let extra_field_end = cursor.position() + extra_field_length as u64;

    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()?;
        let field_end = cursor.position() + field_size as u64;

        if header_id == 0x0001 {
            // Present only when the matching header field is saturated.
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                lfh_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }
        cursor.set_position(field_end);
    }

    cursor.set_position(extra_field_end);

    let mut comment_bytes = vec![0u8; file_comment_length as usize];
    cursor.read_exact(&mut comment_bytes)?;
    let comment = String::from_utf8_lossy(&comment_bytes).to_string();

    Ok(ArchiveEntryRecord {
        name,
        comment,
        compressed_size,
        uncompressed_size,
        crc32,
        external_attributes,
        last_write_time: dos_datetime(last_mod_date, last_mod_time),
        compression_method: CompressionMethod::from_u16(compression_method),
        local_header_offset: lfh_offset,
        last_mod_time,
        last_mod_date,
        is_directory,
    })
}
