use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::io::Cursor;

use crate::{Error, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let read = |c: &mut Cursor<&[u8]>| -> std::io::Result<Self> {
            Ok(Self {
                disk_number: c.read_u16::<LittleEndian>()?,
                disk_with_cd: c.read_u16::<LittleEndian>()?,
                disk_entries: c.read_u16::<LittleEndian>()?,
                total_entries: c.read_u16::<LittleEndian>()?,
                cd_size: c.read_u32::<LittleEndian>()?,
                cd_offset: c.read_u32::<LittleEndian>()?,
                comment_len: c.read_u16::<LittleEndian>()?,
            })
        };
        read(&mut cursor).map_err(|e| Error::corrupt(format!("truncated end of central directory: {e}")))
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let read = |c: &mut Cursor<&[u8]>| -> std::io::Result<Self> {
            Ok(Self {
                disk_with_eocd64: c.read_u32::<LittleEndian>()?,
                eocd64_offset: c.read_u64::<LittleEndian>()?,
                total_disks: c.read_u32::<LittleEndian>()?,
            })
        };
        read(&mut cursor).map_err(|e| Error::corrupt(format!("truncated ZIP64 locator: {e}")))
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::corrupt("invalid ZIP64 end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let read = |c: &mut Cursor<&[u8]>| -> std::io::Result<Self> {
            Ok(Self {
                eocd64_size: c.read_u64::<LittleEndian>()?,
                version_made_by: c.read_u16::<LittleEndian>()?,
                version_needed: c.read_u16::<LittleEndian>()?,
                disk_number: c.read_u32::<LittleEndian>()?,
                disk_with_cd: c.read_u32::<LittleEndian>()?,
                disk_entries: c.read_u64::<LittleEndian>()?,
                total_entries: c.read_u64::<LittleEndian>()?,
                cd_size: c.read_u64::<LittleEndian>()?,
                cd_offset: c.read_u64::<LittleEndian>()?,
            })
        };
        read(&mut cursor).map_err(|e| Error::corrupt(format!("truncated ZIP64 record: {e}")))
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Where the central directory lives, as declared by the (ZIP64) EOCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub offset: u64,
    pub size: u64,
    pub total_entries: u64,
}

/// One central-directory record.
///
/// Produced by listing whether or not the entry's payload has been fetched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntryRecord {
    /// Full path of the entry inside the archive.
    pub name: String,
    pub comment: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub external_attributes: u32,
    pub last_write_time: Option<NaiveDateTime>,
    #[serde(skip)]
    pub compression_method: CompressionMethod,
    #[serde(skip)]
    pub local_header_offset: u64,
    #[serde(skip)]
    pub last_mod_time: u16,
    #[serde(skip)]
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl ArchiveEntryRecord {
    /// Final path component, empty for directories.
    pub fn file_name(&self) -> &str {
        match self.name.rfind('/') {
            Some(i) => &self.name[i + 1..],
            None => &self.name,
        }
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        dos_date(self.last_mod_date)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        dos_time(self.last_mod_time)
    }
}

pub(crate) fn dos_date(raw: u16) -> (u16, u8, u8) {
    let day = (raw & 0x1F) as u8;
    let month = ((raw >> 5) & 0x0F) as u8;
    let year = ((raw >> 9) & 0x7F) + 1980;
    (year, month, day)
}

pub(crate) fn dos_time(raw: u16) -> (u8, u8, u8) {
    let second = ((raw & 0x1F) * 2) as u8;
    let minute = ((raw >> 5) & 0x3F) as u8;
    let hour = ((raw >> 11) & 0x1F) as u8;
    (hour, minute, second)
}

/// Combine a DOS date/time pair; `None` when the fields are out of range.
pub(crate) fn dos_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let (year, month, day) = dos_date(date);
    let (hour, minute, second) = dos_time(time);
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(
        hour as u32,
        minute as u32,
        second as u32,
    )
}
