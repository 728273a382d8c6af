//! Sparse ZIP archive assembly, parsing and extraction.
//!
//! ## Architecture
//!
//! - [`sparse`]: full-length archive image holding only fetched segments
//! - [`assembler`]: fills a sparse image from HTTP range requests
//! - [`structures`]: data structures representing ZIP format elements
//! - [`parser`]: low-level parsing of ZIP structures from raw bytes
//! - [`extractor`]: listing and single-entry extraction
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Listing needs only (2) and (3), both at the tail of the archive.
//! Extracting one entry additionally needs that entry's slice of (1).
//!
//! ## Supported Features
//!
//! - Standard ZIP format and ZIP64 extensions
//! - STORED and DEFLATE compression methods
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

pub mod assembler;
pub mod extractor;
pub mod parser;
pub mod sparse;
pub mod structures;

pub use assembler::SparseArchiveAssembler;
pub use extractor::ZipEntryExtractor;
pub use parser::ZipParser;
pub use sparse::{ByteRange, SparseBuffer};
pub use structures::{ArchiveEntryRecord, CompressionMethod};
