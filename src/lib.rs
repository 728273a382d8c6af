//! # aps-extract
//!
//! Partial access to large remote design data over HTTP.
//!
//! Two capabilities are provided:
//!
//! - **Composite designs**: list and extract single entries of a remote ZIP
//!   archive using HTTP Range requests. Only the archive's header, its
//!   central directory and the requested entry's bytes are transferred.
//! - **Derivative manifests**: walk a model-derivative manifest tree and
//!   flatten it into an ordered list of downloadable files, expanding SVF,
//!   F2D and property-database derivatives through their sub-manifests.
//!
//! ## Example
//!
//! ```no_run
//! use aps_extract::composite::{ArchiveSource, CompositeDesignResolver};
//! use aps_extract::config::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let resolver = CompositeDesignResolver::new(&config, config.http_client()?);
//!
//!     let source = ArchiveSource::parse("urn:adsk.objects:os.object:bucket/design.zip");
//!     for entry in resolver.list_contents(&source, "token").await? {
//!         println!("{}", entry.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod composite;
pub mod config;
pub mod derivative;
pub mod error;
pub mod io;
pub mod storage;

pub use cli::Cli;
pub use error::{Error, Result};
