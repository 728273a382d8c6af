//! Derivative manifests: walking the tree, resolving files, downloading them.
//!
//! - [`manifest`]: typed manifest tree and per-derivative asset manifests
//! - [`urn`]: derivative URN decomposition and relative path joining
//! - [`source`]: where manifests and derivative bytes come from
//! - [`resolver`]: manifest tree to ordered [`Resource`] list
//! - [`download`]: writing resources below a local root

pub mod download;
pub mod manifest;
pub mod resolver;
pub mod source;
pub mod urn;

pub use download::{DownloadFailure, DownloadReport, ResourceDownloader};
pub use manifest::{DerivativeMime, DerivativeRole, Manifest, ManifestNode};
pub use resolver::{ManifestResourceResolver, Resolution, Resource, ResourceFailure};
pub use source::{DerivativeSource, HttpDerivativeSource};
pub use urn::{ResolvedPath, decompose, join};
