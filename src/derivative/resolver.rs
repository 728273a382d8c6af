//! Flattening a derivative manifest into downloadable resources.

use std::io::Read;
use std::iter;

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::manifest::{AssetManifest, DerivativeMime, DerivativeRole, Manifest, ManifestNode};
use super::source::DerivativeSource;
use super::urn::{ResolvedPath, decompose, join, local_join, percent_decode};
use crate::archive::ZipEntryExtractor;
use crate::{Error, Result};

/// Files every property database derivative is made of, besides its root.
pub const PROPERTY_DB_FILES: [&str; 5] = [
    "objects_attrs.json.gz",
    "objects_vals.json.gz",
    "objects_offs.json.gz",
    "objects_ids.json.gz",
    "objects_avs.json.gz",
];

/// Sub-manifest that lists the files of an F2D derivative.
pub const F2D_MANIFEST: &str = "manifest.json.gz";

/// One physical file backing a manifest node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// File name as listed by the node or its sub-manifest.
    pub file_name: String,
    /// Decoded derivative URN to download the file from.
    pub remote_path: String,
    /// Relative destination path.
    pub local_path: String,
}

/// A node whose sub-manifest could not be fetched or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub guid: Option<String>,
    pub urn: String,
    pub reason: String,
}

/// Resources in document order plus the nodes that only partially resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub resources: Vec<Resource>,
    pub failures: Vec<ResourceFailure>,
}

struct SelectedNode<'m> {
    guid: Option<&'m str>,
    mime: &'m DerivativeMime,
    path: ResolvedPath,
}

struct NodeFiles {
    path: ResolvedPath,
    files: Vec<String>,
    failure: Option<ResourceFailure>,
}

/// Walks a manifest tree and expands every resource node into files.
#[derive(Debug, Clone)]
pub struct ManifestResourceResolver<S> {
    source: S,
    max_concurrency: usize,
}

impl<S: DerivativeSource> ManifestResourceResolver<S> {
    pub fn new(source: S, max_concurrency: usize) -> Self {
        Self {
            source,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the manifest of `urn` and resolve it.
    ///
    /// Failing to fetch or parse the top-level manifest is fatal. Failures
    /// below it are reported in [`Resolution::failures`].
    pub async fn resolve(&self, urn: &str) -> Result<Resolution> {
        let manifest = self.source.fetch_manifest(urn).await?;
        self.resolve_manifest(urn, &manifest).await
    }

    /// Resolve an already fetched manifest of model `urn`.
    pub async fn resolve_manifest(&self, urn: &str, manifest: &Manifest) -> Result<Resolution> {
        let mut selected = Vec::new();
        select_nodes(&manifest.derivatives, &mut selected)?;
        debug!(urn, nodes = selected.len(), "selected resource nodes");

        let classified: Vec<NodeFiles> = stream::iter(selected)
            .map(|node| self.classify(urn, node))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut resolution = Resolution::default();
        for node in classified {
            resolution.failures.extend(node.failure);
            for file in node.files {
                resolution.resources.push(Resource {
                    remote_path: percent_decode(&join(&node.path.base_path, &file)),
                    local_path: local_join(&node.path.local_path, &file),
                    file_name: file,
                });
            }
        }

        info!(
            urn,
            resources = resolution.resources.len(),
            failures = resolution.failures.len(),
            "resolved manifest"
        );
        Ok(resolution)
    }

    async fn classify(&self, urn: &str, node: SelectedNode<'_>) -> NodeFiles {
        let root = node.path.root_file_name.clone();
        let expanded = match node.mime {
            DerivativeMime::Svf => self
                .asset_files(urn, &node.path.urn)
                .await
                .map(|assets| iter::once(root.clone()).chain(assets).collect()),
            DerivativeMime::F2d => {
                let manifest_urn = format!("{}{F2D_MANIFEST}", node.path.base_path);
                self.asset_files(urn, &manifest_urn)
                    .await
                    .map(|assets| iter::once(F2D_MANIFEST.to_string()).chain(assets).collect())
            }
            DerivativeMime::PropertyDb => Ok(PROPERTY_DB_FILES
                .iter()
                .map(|f| f.to_string())
                .chain(iter::once(root.clone()))
                .collect()),
            DerivativeMime::Svf2 => Ok(Vec::new()),
            DerivativeMime::Other(_) => Ok(vec![root.clone()]),
        };

        match expanded {
            Ok(files) => NodeFiles {
                path: node.path,
                files,
                failure: None,
            },
            Err(e) => {
                warn!(
                    guid = node.guid.unwrap_or_default(),
                    urn = %node.path.urn,
                    error = %e,
                    "sub-manifest unavailable, keeping root file only"
                );
                let failure = ResourceFailure {
                    guid: node.guid.map(str::to_string),
                    urn: node.path.urn.clone(),
                    reason: e.to_string(),
                };
                NodeFiles {
                    path: node.path,
                    files: vec![root],
                    failure: Some(failure),
                }
            }
        }
    }

    async fn asset_files(&self, urn: &str, derivative_urn: &str) -> Result<Vec<String>> {
        let body = self.source.fetch_derivative(urn, derivative_urn).await?;
        let manifest = decode_asset_manifest(derivative_urn, &body).await?;
        Ok(manifest.file_uris().map(str::to_string).collect())
    }
}

/// Pre-order walk collecting nodes whose role backs resources.
fn select_nodes<'m>(nodes: &'m [ManifestNode], out: &mut Vec<SelectedNode<'m>>) -> Result<()> {
    for node in nodes {
        if node.role.as_ref().is_some_and(DerivativeRole::is_resource) {
            let guid = node.guid.as_deref();
            let missing = |field: &str| {
                Error::upstream(
                    "manifest",
                    format!("node {} has a resource role but no {field}", guid.unwrap_or("<no guid>")),
                )
            };
            let urn = node.urn.as_deref().ok_or_else(|| missing("urn"))?;
            let mime = node.mime.as_ref().ok_or_else(|| missing("mime"))?;
            out.push(SelectedNode {
                guid,
                mime,
                path: decompose(urn),
            });
        }
        select_nodes(&node.children, out)?;
    }
    Ok(())
}

/// Decode a sub-manifest body.
///
/// `.gz` URNs are gunzipped, falling back to plain JSON when the body is not
/// a gzip stream. Anything else is a ZIP package with a `manifest.json` entry.
pub async fn decode_asset_manifest(derivative_urn: &str, body: &Bytes) -> Result<AssetManifest> {
    let invalid = |e: serde_json::Error| {
        Error::upstream(derivative_urn, format!("invalid asset manifest: {e}"))
    };

    if derivative_urn.contains(".gz") {
        let mut json = Vec::new();
        match GzDecoder::new(&body[..]).read_to_end(&mut json) {
            Ok(n) if n > 0 => return serde_json::from_slice(&json).map_err(invalid),
            Ok(_) => debug!(derivative = derivative_urn, "empty gzip stream, reading plain JSON"),
            Err(e) => debug!(derivative = derivative_urn, error = %e, "not gzip, reading plain JSON"),
        }
        return serde_json::from_slice(body).map_err(invalid);
    }

    let json = ZipEntryExtractor::new(body)
        .extract_to_memory("manifest.json")
        .await?;
    serde_json::from_slice(&json).map_err(invalid)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn gzip(data: &[u8]) -> Bytes {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        Bytes::from(enc.finish().unwrap())
    }

    const ASSETS: &[u8] = br#"{"assets":[{"URI":"0.pf"},{"URI":"embed:/x"},{"URI":"1.png"}]}"#;

    #[tokio::test]
    async fn gz_manifest_is_gunzipped() {
        let manifest = decode_asset_manifest("urn:x:u/output/manifest.json.gz", &gzip(ASSETS))
            .await
            .unwrap();
        assert_eq!(manifest.file_uris().collect::<Vec<_>>(), ["0.pf", "1.png"]);
    }

    #[tokio::test]
    async fn gz_manifest_falls_back_to_plain_json() {
        let manifest = decode_asset_manifest("urn:x:u/output/manifest.json.gz", &Bytes::from_static(ASSETS))
            .await
            .unwrap();
        assert_eq!(manifest.assets.len(), 3);
    }

    #[tokio::test]
    async fn svf_package_manifest_is_read_from_zip() {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("manifest.json", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(ASSETS).unwrap();
        let package = Bytes::from(writer.finish().unwrap().into_inner());

        let manifest = decode_asset_manifest("urn:x:u/output/0/0.svf", &package)
            .await
            .unwrap();
        assert_eq!(manifest.file_uris().count(), 2);
    }

    #[tokio::test]
    async fn garbage_is_an_upstream_error() {
        let err = decode_asset_manifest("urn:x:u/output/manifest.json.gz", &Bytes::from_static(b"nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[test]
    fn selected_node_without_urn_fails_fast() {
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "derivatives": [{ "children": [{ "guid": "g", "role": "graphics", "mime": "application/autodesk-svf" }] }]
        }))
        .unwrap();
        let mut out = Vec::new();
        let err = select_nodes(&manifest.derivatives, &mut out).unwrap_err();
        assert!(err.to_string().contains("no urn"));
    }
}
