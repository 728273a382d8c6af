//! Typed model-derivative manifests.
//!
//! Manifests are parsed strictly at the boundary into [`Manifest`] and
//! [`ManifestNode`]; role and mime strings become closed enums with an
//! explicit fallback variant.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Top-level manifest document. The root itself carries no role or urn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default)]
    pub derivatives: Vec<ManifestNode>,
}

/// One node of the derivative tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<DerivativeMime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<DerivativeRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ManifestNode>,
}

/// Node roles. Roles outside the resource allow-list map to `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivativeRole {
    #[serde(rename = "Autodesk.CloudPlatform.DesignDescription")]
    DesignDescription,
    #[serde(rename = "Autodesk.CloudPlatform.PropertyDatabase")]
    PropertyDatabase,
    #[serde(rename = "Autodesk.CloudPlatform.IndexableContent")]
    IndexableContent,
    #[serde(rename = "leaflet-zip")]
    LeafletZip,
    #[serde(rename = "thumbnail")]
    Thumbnail,
    #[serde(rename = "graphics")]
    Graphics,
    #[serde(rename = "preview")]
    Preview,
    #[serde(rename = "raas")]
    Raas,
    #[serde(rename = "pdf")]
    Pdf,
    #[serde(rename = "lod")]
    Lod,
    #[serde(other)]
    Other,
}

impl DerivativeRole {
    /// Whether nodes with this role back downloadable resources.
    pub fn is_resource(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Derivative payload types that need their own expansion rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DerivativeMime {
    Svf,
    F2d,
    PropertyDb,
    Svf2,
    Other(String),
}

impl DerivativeMime {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Svf => "application/autodesk-svf",
            Self::F2d => "application/autodesk-f2d",
            Self::PropertyDb => "application/autodesk-db",
            Self::Svf2 => "application/autodesk-svf2",
            Self::Other(mime) => mime,
        }
    }
}

impl From<&str> for DerivativeMime {
    fn from(value: &str) -> Self {
        match value {
            "application/autodesk-svf" => Self::Svf,
            "application/autodesk-f2d" => Self::F2d,
            "application/autodesk-db" => Self::PropertyDb,
            "application/autodesk-svf2" => Self::Svf2,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for DerivativeMime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DerivativeMime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Secondary manifest inside an SVF/F2D derivative: the list of files it uses.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetManifest {
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    #[serde(rename = "URI")]
    pub uri: String,
}

impl AssetManifest {
    /// Asset URIs, without those embedded in another file (`embed:/`).
    pub fn file_uris(&self) -> impl Iterator<Item = &str> {
        self.assets
            .iter()
            .map(|a| a.uri.as_str())
            .filter(|uri| !uri.contains("embed:/"))
    }
}
