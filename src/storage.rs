//! Object identifiers and signed download URLs.
//!
//! An object identifier such as `urn:adsk.objects:os.object:my-bucket/design.zip`
//! names an object inside a storage container. [`ObjectLocator`] exchanges it
//! for a short-lived signed URL plus the object's size.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Container (bucket) key and object key, parsed once from an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub container_key: String,
    pub object_key: String,
}

impl ObjectRef {
    /// Parse `<scheme>:<scheme-detail>:<containerKey>/<objectKey>`.
    ///
    /// The object key keeps any further `/` characters.
    pub fn parse(object_id: &str) -> Result<Self> {
        let malformed = || Error::MalformedIdentifier(object_id.to_string());

        let first_slash = object_id.find('/').unwrap_or(object_id.len());
        let head_end = object_id[..first_slash]
            .rfind(':')
            .map(|i| i + 1)
            .unwrap_or(0);
        let tail = &object_id[head_end..];

        let (container_key, object_key) = tail.split_once('/').ok_or_else(malformed)?;
        if container_key.is_empty() || object_key.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            container_key: container_key.to_string(),
            object_key: object_key.to_string(),
        })
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_key, self.object_key)
    }
}

/// Where and how large: everything the range fetcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub total_size: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlRequest<'a> {
    object_keys: [&'a str; 1],
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    results: HashMap<String, SignedUrl>,
}

#[derive(Deserialize)]
struct SignedUrl {
    url: String,
    size: i64,
}

/// Resolves object references to signed download targets.
#[derive(Debug, Clone)]
pub struct ObjectLocator {
    client: Client,
    storage_url: Url,
}

impl ObjectLocator {
    pub fn new(client: Client, storage_url: Url) -> Self {
        Self {
            client,
            storage_url,
        }
    }

    /// Request a signed URL for a single object.
    pub async fn resolve(&self, object: &ObjectRef, credential: &str) -> Result<DownloadTarget> {
        let endpoint = format!(
            "{}/buckets/{}/signed-download-urls",
            self.storage_url.as_str().trim_end_matches('/'),
            object.container_key
        );

        let resp = self
            .client
            .post(&endpoint)
            .bearer_auth(credential)
            .json(&SignedUrlRequest {
                object_keys: [object.object_key.as_str()],
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(&endpoint, format!("HTTP {status}: {body}")));
        }

        let body = resp.bytes().await?;
        let parsed: SignedUrlResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::upstream(&endpoint, format!("invalid JSON: {e}")))?;

        let signed = parsed
            .results
            .get(&object.object_key)
            .ok_or_else(|| Error::upstream(&endpoint, format!("no result for `{object}`")))?;

        let total_size = u64::try_from(signed.size).map_err(|_| {
            Error::InvalidMetadata(format!("negative size {} for `{object}`", signed.size))
        })?;

        debug!(%object, total_size, "resolved signed download url");
        Ok(DownloadTarget {
            url: signed.url.clone(),
            total_size,
        })
    }
}
