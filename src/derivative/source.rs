//! Where manifests and derivative files come from.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Client, header};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::manifest::Manifest;
use crate::{Error, Result};

/// Path prefix of the model-derivative API.
pub const DERIVATIVE_PATH: &str = "modelderivative/v2/designdata";

/// Unreserved characters stay literal inside a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const COOKIE_POLICY: &str = "CloudFront-Policy";
const COOKIE_KEY_PAIR_ID: &str = "CloudFront-Key-Pair-Id";
const COOKIE_SIGNATURE: &str = "CloudFront-Signature";

/// Collaborator that fetches the top-level manifest and derivative files.
#[async_trait]
pub trait DerivativeSource: Send + Sync {
    /// Raw manifest document for a model `urn`.
    async fn fetch_manifest_raw(&self, urn: &str) -> Result<Bytes>;

    /// Raw bytes of one derivative file, addressed by its decoded URN.
    async fn fetch_derivative(&self, urn: &str, derivative_urn: &str) -> Result<Bytes>;

    /// Manifest parsed strictly into the typed tree.
    async fn fetch_manifest(&self, urn: &str) -> Result<Manifest> {
        let raw = self.fetch_manifest_raw(urn).await?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::upstream(format!("manifest of {urn}"), format!("invalid manifest: {e}")))
    }
}

#[async_trait]
impl<T: DerivativeSource + ?Sized> DerivativeSource for Arc<T> {
    async fn fetch_manifest_raw(&self, urn: &str) -> Result<Bytes> {
        (**self).fetch_manifest_raw(urn).await
    }

    async fn fetch_derivative(&self, urn: &str, derivative_urn: &str) -> Result<Bytes> {
        (**self).fetch_derivative(urn, derivative_urn).await
    }
}

#[derive(Deserialize)]
struct SignedCookieDescriptor {
    url: String,
}

/// [`DerivativeSource`] backed by the model-derivative HTTP API.
#[derive(Debug, Clone)]
pub struct HttpDerivativeSource {
    client: Client,
    api_url: Url,
    credential: String,
}

impl HttpDerivativeSource {
    pub fn new(client: Client, api_url: Url, credential: impl Into<String>) -> Self {
        Self {
            client,
            api_url,
            credential: credential.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.as_str().trim_end_matches('/'), path)
    }

    /// Remote path of a derivative's signed-cookie descriptor.
    pub fn remote_path(urn: &str, derivative_urn: &str) -> String {
        format!(
            "{DERIVATIVE_PATH}/{urn}/manifest/{}/signedcookies",
            utf8_percent_encode(derivative_urn, SEGMENT)
        )
    }

    async fn get_ok(&self, endpoint: &str, authorized: bool) -> Result<reqwest::Response> {
        let mut request = self.client.get(endpoint);
        if authorized {
            request = request.bearer_auth(&self.credential);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::upstream(
                redact(endpoint),
                format!("HTTP {status}: {body}"),
            ));
        }
        Ok(resp)
    }
}

#[async_trait]
impl DerivativeSource for HttpDerivativeSource {
    async fn fetch_manifest_raw(&self, urn: &str) -> Result<Bytes> {
        let endpoint = self.endpoint(&format!("{DERIVATIVE_PATH}/{urn}/manifest"));
        let resp = self.get_ok(&endpoint, true).await?;
        Ok(resp.bytes().await?)
    }

    async fn fetch_derivative(&self, urn: &str, derivative_urn: &str) -> Result<Bytes> {
        let endpoint = self.endpoint(&Self::remote_path(urn, derivative_urn));
        let resp = self.get_ok(&endpoint, true).await?;

        let cookies: Vec<String> = resp
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let descriptor: SignedCookieDescriptor = resp
            .json()
            .await
            .map_err(|e| Error::upstream(redact(&endpoint), format!("invalid descriptor: {e}")))?;

        let mut download = Url::parse(&descriptor.url).map_err(|e| {
            Error::upstream(redact(&endpoint), format!("invalid signed url: {e}"))
        })?;
        download
            .query_pairs_mut()
            .append_pair("Key-Pair-Id", cookie_value(&cookies, COOKIE_KEY_PAIR_ID).unwrap_or_default())
            .append_pair("Signature", cookie_value(&cookies, COOKIE_SIGNATURE).unwrap_or_default())
            .append_pair("Policy", cookie_value(&cookies, COOKIE_POLICY).unwrap_or_default());

        debug!(derivative = derivative_urn, "downloading derivative");
        let resp = self.get_ok(download.as_str(), false).await?;
        Ok(resp.bytes().await?)
    }
}

/// Value of the first `name=value` cookie among `Set-Cookie` headers.
fn cookie_value<'c>(cookies: &'c [String], name: &str) -> Option<&'c str> {
    cookies.iter().find_map(|cookie| {
        let pair = cookie.trim().split(';').next()?;
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name).then_some(value.trim())
    })
}

fn redact(url: &str) -> String {
    url.split_once('?').map_or(url, |(base, _)| base).to_string()
}
