use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::storage::DownloadTarget;
use crate::{Error, Result};

/// Issues byte-range GETs against a (usually pre-signed) download URL.
///
/// Cloning is cheap: the underlying client and the transfer counter are shared.
#[derive(Debug, Clone)]
pub struct RangeFetcher {
    client: Client,
    transferred_bytes: Arc<AtomicU64>,
    max_retry: u32,
}

impl RangeFetcher {
    pub fn new(client: Client, max_retry: u32) -> Self {
        Self {
            client,
            transferred_bytes: Arc::new(AtomicU64::new(0)),
            max_retry: max_retry.max(1),
        }
    }

    /// Describe a plain URL as a download target.
    ///
    /// This sends a HEAD request to verify Range support and get the size.
    pub async fn probe(&self, url: &str) -> Result<DownloadTarget> {
        let resp = self.client.head(url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::RangeFetch {
                status: resp.status().as_u16(),
            });
        }

        let accept_ranges = resp
            .headers()
            .get(header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            return Err(Error::InvalidMetadata(
                "remote server does not support Range requests".into(),
            ));
        }

        let total_size = resp
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                Error::InvalidMetadata("remote server did not return Content-Length".into())
            })?;

        Ok(DownloadTarget {
            url: url.to_string(),
            total_size,
        })
    }

    /// Fetch `length` bytes starting at `offset`.
    ///
    /// A short body (range running past end of file) is returned as is. A 200
    /// answer means the server ignored `Range`; the requested window is then
    /// cut out of the full body.
    pub async fn fetch_range(&self, url: &str, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", offset, offset + length - 1);
        let mut retry_count = 0;

        loop {
            let result = self
                .client
                .get(url)
                .header(header::RANGE, &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    let bytes = match status {
                        StatusCode::PARTIAL_CONTENT => {
                            let mut bytes = resp.bytes().await?;
                            bytes.truncate(length as usize);
                            bytes
                        }
                        StatusCode::OK => {
                            let body = resp.bytes().await?;
                            warn!(
                                url = %redact(url),
                                body_len = body.len(),
                                "server ignored Range header, slicing full body"
                            );
                            slice_window(body, offset, length)
                        }
                        other => {
                            return Err(Error::RangeFetch {
                                status: other.as_u16(),
                            });
                        }
                    };

                    debug!(%range, received = bytes.len(), "range fetched");
                    self.transferred_bytes
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    return Ok(bytes);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(e.into());
                    }
                    warn!(
                        retry = retry_count,
                        max_retry = self.max_retry,
                        error = %e,
                        "connection error, retrying range request"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn slice_window(body: Bytes, offset: u64, length: u64) -> Bytes {
    let len = body.len() as u64;
    if offset >= len {
        return Bytes::new();
    }
    let end = offset.saturating_add(length).min(len);
    body.slice(offset as usize..end as usize)
}

/// Strip the query string; signed URLs carry credentials there.
fn redact(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}
