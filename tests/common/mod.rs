#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use aps_extract::config::ClientConfig;

pub const BUCKET: &str = "bucket";
pub const OBJECT: &str = "design.zip";
pub const ARCHIVE_PATH: &str = "/files/design.zip";

/// Serves a fixed body honoring `Range: bytes=a-b` with 206 answers.
///
/// With `honor_range` off every GET gets the whole body and a 200. Ranges
/// starting inside `(0, short_before)` are answered with their first byte
/// only.
pub struct RangeResponder {
    data: Bytes,
    honor_range: bool,
    short_before: u64,
}

impl RangeResponder {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            honor_range: true,
            short_before: 0,
        }
    }

    pub fn short_before(data: impl Into<Bytes>, offset: u64) -> Self {
        Self {
            short_before: offset,
            ..Self::new(data)
        }
    }

    pub fn ignoring_range(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            honor_range: false,
            short_before: 0,
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.data.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);

        match range {
            Some((start, end)) if self.honor_range => {
                if start >= total {
                    return ResponseTemplate::new(416)
                        .insert_header("Content-Range", format!("bytes */{total}").as_str());
                }
                let mut end = end.min(total - 1);
                if start > 0 && start < self.short_before {
                    end = start;
                }
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{total}").as_str(),
                    )
                    .set_body_bytes(self.data.slice(start as usize..=end as usize).to_vec())
            }
            _ => ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(self.data.to_vec()),
        }
    }
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Mount the archive body at [`ARCHIVE_PATH`].
pub async fn serve_archive(server: &MockServer, responder: RangeResponder) {
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(responder)
        .mount(server)
        .await;
}

/// Mount a storage answer resolving [`BUCKET`]/[`OBJECT`] to the archive.
pub async fn serve_signed_url(server: &MockServer, size: i64) {
    Mock::given(method("POST"))
        .and(path(format!("/oss/v2/buckets/{BUCKET}/signed-download-urls")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": {
                OBJECT: {
                    "url": format!("{}{ARCHIVE_PATH}", server.uri()),
                    "size": size,
                }
            }
        })))
        .mount(server)
        .await;
}

pub fn object_id() -> String {
    format!("urn:adsk.objects:os.object:{BUCKET}/{OBJECT}")
}

pub fn config_for(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::with_urls(
        Url::parse(&server.uri()).unwrap(),
        Url::parse(&format!("{}/oss/v2", server.uri())).unwrap(),
    );
    config.max_retry = 1;
    config.timeout_secs = 5;
    config
}

/// Deterministic bytes that deflate does not shrink much.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Archive with a directory, deflated text, stored binary and a deflated
/// entry whose payload is far larger than the header slack.
pub fn design_archive() -> Vec<u8> {
    build_archive(None, |w| {
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        w.add_directory("model/", stored).unwrap();
        w.start_file("model/readme.txt", deflated).unwrap();
        w.write_all(b"Composite design.\n".repeat(500).as_slice()).unwrap();
        w.start_file("model/header.bin", stored).unwrap();
        w.write_all(&noise(10_000, 7)).unwrap();
        w.start_file("model/mesh.dat", deflated).unwrap();
        w.write_all(&noise(60_000, 11)).unwrap();
        w.start_file("empty.txt", stored).unwrap();
    })
}

pub fn build_archive(
    comment: Option<String>,
    fill: impl FnOnce(&mut zip::ZipWriter<Cursor<Vec<u8>>>),
) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    fill(&mut writer);
    if let Some(comment) = comment {
        writer.set_comment(comment);
    }
    writer.finish().unwrap().into_inner()
}

/// Entries as a local, fully downloaded reader sees them.
pub struct LocalEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub crc32: u32,
    pub is_dir: bool,
    pub content: Vec<u8>,
}

pub fn read_locally(archive: &[u8]) -> Vec<LocalEntry> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            LocalEntry {
                name: file.name().to_string(),
                size: file.size(),
                compressed_size: file.compressed_size(),
                crc32: file.crc32(),
                is_dir: file.is_dir(),
                content,
            }
        })
        .collect()
}
