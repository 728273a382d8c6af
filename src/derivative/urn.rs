//! Derivative URN path handling.

use percent_encoding::percent_decode_str;
use serde::Serialize;

/// A derivative URN split into the pieces used to lay out local files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPath {
    /// Everything after the final `/`.
    pub root_file_name: String,
    /// Everything up to and including the final `/`.
    pub base_path: String,
    /// `base_path` without its first segment and without `output` segments.
    pub local_path: String,
    /// The decoded URN.
    pub urn: String,
}

/// Percent-decode, keeping invalid UTF-8 sequences lossily.
pub fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Split a (possibly percent-encoded) derivative URN.
pub fn decompose(encoded_urn: &str) -> ResolvedPath {
    let urn = percent_decode(encoded_urn);

    let split = urn.rfind('/').map_or(0, |i| i + 1);
    let root_file_name = urn[split..].to_string();
    let base_path = urn[..split].to_string();

    let without_container = base_path
        .split_once('/')
        .map_or(base_path.as_str(), |(_, rest)| rest);
    // `base_path` ends in `/`, so every kept segment is a directory.
    let local_path: String = without_container
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "output")
        .map(|segment| format!("{segment}/"))
        .collect();

    ResolvedPath {
        root_file_name,
        base_path,
        local_path,
        urn,
    }
}

/// Resolve `relative` against `base` the way a URI reference is resolved
/// against a base URI with an opaque head.
///
/// The first segment of `base` (scheme and container) is never climbed out
/// of, and `.`/`..` segments are normalized.
pub fn join(base: &str, relative: &str) -> String {
    if relative.contains("://") || relative.starts_with("urn:") {
        return relative.to_string();
    }

    let (head, dir) = match base.split_once('/') {
        Some((head, rest)) => (head, rest.rfind('/').map_or("", |i| &rest[..=i])),
        None => (base, ""),
    };

    let combined = match relative.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{dir}{relative}"),
    };

    let mut segments: Vec<&str> = Vec::new();
    let parts: Vec<&str> = combined.split('/').collect();
    let last = parts.len().saturating_sub(1);
    for (i, part) in parts.iter().enumerate() {
        match *part {
            "." => {
                if i == last {
                    segments.push("");
                }
            }
            ".." => {
                segments.pop();
                if i == last {
                    segments.push("");
                }
            }
            other => segments.push(other),
        }
    }

    format!("{head}/{}", segments.join("/"))
}

/// Local destination of `file` below the directory `dir`.
///
/// `dir` is already decoded; `file` is decoded before it is split, so
/// encoded separators and dot segments are normalized like literal ones.
/// The result never starts with `/`, never contains `//` or a `..` segment,
/// and so never leaves the download root.
pub fn local_join(dir: &str, file: &str) -> String {
    let file = percent_decode(file);
    let mut segments: Vec<&str> = Vec::new();
    for part in dir.split('/').chain(file.split(['/', '\\'])) {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
