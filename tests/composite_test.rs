mod common;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aps_extract::Error;
use aps_extract::composite::{ArchiveSource, CompositeDesignResolver};
use aps_extract::config::DEFAULT_CHUNK_SIZE;

use common::*;

async fn resolver_for(server: &MockServer, archive: &[u8]) -> CompositeDesignResolver {
    serve_signed_url(server, archive.len() as i64).await;
    serve_archive(server, RangeResponder::new(archive.to_vec())).await;
    CompositeDesignResolver::new(&config_for(server), reqwest::Client::new())
}

#[tokio::test]
async fn listing_matches_a_local_reader() {
    let archive = design_archive();
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, &archive).await;

    let source = ArchiveSource::parse(&object_id());
    let listed = resolver.list_contents(&source, "token").await.unwrap();
    let local = read_locally(&archive);

    assert_eq!(listed.len(), local.len());
    for (remote, local) in listed.iter().zip(&local) {
        assert_eq!(remote.name, local.name);
        assert_eq!(remote.uncompressed_size, local.size);
        assert_eq!(remote.compressed_size, local.compressed_size);
        assert_eq!(remote.crc32, local.crc32);
        assert_eq!(remote.is_directory, local.is_dir);
    }

    // Listing never needs the large deflated payload.
    assert!(resolver.fetcher().transferred_bytes() < archive.len() as u64);
}

#[tokio::test]
async fn every_entry_extracts_to_local_content() {
    let archive = design_archive();
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, &archive).await;
    let source = ArchiveSource::parse(&object_id());

    for local in read_locally(&archive).iter().filter(|e| !e.is_dir) {
        let mut out = Vec::new();
        let entry = resolver
            .extract_to_writer(&source, "token", &local.name, &mut out)
            .await
            .unwrap();
        assert_eq!(entry.name, local.name);
        assert_eq!(out, local.content, "content of {}", local.name);
    }
}

#[tokio::test]
async fn extract_file_writes_then_skips_existing_destination() {
    let archive = design_archive();
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, &archive).await;
    let source = ArchiveSource::parse(&object_id());
    let out_dir = tempfile::tempdir().unwrap();

    let first = resolver
        .extract_file(&source, "token", "model/readme.txt", out_dir.path())
        .await
        .unwrap();
    assert!(!first.skipped);
    assert_eq!(first.path, out_dir.path().join("model/readme.txt"));
    let written = std::fs::read(&first.path).unwrap();
    assert_eq!(written, b"Composite design.\n".repeat(500));

    server.reset().await;
    let second = resolver
        .extract_file(&source, "token", "model/readme.txt", out_dir.path())
        .await
        .unwrap();
    assert!(second.skipped);
    assert_eq!(second.size, written.len() as u64);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_extraction_leaves_no_partial_file() {
    let archive = design_archive();
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, &archive).await;
    let out_dir = tempfile::tempdir().unwrap();

    let err = resolver
        .extract_file(
            &ArchiveSource::parse(&object_id()),
            "token",
            "model/missing.txt",
            out_dir.path(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EntryNotFound(name) if name == "model/missing.txt"));
    assert!(!out_dir.path().join("model/missing.txt").exists());
}

#[tokio::test]
async fn comment_longer_than_chunk_is_found() {
    let archive = build_archive(Some("c".repeat(20_000)), |w| {
        w.start_file("only.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(w, b"hello").unwrap();
    });
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, &archive).await;
    let source = ArchiveSource::parse(&object_id());

    let listed = resolver.list_contents(&source, "token").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "only.txt");

    let mut out = Vec::new();
    resolver
        .extract_to_writer(&source, "token", "only.txt", &mut out)
        .await
        .unwrap();
    assert_eq!(out, b"hello");
}

#[tokio::test]
async fn archive_smaller_than_chunk_and_empty_archive() {
    let tiny = build_archive(None, |w| {
        w.start_file("a.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(w, b"abc").unwrap();
    });
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, &tiny).await;
    let listed = resolver
        .list_contents(&ArchiveSource::parse(&object_id()), "token")
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let empty = build_archive(None, |_| {});
    let server = MockServer::start().await;
    let resolver = resolver_for(&server, &empty).await;
    let listed = resolver
        .list_contents(&ArchiveSource::parse(&object_id()), "token")
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn server_ignoring_range_still_works() {
    let archive = design_archive();
    let server = MockServer::start().await;
    serve_signed_url(&server, archive.len() as i64).await;
    serve_archive(&server, RangeResponder::ignoring_range(archive.clone())).await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());
    let source = ArchiveSource::parse(&object_id());

    let listed = resolver.list_contents(&source, "token").await.unwrap();
    assert_eq!(listed.len(), read_locally(&archive).len());

    let mut out = Vec::new();
    resolver
        .extract_to_writer(&source, "token", "model/mesh.dat", &mut out)
        .await
        .unwrap();
    assert_eq!(out, noise(60_000, 11));
}

#[tokio::test]
async fn short_range_answers_fail_as_corrupt() {
    let archive = design_archive();
    let server = MockServer::start().await;
    serve_signed_url(&server, archive.len() as i64).await;
    let directory_start = archive.len() as u64 - DEFAULT_CHUNK_SIZE;
    serve_archive(&server, RangeResponder::short_before(archive.clone(), directory_start)).await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());
    let source = ArchiveSource::parse(&object_id());

    assert_eq!(
        resolver.list_contents(&source, "token").await.unwrap().len(),
        read_locally(&archive).len()
    );

    let mut out = Vec::new();
    let err = resolver
        .extract_to_writer(&source, "token", "model/mesh.dat", &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CorruptArchive(_)), "{err}");
    assert!(out.is_empty());
}

#[tokio::test]
async fn direct_url_is_probed_with_head() {
    let archive = design_archive();
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(ARCHIVE_PATH))
        .respond_with(RangeResponder::new(archive.clone()))
        .mount(&server)
        .await;
    serve_archive(&server, RangeResponder::new(archive.clone())).await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());

    let source = ArchiveSource::parse(&format!("{}{ARCHIVE_PATH}", server.uri()));
    assert!(matches!(source, ArchiveSource::Url(_)));
    let listed = resolver.list_contents(&source, "").await.unwrap();
    assert_eq!(listed.len(), read_locally(&archive).len());
}

#[tokio::test]
async fn negative_size_is_invalid_metadata() {
    let server = MockServer::start().await;
    serve_signed_url(&server, -1).await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());

    let err = resolver
        .list_contents(&ArchiveSource::parse(&object_id()), "token")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMetadata(_)), "{err}");
}

#[tokio::test]
async fn storage_failures_are_upstream_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());
    let err = resolver
        .list_contents(&ArchiveSource::parse(&object_id()), "token")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream { .. }), "{err}");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": {} })),
        )
        .mount(&server)
        .await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());
    let err = resolver
        .list_contents(&ArchiveSource::parse(&object_id()), "token")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upstream { .. }), "{err}");
}

#[tokio::test]
async fn malformed_identifier_sends_nothing() {
    let server = MockServer::start().await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());

    let err = resolver
        .list_contents(&ArchiveSource::parse("urn:adsk.objects:os.object:no-slash"), "token")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedIdentifier(_)), "{err}");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn range_errors_surface_their_status() {
    let server = MockServer::start().await;
    serve_signed_url(&server, 1000).await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let resolver = CompositeDesignResolver::new(&config_for(&server), reqwest::Client::new());

    let err = resolver
        .list_contents(&ArchiveSource::parse(&object_id()), "token")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RangeFetch { status: 404 }), "{err}");
}
