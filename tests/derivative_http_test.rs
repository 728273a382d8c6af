use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aps_extract::Error;
use aps_extract::derivative::{DerivativeSource, HttpDerivativeSource};

const MODEL: &str = "dXJuOm1vZGVs";
const DERIVATIVE: &str = "urn:adsk.viewing:fs.file:dXJuOm1vZGVs/output/1/0.pf";
const COOKIES_PATH: &str = "/modelderivative/v2/designdata/dXJuOm1vZGVs/manifest/urn%3Aadsk.viewing%3Afs.file%3AdXJuOm1vZGVs%2Foutput%2F1%2F0.pf/signedcookies";

fn source_for(server: &MockServer) -> HttpDerivativeSource {
    HttpDerivativeSource::new(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        "token",
    )
}

#[tokio::test]
async fn manifest_is_fetched_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/modelderivative/v2/designdata/{MODEL}/manifest")))
        .and(header("authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "urn": MODEL,
            "status": "success",
            "derivatives": []
        })))
        .mount(&server)
        .await;

    let manifest = source_for(&server).fetch_manifest(MODEL).await.unwrap();
    assert_eq!(manifest.urn.as_deref(), Some(MODEL));
    assert!(manifest.derivatives.is_empty());
}

#[tokio::test]
async fn manifest_errors_are_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/modelderivative/v2/designdata/{MODEL}/manifest")))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;
    let err = source_for(&server).fetch_manifest_raw(MODEL).await.unwrap_err();
    assert!(matches!(err, Error::Upstream { .. }), "{err}");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;
    let err = source_for(&server).fetch_manifest(MODEL).await.unwrap_err();
    assert!(matches!(err, Error::Upstream { .. }), "{err}");
}

#[tokio::test]
async fn derivative_is_downloaded_through_signed_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(COOKIES_PATH))
        .and(header("authorization", "Bearer token"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "CloudFront-Policy=pol; Path=/; Secure")
                .append_header("Set-Cookie", "CloudFront-Key-Pair-Id=KEY; Path=/")
                .append_header("Set-Cookie", "CloudFront-Signature=sig~1; HttpOnly")
                .set_body_json(serde_json::json!({
                    "url": format!("{}/cdn/1/0.pf", server.uri())
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/1/0.pf"))
        .and(query_param("Key-Pair-Id", "KEY"))
        .and(query_param("Signature", "sig~1"))
        .and(query_param("Policy", "pol"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"geometry".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let body = source_for(&server)
        .fetch_derivative(MODEL, DERIVATIVE)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), b"geometry");

    let requests = server.received_requests().await.unwrap();
    let download = requests
        .iter()
        .find(|r| r.url.path() == "/cdn/1/0.pf")
        .unwrap();
    assert!(!download.headers.contains_key("authorization"));
}

#[tokio::test]
async fn missing_descriptor_is_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(COOKIES_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such derivative"))
        .mount(&server)
        .await;

    let err = source_for(&server)
        .fetch_derivative(MODEL, DERIVATIVE)
        .await
        .unwrap_err();
    match err {
        Error::Upstream { endpoint, message } => {
            assert!(endpoint.ends_with("/signedcookies"), "{endpoint}");
            assert!(message.contains("404"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn failed_signed_download_is_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(COOKIES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "url": format!("{}/cdn/1/0.pf", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdn/1/0.pf"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = source_for(&server)
        .fetch_derivative(MODEL, DERIVATIVE)
        .await
        .unwrap_err();
    match err {
        Error::Upstream { endpoint, .. } => assert!(!endpoint.contains('?'), "{endpoint}"),
        other => panic!("unexpected error: {other}"),
    }
}
