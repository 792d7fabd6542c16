use crate::common::TestServer;
use axum::http::StatusCode;
use patchup::core::PatchError;
use patchup::patch::ManifestFetcher;
use patchup::test_utils::manifest_json;
use std::time::Duration;

fn fetcher() -> ManifestFetcher {
    ManifestFetcher::new(reqwest::Client::new(), Duration::from_secs(5))
}

#[tokio::test]
async fn test_fetch_parses_and_resolves_relative_urls() {
    let server = TestServer::start().await;
    server.serve_json(
        "patch/manifest.json",
        &manifest_json(
            "25.1215.1430",
            Some("25.1101.0000"),
            &[("app.bundle", &b"bundle"[..], "blobs/app.bundle")],
        ),
    );

    let manifest = fetcher().fetch(&server.url("patch/manifest.json")).await.unwrap().unwrap();

    assert_eq!(manifest.version, "25.1215.1430");
    assert_eq!(manifest.min_version.as_deref(), Some("25.1101.0000"));
    let component = manifest.component("app.bundle").unwrap();
    assert_eq!(component.url, server.url("patch/blobs/app.bundle"));
    assert_eq!(component.size, 6);
}

#[tokio::test]
async fn test_404_means_no_manifest() {
    let server = TestServer::start().await;
    let result = fetcher().fetch(&server.url("manifest.json")).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_server_error_is_typed() {
    let server = TestServer::start().await;
    server.serve_status("manifest.json", StatusCode::INTERNAL_SERVER_ERROR);

    let err = fetcher().fetch(&server.url("manifest.json")).await.unwrap_err();
    match err.downcast_ref::<PatchError>() {
        Some(PatchError::ManifestHttpStatus { status, .. }) => assert_eq!(*status, 500),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unparseable_body_is_typed() {
    let server = TestServer::start().await;
    server.serve_raw_json("manifest.json", "{\"version\": ");

    let err = fetcher().fetch(&server.url("manifest.json")).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::ManifestParse { .. })));
}

#[tokio::test]
async fn test_connection_failure_is_network_error() {
    // Nothing listens on port 1
    let err = fetcher().fetch("http://127.0.0.1:1/manifest.json").await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::Network { .. })));
}
