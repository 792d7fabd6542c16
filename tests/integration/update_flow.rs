use crate::common::{TestServer, start_stalling_server};
use axum::http::StatusCode;
use patchup::config::PatchConfig;
use patchup::patch::{ContentHasher, PatchUpdateController, UpdateReason};
use patchup::test_utils::{InstallFixture, init_test_logging, manifest_json};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Config that knows how to locate `app.bundle` for state synthesis.
fn config_with_bundle(fixture: &InstallFixture, server: &TestServer) -> PatchConfig {
    let mut config = fixture.config(&server.url("manifest.json"));
    config.components.insert("app.bundle".to_string(), PathBuf::from("app.bundle"));
    config
}

#[tokio::test]
async fn test_check_stage_restart_apply() {
    init_test_logging(None);
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    let bundle = fixture.install_component("app.bundle", b"bundle v1").await.unwrap();

    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("app.bundle", &b"bundle v2"[..], "app.bundle")]),
    );
    server.serve_bytes("app.bundle", b"bundle v2");
    let d2 = ContentHasher::hash_bytes(b"bundle v2");

    let controller = PatchUpdateController::new(config_with_bundle(&fixture, &server)).unwrap();

    let check = controller.check_for_patch_update().await;
    assert!(check.available, "{check:?}");
    assert_eq!(check.version.as_deref(), Some("1.1.0"));
    assert_eq!(check.updates.len(), 1);
    assert_eq!(check.updates[0].name, "app.bundle");
    assert_eq!(check.updates[0].digest, d2);
    assert!(!check.updates[0].is_new);

    let outcome = controller.apply_patch_update(&check.updates, None).await;
    assert_eq!(outcome.success, ["app.bundle"]);
    assert!(outcome.failed.is_empty());
    assert!(outcome.needs_restart);
    assert!(controller.has_pending_updates());
    assert_eq!(tokio::fs::read(&bundle).await.unwrap(), b"bundle v1");

    // Simulated restart: a fresh controller over the same directories
    let controller = PatchUpdateController::new(config_with_bundle(&fixture, &server)).unwrap();
    assert!(controller.apply_pending_updates().await);

    assert_eq!(ContentHasher::hash_file(&bundle).await.unwrap(), d2);
    let state = controller.local_state().await;
    assert_eq!(state.version, "1.1.0");
    assert_eq!(state.components["app.bundle"].digest, d2);
    assert!(state.last_update.is_some());
    assert!(!fixture.ledger_path().exists());
    assert!(!fixture.staging_dir().exists());

    let again = controller.check_for_patch_update().await;
    assert_eq!(again.reason, Some(UpdateReason::UpToDate));
}

#[tokio::test]
async fn test_one_bad_digest_fails_the_whole_batch() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();

    server.serve_json(
        "manifest.json",
        &manifest_json(
            "1.1.0",
            None,
            &[
                ("a.pack", &b"alpha"[..], "a.pack"),
                ("b.pack", &b"bravo"[..], "b.pack"),
                ("c.pack", &b"charlie"[..], "c.pack"),
            ],
        ),
    );
    server.serve_bytes("a.pack", b"alpha");
    server.serve_bytes("b.pack", b"corrupted in transit");
    server.serve_bytes("c.pack", b"charlie");

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;
    assert_eq!(check.updates.len(), 3);
    assert!(check.updates.iter().all(|u| u.is_new));

    let outcome = controller.apply_patch_update(&check.updates, None).await;

    let mut succeeded = outcome.success.clone();
    succeeded.sort();
    assert_eq!(succeeded, ["a.pack", "c.pack"]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].name, "b.pack");
    assert!(outcome.failed[0].error.contains("Checksum mismatch"));
    assert!(!outcome.needs_restart);
    assert!(!fixture.ledger_path().exists());
    assert!(!controller.has_pending_updates());
    assert!(!fixture.staging_dir().join("b.pack").exists());
}

#[tokio::test]
async fn test_http_errors_are_per_component_failures() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();

    server.serve_json(
        "manifest.json",
        &manifest_json(
            "1.1.0",
            None,
            &[("ok.pack", &b"fine"[..], "ok.pack"), ("gone.pack", &b"gone"[..], "gone.pack")],
        ),
    );
    server.serve_bytes("ok.pack", b"fine");
    server.serve_status("gone.pack", StatusCode::FORBIDDEN);

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;
    let outcome = controller.apply_patch_update(&check.updates, None).await;

    assert_eq!(outcome.success, ["ok.pack"]);
    assert_eq!(outcome.failed[0].name, "gone.pack");
    assert!(outcome.failed[0].error.contains("403"));
    assert!(!controller.has_pending_updates());
}

#[tokio::test]
async fn test_progress_is_monotonic_and_complete() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();

    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    server.serve_json(
        "manifest.json",
        &manifest_json(
            "1.1.0",
            None,
            &[("big.pack", big.as_slice(), "big.pack"), ("small.pack", &b"tiny"[..], "small.pack")],
        ),
    );
    server.serve_bytes("big.pack", &big);
    server.serve_bytes("small.pack", b"tiny");

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = controller.apply_patch_update(&check.updates, Some(tx)).await;
    assert!(outcome.needs_restart);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(!events.is_empty());
    for pair in events.windows(2) {
        assert!(pair[1].overall_percent >= pair[0].overall_percent);
        assert!(pair[1].transferred >= pair[0].transferred);
    }
    let last = events.last().unwrap();
    assert_eq!(last.total, check.total_size);
    assert_eq!(last.transferred, check.total_size);
    assert_eq!(last.overall_percent, 100.0);
}

#[tokio::test]
async fn test_concurrent_batch_is_rejected() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();

    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("slow.pack", &b"slow"[..], "slow.pack")]),
    );
    server.serve_bytes_delayed("slow.pack", b"slow", Duration::from_millis(500));

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;

    let (first, second) = tokio::join!(controller.apply_patch_update(&check.updates, None), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(controller.is_batch_running());
        controller.apply_patch_update(&check.updates, None).await
    });

    assert!(first.needs_restart);
    assert!(second.success.is_empty());
    assert!(second.failed[0].error.contains("already in progress"));
    assert!(!controller.is_batch_running());
}

#[tokio::test]
async fn test_version_floor_blocks_patching() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[("a.pack", "old")]).await.unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json("1.10.0", Some("1.2.0"), &[("a.pack", &b"new"[..], "a.pack")]),
    );

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;

    assert!(!check.available);
    assert_eq!(check.reason, Some(UpdateReason::VersionTooOld));
    assert!(check.updates.is_empty());
}

#[tokio::test]
async fn test_no_changes_records_new_version() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    let digest = ContentHasher::hash_bytes(b"same");
    fixture.write_local_state("1.0.0", &[("a.pack", &digest)]).await.unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json("1.0.1", None, &[("a.pack", &b"same"[..], "a.pack")]),
    );

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();

    let check = controller.check_for_patch_update().await;
    assert_eq!(check.reason, Some(UpdateReason::NoChanges));
    assert_eq!(fixture.local_state().await.version, "1.0.1");

    let again = controller.check_for_patch_update().await;
    assert_eq!(again.reason, Some(UpdateReason::UpToDate));
}

#[tokio::test]
async fn test_missing_and_broken_manifest() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;
    assert!(!check.available);
    assert_eq!(check.reason, Some(UpdateReason::NoManifest));
    assert!(check.error.is_none());

    server.serve_status("manifest.json", StatusCode::SERVICE_UNAVAILABLE);
    let check = controller.check_for_patch_update().await;
    assert_eq!(check.reason, Some(UpdateReason::Error));
    assert!(check.error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_missing_local_bundle_is_downloaded_as_new() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("app.bundle", &b"bundle"[..], "app.bundle")]),
    );

    let controller = PatchUpdateController::new(config_with_bundle(&fixture, &server)).unwrap();
    let check = controller.check_for_patch_update().await;

    assert!(check.available);
    assert!(check.updates[0].is_new);
}

#[tokio::test]
async fn test_download_timeout_before_headers_fails_component() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json(
            "1.1.0",
            None,
            &[("ok.pack", &b"fine"[..], "ok.pack"), ("slow.pack", &b"slow"[..], "slow.pack")],
        ),
    );
    server.serve_bytes("ok.pack", b"fine");
    server.serve_bytes_delayed("slow.pack", b"slow", Duration::from_secs(3));

    let config = PatchConfig {
        download_timeout_secs: 1,
        ..fixture.config(&server.url("manifest.json"))
    };
    let controller = PatchUpdateController::new(config).unwrap();
    let check = controller.check_for_patch_update().await;
    let outcome = controller.apply_patch_update(&check.updates, None).await;

    assert_eq!(outcome.success, ["ok.pack"]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].name, "slow.pack");
    assert!(!outcome.needs_restart);
    assert!(!fixture.staging_dir().join("slow.pack").exists());
    assert!(!controller.has_pending_updates());
}

#[tokio::test]
async fn test_download_timeout_mid_body_removes_partial_file() {
    let server = TestServer::start().await;
    let stalling = start_stalling_server(b"first bytes", 4096).await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();

    let payload = vec![7u8; 4096];
    let url = format!("{stalling}/big.pack");
    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("big.pack", payload.as_slice(), url.as_str())]),
    );

    let config = PatchConfig {
        download_timeout_secs: 1,
        ..fixture.config(&server.url("manifest.json"))
    };
    let controller = PatchUpdateController::new(config).unwrap();
    let check = controller.check_for_patch_update().await;
    let outcome = controller.apply_patch_update(&check.updates, None).await;

    assert!(outcome.success.is_empty());
    assert_eq!(outcome.failed[0].name, "big.pack");
    assert!(outcome.failed[0].error.contains("Network error"), "{}", outcome.failed[0].error);
    assert!(!fixture.staging_dir().join("big.pack").exists());
    assert!(!controller.has_pending_updates());
}

#[tokio::test]
async fn test_component_names_cannot_escape_install_root() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json(
            "1.1.0",
            None,
            &[
                ("ok.pack", &b"fine"[..], "ok.pack"),
                ("../escaped.txt", &b"outside"[..], "escaped.txt"),
            ],
        ),
    );
    server.serve_bytes("ok.pack", b"fine");
    server.serve_bytes("escaped.txt", b"outside");

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;
    assert_eq!(check.updates.len(), 2);

    let outcome = controller.apply_patch_update(&check.updates, None).await;
    assert_eq!(outcome.success, ["ok.pack"]);
    assert_eq!(outcome.failed[0].name, "../escaped.txt");
    assert!(outcome.failed[0].error.contains("installation root"));
    assert!(!controller.has_pending_updates());

    assert!(!controller.apply_pending_updates().await);
    assert!(!fixture.path().join("escaped.txt").exists());
}

#[tokio::test]
async fn test_malformed_manifest_version_is_rejected() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();
    let hostile = format!("1.1.0\ntouch '{}'\n#", fixture.path().join("owned").display());
    server.serve_json(
        "manifest.json",
        &manifest_json(&hostile, None, &[("a.pack", &b"alpha"[..], "a.pack")]),
    );
    server.serve_bytes("a.pack", b"alpha");

    let controller = PatchUpdateController::new(fixture.config(&server.url("manifest.json"))).unwrap();
    let check = controller.check_for_patch_update().await;

    assert!(!check.available);
    assert_eq!(check.reason, Some(UpdateReason::Error));
    assert!(check.error.unwrap().contains("could not be parsed"));
    assert!(check.updates.is_empty());
    assert!(!controller.has_pending_updates());
}
