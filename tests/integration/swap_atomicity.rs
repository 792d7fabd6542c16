use crate::common::TestServer;
use patchup::patch::{ContentHasher, PatchUpdateController};
use patchup::test_utils::{InstallFixture, manifest_json};

#[tokio::test]
async fn test_failed_install_restores_original() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    let good = fixture.install_component("good.pack", b"good v1").await.unwrap();
    let bad = fixture.install_component("bad.pack", b"bad v1").await.unwrap();
    let old_bad_digest = ContentHasher::hash_bytes(b"bad v1");
    fixture
        .write_local_state(
            "1.0.0",
            &[("good.pack", &ContentHasher::hash_bytes(b"good v1")), ("bad.pack", &old_bad_digest)],
        )
        .await
        .unwrap();

    server.serve_json(
        "manifest.json",
        &manifest_json(
            "1.1.0",
            None,
            &[("good.pack", &b"good v2"[..], "good.pack"), ("bad.pack", &b"bad v2"[..], "bad.pack")],
        ),
    );
    server.serve_bytes("good.pack", b"good v2");
    server.serve_bytes("bad.pack", b"bad v2");

    let config = fixture.config(&server.url("manifest.json"));
    let controller = PatchUpdateController::new(config.clone()).unwrap();
    let check = controller.check_for_patch_update().await;
    let outcome = controller.apply_patch_update(&check.updates, None).await;
    assert!(outcome.needs_restart);

    // A directory squatting on the install temp path makes the copy fail.
    tokio::fs::create_dir(fixture.resources_root.join("bad.pack.patchup-tmp")).await.unwrap();

    let controller = PatchUpdateController::new(config).unwrap();
    assert!(controller.apply_pending_updates().await);

    assert_eq!(tokio::fs::read(&good).await.unwrap(), b"good v2");
    assert_eq!(tokio::fs::read(&bad).await.unwrap(), b"bad v1");
    assert!(!fixture.resources_root.join("bad.pack.backup").exists());
    assert!(!fixture.resources_root.join("good.pack.backup").exists());

    let state = controller.local_state().await;
    assert_eq!(state.version, "1.1.0");
    assert_eq!(state.components["good.pack"].digest, ContentHasher::hash_bytes(b"good v2"));
    assert_eq!(state.components["bad.pack"].digest, old_bad_digest);

    assert!(!fixture.ledger_path().exists());
    assert!(!fixture.staging_dir().exists());
}

#[tokio::test]
async fn test_tampered_staging_file_is_skipped() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    let target = fixture.install_component("a.pack", b"a v1").await.unwrap();
    fixture
        .write_local_state("1.0.0", &[("a.pack", &ContentHasher::hash_bytes(b"a v1"))])
        .await
        .unwrap();

    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("a.pack", &b"a v2"[..], "a.pack")]),
    );
    server.serve_bytes("a.pack", b"a v2");

    let config = fixture.config(&server.url("manifest.json"));
    let controller = PatchUpdateController::new(config).unwrap();
    let check = controller.check_for_patch_update().await;
    assert!(controller.apply_patch_update(&check.updates, None).await.needs_restart);

    tokio::fs::write(fixture.staging_dir().join("a.pack"), b"tampered").await.unwrap();

    assert!(!controller.apply_pending_updates().await);
    assert_eq!(tokio::fs::read(&target).await.unwrap(), b"a v1");
    assert!(!controller.has_pending_updates());
    assert!(!fixture.staging_dir().exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_external_swap_is_recorded_on_next_start() {
    use patchup::patch::{PendingUpdateLedger, ScriptFlavor, SwapScriptGenerator, UpdateReason};
    use patchup::test_utils::init_test_logging;
    use std::path::PathBuf;

    init_test_logging(None);
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    let bundle = fixture.install_component("app.bundle", b"bundle v1").await.unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("app.bundle", &b"bundle v2"[..], "app.bundle")]),
    );
    server.serve_bytes("app.bundle", b"bundle v2");

    let mut config = fixture.config(&server.url("manifest.json"));
    config.components.insert("app.bundle".to_string(), PathBuf::from("app.bundle"));

    let controller = PatchUpdateController::new(config.clone()).unwrap();
    let check = controller.check_for_patch_update().await;
    assert!(controller.apply_patch_update(&check.updates, None).await.needs_restart);

    // No process has this pid, so the script starts copying right away.
    let ledger = PendingUpdateLedger::new(config.ledger_path());
    let script = SwapScriptGenerator::new(ledger.clone(), config.staging_dir(), config.data_dir(), None)
        .with_flavor(ScriptFlavor::Posix)
        .with_pid(4_000_000)
        .create()
        .await
        .unwrap();
    let status = std::process::Command::new("sh").arg(&script).status().unwrap();
    assert!(status.success());

    assert_eq!(tokio::fs::read(&bundle).await.unwrap(), b"bundle v2");
    assert!(!ledger.exists());
    assert!(ledger.has_applied_marker());

    // The relaunched application
    let controller = PatchUpdateController::new(config).unwrap();
    let again = controller.check_for_patch_update().await;
    assert_eq!(again.reason, Some(UpdateReason::UpToDate), "{again:?}");
    assert!(!ledger.has_applied_marker());

    let state = controller.local_state().await;
    assert_eq!(state.version, "1.1.0");
    assert_eq!(state.components["app.bundle"].digest, ContentHasher::hash_bytes(b"bundle v2"));
}
