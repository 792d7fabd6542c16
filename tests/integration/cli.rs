//! Tests that drive the `patchup` binary.
//!
//! Tests that need the HTTP server run on a multi-threaded runtime so it keeps
//! serving while the blocking `assert_cmd` call waits on the child.

use crate::common::TestServer;
use assert_cmd::Command;
use patchup::config::PatchConfig;
use patchup::test_utils::{InstallFixture, manifest_json};
use predicates::prelude::*;
use std::path::Path;

fn patchup(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("patchup").unwrap();
    cmd.env("NO_COLOR", "1").arg("--no-progress").arg("--config").arg(config);
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("patchup").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply-pending"))
        .stdout(predicate::str::contains("swap-script"));
}

#[tokio::test]
async fn test_pending_without_ledger() {
    let fixture = InstallFixture::new().unwrap();
    let config = fixture.write_config(&fixture.config("")).await.unwrap();

    patchup(&config).arg("pending").assert().success().stdout(predicate::str::starts_with("no"));
}

#[tokio::test]
async fn test_check_without_manifest_url_fails() {
    let fixture = InstallFixture::new().unwrap();
    let config = PatchConfig {
        manifest_url: String::new(),
        ..fixture.config("")
    };
    let config = fixture.write_config(&config).await.unwrap();

    patchup(&config)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("manifest_url"));
}

#[tokio::test]
async fn test_status_json_reports_synthesized_state() {
    let fixture = InstallFixture::new().unwrap();
    let config = fixture.write_config(&fixture.config("")).await.unwrap();

    let output = patchup(&config).args(["status", "--json"]).assert().success();
    let state: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert_eq!(state["version"], "1.0.0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_check_json_reports_available_update() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    fixture.write_local_state("1.0.0", &[]).await.unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("a.pack", &b"alpha"[..], "a.pack")]),
    );
    let config = fixture.write_config(&fixture.config(&server.url("manifest.json"))).await.unwrap();

    let output = patchup(&config).args(["check", "--json"]).assert().success();
    let check: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert_eq!(check["available"], true);
    assert_eq!(check["version"], "1.1.0");
    assert_eq!(check["updates"][0]["name"], "a.pack");
    assert_eq!(check["updates"][0]["isNew"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_apply_then_apply_pending() {
    let server = TestServer::start().await;
    let fixture = InstallFixture::new().unwrap();
    let target = fixture.install_component("a.pack", b"alpha v1").await.unwrap();
    fixture.write_local_state("1.0.0", &[("a.pack", "stale")]).await.unwrap();
    server.serve_json(
        "manifest.json",
        &manifest_json("1.1.0", None, &[("a.pack", &b"alpha v2"[..], "a.pack")]),
    );
    server.serve_bytes("a.pack", b"alpha v2");
    let config = fixture.write_config(&fixture.config(&server.url("manifest.json"))).await.unwrap();

    patchup(&config).arg("apply").assert().success().stdout(predicate::str::contains("Update staged"));

    patchup(&config).arg("pending").assert().success().stdout(predicate::str::starts_with("yes"));
    assert_eq!(std::fs::read(&target).unwrap(), b"alpha v1");

    patchup(&config)
        .arg("apply-pending")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending update applied"));
    assert_eq!(std::fs::read(&target).unwrap(), b"alpha v2");

    patchup(&config).arg("pending").assert().success().stdout(predicate::str::starts_with("no"));
}
