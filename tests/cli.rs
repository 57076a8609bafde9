//! CLI-level tests exercising `devctl up`/`down` against scenarios that
//! don't require a live cluster.

use assert_cmd::Command;
use predicates::str::contains;

fn devctl() -> Command {
    Command::cargo_bin("devctl").expect("binary built")
}

/// Scenario 3: an invalid manifest name must fail before any network or
/// context-store activity — no context is required to reproduce this.
#[test]
fn up_rejects_invalid_manifest_name_without_touching_context() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("devctl.yml");
    std::fs::write(&manifest_path, "name: \"-invalid\"\nimage: alpine\n").unwrap();

    devctl()
        .env("DEVCTL_HOME", dir.path())
        .arg("up")
        .arg(&manifest_path)
        .assert()
        .failure()
        .stderr(contains("invalid manifest"));

    assert!(!dir.path().join("context").join("config.json").exists());
}

#[test]
fn up_rejects_missing_manifest_file() {
    let dir = tempfile::tempdir().unwrap();

    devctl()
        .env("DEVCTL_HOME", dir.path())
        .current_dir(dir.path())
        .arg("up")
        .assert()
        .failure()
        .stderr(contains("reading manifest"));
}

#[test]
fn context_without_url_or_env_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();

    devctl()
        .env("DEVCTL_HOME", dir.path())
        .env_remove("DEVCTL_URL")
        .arg("context")
        .assert()
        .failure()
        .stderr(contains("DEVCTL_URL"));
}

#[test]
fn kubeconfig_without_current_context_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();

    devctl()
        .env("DEVCTL_HOME", dir.path())
        .arg("kubeconfig")
        .assert()
        .failure()
        .stderr(contains("no current context"));
}
