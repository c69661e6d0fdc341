//! Integration tests for the `vaultbridge` CLI binary.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

const KEY_HEX: &str = "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4";

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vaultbridge"))
        .arg("--dir")
        .arg(dir)
        .args(args)
        .env("VAULTBRIDGE_JOB_KEY", KEY_HEX)
        .env_remove("VAULTBRIDGE_JOB_DIR")
        .env_remove("VAULTBRIDGE_CONFIG")
        .output()
        .expect("run vaultbridge")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).expect("utf-8")
}

#[test]
fn test_append_list_inspect_clear() {
    let dir = tempfile::tempdir().expect("tempdir");
    let payload = dir.path().join("payload.json");
    std::fs::write(&payload, r#"{"title":"Example"}"#).expect("payload");

    let inspected: Value =
        serde_json::from_str(&stdout(&run(dir.path(), &["inspect"]))).expect("json");
    assert_eq!(inspected["exists"], false);

    let id = stdout(&run(
        dir.path(),
        &[
            "append",
            "--vault-id",
            "vault-1",
            "--type",
            "add_passkey",
            "--payload",
            payload.to_str().expect("path"),
        ],
    ));
    let id = id.trim();

    let jobs: Value = serde_json::from_str(&stdout(&run(dir.path(), &["list"]))).expect("json");
    assert_eq!(jobs[0]["id"], id);
    assert_eq!(jobs[0]["type"], "ADD_PASSKEY");
    assert_eq!(jobs[0]["payload"]["title"], "Example");

    let inspected: Value =
        serde_json::from_str(&stdout(&run(dir.path(), &["inspect"]))).expect("json");
    assert_eq!(inspected["exists"], true);
    assert_eq!(inspected["version"], 1);
    assert_eq!(inspected["jobCount"], 1);

    stdout(&run(dir.path(), &["clear"]));
    assert!(!dir.path().join("jobs.enc").exists());
}

#[test]
fn test_attach_names_blob_after_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, b"hello").expect("file");

    let relative = stdout(&run(
        dir.path(),
        &["attach", "--file", file.to_str().expect("path"), "--id", "a1"],
    ));
    assert_eq!(relative.trim(), "a1.txt");
    assert_eq!(
        std::fs::read(dir.path().join("attachments").join("a1.txt")).expect("blob"),
        b"hello"
    );
}

#[test]
fn test_list_without_key_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_vaultbridge"))
        .arg("--dir")
        .arg(dir.path())
        .arg("list")
        .env_remove("VAULTBRIDGE_JOB_KEY")
        .output()
        .expect("run vaultbridge");
    assert!(!output.status.success());
}
