//! End-to-end runs of the tap binary

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("config.json");
    fs::write(&path, contents).unwrap();
    path
}

fn tap() -> Command {
    let mut cmd = Command::cargo_bin("tap-trustpilot").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("LOG_FORMAT");
    cmd
}

#[test]
fn test_discover_prints_catalog() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, r#"{"access_key": "key", "business_unit_id": "bu1"}"#);

    let output = tap()
        .args(["--config", config.to_str().unwrap(), "--discover"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let catalog: Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = catalog["streams"]
        .as_array()
        .unwrap()
        .iter()
        .map(|stream| stream["tap_stream_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["business_units", "reviews", "consumers", "private_reviews"]);
}

#[test]
fn test_sync_without_catalog_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, r#"{"access_key": "key", "business_unit_id": "bu1"}"#);

    tap()
        .args(["--config", config.to_str().unwrap()])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_config_without_business_unit_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, r#"{"access_key": "key"}"#);

    let output = tap()
        .args(["--config", config.to_str().unwrap(), "--discover"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("business_unit"), "stderr: {stderr}");
}

#[test]
fn test_missing_config_file_fails() {
    tap()
        .args(["--config", "/nonexistent/config.json", "--discover"])
        .assert()
        .failure();
}

#[test]
fn test_unselected_catalog_syncs_nothing() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, r#"{"access_key": "key", "business_unit_id": "bu1"}"#);

    let discovered = tap()
        .args(["--config", config.to_str().unwrap(), "--discover"])
        .output()
        .unwrap();
    let catalog = dir.path().join("catalog.json");
    fs::write(&catalog, &discovered.stdout).unwrap();

    let output = tap()
        .args([
            "--config",
            config.to_str().unwrap(),
            "--catalog",
            catalog.to_str().unwrap(),
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}
