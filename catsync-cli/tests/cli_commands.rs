use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use catsync_core::{EntityType, Ledger};

fn catsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("catsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "warn");
    cmd
}

/// Config pointing at a closed local port with fast polling and no retries.
fn write_config(dir: &Path, ledger: &Path) -> PathBuf {
    let path = dir.join("catsync.yaml");
    let yaml = format!(
        "tenant: acme\n\
         remote:\n  base_url: http://127.0.0.1:9\n  timeout_ms: 2000\n\
         ledger_path: {}\n\
         retry:\n  max_retries: 0\n  initial_delay_ms: 10\n  max_delay_ms: 10\n\
         poll:\n  interval_ms: 10\n  max_attempts: 2\n",
        ledger.display()
    );
    fs::write(&path, yaml).expect("write config");
    path
}

fn write_catalog(dir: &Path) -> PathBuf {
    let path = dir.join("catalog.json");
    let json = r#"{
  "entities": [
    { "type": "category", "key": "cat-root" },
    { "type": "category", "key": "cat-shoes", "parent_key": "cat-root" },
    { "type": "product", "key": "sku-1001", "payload": { "name": "Runner" } }
  ]
}"#;
    fs::write(&path, json).expect("write catalog");
    path
}

fn seed_ledger(path: &Path) {
    let mut ledger = Ledger::empty(path);
    ledger.add(EntityType::Category, "cat-root".into());
    ledger.add(EntityType::Product, "sku-1001".into());
    ledger.add(EntityType::Product, "sku-1002".into());
    ledger.save().expect("save ledger");
}

#[test]
fn help_lists_every_command() {
    let home = TempDir::new().unwrap();
    catsync_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("ingest"))
        .stdout(contains("delete"))
        .stdout(contains("reconcile"))
        .stdout(contains("status"))
        .stdout(contains("ledger"));
}

#[test]
fn dry_run_ingest_reports_phases_without_touching_ledger_or_remote() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.json");
    let config = write_config(home.path(), &ledger);
    let catalog = write_catalog(home.path());

    catsync_cmd(home.path())
        .args(["ingest", "--dry-run", "--config"])
        .arg(&config)
        .arg("--catalog")
        .arg(&catalog)
        .assert()
        .success()
        .stdout(contains("[dry-run]"))
        .stdout(contains("category"))
        .stdout(contains("product"));

    assert!(!ledger.exists(), "dry-run must not write the ledger");
}

#[test]
fn dry_run_ingest_json_counts_skipped_items() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.json");
    let config = write_config(home.path(), &ledger);
    let catalog = write_catalog(home.path());

    let output = catsync_cmd(home.path())
        .args(["ingest", "--dry-run", "--json", "--config"])
        .arg(&config)
        .arg("--catalog")
        .arg(&catalog)
        .output()
        .expect("run catsync");
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json summary");
    assert_eq!(summary["workflow"], "ingest");
    assert_eq!(summary["dry_run"], true);
    assert_eq!(summary["success"], true);
    let phases = summary["phases"].as_array().expect("phases");
    assert_eq!(phases.len(), 2);
    assert_eq!(phases[0]["entity_type"], "category");
    assert_eq!(phases[0]["counts"]["skipped"], 2);
    assert_eq!(phases[1]["entity_type"], "product");
}

#[test]
fn unreachable_remote_fails_the_run_with_non_zero_exit() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.json");
    let config = write_config(home.path(), &ledger);
    let catalog = write_catalog(home.path());

    let output = catsync_cmd(home.path())
        .args(["ingest", "--json", "--config"])
        .arg(&config)
        .arg("--catalog")
        .arg(&catalog)
        .output()
        .expect("run catsync");
    assert!(!output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json summary");
    assert_eq!(summary["success"], false);
    assert_eq!(summary["phases"][0]["status"], "failed");
    // product depends on category, so it never runs
    assert_eq!(summary["phases"][1]["status"], "aborted");
    assert!(String::from_utf8_lossy(&output.stderr).contains("ingest finished with issues"));
}

#[test]
fn status_json_reports_per_type_counts() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.json");
    let config = write_config(home.path(), &ledger);
    seed_ledger(&ledger);

    let output = catsync_cmd(home.path())
        .args(["status", "--json", "--config"])
        .arg(&config)
        .output()
        .expect("run catsync");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json status");
    assert_eq!(report["tenant"], "acme");
    assert_eq!(report["total"], 3);
    let types = report["types"].as_array().expect("types");
    let count = |name: &str| {
        types
            .iter()
            .find(|t| t["entity_type"] == name)
            .map(|t| t["keys"].as_u64().unwrap())
            .unwrap()
    };
    assert_eq!(count("category"), 1);
    assert_eq!(count("product"), 2);
    assert_eq!(count("price"), 0);
}

#[test]
fn status_on_missing_ledger_says_never() {
    let home = TempDir::new().unwrap();
    let ledger = home.path().join("ledger.json");
    let config = write_config(home.path(), &ledger);

    catsync_cmd(home.path())
        .args(["status", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("updated never"))
        .stdout(contains("Ledger is empty"));
}

#[test]
fn ledger_clear_by_type_keeps_other_types() {
    let home = TempDir::new().unwrap();
    let ledger_path = home.path().join("ledger.json");
    let config = write_config(home.path(), &ledger_path);
    seed_ledger(&ledger_path);

    catsync_cmd(home.path())
        .args(["ledger", "clear", "--type", "product", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("cleared 2 keys"));

    let ledger = Ledger::load(&ledger_path).expect("reload");
    assert_eq!(ledger.len(EntityType::Product), 0);
    assert_eq!(ledger.len(EntityType::Category), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("catsync.yaml");
    fs::write(&config, "tenant: acme\nconcurrency: 0\n").unwrap();

    catsync_cmd(home.path())
        .args(["status", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}

#[test]
fn unknown_entity_type_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    catsync_cmd(home.path())
        .args(["ledger", "clear", "--config", "catsync.yaml", "--type", "widget"])
        .assert()
        .failure()
        .stderr(contains("unknown entity type 'widget'"));
}
