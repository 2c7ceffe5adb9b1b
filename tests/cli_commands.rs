// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

use starsearch::storage::{RecordStore, StarRecord};

/// A command isolated from the caller's config files and credentials.
fn starsearch(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("starsearch"));
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("NO_COLOR", "1")
        .env_remove("GITHUB_TOKEN")
        .env_remove("EMBEDDING_IMPLEMENTATION")
        .env_remove("VOYAGE_API_KEY")
        .env_remove("DEEPSEEK_API_KEY")
        .env_remove("STARSEARCH_DATA_DIR")
        .args(["--data-dir", "data"]);
    cmd
}

fn seed(dir: &TempDir, records: &[StarRecord]) {
    let mut store = RecordStore::open(dir.path().join("data").join("default.db")).expect("open store");
    store.commit_page(1, records).expect("seed records");
}

fn record(id: i64, name: &str, summary: &str) -> StarRecord {
    StarRecord {
        id,
        name: name.to_string(),
        description: String::new(),
        url: format!("https://github.com/{}", name),
        summary: summary.to_string(),
    }
}

#[test]
fn search_without_index_prints_guidance() {
    let dir = TempDir::new().expect("tempdir");
    starsearch(&dir)
        .args(["search", "package manager"])
        .assert()
        .success()
        .stdout(predicate::str::contains("starsearch create-index"));
    assert!(!dir.path().join("data").join("default.db").exists());
}

#[test]
fn status_on_fresh_directory_creates_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let output = starsearch(&dir)
        .args(["--format", "json", "status"])
        .output()
        .expect("run status");
    assert!(output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("status json");
    assert_eq!(json["stars"], 0);
    assert_eq!(json["last_synced_page"], 0);
    assert!(!dir.path().join("data").join("default.db").exists());
}

#[test]
fn create_index_on_empty_store_has_nothing_to_build() {
    let dir = TempDir::new().expect("tempdir");
    starsearch(&dir)
        .arg("create-index")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to build"));
}

#[test]
fn unknown_backend_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    starsearch(&dir)
        .env("EMBEDDING_IMPLEMENTATION", "word2vec")
        .args(["search", "anything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown embedding implementation 'word2vec'"));
}

#[test]
fn sync_requires_token() {
    let dir = TempDir::new().expect("tempdir");
    starsearch(&dir)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GITHUB_TOKEN"));
}

#[test]
fn status_reports_cursor_and_backends() {
    let dir = TempDir::new().expect("tempdir");
    seed(&dir, &[record(1, "acme/pkg", "a package manager")]);

    let output = starsearch(&dir)
        .args(["status", "--format", "json"])
        .output()
        .expect("run status");
    assert!(output.status.success());

    let json: Value = serde_json::from_slice(&output.stdout).expect("status json");
    assert_eq!(json["last_synced_page"], 1);
    assert_eq!(json["stars"], 1);
    assert_eq!(json["active_backend"], "sentence-transformers");
    let backends = json["backends"].as_array().expect("backends array");
    assert_eq!(backends.len(), 3);
    assert!(backends.iter().all(|b| b["index_exists"] == false));
}

#[test]
fn completions_are_generated() {
    let dir = TempDir::new().expect("tempdir");
    starsearch(&dir)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("starsearch"));
}

#[cfg(unix)]
#[test]
fn command_backend_builds_and_searches() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(
        dir.path().join(".starsearch.toml"),
        r#"
[embeddings]
backend = "command"
batch_size = 1
command = '''if grep -q package; then echo '[[1.0, 0.0]]'; else echo '[[0.0, 1.0]]'; fi'''
"#,
    )
    .expect("write config");
    seed(
        &dir,
        &[
            record(1, "acme/webby", "a web framework"),
            record(2, "acme/pkg", "a package manager"),
        ],
    );

    starsearch(&dir)
        .arg("create-index")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));
    assert!(dir.path().join("data").join("index_command.vec").exists());

    starsearch(&dir)
        .arg("create-index")
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));

    let output = starsearch(&dir)
        .args(["--format", "json", "search", "package manager", "--k", "2"])
        .output()
        .expect("run search");
    assert!(output.status.success());
    let hits: Value = serde_json::from_slice(&output.stdout).expect("search json");
    let hits = hits.as_array().expect("hits array");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["name"], "acme/pkg");
    assert_eq!(hits[0]["id"], 2);

    let output = starsearch(&dir)
        .args(["--format", "json", "search", "package", "--k", "2000000000000000000"])
        .output()
        .expect("run search with large k");
    assert!(output.status.success());
    let hits: Value = serde_json::from_slice(&output.stdout).expect("search json");
    assert_eq!(hits.as_array().expect("hits array").len(), 2);
}
