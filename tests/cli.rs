//! CLI smoke tests driving the compiled `rgl` binary.
//!
//! Runs against a temp directory with embeddings and generation disabled,
//! so everything works offline: init, ingest, keyword-degraded search,
//! and idempotent re-ingestion.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rgl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rgl");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.txt"),
        "Beta plain text file.\n\nContains notes about deployment and infrastructure.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/ragline.sqlite"

[chunking]
max_tokens = 64
overlap_tokens = 8
min_tokens = 4
"#,
        root.display()
    );
    let config_path = root.join("ragline.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rgl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rgl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rgl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn init_creates_database_and_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rgl(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_rgl(&config_path, &["init"]);
    assert!(success, "second init failed (not idempotent)");
}

#[test]
fn ingest_and_search_roundtrip() {
    let (tmp, config_path) = setup_test_env();
    run_rgl(&config_path, &["init"]);

    let files = tmp.path().join("files");
    let (stdout, stderr, success) =
        run_rgl(&config_path, &["ingest", files.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents accepted: 2/2"));
    assert!(stdout.contains("ok"));

    let (stdout, stderr, success) = run_rgl(&config_path, &["search", "deployment"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("beta.txt"));

    let (stdout, _, success) = run_rgl(&config_path, &["search", "zzzunmatched"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn reingest_reports_same_acceptance_without_duplicates() {
    let (tmp, config_path) = setup_test_env();
    run_rgl(&config_path, &["init"]);

    let files = tmp.path().join("files");
    run_rgl(&config_path, &["ingest", files.to_str().unwrap()]);
    let (stdout, _, success) = run_rgl(&config_path, &["ingest", files.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("documents accepted: 2/2"));

    // A single search hit per document, not one per ingest run.
    let (stdout, _, _) = run_rgl(&config_path, &["search", "alpha"]);
    assert_eq!(stdout.matches("alpha.md").count(), 1);
}

#[test]
fn ask_without_generation_backend_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();
    run_rgl(&config_path, &["init"]);

    let (_, stderr, success) = run_rgl(&config_path, &["ask", "anything"]);
    assert!(!success);
    assert!(stderr.contains("generation is disabled"));
}

#[test]
fn turns_empty_before_any_question() {
    let (_tmp, config_path) = setup_test_env();
    run_rgl(&config_path, &["init"]);

    let (stdout, _, success) = run_rgl(&config_path, &["turns"]);
    assert!(success);
    assert!(stdout.contains("No conversation turns recorded."));
}
