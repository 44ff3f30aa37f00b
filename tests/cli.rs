use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rag");
    path
}

/// A config with both backends disabled and the index inside `root`.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("nested")).unwrap();
    fs::write(
        docs_dir.join("alpha.md"),
        "# Alpha\n\nThe alpha document covers Rust ownership.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("nested").join("beta.txt"),
        "Beta notes about deployment.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();
    fs::write(docs_dir.join("ignored.pdf"), "not text").unwrap();

    let config_content = format!(
        r#"[index]
dir = "{}/indexes"
store = "cli"

[chunking]
max_chars = 200
overlap_chars = 20

[embedding]
provider = "disabled"

[completion]
provider = "disabled"
"#,
        root.display()
    );
    let config_path = root.join("rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_strategies_lists_aliases() {
    let (_tmp, _config) = setup_test_env();
    // no config needed
    let output = Command::new(rag_binary()).arg("strategies").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 17);
    assert!(stdout.lines().next().unwrap().starts_with("option1"));
    assert!(stdout.contains("hyde"));
    assert!(stdout.contains("option17"));
}

#[test]
fn test_stats_on_empty_store() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rag(&config, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Store:          cli"));
    assert!(stdout.contains("Documents:      0"));
    assert!(stdout.contains("Dimension:      -"));
}

#[test]
fn test_ingest_without_embedder_adds_nothing() {
    let (tmp, config) = setup_test_env();
    let docs = tmp.path().join("docs");
    let (stdout, stderr, success) = run_rag(&config, &["ingest", docs.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("Ingested 2 file(s)"), "stdout: {}", stdout);
    assert!(stdout.contains("0 added"));

    let (stdout, _, _) = run_rag(&config, &["stats"]);
    assert!(stdout.contains("Documents:      0"));
}

#[test]
fn test_ingest_rejects_unsupported_file() {
    let (tmp, config) = setup_test_env();
    let pdf = tmp.path().join("docs").join("ignored.pdf");
    let (_, stderr, success) = run_rag(&config, &["ingest", pdf.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Unsupported file type"));
}

#[test]
fn test_search_without_results() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rag(&config, &["search", "anything", "-k", "3"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_ask_without_backends_reports_unavailable() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rag(&config, &["ask", "What is Rust?", "--strategy", "option16"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("currently unavailable"));
    assert!(stdout.contains("Source type: general"));
    assert!(stderr.contains("Warning:"));
}

#[test]
fn test_clear() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rag(&config, &["clear"]);
    assert!(success, "clear failed: {}", stderr);
    assert!(stdout.contains("Cleared store 'cli'."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_rag(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[embedding]\nprovider = \"faiss\"\n").unwrap();
    let (_, stderr, success) = run_rag(&config, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"));
}
