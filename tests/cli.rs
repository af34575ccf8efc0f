use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn skm_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_skm"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let skills_dir = root.join("skills");
    fs::create_dir_all(&skills_dir).unwrap();
    fs::write(
        skills_dir.join("add_two.py"),
        "def add_two(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n",
    )
    .unwrap();
    fs::write(skills_dir.join("constants.py"), "PI = 3.14159\n").unwrap();

    let docs_dir = root.join("docs");
    for i in 0..7 {
        let sub = docs_dir.join(format!("group{}", i % 3));
        fs::create_dir_all(&sub).unwrap();
        fs::write(
            sub.join(format!("note{}.md", i)),
            format!("# Note {}\n\nShort note number {}.\n", i, i),
        )
        .unwrap();
    }

    let config_content = format!(
        r#"[store]
path = "{}/data/skills.sqlite"

[recall]
threshold = 1.0
max_results = 5

[remote]
repo = "acme/skills"
token_env = "SKM_TEST_TOKEN_THAT_IS_NEVER_SET"
"#,
        root.display()
    );
    let config_path = config_dir.join("skm.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_skm(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = skm_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run skm binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_skm(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_skm(&config_path, &["init"]);
    assert!(success, "second init failed");
}

#[test]
fn test_store_and_query() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("skills/add_two.py");

    run_skm(&config_path, &["init"]);
    let (stdout, stderr, success) = run_skm(&config_path, &["store", file.to_str().unwrap()]);
    assert!(success, "store failed: {}", stderr);
    assert!(stdout.contains("add_two(a, b)"));

    let (stdout, stderr, success) = run_skm(&config_path, &["query", "add two numbers"]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.contains("1. add_two"));
    assert!(stdout.contains("Add two numbers."));

    let (stdout, _, success) = run_skm(
        &config_path,
        &["query", "add two numbers", "--json", "--threshold", "2.0"],
    );
    assert!(success);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "add_two");
    assert!(results[0]["distance"].as_f64().unwrap() < 2.0);
}

#[test]
fn test_store_twice_keeps_one_record() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("skills/add_two.py");

    run_skm(&config_path, &["init"]);
    run_skm(&config_path, &["store", file.to_str().unwrap()]);
    run_skm(&config_path, &["store", file.to_str().unwrap()]);

    let (stdout, _, success) = run_skm(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Records:     1"), "stats: {}", stdout);
}

#[test]
fn test_store_without_function_uses_file_stem() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("skills/constants.py");

    run_skm(&config_path, &["init"]);
    let (stdout, stderr, success) = run_skm(&config_path, &["store", file.to_str().unwrap()]);
    assert!(success, "store failed: {}", stderr);
    assert!(stdout.contains("Stored constants"));
}

#[test]
fn test_query_before_init_is_empty() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_skm(&config_path, &["query", "anything"]);
    assert!(success, "query failed: {}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_parse_reports_metadata() {
    let (tmp, config_path) = setup_test_env();

    let file = tmp.path().join("skills/add_two.py");
    let (stdout, _, success) = run_skm(&config_path, &["parse", file.to_str().unwrap()]);
    assert!(success);
    let meta: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(meta["name"], "add_two");
    assert_eq!(meta["signature"], "add_two(a, b)");
    assert_eq!(meta["docstring"], "Add two numbers.");

    let file = tmp.path().join("skills/constants.py");
    let (stdout, _, success) = run_skm(&config_path, &["parse", file.to_str().unwrap()]);
    assert!(success);
    let meta: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(meta["name"].is_null());
    assert!(meta["signature"].is_null());
    assert!(meta["docstring"].is_null());
}

#[test]
fn test_ingest_overwrite_twice() {
    let (tmp, config_path) = setup_test_env();
    let docs = tmp.path().join("docs");

    for _ in 0..2 {
        let (stdout, stderr, success) =
            run_skm(&config_path, &["ingest", docs.to_str().unwrap(), "--overwrite"]);
        assert!(success, "ingest failed: {}", stderr);
        assert!(stdout.contains("chunks: 7"));
        assert!(stdout.contains("records: 7"));
    }

    let (stdout, _, _) = run_skm(&config_path, &["stats"]);
    assert!(stdout.contains("ingest"));
}

#[test]
fn test_init_reset_clears_records() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("skills/add_two.py");

    run_skm(&config_path, &["init"]);
    run_skm(&config_path, &["store", file.to_str().unwrap()]);
    let (stdout, _, success) = run_skm(&config_path, &["init", "--reset"]);
    assert!(success);
    assert!(stdout.contains("reset"));

    let (stdout, _, _) = run_skm(&config_path, &["query", "add two numbers"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stats_reports_stored_metric_after_config_change() {
    let (_tmp, config_path) = setup_test_env();
    run_skm(&config_path, &["init"]);

    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("[store]\n", "[store]\nmetric = \"l2\"\n")).unwrap();

    let (stdout, stderr, success) = run_skm(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(
        stdout.contains("Metric:      cosine  (configured: l2)"),
        "stats: {}",
        stdout
    );
    assert!(stdout.contains("Model:       hashing-256\n"), "stats: {}", stdout);
}

#[test]
fn test_publish_without_token_fails() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("skills/add_two.py");

    let (_, stderr, success) = run_skm(&config_path, &["publish", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("authentication"), "stderr: {}", stderr);
}

#[test]
fn test_sync_without_token_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_skm(&config_path, &["sync"]);
    assert!(!success);
    assert!(stderr.contains("authentication"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_skm(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
