//! CLI integration tests: drive the built `ctxe` binary end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ctxe_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ctxe");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Watched directory with bucket subfolders
    let context_dir = root.join("context");
    fs::create_dir_all(context_dir.join("notes")).unwrap();
    fs::create_dir_all(context_dir.join("work")).unwrap();
    fs::write(
        context_dir.join("notes/alpha.md"),
        "# Alpha Note\n\nThe alpha note talks about Rust programming and cargo workspaces in detail.",
    )
    .unwrap();
    fs::write(
        context_dir.join("work/beta.md"),
        "# Beta Note\n\nThe beta note covers deployment infrastructure and Kubernetes clusters at length.",
    )
    .unwrap();
    fs::write(
        context_dir.join("gamma.txt"),
        "Gamma lives in the watched root. It mentions database migrations and schema design work.",
    )
    .unwrap();

    let config_content = format!(
        r#"[paths]
watched_dir = "{root}/context"
db_path = "{root}/engine/context.db"
backups_dir = "{root}/backups"
models_dir = "{root}/models"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("engine.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ctxe(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ctxe_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctxe binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ctxe(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_ctxe(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_ctxe(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_directory() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    let (stdout, stderr, success) =
        run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("inserted: 3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reingest_skips_unchanged_files() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    let dir = context_dir.to_str().unwrap();

    let (stdout1, _, _) = run_ctxe(&config_path, &["ingest", dir]);
    assert!(stdout1.contains("inserted: 3"));

    let (stdout2, _, _) = run_ctxe(&config_path, &["ingest", dir]);
    assert!(stdout2.contains("inserted: 0"));
    assert!(stdout2.contains("skipped:  3"));
}

#[test]
fn test_ingest_direct_content() {
    let (_tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let (stdout, _, success) = run_ctxe(
        &config_path,
        &[
            "ingest",
            "--content",
            "Direct content about observability pipelines.",
            "--source",
            "direct.md",
            "--buckets",
            "ops",
        ],
    );
    assert!(success);
    assert!(stdout.contains("Inserted"));

    // Second identical ingest reports the duplicate skip
    let (stdout2, _, success2) = run_ctxe(
        &config_path,
        &[
            "ingest",
            "--content",
            "Direct content about observability pipelines.",
            "--source",
            "direct.md",
        ],
    );
    assert!(success2);
    assert!(stdout2.contains("Skipped"));
}

#[test]
fn test_search_finds_ingested_file() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    let (stdout, _, success) = run_ctxe(&config_path, &["search", "Rust programming"]);
    assert!(success, "search failed");
    assert!(
        stdout.contains("notes/alpha.md"),
        "Expected notes/alpha.md in results, got: {}",
        stdout
    );
}

#[test]
fn test_search_bucket_filter() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    // "note" appears in both buckets; the filter must keep only one
    let (stdout, _, success) =
        run_ctxe(&config_path, &["search", "note", "--buckets", "work"]);
    assert!(success);
    assert!(stdout.contains("work/beta.md"));
    assert!(!stdout.contains("notes/alpha.md"));
}

#[test]
fn test_search_deterministic() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    let (stdout1, _, _) = run_ctxe(&config_path, &["search", "note"]);
    let (stdout2, _, _) = run_ctxe(&config_path, &["search", "note"]);
    assert_eq!(
        stdout1, stdout2,
        "Search results should be deterministic across runs"
    );
}

#[test]
fn test_search_no_results() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    let (stdout, _, success) = run_ctxe(&config_path, &["search", "xyznonexistent"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_empty_query_rejected() {
    let (_tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let (_, stderr, success) = run_ctxe(&config_path, &["search", ""]);
    assert!(!success, "Empty query should be rejected");
    assert!(
        stderr.contains("bad request"),
        "Should report bad request, got: {}",
        stderr
    );
}

#[test]
fn test_buckets_command() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);

    // Empty store reports core
    let (stdout, _, _) = run_ctxe(&config_path, &["buckets"]);
    assert_eq!(stdout.trim(), "core");

    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    let (stdout, _, success) = run_ctxe(&config_path, &["buckets"]);
    assert!(success);
    let buckets: Vec<&str> = stdout.lines().collect();
    assert_eq!(buckets, vec!["core", "notes", "work"]);
}

#[test]
fn test_backup_and_restore_cycle() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    let (stdout, _, success) = run_ctxe(&config_path, &["backup"]);
    assert!(success);
    assert!(stdout.contains("snapshot written to"));

    // Wipe the database; boot-time hydration restores from the backup
    fs::remove_dir_all(tmp.path().join("engine")).unwrap();

    let (stdout, _, success) = run_ctxe(&config_path, &["stats"]);
    assert!(success);
    assert!(
        stdout.contains("Compounds: 3"),
        "auto-hydration should restore 3 compounds, got: {}",
        stdout
    );

    // Restored content is searchable again
    let (stdout, _, _) = run_ctxe(&config_path, &["search", "Kubernetes"]);
    assert!(stdout.contains("work/beta.md"));
}

#[test]
fn test_dream_command() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    let (stdout, _, success) = run_ctxe(&config_path, &["dream"]);
    assert!(success);
    assert!(stdout.contains("dream complete"));
    // gamma.txt sits in the root bucket and is the re-tagging candidate
    assert!(stdout.contains("retagged: 1"));
}

#[test]
fn test_scribe_show_and_clear() {
    let (_tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);

    let (stdout, _, success) = run_ctxe(&config_path, &["scribe", "show"]);
    assert!(success);
    assert!(stdout.contains("(no session state)"));

    let (stdout, _, success) = run_ctxe(&config_path, &["scribe", "clear"]);
    assert!(success);
    assert!(stdout.contains("cleared"));
}

#[test]
fn test_chat_fails_cleanly_with_disabled_generator() {
    let (_tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let (_, stderr, success) = run_ctxe(&config_path, &["chat", "hello there"]);
    assert!(!success, "chat should fail with the generator disabled");
    assert!(
        stderr.contains("generator"),
        "Should mention the generator, got: {}",
        stderr
    );
}

#[test]
fn test_stats_overview() {
    let (tmp, config_path) = setup_test_env();

    run_ctxe(&config_path, &["init"]);
    let context_dir = tmp.path().join("context");
    run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);

    let (stdout, _, success) = run_ctxe(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Compounds: 3"));
    assert!(stdout.contains("Generator: disabled"));
}

#[test]
fn test_oversized_file_is_filtered() {
    let (tmp, config_path) = setup_test_env();

    // Rewrite the config with a tiny size cap
    let root = tmp.path();
    let config_content = format!(
        r#"[paths]
watched_dir = "{root}/context"
db_path = "{root}/engine/context.db"
backups_dir = "{root}/backups"

[ingest]
max_file_bytes = 16
"#,
        root = root.display()
    );
    fs::write(&config_path, config_content).unwrap();

    run_ctxe(&config_path, &["init"]);
    let context_dir = root.join("context");
    let (stdout, _, success) =
        run_ctxe(&config_path, &["ingest", context_dir.to_str().unwrap()]);
    assert!(success, "oversized files must be skipped, not fatal");
    assert!(stdout.contains("inserted: 0"));
    assert!(stdout.contains("filtered: 3"));
}
