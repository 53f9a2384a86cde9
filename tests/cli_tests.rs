// End-to-end tests for the lockprof binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn lockprof() -> Command {
    Command::cargo_bin("lockprof").unwrap()
}

#[test]
fn test_contention_writes_text_report() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("lockreport.txt");

    lockprof()
        .arg("--report")
        .arg(&report)
        .args(["contention", "-t", "3", "-n", "50"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 threads, 300 locks, 0 violations"));

    let text = fs::read_to_string(&report).unwrap();
    assert!(text.starts_with("Format: <name> <file> <line>:"));
    assert!(text.contains("main 0:\nAll:\n"));
    assert!(text.contains("By Mutex:"));
    assert!(text.contains("By Position:"));
    assert!(text.contains("By Unique:"));
    assert!(text.contains("Locked mutexes:"));
    assert!(text.contains("\nTotal locks: 300\n"));
    assert!(text.contains("\nTotal number of threads: 4\n"));
}

#[test]
fn test_self_relock_reported_on_stderr() {
    let dir = TempDir::new().unwrap();

    lockprof()
        .current_dir(dir.path())
        .arg("self-relock")
        .assert()
        .success()
        .stderr(predicate::str::contains(
            "attempted to lock already locked mutex state from same thread",
        ))
        .stdout(predicate::str::contains("1 violations"));

    assert!(dir.path().join("lockreport.txt").exists());
}

#[test]
fn test_unheld_unlock_reported_on_stderr() {
    let dir = TempDir::new().unwrap();

    lockprof()
        .current_dir(dir.path())
        .arg("unheld-unlock")
        .assert()
        .success()
        .stderr(predicate::str::contains("attempted to unlock not locked mutex state"));
}

#[test]
fn test_json_report_parses() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("report.json");

    lockprof()
        .arg("--report")
        .arg(&report)
        .args(["--format", "json", "cond-wait", "--rounds", "20"])
        .assert()
        .success();

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(value["threads"].as_array().unwrap().len(), 2);
    assert_eq!(value["violations"], 0);
    assert!(value["totals"]["lock_count"].as_u64().unwrap() >= 40);
}

#[test]
fn test_config_file_sets_report_path() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("from-config.txt");
    let config = dir.path().join("lockprof.toml");
    fs::write(
        &config,
        format!(
            "[report]\npath = {:?}\nformat_header = false\n",
            report.display().to_string()
        ),
    )
    .unwrap();

    lockprof()
        .arg("--config")
        .arg(&config)
        .args(["contention", "-t", "1", "-n", "5"])
        .assert()
        .success();

    let text = fs::read_to_string(&report).unwrap();
    assert!(!text.contains("Format:"));
    // shared mutex plus pool mutex per iteration
    assert!(text.contains("\nTotal locks: 10\n"));
}

#[test]
fn test_missing_config_fails() {
    lockprof()
        .args(["--config", "/nonexistent/lockprof.toml", "self-relock"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_null_handle_aborts() {
    let dir = TempDir::new().unwrap();

    lockprof()
        .current_dir(dir.path())
        .arg("null-handle")
        .assert()
        .failure()
        .stderr(predicate::str::contains("null handle"));

    assert!(!dir.path().join("lockreport.txt").exists());
}
