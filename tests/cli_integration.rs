//! CLI surface tests for the commitly binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn commitly() -> Command {
    Command::cargo_bin("commitly").expect("binary builds")
}

#[test]
fn init_scaffolds_and_is_idempotent() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("main.py"), "print('hi')\n").unwrap();

    commitly()
        .current_dir(temp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized"));

    assert!(temp.path().join("commitly.yaml").exists());
    assert!(temp.path().join(".commitly").join("cache").exists());

    commitly()
        .current_dir(temp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already present"));
}

#[test]
fn commit_without_config_exits_3() {
    let temp = TempDir::new().unwrap();

    commitly()
        .current_dir(temp.path())
        .args(["commit", "-m", "test"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("configuration not found"));
}

#[test]
fn status_without_runs_is_clean() {
    let temp = TempDir::new().unwrap();

    commitly()
        .current_dir(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("no pipeline runs"));
}

#[test]
fn report_rejects_malformed_dates() {
    let temp = TempDir::new().unwrap();

    commitly()
        .current_dir(temp.path())
        .args(["report", "--from", "bad", "--to", "2024-03-09"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("YYYY-MM-DD"));
}

#[test]
fn commit_outside_a_repository_fails_cleanly() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("commitly.yaml"),
        "execution:\n  command: sh -c true\ntest:\n  command: sh -c true\n",
    )
    .unwrap();

    commitly()
        .current_dir(temp.path())
        .args(["commit", "-m", "test", "--no"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a git repository"));
}
