//! Integration tests for the bounded runner: output budgets, timeouts, and
//! spawn failures observed against real processes.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use turnstile_core::exec::{run, Prepared};

fn make_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn prepared(path: &Path) -> Prepared {
    Prepared {
        path: path.to_path_buf(),
        args: Vec::new(),
        cwd: path.parent().unwrap().to_path_buf(),
        env: std::env::vars().collect::<HashMap<_, _>>(),
        timeout_ms: 5_000,
        max_bytes: 262_144,
        max_stdout_lines: 1_500,
    }
}

#[tokio::test]
async fn captures_exit_code_and_output() {
    let dir = TempDir::new().unwrap();
    let script = make_script(dir.path(), "both.sh", "echo out\necho err >&2\nexit 3\n");

    let outcome = run(&prepared(&script)).await;
    assert_eq!(outcome.exit_code, 3);
    assert_eq!(outcome.stdout.trim(), "out");
    assert_eq!(outcome.stderr.trim(), "err");
    assert!(!outcome.truncated);
}

#[tokio::test]
async fn timeout_kills_the_child() {
    let dir = TempDir::new().unwrap();
    let script = make_script(dir.path(), "hang.sh", "sleep 5\necho never\n");

    let mut p = prepared(&script);
    p.timeout_ms = 60;
    let outcome = run(&p).await;
    assert_eq!(outcome.exit_code, -1);
    assert_eq!(outcome.stderr, "timeout");
    assert!(outcome.truncated);
    assert!(outcome.duration_ms < 5_000);
}

#[tokio::test]
async fn stdout_is_truncated_to_the_byte_budget() {
    let dir = TempDir::new().unwrap();
    let script = make_script(
        dir.path(),
        "noisy.sh",
        "i=0\nwhile [ $i -lt 200 ]; do echo \"line $i with some padding text\"; i=$((i+1)); done\n",
    );

    let mut p = prepared(&script);
    p.max_bytes = 512;
    let outcome = run(&p).await;
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.truncated);
    assert!(outcome.stdout.len() <= 512 + '…'.len_utf8());
    assert!(outcome.stdout.ends_with('…'));
}

#[tokio::test]
async fn stdout_is_capped_to_the_line_budget() {
    let dir = TempDir::new().unwrap();
    let script = make_script(
        dir.path(),
        "lines.sh",
        "i=0\nwhile [ $i -lt 50 ]; do echo \"line $i\"; i=$((i+1)); done\n",
    );

    let mut p = prepared(&script);
    p.max_stdout_lines = 10;
    let outcome = run(&p).await;
    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.truncated);
    assert_eq!(outcome.stdout.lines().count(), 10);
}

#[tokio::test]
async fn missing_binary_reports_127() {
    let dir = TempDir::new().unwrap();
    let ghost = dir.path().join("ghost.sh");

    let mut p = prepared(&dir.path().join("x"));
    p.path = ghost;
    let outcome = run(&p).await;
    assert_eq!(outcome.exit_code, 127);
    assert_eq!(outcome.stderr, "not found");
}
