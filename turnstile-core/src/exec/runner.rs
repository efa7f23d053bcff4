//! Bounded subprocess runner.
//!
//! Runs a prepared invocation directly (no shell) with an externally
//! enforced wall-clock timeout and output budgets. The budgets arrive
//! already clamped by the capability resolver; the runner just enforces
//! them mechanically.

use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::debug;

use super::prepare::Prepared;

/// Result of one bounded execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcome {
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl ExecOutcome {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }

    fn failed(exit_code: i32, stderr: &str) -> Self {
        ExecOutcome {
            exit_code,
            duration_ms: 0,
            stdout: String::new(),
            stderr: stderr.to_string(),
            truncated: false,
        }
    }
}

/// Run the prepared invocation. A timeout kills the child and reports
/// exit code -1 with `truncated = true`, mirroring the wire contract the
/// gateway's callers already understand.
pub async fn run(prepared: &Prepared) -> ExecOutcome {
    let start = Instant::now();

    let mut command = tokio::process::Command::new(&prepared.path);
    command
        .args(&prepared.args)
        .current_dir(&prepared.cwd)
        .env_clear()
        .envs(&prepared.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ExecOutcome::failed(127, "not found");
        }
        Err(e) => {
            debug!("spawn failed for {:?}: {}", prepared.path, e);
            return ExecOutcome::failed(1, &e.to_string());
        }
    };

    let wait = child.wait_with_output();
    match tokio::time::timeout(Duration::from_millis(prepared.timeout_ms), wait).await {
        Ok(Ok(output)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let exit_code = output.status.code().unwrap_or(-1);

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            let (stdout, lines_cut) = cap_lines(&stdout, prepared.max_stdout_lines);
            let (stdout, out_cut) = truncate_utf8(&stdout, prepared.max_bytes as usize);
            let (stderr, err_cut) = truncate_utf8(&stderr, prepared.max_bytes as usize);

            ExecOutcome {
                exit_code,
                duration_ms,
                stdout,
                stderr,
                truncated: lines_cut || out_cut || err_cut,
            }
        }
        Ok(Err(e)) => {
            debug!("wait failed for {:?}: {}", prepared.path, e);
            ExecOutcome {
                exit_code: 1,
                duration_ms: start.elapsed().as_millis() as u64,
                stdout: String::new(),
                stderr: e.to_string(),
                truncated: false,
            }
        }
        // dropping the wait future kills the child (kill_on_drop)
        Err(_) => ExecOutcome {
            exit_code: -1,
            duration_ms: start.elapsed().as_millis() as u64,
            stdout: String::new(),
            stderr: "timeout".into(),
            truncated: true,
        },
    }
}

/// Truncate to at most `limit` bytes on a char boundary, appending an
/// ellipsis when anything was cut.
fn truncate_utf8(s: &str, limit: usize) -> (String, bool) {
    if s.len() <= limit {
        return (s.to_string(), false);
    }
    let budget = limit.saturating_sub(3);
    let mut end = budget.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}…", &s[..end]), true)
}

/// Keep at most `max_lines` lines.
fn cap_lines(s: &str, max_lines: u64) -> (String, bool) {
    let count = s.lines().count() as u64;
    if count <= max_lines {
        return (s.to_string(), false);
    }
    let kept: Vec<&str> = s.lines().take(max_lines as usize).collect();
    (kept.join("\n"), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truncate_respects_char_boundaries() {
        let (out, cut) = truncate_utf8("héllo wörld", 8);
        assert!(cut);
        assert!(out.ends_with('…'));
        assert!(out.len() <= 8 + '…'.len_utf8());

        let (out, cut) = truncate_utf8("short", 100);
        assert!(!cut);
        assert_eq!(out, "short");
    }

    #[test]
    fn cap_lines_keeps_prefix() {
        let text = "a\nb\nc\nd\n";
        let (out, cut) = cap_lines(text, 2);
        assert!(cut);
        assert_eq!(out, "a\nb");

        let (out, cut) = cap_lines(text, 10);
        assert!(!cut);
        assert_eq!(out, text);
    }
}
