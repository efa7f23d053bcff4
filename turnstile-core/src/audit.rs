//! Append-only execution audit log.
//!
//! One JSON line per execution, day-partitioned files. Auditing is
//! best-effort: a failure to write is logged and never surfaces to the
//! caller.

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::exec::ExecOutcome;

#[derive(Debug, Serialize)]
pub struct AuditRecord<'a> {
    pub ts: i64,
    pub tool: &'a str,
    pub path: String,
    pub args: &'a [String],
    pub duration_ms: u64,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub truncated: bool,
    pub result: AuditResult,
}

#[derive(Debug, Serialize)]
pub struct AuditResult {
    pub ok: bool,
}

impl<'a> AuditRecord<'a> {
    pub fn for_run(path: &Path, args: &'a [String], outcome: &ExecOutcome) -> Self {
        AuditRecord {
            ts: Utc::now().timestamp_millis(),
            tool: "run_script",
            path: path.display().to_string(),
            args,
            duration_ms: outcome.duration_ms,
            exit_code: outcome.exit_code,
            truncated: outcome.truncated,
            result: AuditResult { ok: outcome.ok() },
        }
    }
}

/// Append a record to today's log file under `log_dir`.
pub fn append(log_dir: &Path, record: &AuditRecord<'_>) {
    if let Err(e) = try_append(log_dir, record) {
        debug!("audit log failed: {}", e);
    }
}

fn try_append(log_dir: &Path, record: &AuditRecord<'_>) -> std::io::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let file_name = format!("exec-{}.jsonl", Utc::now().format("%Y%m%d"));
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(file_name))?;
    let line = serde_json::to_string(record)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(file, "{line}")
}
