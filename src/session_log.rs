//! JSONL session logger for orchestration replay.
//!
//! Writes one self-describing JSON line per lifecycle event to a
//! timestamped file under `.foreman-logs/`. Uses synchronous `std::fs`
//! since writes are small, buffered, and flushed after each event -- no
//! async complexity needed for append-only logging.
//!
//! Logging failures degrade to warnings; they never abort orchestration.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

/// Returns the current UTC time as an ISO 8601 string with milliseconds.
fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// A structured log entry serialized as a single JSON line.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type")]
pub enum LogEntry {
    /// Marks the beginning of an orchestration session.
    #[serde(rename = "session_start")]
    SessionStart {
        timestamp: String,
        model: String,
        roles: Vec<String>,
    },

    /// A delegate dispatch was accepted and its child launched.
    #[serde(rename = "dispatch_started")]
    DispatchStarted {
        timestamp: String,
        role: String,
        task: String,
    },

    /// A delegate dispatch resolved.
    #[serde(rename = "dispatch_finished")]
    DispatchFinished {
        timestamp: String,
        role: String,
        outcome: String,
        elapsed_ms: u64,
    },

    /// A pipeline run started.
    #[serde(rename = "pipeline_started")]
    PipelineStarted {
        timestamp: String,
        steps: Vec<String>,
        task: String,
    },

    /// One pipeline step resolved.
    #[serde(rename = "step_finished")]
    StepFinished {
        timestamp: String,
        step: usize,
        role: String,
        succeeded: bool,
        elapsed_ms: u64,
    },

    /// A pipeline run resolved.
    #[serde(rename = "pipeline_finished")]
    PipelineFinished {
        timestamp: String,
        outcome: String,
    },
}

impl LogEntry {
    pub fn session_start(model: &str, roles: Vec<String>) -> Self {
        LogEntry::SessionStart {
            timestamp: now_iso(),
            model: model.to_string(),
            roles,
        }
    }

    pub fn dispatch_started(role: &str, task: &str) -> Self {
        LogEntry::DispatchStarted {
            timestamp: now_iso(),
            role: role.to_string(),
            task: task.to_string(),
        }
    }

    pub fn dispatch_finished(role: &str, outcome: &str, elapsed_ms: u64) -> Self {
        LogEntry::DispatchFinished {
            timestamp: now_iso(),
            role: role.to_string(),
            outcome: outcome.to_string(),
            elapsed_ms,
        }
    }

    pub fn pipeline_started(steps: Vec<String>, task: &str) -> Self {
        LogEntry::PipelineStarted {
            timestamp: now_iso(),
            steps,
            task: task.to_string(),
        }
    }

    pub fn step_finished(step: usize, role: &str, succeeded: bool, elapsed_ms: u64) -> Self {
        LogEntry::StepFinished {
            timestamp: now_iso(),
            step,
            role: role.to_string(),
            succeeded,
            elapsed_ms,
        }
    }

    pub fn pipeline_finished(outcome: &str) -> Self {
        LogEntry::PipelineFinished {
            timestamp: now_iso(),
            outcome: outcome.to_string(),
        }
    }
}

/// Append-only JSONL writer shared across strategies. Cheap to clone.
#[derive(Clone)]
pub struct SessionLogger {
    writer: Arc<Mutex<BufWriter<fs::File>>>,
    path: PathBuf,
}

impl SessionLogger {
    /// Create `.foreman-logs/session-<ISO8601>.jsonl` under `base_dir`.
    pub fn create(base_dir: &Path) -> std::io::Result<Self> {
        let log_dir = base_dir.join(".foreman-logs");
        fs::create_dir_all(&log_dir)?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = log_dir.join(format!("session-{stamp}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
            path,
        })
    }

    /// Path of the log file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush. Failures are logged, never propagated.
    pub fn log(&self, entry: LogEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize session log entry: {e}");
                return;
            }
        };

        let mut writer = self.writer.lock().unwrap();
        if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            tracing::warn!(path = %self.path.display(), "Session log write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::create(dir.path()).unwrap();

        logger.log(LogEntry::session_start("m1", vec!["scout".to_string()]));
        logger.log(LogEntry::dispatch_started("scout", "look around"));
        logger.log(LogEntry::dispatch_finished("scout", "success", 1234));

        let contents = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "session_start");
        assert_eq!(first["roles"][0], "scout");

        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["event_type"], "dispatch_finished");
        assert_eq!(last["elapsed_ms"], 1234);
    }

    #[test]
    fn log_file_lands_in_foreman_logs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::create(dir.path()).unwrap();
        assert!(logger.path().starts_with(dir.path().join(".foreman-logs")));
    }
}
