//! Outcome of one sandboxed execution attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exception summary prefix for executions killed by the wall-clock limit.
pub const TIMEOUT_EXCEPTION: &str = "TimeoutError";

/// Exception summary prefix for children that died without posting a result.
pub const ABNORMAL_EXIT_EXCEPTION: &str = "AbnormalExit";

/// Size of the stdout/stderr tail included in diagnostics.
const DIAGNOSTIC_TAIL: usize = 4000;

/// Result of running one work unit in isolation.
///
/// Exactly one of these is produced per attempt, whatever happened inside
/// the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Whether the unit of work completed without error.
    pub success: bool,
    /// Value returned by the unit of work (`null` when none).
    #[serde(default)]
    pub value: Value,
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
    /// Formatted call chain for failures.
    #[serde(default)]
    pub traceback: String,
    /// One-line failure summary, `Kind: message`.
    #[serde(default)]
    pub exception: Option<String>,
    /// Wall-clock duration of the attempt.
    #[serde(default)]
    pub duration: Duration,
    /// When the attempt finished.
    #[serde(default = "Utc::now")]
    pub finished_at: DateTime<Utc>,
}

impl SandboxResult {
    /// Creates a successful result carrying `value`.
    pub fn success(value: Value) -> Self {
        Self {
            success: true,
            value,
            stdout: String::new(),
            stderr: String::new(),
            traceback: String::new(),
            exception: None,
            duration: Duration::ZERO,
            finished_at: Utc::now(),
        }
    }

    /// Creates a failed result.
    pub fn failure(exception: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            success: false,
            value: Value::Null,
            stdout: String::new(),
            stderr: String::new(),
            traceback: traceback.into(),
            exception: Some(exception.into()),
            duration: Duration::ZERO,
            finished_at: Utc::now(),
        }
    }

    /// Result synthesized by the parent when the wall-clock limit expires.
    pub fn timeout(limit: Duration) -> Self {
        Self::failure(
            format!(
                "{}: execution exceeded {:.1}s and the process group was killed",
                TIMEOUT_EXCEPTION,
                limit.as_secs_f64()
            ),
            String::new(),
        )
    }

    /// Result synthesized by the parent when the child exits without posting.
    pub fn abnormal_exit(status: impl Into<String>) -> Self {
        let status = status.into();
        Self::failure(
            format!("{}: child exited without reporting a result ({})", ABNORMAL_EXIT_EXCEPTION, status),
            String::new(),
        )
    }

    /// Attaches captured output.
    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self.finished_at = Utc::now();
        self
    }

    /// Returns true when the attempt was killed by the timeout.
    pub fn is_timeout(&self) -> bool {
        self.exception
            .as_deref()
            .is_some_and(|e| e.starts_with(TIMEOUT_EXCEPTION))
    }

    /// Returns true when the child died without reporting.
    pub fn is_abnormal_exit(&self) -> bool {
        self.exception
            .as_deref()
            .is_some_and(|e| e.starts_with(ABNORMAL_EXIT_EXCEPTION))
    }

    /// Renders the failure evidence fed into repair prompts.
    pub fn diagnostic(&self) -> String {
        let mut out = String::new();
        if let Some(ref exception) = self.exception {
            out.push_str(&format!("Exception: {}\n", exception));
        }
        if !self.traceback.is_empty() {
            out.push_str(&format!("Traceback:\n{}\n", self.traceback.trim_end()));
        }
        if !self.stdout.trim().is_empty() {
            out.push_str(&format!("Stdout:\n{}\n", tail(&self.stdout).trim_end()));
        }
        if !self.stderr.trim().is_empty() {
            out.push_str(&format!("Stderr:\n{}\n", tail(&self.stderr).trim_end()));
        }
        if out.is_empty() {
            out.push_str("No output captured.\n");
        }
        out
    }

    /// Renders the captured-output log written next to each round's artifact.
    pub fn output_log(&self) -> String {
        format!(
            "success: {}\nduration_ms: {}\nexception: {}\n\n--- stdout ---\n{}\n--- stderr ---\n{}\n--- traceback ---\n{}\n--- value ---\n{}\n",
            self.success,
            self.duration.as_millis(),
            self.exception.as_deref().unwrap_or("-"),
            self.stdout,
            self.stderr,
            self.traceback,
            serde_json::to_string_pretty(&self.value).unwrap_or_default(),
        )
    }
}

fn tail(text: &str) -> String {
    if text.len() <= DIAGNOSTIC_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - DIAGNOSTIC_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[...]\n{}", &text[start..])
}
