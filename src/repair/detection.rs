//! Failure detection over sandbox results.
//!
//! A round fails when the sandbox reports failure, or when the captured
//! output contains an error marker even though execution returned normally.
//! Markers are literal substrings; a marker prefixed with `re:` is a regular
//! expression.

use regex::RegexSet;
use tracing::warn;

use crate::sandbox::SandboxResult;

/// Prefix selecting regex markers.
pub const REGEX_MARKER_PREFIX: &str = "re:";

/// Decides whether a sandbox result counts as a failed round.
#[derive(Debug, Clone)]
pub struct FailureDetector {
    markers: Vec<String>,
    set: RegexSet,
}

impl FailureDetector {
    /// Builds a detector. Invalid regex markers are treated as literals.
    pub fn new(markers: &[String]) -> Self {
        let patterns: Vec<String> = markers.iter().map(|m| marker_pattern(m)).collect();
        let set = RegexSet::new(&patterns).unwrap_or_else(|e| {
            warn!(error = %e, "Invalid error marker pattern, matching all markers literally");
            let literal: Vec<String> = markers.iter().map(|m| regex::escape(m)).collect();
            RegexSet::new(literal).unwrap_or_else(|_| RegexSet::empty())
        });
        Self {
            markers: markers.to_vec(),
            set,
        }
    }

    /// Returns the first marker found in `text`.
    pub fn find_marker(&self, text: &str) -> Option<&str> {
        self.set
            .matches(text)
            .iter()
            .next()
            .map(|i| self.markers[i].as_str())
    }

    /// Returns why `result` is a failure, or `None` when it succeeded.
    pub fn failure_reason(&self, result: &SandboxResult) -> Option<String> {
        if !result.success {
            return Some(
                result
                    .exception
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
            );
        }
        for stream in [&result.stdout, &result.stderr] {
            if let Some(marker) = self.find_marker(stream) {
                return Some(format!("ErrorMarker: output contains '{}'", marker));
            }
        }
        None
    }
}

fn marker_pattern(marker: &str) -> String {
    match marker.strip_prefix(REGEX_MARKER_PREFIX) {
        Some(pattern) if regex::Regex::new(pattern).is_ok() => pattern.to_string(),
        _ => regex::escape(marker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ERROR_MARKERS;
    use serde_json::json;

    fn detector() -> FailureDetector {
        let markers: Vec<String> = DEFAULT_ERROR_MARKERS.iter().map(|s| s.to_string()).collect();
        FailureDetector::new(&markers)
    }

    #[test]
    fn test_sandbox_failure_is_failure() {
        let result = SandboxResult::failure("ErrorRuntime: boom", "");
        assert_eq!(detector().failure_reason(&result).unwrap(), "ErrorRuntime: boom");
    }

    #[test]
    fn test_swallowed_error_is_failure() {
        let result = SandboxResult::success(json!(null))
            .with_output("Error: file missing\n".to_string(), String::new());
        let reason = detector().failure_reason(&result).unwrap();
        assert!(reason.contains("Error:"));
    }

    #[test]
    fn test_clean_success() {
        let result = SandboxResult::success(json!(1)).with_output("42\n".to_string(), String::new());
        assert!(detector().failure_reason(&result).is_none());
    }

    #[test]
    fn test_markers_are_case_sensitive() {
        let result = SandboxResult::success(json!(1))
            .with_output("no error: all good".to_string(), String::new());
        assert!(detector().failure_reason(&result).is_none());
    }

    #[test]
    fn test_regex_marker() {
        let detector = FailureDetector::new(&["re:exit code [1-9]".to_string()]);
        assert!(detector.find_marker("child exit code 3").is_some());
        assert!(detector.find_marker("child exit code 0").is_none());
    }

    #[test]
    fn test_literal_marker_with_metacharacters() {
        let detector = FailureDetector::new(&["panicked at (".to_string()]);
        assert!(detector.find_marker("thread panicked at (src/x.rs)").is_some());
    }
}
