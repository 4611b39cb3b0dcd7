//! Sandboxed execution of generated code.
//!
//! This module provides:
//! - `WorkUnit` / `TaskDescriptor`: serializable descriptions of work
//! - `SandboxRunner`: one isolated child process per attempt, with timeout
//!   and process-tree kill
//! - `SandboxResult`: the outcome, produced exactly once per attempt
//! - `child`: the interpreter side of script work units
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use codeforge::sandbox::{SandboxConfig, SandboxRunner, WorkUnit};
//!
//! let runner = SandboxRunner::new(SandboxConfig::new().with_timeout(Duration::from_secs(5)));
//! let unit = WorkUnit::script("clean.rhai", "clean", vec![serde_json::json!("  x ")]);
//! let result = runner.run(&unit).await;
//! println!("success={} value={}", result.success, result.value);
//! ```

pub mod child;
pub mod process_tree;
pub mod result;
pub mod runner;
pub mod work;

pub use result::{SandboxResult, ABNORMAL_EXIT_EXCEPTION, TIMEOUT_EXCEPTION};
pub use runner::{SandboxConfig, SandboxRunner, CHILD_SUBCOMMAND, MAX_CAPTURE_BYTES, RESULT_PATH_ENV};
pub use work::{TaskDescriptor, WorkUnit};
