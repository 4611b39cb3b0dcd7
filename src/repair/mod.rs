//! Self-healing execution.
//!
//! The [`RepairOrchestrator`] drives generated functions and tool calls
//! through bounded generate/execute/diagnose/repair rounds. Supporting
//! pieces live in their own modules:
//!
//! - `artifacts`: on-disk layout of a run (sources, backups, round logs)
//! - `detection`: failure classification including output markers
//! - `history`: the debug ledger fed back into repair prompts
//! - `pool`: functions generated in this run, shared across tasks
//! - `validate`: syntax gate applied to repair patches

pub mod artifacts;
mod detection;
mod history;
mod orchestrator;
mod pool;
mod validate;

pub use artifacts::{backup_path, ArtifactStore};
pub use detection::{FailureDetector, REGEX_MARKER_PREFIX};
pub use history::{DebugHistoryEntry, DebugLedger};
pub use orchestrator::{BatchReport, FunctionReport, RepairOrchestrator, ToolCall, ARTIFACT_EXTENSION};
pub use pool::{FunctionPool, FunctionPoolEntry};
pub use validate::{check_syntax, language_for};
