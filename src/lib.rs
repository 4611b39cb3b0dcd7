//! codeforge: self-healing code generation and execution.
//!
//! An LLM writes the functions a pipeline of tasks asks for. Each function is
//! executed in an isolated child process; failures are diagnosed from the
//! captured evidence and fed back for repair until the code runs or the
//! round budget is spent. Successful functions are bound back into the
//! requesting tasks as callables.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod repair;
pub mod sandbox;
pub mod synthesis;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{
    ConfigError, LlmError, LoadError, RepairError, SandboxError, SequencingError, StoreError,
    SynthesisError,
};
pub use repair::{BatchReport, RepairOrchestrator, ToolCall};
