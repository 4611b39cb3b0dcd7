//! Error types for codeforge operations.
//!
//! Defines error types for every subsystem of the engine:
//! - LLM API interactions
//! - Code synthesis and response parsing
//! - Sandbox setup (execution failures are data, see `SandboxResult`)
//! - Dynamic loading of generated artifacts
//! - Graph sequencing
//! - Repair loop exhaustion
//! - Configuration and session storage

use std::path::PathBuf;

use thiserror::Error;

use crate::repair::DebugHistoryEntry;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while synthesizing or repairing code.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// No syntactically valid JSON object could be found in the model reply.
    #[error("SynthesisParseError: no JSON object found in response starting with '{preview}'")]
    Parse { preview: String },

    /// A JSON object was found but it has no usable `code` field.
    #[error("SynthesisParseError: response object has no string 'code' field (keys: {keys})")]
    MissingCode { keys: String },

    /// The model returned an empty reply.
    #[error("Empty LLM response")]
    EmptyResponse,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl SynthesisError {
    /// Returns true for errors caused by an unparseable model reply.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            SynthesisError::Parse { .. } | SynthesisError::MissingCode { .. }
        )
    }
}

/// Errors raised while preparing a sandboxed execution.
///
/// These only cover the parent side (creating directories, writing the task
/// descriptor). Anything that goes wrong inside the child is reported through
/// `SandboxResult` instead.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Invalid task descriptor: {0}")]
    Descriptor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur when binding a generated artifact as a callable.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read artifact '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact '{path}' does not compile: {message}")]
    Compile { path: PathBuf, message: String },

    #[error("Symbol '{symbol}' not found in namespace '{namespace}'")]
    SymbolNotFound { namespace: String, symbol: String },

    #[error("Call to '{namespace}::{symbol}' failed: {message}")]
    Call {
        namespace: String,
        symbol: String,
        message: String,
    },

    #[error("Value conversion failed: {0}")]
    Conversion(String),
}

/// Errors that can occur while ordering a node/edge graph.
#[derive(Debug, Error)]
pub enum SequencingError {
    #[error("dependency cycle detected involving: {}", .members.join(", "))]
    Cycle { members: Vec<String> },

    #[error("edge {source_id} -> {target_id} references unknown node '{missing}'")]
    DanglingEdge {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("Failed to write script '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that end a repair loop or a whole batch.
#[derive(Debug, Error)]
pub enum RepairError {
    /// The round budget was consumed without a successful execution.
    #[error("RepairExhausted: '{function}' for task '{task}' failed after {rounds} rounds")]
    Exhausted {
        task: String,
        function: String,
        rounds: u32,
        history: Vec<DebugHistoryEntry>,
    },

    #[error("Function '{function}' requested by task '{task}' has no declaration")]
    UndeclaredFunction { task: String, function: String },

    #[error("Sequencing error: {0}")]
    Sequencing(#[from] SequencingError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Template rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the key-value session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
