//! Serializable descriptions of sandboxed work.
//!
//! A child process never receives live objects from the orchestrator. It is
//! handed a [`TaskDescriptor`] file naming generated source and a plain JSON
//! argument payload, and interprets that from scratch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A self-contained unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkUnit {
    /// Call `entry` in a generated script with JSON arguments.
    Script {
        /// Path to the script artifact.
        source: PathBuf,
        /// Function to call.
        entry: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Run an external program (for instance `sh pipeline.sh`).
    Command {
        /// Program to execute.
        program: String,
        /// Program arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory.
        #[serde(default)]
        cwd: Option<PathBuf>,
        /// Artifact the program interprets, when there is one to repair.
        #[serde(default)]
        source: Option<PathBuf>,
    },
}

impl WorkUnit {
    /// Creates a script unit.
    pub fn script(source: impl Into<PathBuf>, entry: impl Into<String>, args: Vec<Value>) -> Self {
        WorkUnit::Script {
            source: source.into(),
            entry: entry.into(),
            args,
        }
    }

    /// Creates a command unit.
    pub fn command(program: impl Into<String>, args: Vec<String>) -> Self {
        WorkUnit::Command {
            program: program.into(),
            args,
            cwd: None,
            source: None,
        }
    }

    /// Sets the working directory of a command unit.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let WorkUnit::Command { ref mut cwd, .. } = self {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Sets the artifact a command unit interprets.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        if let WorkUnit::Command { ref mut source, .. } = self {
            *source = Some(path.into());
        }
        self
    }

    /// Returns the artifact this unit executes, if known.
    pub fn source(&self) -> Option<&Path> {
        match self {
            WorkUnit::Script { source, .. } => Some(source),
            WorkUnit::Command { source, .. } => source.as_deref(),
        }
    }

    /// Short human-readable label for logs.
    pub fn label(&self) -> String {
        match self {
            WorkUnit::Script { source, entry, .. } => {
                format!("{}::{}", source.display(), entry)
            }
            WorkUnit::Command { program, args, .. } => {
                let mut label = program.clone();
                for arg in args {
                    label.push(' ');
                    label.push_str(arg);
                }
                label
            }
        }
    }
}

/// File handed to a sandbox child: the work plus where to post the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Work to perform.
    pub unit: WorkUnit,
    /// Single-slot result channel. Written at most once.
    pub result_path: PathBuf,
}
