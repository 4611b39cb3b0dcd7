//! Run-scoped registry of synthesized functions.

use std::collections::BTreeSet;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::pipeline::FunctionSpec;
use crate::sandbox::SandboxResult;

/// Generation and execution history of one function.
#[derive(Debug, Clone)]
pub struct FunctionPoolEntry {
    /// Function name, unique per run.
    pub name: String,
    /// Declared purpose.
    pub description: String,
    /// Declared parameter names.
    pub params: Vec<String>,
    /// Declared return shape.
    pub returns: String,
    /// Current source.
    pub code: String,
    /// Every artifact written for this function, oldest first.
    pub artifact_paths: Vec<PathBuf>,
    /// Whether the latest execution succeeded.
    pub success: bool,
    /// Outcome of the latest execution.
    pub last_result: Option<SandboxResult>,
    /// Tasks that use this function.
    pub consumers: BTreeSet<String>,
}

impl FunctionPoolEntry {
    /// Creates an entry from a declaration.
    pub fn from_spec(spec: &FunctionSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            params: spec.params.clone(),
            returns: spec.returns.clone(),
            code: String::new(),
            artifact_paths: Vec::new(),
            success: false,
            last_result: None,
            consumers: BTreeSet::new(),
        }
    }

    /// Path of the live artifact, if one has been written.
    pub fn current_artifact(&self) -> Option<&PathBuf> {
        self.artifact_paths.last()
    }
}

/// Function pool keyed by function name.
#[derive(Debug, Clone, Default)]
pub struct FunctionPool {
    entries: IndexMap<String, FunctionPoolEntry>,
}

impl FunctionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `spec.name`, creating it on first request.
    pub fn entry(&mut self, spec: &FunctionSpec) -> &mut FunctionPoolEntry {
        self.entries
            .entry(spec.name.clone())
            .or_insert_with(|| FunctionPoolEntry::from_spec(spec))
    }

    /// Looks up an entry.
    pub fn get(&self, name: &str) -> Option<&FunctionPoolEntry> {
        self.entries.get(name)
    }

    /// Looks up an entry mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut FunctionPoolEntry> {
        self.entries.get_mut(name)
    }

    /// Returns true when `name` exists and has succeeded.
    pub fn is_ready(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.success)
    }

    /// Entries in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionPoolEntry> {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
