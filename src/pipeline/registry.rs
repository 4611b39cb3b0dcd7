//! Operator signatures consumed by the script generator.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Accepted parameters of one operator, with defaults.
///
/// A `null` default marks a parameter without a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSignature {
    /// Operator name.
    pub name: String,
    /// Constructor parameters and defaults.
    #[serde(default)]
    pub init_params: IndexMap<String, Value>,
    /// Invocation parameters and defaults.
    #[serde(default)]
    pub run_params: IndexMap<String, Value>,
}

impl OperatorSignature {
    /// Creates a signature with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init_params: IndexMap::new(),
            run_params: IndexMap::new(),
        }
    }

    /// Adds an init parameter.
    pub fn with_init_param(mut self, key: impl Into<String>, default: Value) -> Self {
        self.init_params.insert(key.into(), default);
        self
    }

    /// Adds a run parameter.
    pub fn with_run_param(mut self, key: impl Into<String>, default: Value) -> Self {
        self.run_params.insert(key.into(), default);
        self
    }
}

/// Lookup of operator signatures by name.
pub trait OperatorRegistry: Send + Sync {
    /// Returns the signature of `name`, if registered.
    fn signature(&self, name: &str) -> Option<&OperatorSignature>;
}

/// Registry held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOperatorRegistry {
    operators: IndexMap<String, OperatorSignature>,
}

impl InMemoryOperatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a signature.
    pub fn register(&mut self, signature: OperatorSignature) {
        self.operators.insert(signature.name.clone(), signature);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, signature: OperatorSignature) -> Self {
        self.register(signature);
        self
    }

    /// Reads a YAML or JSON list of signatures.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let signatures: Vec<OperatorSignature> = if is_json {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };

        let mut registry = Self::new();
        for signature in signatures {
            registry.register(signature);
        }
        Ok(registry)
    }

    /// Number of registered operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Returns true when no operator is registered.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl OperatorRegistry for InMemoryOperatorRegistry {
    fn signature(&self, name: &str) -> Option<&OperatorSignature> {
        self.operators.get(name)
    }
}
