//! Tasks and the functions they request.
//!
//! A task's parameter map starts out with placeholders naming functions that
//! do not exist yet. As the repair loop produces working artifacts, the
//! loader swaps each placeholder for a bound callable.

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::loader::ScriptFunction;

/// Prefix that marks a string parameter as a function placeholder.
pub const PLACEHOLDER_PREFIX: &str = "@fn:";

/// Value of one task parameter.
#[derive(Clone)]
pub enum ParamValue {
    /// Plain resolved value.
    Value(Value),
    /// Generated function bound into the task.
    Callable(ScriptFunction),
    /// Function that still has to be generated.
    Placeholder(String),
}

impl ParamValue {
    /// Creates a placeholder for `function`.
    pub fn placeholder(function: impl Into<String>) -> Self {
        ParamValue::Placeholder(function.into())
    }

    /// Interprets a raw parameter value. Strings starting with `@fn:` become
    /// placeholders.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(ref s) if s.starts_with(PLACEHOLDER_PREFIX) => {
                ParamValue::Placeholder(s[PLACEHOLDER_PREFIX.len()..].trim().to_string())
            }
            other => ParamValue::Value(other),
        }
    }

    /// Returns true when the parameter still needs a generated function.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, ParamValue::Placeholder(_))
    }

    /// JSON view used in prompts and templates.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Value(v) => v.clone(),
            ParamValue::Callable(f) => Value::String(format!("<callable {}>", f)),
            ParamValue::Placeholder(name) => Value::String(format!("<unresolved {}>", name)),
        }
    }
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Value(v) => write!(f, "Value({})", v),
            ParamValue::Callable(func) => write!(f, "Callable({})", func),
            ParamValue::Placeholder(name) => write!(f, "Placeholder({})", name),
        }
    }
}

/// Declaration of a function a task needs generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name, unique per run.
    pub name: String,
    /// What the function should do.
    #[serde(default)]
    pub description: String,
    /// Parameter names.
    #[serde(default)]
    pub params: Vec<String>,
    /// Description of the return value.
    #[serde(default)]
    pub returns: String,
    /// Arguments used to exercise the function in the sandbox.
    #[serde(default)]
    pub sample_args: Vec<Value>,
}

impl FunctionSpec {
    /// Creates a function declaration.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            returns: String::new(),
            sample_args: Vec::new(),
        }
    }

    /// Sets the parameter names.
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the return description.
    pub fn with_returns(mut self, returns: impl Into<String>) -> Self {
        self.returns = returns.into();
        self
    }

    /// Sets the sample arguments.
    pub fn with_sample_args(mut self, args: Vec<Value>) -> Self {
        self.sample_args = args;
        self
    }

    /// One-line signature, e.g. `clean(text) -> string`.
    pub fn signature(&self) -> String {
        let mut sig = format!("{}({})", self.name, self.params.join(", "));
        if !self.returns.is_empty() {
            sig.push_str(" -> ");
            sig.push_str(&self.returns);
        }
        sig
    }
}

/// Serialized form of a task.
#[derive(Debug, Clone, Deserialize)]
struct TaskDef {
    name: String,
    #[serde(default)]
    templates: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    params: IndexMap<String, Value>,
    #[serde(default)]
    functions: Vec<FunctionSpec>,
}

/// One unit of a pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "TaskDef")]
pub struct Task {
    /// Task name.
    pub name: String,
    /// Prompt templates (tera syntax).
    pub templates: Vec<String>,
    /// Names of tasks whose outputs this task consumes.
    pub depends_on: Vec<String>,
    /// Parameters, in declaration order.
    pub params: IndexMap<String, ParamValue>,
    /// Functions this task asks for.
    pub functions: Vec<FunctionSpec>,
    /// Value produced by the most recent successful execution.
    pub last_result: Option<Value>,
}

impl From<TaskDef> for Task {
    fn from(def: TaskDef) -> Self {
        Self {
            name: def.name,
            templates: def.templates,
            depends_on: def.depends_on,
            params: def
                .params
                .into_iter()
                .map(|(k, v)| (k, ParamValue::from_json(v)))
                .collect(),
            functions: def.functions,
            last_result: None,
        }
    }
}

impl Task {
    /// Creates an empty task.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            templates: Vec::new(),
            depends_on: Vec::new(),
            params: IndexMap::new(),
            functions: Vec::new(),
            last_result: None,
        }
    }

    /// Adds a prompt template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.templates.push(template.into());
        self
    }

    /// Adds a dependency.
    pub fn with_dependency(mut self, task: impl Into<String>) -> Self {
        self.depends_on.push(task.into());
        self
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Declares a function.
    pub fn with_function(mut self, spec: FunctionSpec) -> Self {
        self.functions.push(spec);
        self
    }

    /// Function names still referenced by placeholders, deduplicated, in
    /// parameter order.
    pub fn unresolved_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for value in self.params.values() {
            if let ParamValue::Placeholder(name) = value {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Looks up a declared function.
    pub fn function(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Replaces every placeholder for `function` with `value`. Returns the
    /// number of parameters replaced.
    pub fn resolve(&mut self, function: &str, value: ParamValue) -> usize {
        let mut replaced = 0;
        for slot in self.params.values_mut() {
            if matches!(slot, ParamValue::Placeholder(name) if name == function) {
                *slot = value.clone();
                replaced += 1;
            }
        }
        replaced
    }

    /// Parameters as JSON, for templates and prompts.
    pub fn params_json(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

/// A pipeline definition: tasks in declaration order.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDef {
    /// Session id used for dependency outputs. Generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Tasks.
    pub tasks: Vec<Task>,
}

impl PipelineDef {
    /// Reads a YAML or JSON pipeline file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let def = if is_json {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };
        Ok(def)
    }
}
