//! Context handed to the synthesizer for one requested function.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tera::Tera;
use tracing::debug;

use super::session::{output_key, SessionStore};
use super::task::{FunctionSpec, Task};
use crate::error::RepairError;

/// Everything the synthesizer knows about the function it is writing.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Owning task.
    pub task: String,
    /// Function declaration.
    pub function: Option<FunctionSpec>,
    /// Task templates rendered against the task state.
    pub rendered_prompt: String,
    /// Outputs of dependency functions, keyed `"{task}+{function}"`.
    pub dependency_outputs: IndexMap<String, Value>,
    /// Signatures of the other functions the task requests.
    pub sibling_signatures: Vec<String>,
}

impl TaskContext {
    /// Whether any dependency output is available.
    pub fn has_dependencies(&self) -> bool {
        !self.dependency_outputs.is_empty()
    }
}

/// Supplies templates and dependency outputs for synthesis.
#[async_trait]
pub trait TaskContextProvider: Send + Sync {
    /// Builds the context for `function` in `task`. `dependencies` are the
    /// tasks named in `task.depends_on`.
    async fn provide(
        &self,
        task: &Task,
        function: &FunctionSpec,
        dependencies: &[&Task],
    ) -> Result<TaskContext, RepairError>;
}

/// Context provider backed by a [`SessionStore`].
pub struct StoreContextProvider {
    store: Arc<dyn SessionStore>,
    session_id: String,
}

impl StoreContextProvider {
    /// Creates a provider reading from `session_id` in `store`.
    pub fn new(store: Arc<dyn SessionStore>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl TaskContextProvider for StoreContextProvider {
    async fn provide(
        &self,
        task: &Task,
        function: &FunctionSpec,
        dependencies: &[&Task],
    ) -> Result<TaskContext, RepairError> {
        let mut dependency_outputs = IndexMap::new();
        for dep in dependencies {
            for spec in &dep.functions {
                let key = output_key(&dep.name, &spec.name);
                if let Some(value) = self.store.get(&self.session_id, &key).await? {
                    dependency_outputs.insert(key, value);
                }
            }
        }

        let sibling_signatures = task
            .functions
            .iter()
            .filter(|f| f.name != function.name)
            .map(FunctionSpec::signature)
            .collect();

        let rendered_prompt = render_templates(task, function, &dependency_outputs)?;
        debug!(
            task = %task.name,
            function = %function.name,
            dependency_outputs = dependency_outputs.len(),
            "Built task context"
        );

        Ok(TaskContext {
            task: task.name.clone(),
            function: Some(function.clone()),
            rendered_prompt,
            dependency_outputs,
            sibling_signatures,
        })
    }
}

/// Renders every task template with tera and joins them with blank lines.
///
/// Templates see `task`, `function`, `params` and `deps` (the dependency
/// outputs; keys contain `+`, so use `deps["load+parse"]`).
pub fn render_templates(
    task: &Task,
    function: &FunctionSpec,
    dependency_outputs: &IndexMap<String, Value>,
) -> Result<String, tera::Error> {
    let mut ctx = tera::Context::new();
    ctx.insert("task", &task.name);
    ctx.insert("function", function);
    ctx.insert("params", &task.params_json());
    ctx.insert("deps", dependency_outputs);

    let mut parts = Vec::with_capacity(task.templates.len());
    for template in &task.templates {
        parts.push(Tera::one_off(template, &ctx, false)?);
    }
    Ok(parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::session::InMemorySessionStore;
    use crate::pipeline::task::ParamValue;
    use serde_json::json;

    #[test]
    fn test_render_templates() {
        let task = Task::new("clean")
            .with_template("Task {{ task }} writes {{ function.name }}.")
            .with_template("Column: {{ params.column }}, rows: {{ deps[\"load+parse\"] | length }}")
            .with_param("column", ParamValue::Value(json!("body")));
        let spec = FunctionSpec::new("strip", "strip tags");
        let mut deps = IndexMap::new();
        deps.insert("load+parse".to_string(), json!([1, 2, 3]));

        let out = render_templates(&task, &spec, &deps).unwrap();
        assert_eq!(out, "Task clean writes strip.\n\nColumn: body, rows: 3");
    }

    #[test]
    fn test_bad_template_is_error() {
        let task = Task::new("t").with_template("{{ unclosed");
        let spec = FunctionSpec::new("f", "");
        assert!(render_templates(&task, &spec, &IndexMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_provider_fetches_dependency_outputs() {
        let store = Arc::new(InMemorySessionStore::new());
        store.set("run", "load+parse", &json!({"rows": 2})).await.unwrap();

        let load = Task::new("load").with_function(FunctionSpec::new("parse", ""));
        let clean = Task::new("clean")
            .with_dependency("load")
            .with_function(FunctionSpec::new("strip", "").with_params(["text"]))
            .with_function(FunctionSpec::new("score", "").with_params(["text"]).with_returns("float"));

        let provider = StoreContextProvider::new(store, "run");
        let spec = clean.function("strip").unwrap().clone();
        let ctx = provider.provide(&clean, &spec, &[&load]).await.unwrap();

        assert!(ctx.has_dependencies());
        assert_eq!(ctx.dependency_outputs["load+parse"], json!({"rows": 2}));
        assert_eq!(ctx.sibling_signatures, vec!["score(text) -> float"]);
    }
}
