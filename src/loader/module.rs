//! Binding generated artifacts as callables.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::runtime::{bounded_engine, dynamic_to_json, exception_summary, json_to_dynamic};
use crate::error::LoadError;
use crate::pipeline::{ParamValue, Task};
use crate::utils::{sanitize_identifier, short_hash};

/// A function from a loaded artifact, callable in-process.
#[derive(Clone)]
pub struct ScriptFunction {
    namespace: String,
    symbol: String,
    params: Vec<String>,
    path: PathBuf,
    ast: Arc<AST>,
    engine: Arc<Engine>,
}

impl ScriptFunction {
    /// Namespace the artifact was loaded under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the bound function.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Declared parameter names.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Artifact the function was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Calls the function with JSON arguments.
    ///
    /// Runs under the loader's operation budget, so a runaway loop ends in
    /// an error instead of hanging the caller.
    pub fn call(&self, args: &[Value]) -> Result<Value, LoadError> {
        let args = args
            .iter()
            .map(json_to_dynamic)
            .collect::<Result<Vec<Dynamic>, _>>()?;

        let out = self
            .engine
            .call_fn::<Dynamic>(&mut Scope::new(), &self.ast, &self.symbol, args)
            .map_err(|e| LoadError::Call {
                namespace: self.namespace.clone(),
                symbol: self.symbol.clone(),
                message: exception_summary(&e),
            })?;

        dynamic_to_json(&out)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("namespace", &self.namespace)
            .field("symbol", &self.symbol)
            .field("params", &self.params)
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}({})", self.namespace, self.symbol, self.params.join(", "))
    }
}

/// Loads artifacts into per-(task, function) namespaces.
pub struct DynamicModuleLoader {
    engine: Arc<Engine>,
    modules: HashMap<String, Arc<AST>>,
}

impl DynamicModuleLoader {
    /// Creates a loader with a bounded script engine.
    pub fn new() -> Self {
        Self {
            engine: Arc::new(bounded_engine()),
            modules: HashMap::new(),
        }
    }

    /// Namespace for a task/function pair, suffixed with a hash of the raw pair.
    pub fn namespace_for(task: &str, function: &str) -> String {
        format!(
            "{}__{}__{}",
            sanitize_identifier(task),
            sanitize_identifier(function),
            short_hash(&[task, function])
        )
    }

    /// Loads `path` and extracts `symbol`.
    ///
    /// Reloading the same namespace replaces the previous module.
    pub fn load(&mut self, path: &Path, task: &str, symbol: &str) -> Result<ScriptFunction, LoadError> {
        let namespace = Self::namespace_for(task, symbol);

        let code = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut ast = self.engine.compile(&code).map_err(|e| LoadError::Compile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        ast.set_source(namespace.as_str());

        let params = ast
            .iter_functions()
            .find(|f| f.name == symbol)
            .map(|f| f.params.iter().map(|p| p.to_string()).collect::<Vec<_>>())
            .ok_or_else(|| LoadError::SymbolNotFound {
                namespace: namespace.clone(),
                symbol: symbol.to_string(),
            })?;

        let ast = Arc::new(ast);
        self.modules.insert(namespace.clone(), ast.clone());
        debug!(namespace = %namespace, symbol, path = %path.display(), "Loaded artifact");

        Ok(ScriptFunction {
            namespace,
            symbol: symbol.to_string(),
            params,
            path: path.to_path_buf(),
            ast,
            engine: self.engine.clone(),
        })
    }

    /// Loads `path` and substitutes the callable for `function`'s
    /// placeholders in `task`.
    ///
    /// Failure is soft: it is logged and the placeholders stay unresolved.
    /// Returns whether the binding happened.
    pub fn bind(&mut self, task: &mut Task, function: &str, path: &Path) -> bool {
        match self.load(path, &task.name, function) {
            Ok(callable) => {
                let replaced = task.resolve(function, ParamValue::Callable(callable));
                info!(task = %task.name, function, replaced, "Bound generated function");
                true
            }
            Err(e) => {
                warn!(
                    task = %task.name,
                    function,
                    path = %path.display(),
                    error = %e,
                    "Failed to bind generated function, leaving placeholder unresolved"
                );
                false
            }
        }
    }

    /// Returns whether `namespace` has been loaded.
    pub fn is_loaded(&self, namespace: &str) -> bool {
        self.modules.contains_key(namespace)
    }

    /// Number of loaded namespaces.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true when nothing has been loaded.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for DynamicModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn artifact(dir: &TempDir, name: &str, code: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, code).unwrap();
        path
    }

    #[test]
    fn test_namespace_is_sanitized() {
        let namespace = DynamicModuleLoader::namespace_for("clean text", "strip-html");
        assert!(namespace.starts_with("clean_text__strip_html__"));
        assert_eq!(namespace, DynamicModuleLoader::namespace_for("clean text", "strip-html"));
    }

    #[test]
    fn test_pairs_that_sanitize_alike_get_separate_namespaces() {
        assert_ne!(
            DynamicModuleLoader::namespace_for("clean text", "f"),
            DynamicModuleLoader::namespace_for("clean-text", "f")
        );
        assert_ne!(
            DynamicModuleLoader::namespace_for("a__b", "c"),
            DynamicModuleLoader::namespace_for("a", "b__c")
        );

        let dir = TempDir::new().unwrap();
        let one = artifact(&dir, "one.rhai", "fn f() { 1 }");
        let two = artifact(&dir, "two.rhai", "fn f() { 2 }");
        let mut loader = DynamicModuleLoader::new();
        let a = loader.load(&one, "clean text", "f").unwrap();
        let b = loader.load(&two, "clean-text", "f").unwrap();

        assert_eq!(loader.len(), 2);
        assert_eq!(a.call(&[]).unwrap(), json!(1));
        assert_eq!(b.call(&[]).unwrap(), json!(2));
    }

    #[test]
    fn test_load_and_call() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, "a.rhai", "fn shout(s) { s.to_upper() }");
        let mut loader = DynamicModuleLoader::new();

        let f = loader.load(&path, "task", "shout").unwrap();
        assert_eq!(f.params(), ["s".to_string()]);
        assert_eq!(f.call(&[json!("hi")]).unwrap(), json!("HI"));
        assert!(loader.is_loaded(&DynamicModuleLoader::namespace_for("task", "shout")));
    }

    #[test]
    fn test_same_symbol_in_two_tasks_does_not_collide() {
        let dir = TempDir::new().unwrap();
        let one = artifact(&dir, "one.rhai", "fn score(x) { x + 1 }");
        let two = artifact(&dir, "two.rhai", "fn score(x) { x * 10 }");
        let mut loader = DynamicModuleLoader::new();

        let a = loader.load(&one, "first", "score").unwrap();
        let b = loader.load(&two, "second", "score").unwrap();

        assert_eq!(loader.len(), 2);
        assert_eq!(a.call(&[json!(2)]).unwrap(), json!(3));
        assert_eq!(b.call(&[json!(2)]).unwrap(), json!(20));
    }

    #[test]
    fn test_missing_symbol() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, "a.rhai", "fn other() { 1 }");
        let err = DynamicModuleLoader::new().load(&path, "t", "wanted").unwrap_err();
        assert!(matches!(err, LoadError::SymbolNotFound { .. }));
    }

    #[test]
    fn test_call_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, "a.rhai", "fn fail() { throw \"nope\"; }");
        let f = DynamicModuleLoader::new().load(&path, "t", "fail").unwrap();
        let err = f.call(&[]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_bind_failure_leaves_placeholder() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, "bad.rhai", "fn broken( {");
        let mut task = Task::new("t").with_param("cleaner", ParamValue::placeholder("broken"));

        assert!(!DynamicModuleLoader::new().bind(&mut task, "broken", &path));
        assert!(matches!(task.params["cleaner"], ParamValue::Placeholder(_)));
    }

    #[test]
    fn test_bind_substitutes_placeholder() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, "ok.rhai", "fn clean(s) { s.trim(); s }");
        let mut task = Task::new("t")
            .with_param("cleaner", ParamValue::placeholder("clean"))
            .with_param("limit", ParamValue::Value(json!(3)));

        assert!(DynamicModuleLoader::new().bind(&mut task, "clean", &path));
        match &task.params["cleaner"] {
            ParamValue::Callable(f) => assert_eq!(f.call(&[json!("  x ")]).unwrap(), json!("x")),
            other => panic!("expected callable, got {:?}", other),
        }
        assert!(matches!(task.params["limit"], ParamValue::Value(_)));
    }
}
