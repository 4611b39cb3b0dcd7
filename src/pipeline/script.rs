//! Script generation from an ordered pipeline.
//!
//! Two output formats are supported:
//! - Rhai program: `fn main(llm_serving, storage)` plus a trailing entry call
//! - POSIX shell: `set -eu`, written with mode 0755
//!
//! Each format emits one initialization statement per node, then one
//! invocation per node in order, threading the storage handle forward. The
//! LLM-serving handle is passed by reference, never as a literal.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{info, warn};

use super::registry::OperatorRegistry;
use super::sequencer::PipelineNode;
use crate::error::SequencingError;
use crate::utils::sanitize_identifier;

/// Parameter name of the shared LLM-serving handle.
pub const SHARED_RESOURCE: &str = "llm_serving";

/// Output format of a generated script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    /// Rhai program with a `main` entry.
    Rhai,
    /// POSIX shell script.
    Shell,
}

impl ScriptFormat {
    /// Picks the format from a file extension (`.sh` is shell, anything
    /// else Rhai).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("sh") => ScriptFormat::Shell,
            _ => ScriptFormat::Rhai,
        }
    }
}

/// Parameters of one node after merging with its operator signature.
struct ResolvedNode<'a> {
    node: &'a PipelineNode,
    var: String,
    init: IndexMap<String, Value>,
    run: IndexMap<String, Value>,
    uses_shared: bool,
}

/// Renders ordered nodes into an executable script.
pub struct ScriptGenerator<'a> {
    registry: &'a dyn OperatorRegistry,
}

impl<'a> ScriptGenerator<'a> {
    /// Creates a generator using `registry` for parameter names and defaults.
    pub fn new(registry: &'a dyn OperatorRegistry) -> Self {
        Self { registry }
    }

    /// Renders the script text for nodes already in execution order.
    pub fn generate(&self, ordered: &[PipelineNode], format: ScriptFormat) -> String {
        let mut taken = HashSet::new();
        let resolved: Vec<ResolvedNode<'_>> = ordered
            .iter()
            .map(|n| self.resolve(n, &mut taken))
            .collect();
        match format {
            ScriptFormat::Rhai => render_rhai(&resolved),
            ScriptFormat::Shell => render_shell(&resolved),
        }
    }

    /// Writes the script to `path`, choosing the format from the extension.
    pub fn write(&self, ordered: &[PipelineNode], path: &Path) -> Result<ScriptFormat, SequencingError> {
        let format = ScriptFormat::from_path(path);
        let text = self.generate(ordered, format);
        let write_err = |source| SequencingError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, text).map_err(write_err)?;
        if format == ScriptFormat::Shell {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(write_err)?;
        }

        info!(path = %path.display(), nodes = ordered.len(), format = ?format, "Wrote pipeline script");
        Ok(format)
    }

    fn resolve<'n>(&self, node: &'n PipelineNode, taken: &mut HashSet<String>) -> ResolvedNode<'n> {
        let var = unique_var(&node.id, taken);

        let (init, run) = match self.registry.signature(&node.name) {
            Some(sig) => (
                merge_params(node, "init", &sig.init_params, &node.init_params),
                merge_params(node, "run", &sig.run_params, &node.run_params),
            ),
            None => {
                warn!(node = %node.id, operator = %node.name, "Operator not registered, using node parameters as given");
                (node.init_params.clone(), node.run_params.clone())
            }
        };

        let uses_shared = init.contains_key(SHARED_RESOURCE);
        ResolvedNode {
            node,
            var,
            init,
            run,
            uses_shared,
        }
    }
}

/// Script variable for a node id. Ids that normalize to the same name get
/// a numeric suffix so every node keeps its own variable.
fn unique_var(id: &str, taken: &mut HashSet<String>) -> String {
    let base = format!("op_{}", sanitize_identifier(id).to_lowercase());
    let mut var = base.clone();
    let mut n = 2;
    while taken.contains(&var) {
        var = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(var.clone());
    var
}

/// Accepted parameters in signature order, node values overriding defaults.
/// Parameters without a default or value are left out.
fn merge_params(
    node: &PipelineNode,
    kind: &str,
    accepted: &IndexMap<String, Value>,
    given: &IndexMap<String, Value>,
) -> IndexMap<String, Value> {
    for key in given.keys() {
        if !accepted.contains_key(key) {
            warn!(node = %node.id, operator = %node.name, param = %key, kind, "Dropping unknown parameter");
        }
    }

    let mut merged = IndexMap::new();
    for (key, default) in accepted {
        if key == SHARED_RESOURCE {
            merged.insert(key.clone(), Value::Null);
            continue;
        }
        match given.get(key).unwrap_or(default) {
            Value::Null => {}
            value => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

fn render_rhai(nodes: &[ResolvedNode<'_>]) -> String {
    let mut out = String::new();
    out.push_str("// Generated by codeforge. Do not edit.\n");
    out.push_str("// The host registers `operator(name, params)` and\n");
    out.push_str("// `run_operator(op, storage, params)`.\n\n");
    let _ = writeln!(out, "fn main({}, storage) {{", SHARED_RESOURCE);

    for n in nodes {
        let _ = writeln!(
            out,
            "    let {} = operator({}, {});",
            n.var,
            rhai_literal(&Value::String(n.node.name.clone())),
            rhai_map(&n.init, true)
        );
    }
    if !nodes.is_empty() {
        out.push('\n');
    }
    for n in nodes {
        let _ = writeln!(
            out,
            "    storage = run_operator({}, storage, {});",
            n.var,
            rhai_map(&n.run, false)
        );
    }
    out.push_str("    storage\n}\n\n");
    let _ = writeln!(out, "main({}, storage)", SHARED_RESOURCE);
    out
}

fn rhai_map(params: &IndexMap<String, Value>, inject_shared: bool) -> String {
    if params.is_empty() {
        return "#{}".to_string();
    }
    let entries: Vec<String> = params
        .iter()
        .map(|(k, v)| {
            let value = if inject_shared && k == SHARED_RESOURCE {
                SHARED_RESOURCE.to_string()
            } else {
                rhai_literal(v)
            };
            format!("{}: {}", rhai_literal(&Value::String(k.clone())), value)
        })
        .collect();
    format!("#{{ {} }}", entries.join(", "))
}

/// Renders a JSON value as a Rhai literal.
pub fn rhai_literal(value: &Value) -> String {
    match value {
        Value::Null => "()".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.is_f64() {
                let text = n.to_string();
                if text.contains(['.', 'e', 'E']) {
                    text
                } else {
                    format!("{}.0", text)
                }
            } else {
                n.to_string()
            }
        }
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(rhai_literal).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Object(map) => {
            if map.is_empty() {
                return "#{}".to_string();
            }
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", rhai_literal(&Value::String(k.clone())), rhai_literal(v)))
                .collect();
            format!("#{{ {} }}", parts.join(", "))
        }
    }
}

fn render_shell(nodes: &[ResolvedNode<'_>]) -> String {
    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    out.push_str("# Generated by codeforge. Do not edit.\n");
    out.push_str("set -eu\n\n");
    out.push_str("RUNNER=\"${OPERATOR_RUNNER:-operator-runner}\"\n");
    out.push_str("LLM_SERVING=\"${LLM_SERVING:-}\"\n");
    out.push_str("STORAGE=\"${STORAGE:-./storage}\"\n\n");

    for n in nodes {
        let _ = writeln!(out, "# {}: {}", n.node.id, n.node.name);
        let _ = writeln!(
            out,
            "{}_INIT={}",
            n.var.to_uppercase(),
            shell_quote(&json_without_shared(&n.init))
        );
    }
    if !nodes.is_empty() {
        out.push('\n');
    }
    for n in nodes {
        let _ = write!(
            out,
            "STORAGE=\"$(\"$RUNNER\" run {} --init \"${}_INIT\" --storage \"$STORAGE\" --params {}",
            shell_quote(&n.node.name),
            n.var.to_uppercase(),
            shell_quote(&json_without_shared(&n.run))
        );
        if n.uses_shared {
            out.push_str(" --llm-serving \"$LLM_SERVING\"");
        }
        out.push_str(")\"\n");
    }
    out.push_str("\nprintf '%s\\n' \"$STORAGE\"\n");
    out
}

fn json_without_shared(params: &IndexMap<String, Value>) -> String {
    let filtered: serde_json::Map<String, Value> = params
        .iter()
        .filter(|(k, _)| k.as_str() != SHARED_RESOURCE)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(filtered).to_string()
}

/// Single-quotes `text` for POSIX shells.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::script_engine;
    use crate::pipeline::registry::{InMemoryOperatorRegistry, OperatorSignature};
    use serde_json::json;
    use tempfile::TempDir;

    fn registry() -> InMemoryOperatorRegistry {
        InMemoryOperatorRegistry::new()
            .with(
                OperatorSignature::new("Loader")
                    .with_init_param("path", Value::Null)
                    .with_run_param("limit", json!(100)),
            )
            .with(
                OperatorSignature::new("Filter")
                    .with_init_param(SHARED_RESOURCE, Value::Null)
                    .with_init_param("threshold", json!(0.5))
                    .with_run_param("column", json!("text")),
            )
    }

    fn ordered() -> Vec<PipelineNode> {
        vec![
            PipelineNode::new("n1", "Loader").with_init_param("path", json!("data.jsonl")),
            PipelineNode::new("n2", "Filter")
                .with_init_param("threshold", json!(0.8))
                .with_init_param("bogus", json!(1))
                .with_dependency("n1"),
        ]
    }

    #[test]
    fn test_rhai_script_shape() {
        let reg = registry();
        let text = ScriptGenerator::new(&reg).generate(&ordered(), ScriptFormat::Rhai);

        assert!(text.contains("fn main(llm_serving, storage) {"));
        assert!(text.contains(r#"let op_n1 = operator("Loader", #{ "path": "data.jsonl" });"#));
        assert!(text.contains(
            r#"let op_n2 = operator("Filter", #{ "llm_serving": llm_serving, "threshold": 0.8 });"#
        ));
        assert!(text.contains(r#"storage = run_operator(op_n1, storage, #{ "limit": 100 });"#));
        assert!(!text.contains("bogus"));
        assert!(text.trim_end().ends_with("main(llm_serving, storage)"));

        // Initialization precedes every invocation.
        let last_init = text.rfind("operator(\"").unwrap();
        let first_run = text.find("run_operator(").unwrap();
        assert!(last_init < first_run);
    }

    #[test]
    fn test_rhai_script_compiles() {
        let reg = registry();
        let text = ScriptGenerator::new(&reg).generate(&ordered(), ScriptFormat::Rhai);
        assert!(script_engine().compile(&text).is_ok());
    }

    #[test]
    fn test_generation_is_deterministic() {
        let reg = registry();
        let generator = ScriptGenerator::new(&reg);
        assert_eq!(
            generator.generate(&ordered(), ScriptFormat::Shell),
            generator.generate(&ordered(), ScriptFormat::Shell)
        );
    }

    #[test]
    fn test_unknown_operator_uses_node_params() {
        let reg = InMemoryOperatorRegistry::new();
        let nodes = vec![PipelineNode::new("x", "Custom").with_init_param("k", json!([1, null]))];
        let text = ScriptGenerator::new(&reg).generate(&nodes, ScriptFormat::Rhai);
        assert!(text.contains(r#"operator("Custom", #{ "k": [1, ()] })"#));
    }

    #[test]
    fn test_shell_script_written_executable() {
        let reg = registry();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/pipeline.sh");

        let format = ScriptGenerator::new(&reg).write(&ordered(), &path).unwrap();
        assert_eq!(format, ScriptFormat::Shell);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#!/bin/sh\n"));
        assert!(text.contains("set -eu"));
        assert!(text.contains(r#"OP_N2_INIT='{"threshold":0.8}'"#));
        assert!(text.contains("--llm-serving \"$LLM_SERVING\""));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_ids_differing_in_case_or_punctuation_keep_own_variables() {
        let reg = InMemoryOperatorRegistry::new();
        let nodes = vec![
            PipelineNode::new("A", "Upper"),
            PipelineNode::new("a", "Lower"),
            PipelineNode::new("load-1", "Dash"),
            PipelineNode::new("load_1", "Underscore"),
        ];
        let generator = ScriptGenerator::new(&reg);

        let text = generator.generate(&nodes, ScriptFormat::Rhai);
        assert!(text.contains(r#"let op_a = operator("Upper", #{});"#));
        assert!(text.contains(r#"let op_a_2 = operator("Lower", #{});"#));
        assert!(text.contains(r#"let op_load_1 = operator("Dash", #{});"#));
        assert!(text.contains(r#"let op_load_1_2 = operator("Underscore", #{});"#));
        for var in ["op_a", "op_a_2", "op_load_1", "op_load_1_2"] {
            let call = format!("run_operator({}, storage", var);
            assert_eq!(text.matches(&call).count(), 1, "{}", call);
        }
        assert!(script_engine().compile(&text).is_ok());

        let shell = generator.generate(&nodes, ScriptFormat::Shell);
        assert!(shell.contains("OP_A_INIT="));
        assert!(shell.contains("OP_A_2_INIT="));
        assert!(shell.contains("OP_LOAD_1_INIT="));
        assert!(shell.contains("OP_LOAD_1_2_INIT="));
    }

    #[test]
    fn test_rhai_literals() {
        assert_eq!(rhai_literal(&json!(2.0)), "2.0");
        assert_eq!(rhai_literal(&json!(3)), "3");
        assert_eq!(rhai_literal(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(rhai_literal(&json!({})), "#{}");
        assert_eq!(rhai_literal(&json!({"k": true})), r#"#{ "k": true }"#);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
    }
}
