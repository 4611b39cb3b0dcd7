//! Embedded script runtime shared by the sandbox child and the loader.

use rhai::{Dynamic, Engine, EvalAltResult, ParseError};
use serde_json::Value;

use crate::error::LoadError;

/// Operation budget for scripts called in-process by bound callables.
/// Sandboxed children rely on the wall-clock timeout instead.
pub const IN_PROCESS_MAX_OPERATIONS: u64 = 50_000_000;

/// Builds the engine used to interpret generated artifacts.
///
/// `print` goes to stdout and `debug` to stderr so the parent can capture
/// both streams.
pub fn script_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_call_levels(128);
    engine.on_print(|text| println!("{}", text));
    engine.on_debug(|text, source, pos| match source {
        Some(source) => eprintln!("[{}:{}] {}", source, pos, text),
        None => eprintln!("[{}] {}", pos, text),
    });
    engine
}

/// Builds an engine with an operation budget for in-process calls.
pub fn bounded_engine() -> Engine {
    let mut engine = script_engine();
    engine.set_max_operations(IN_PROCESS_MAX_OPERATIONS);
    engine
}

/// Converts JSON arguments into script values.
pub fn json_to_dynamic(value: &Value) -> Result<Dynamic, LoadError> {
    rhai::serde::to_dynamic(value).map_err(|e| LoadError::Conversion(e.to_string()))
}

/// Converts a script value back into JSON.
pub fn dynamic_to_json(value: &Dynamic) -> Result<Value, LoadError> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    rhai::serde::from_dynamic::<Value>(value).map_err(|e| LoadError::Conversion(e.to_string()))
}

/// One-line `Kind: message` summary of a runtime error.
pub fn exception_summary(err: &EvalAltResult) -> String {
    let root = root_cause(err);
    format!("{}: {}", error_kind(root), root)
}

/// One-line summary of a compile error.
pub fn syntax_summary(err: &ParseError) -> String {
    format!("SyntaxError: {}", err)
}

/// Formats the nested call chain of a runtime error, outermost call first.
pub fn format_traceback(err: &EvalAltResult, source: &str) -> String {
    let mut lines = vec![format!("Script traceback ({}):", source)];
    let mut current = err;

    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, _, inner, pos) => {
                lines.push(format!("  in call to function '{}' at {}", name, pos));
                current = inner;
            }
            EvalAltResult::ErrorInModule(name, inner, pos) => {
                lines.push(format!("  in module '{}' at {}", name, pos));
                current = inner;
            }
            other => {
                lines.push(format!("  at {}", other.position()));
                lines.push(format!("{}: {}", error_kind(other), other));
                break;
            }
        }
    }

    lines.join("\n")
}

fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

/// Variant name of a runtime error, e.g. `ErrorRuntime`.
fn error_kind(err: &EvalAltResult) -> String {
    let debug = format!("{:?}", err);
    debug
        .split(|c: char| c == '(' || c == ' ' || c == '{')
        .next()
        .unwrap_or("Error")
        .to_string()
}
