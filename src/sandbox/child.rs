//! Child-side harness for script work units.
//!
//! Runs inside the sandbox process (`codeforge sandbox-child <descriptor>`).
//! It interprets the descriptor from scratch, calls the requested function
//! and posts exactly one [`SandboxResult`] to the result slot.

use std::io::Write;
use std::path::Path;

use rhai::{Dynamic, Scope};
use serde_json::Value;

use super::result::SandboxResult;
use super::work::{TaskDescriptor, WorkUnit};
use crate::error::SandboxError;
use crate::loader::runtime::{
    dynamic_to_json, exception_summary, format_traceback, json_to_dynamic, script_engine,
    syntax_summary,
};

/// Exit code when the unit ran and succeeded.
pub const EXIT_OK: i32 = 0;
/// Exit code when the unit ran and failed (result still posted).
pub const EXIT_FAILED: i32 = 1;
/// Exit code when the descriptor could not be read or the result not posted.
pub const EXIT_HARNESS_ERROR: i32 = 2;

/// Executes the descriptor at `path` and returns the process exit code.
pub fn run_descriptor(path: &Path) -> i32 {
    let descriptor = match read_descriptor(path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("sandbox-child: {}", e);
            return EXIT_HARNESS_ERROR;
        }
    };

    let result = match descriptor.unit {
        WorkUnit::Script {
            ref source,
            ref entry,
            ref args,
        } => execute_script(source, entry, args),
        WorkUnit::Command { .. } => SandboxResult::failure(
            "SandboxSetupError: command units are executed directly, not through the harness",
            String::new(),
        ),
    };

    if !result.success && !result.traceback.is_empty() {
        eprintln!("{}", result.traceback);
    }
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    match post_result(&descriptor.result_path, &result) {
        Ok(()) if result.success => EXIT_OK,
        Ok(()) => EXIT_FAILED,
        Err(e) => {
            eprintln!("sandbox-child: cannot post result: {}", e);
            EXIT_HARNESS_ERROR
        }
    }
}

/// Compiles `source` and calls `entry` with JSON `args`.
pub fn execute_script(source: &Path, entry: &str, args: &[Value]) -> SandboxResult {
    let label = source.display().to_string();
    let code = match std::fs::read_to_string(source) {
        Ok(code) => code,
        Err(e) => {
            return SandboxResult::failure(
                format!("IoError: cannot read '{}': {}", label, e),
                String::new(),
            )
        }
    };

    let engine = script_engine();
    let ast = match engine.compile(&code) {
        Ok(ast) => ast,
        Err(e) => {
            let summary = syntax_summary(&e);
            return SandboxResult::failure(summary.clone(), format!("{} ({})", summary, label));
        }
    };

    let mut call_args = Vec::with_capacity(args.len());
    for arg in args {
        match json_to_dynamic(arg) {
            Ok(value) => call_args.push(value),
            Err(e) => return SandboxResult::failure(format!("ArgumentError: {}", e), String::new()),
        }
    }

    match engine.call_fn::<Dynamic>(&mut Scope::new(), &ast, entry, call_args) {
        Ok(value) => match dynamic_to_json(&value) {
            Ok(json) => SandboxResult::success(json),
            Err(e) => SandboxResult::failure(
                format!("ReturnValueError: '{}' returned a value that is not JSON: {}", entry, e),
                String::new(),
            ),
        },
        Err(err) => SandboxResult::failure(exception_summary(&err), format_traceback(&err, &label)),
    }
}

/// Writes the result slot once, via a temporary file and rename.
pub fn post_result(result_path: &Path, result: &SandboxResult) -> Result<(), SandboxError> {
    if result_path.exists() {
        return Err(SandboxError::Setup(format!(
            "result slot '{}' already written",
            result_path.display()
        )));
    }
    let tmp = result_path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec(result)?)?;
    std::fs::rename(&tmp, result_path)?;
    Ok(())
}

fn read_descriptor(path: &Path) -> Result<TaskDescriptor, SandboxError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| SandboxError::Descriptor(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| SandboxError::Descriptor(format!("{}: {}", path.display(), e)))
}
