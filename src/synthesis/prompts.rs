//! Prompt text for synthesis and repair requests.

use std::fmt::Write as _;

use crate::pipeline::{FunctionSpec, TaskContext};
use crate::repair::DebugHistoryEntry;
use crate::utils::truncate_string;

/// System prompt for generating a new function.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You write small, self-contained functions in the Rhai scripting language.

Rules:
1. Define the requested function with exactly the requested name and parameters.
2. Helper functions are allowed; global statements outside functions are not.
3. Functions cannot see outer variables. Pass everything as parameters.
4. Use `throw` for unrecoverable errors instead of printing them.
5. Return plain data: numbers, strings, booleans, arrays or object maps.

Respond with ONLY a JSON object:
{
  "code": "the complete Rhai source",
  "description": "one sentence describing the implementation"
}"#;

/// System prompt for repairing a failed artifact.
pub const REPAIR_SYSTEM_PROMPT: &str = r#"You fix programs that failed when executed.

You receive the current source, the captured failure evidence, and notes from
earlier repair rounds. Return the COMPLETE corrected source, not a diff.
Keep the entry point name and parameters unchanged. Do not repeat fixes that
earlier rounds already tried.

Respond with ONLY a JSON object:
{
  "code": "the complete corrected source",
  "explanation": "what was wrong and what changed"
}"#;

/// Which synthesis prompt applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptShape {
    /// First attempt, no upstream outputs.
    Standalone,
    /// First attempt with dependency outputs available.
    WithDependencies,
    /// Retry after a failed attempt.
    WithDiagnostic,
}

impl PromptShape {
    /// Selects the shape for a request.
    pub fn select(has_dependencies: bool, has_diagnostic: bool) -> Self {
        match (has_dependencies, has_diagnostic) {
            (_, true) => PromptShape::WithDiagnostic,
            (true, false) => PromptShape::WithDependencies,
            (false, false) => PromptShape::Standalone,
        }
    }
}

/// Builds the user prompt for a synthesis request.
pub fn synthesis_prompt(
    shape: PromptShape,
    function: &FunctionSpec,
    context: &TaskContext,
    previous_code: Option<&str>,
    diagnostic: Option<&str>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Task: {}", context.task);
    let _ = writeln!(prompt, "Function: {}", function.signature());
    if !function.description.is_empty() {
        let _ = writeln!(prompt, "Purpose: {}", function.description);
    }
    if !function.sample_args.is_empty() {
        let args: Vec<String> = function.sample_args.iter().map(|a| a.to_string()).collect();
        let _ = writeln!(prompt, "It will be called with: ({})", args.join(", "));
    }

    if !context.rendered_prompt.trim().is_empty() {
        let _ = write!(prompt, "\nInstructions:\n{}\n", context.rendered_prompt.trim());
    }

    if !context.sibling_signatures.is_empty() {
        let _ = write!(
            prompt,
            "\nOther functions in this task (not available to call):\n- {}\n",
            context.sibling_signatures.join("\n- ")
        );
    }

    if shape != PromptShape::Standalone && context.has_dependencies() {
        prompt.push_str("\nOutputs of upstream steps (shape reference for the inputs):\n");
        for (key, value) in &context.dependency_outputs {
            let rendered = serde_json::to_string_pretty(value).unwrap_or_default();
            let _ = writeln!(prompt, "[{}]\n{}", key, truncate_string(rendered, 2000));
        }
    }

    if shape == PromptShape::WithDiagnostic {
        if let Some(code) = previous_code {
            let _ = write!(prompt, "\nPrevious attempt:\n```rhai\n{}\n```\n", code.trim_end());
        }
        if let Some(diag) = diagnostic {
            let _ = write!(prompt, "\nIt failed with:\n{}\n", diag.trim_end());
        }
        prompt.push_str("\nWrite a corrected version.\n");
    } else {
        let _ = write!(prompt, "\nWrite `{}` now.\n", function.name);
    }

    prompt
}

/// Builds the user prompt for a repair request.
pub fn repair_prompt(
    target: &str,
    language: &str,
    source: &str,
    diagnostic: &str,
    history: &[DebugHistoryEntry],
    structural_context: &[String],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Artifact: {} ({})", target, language);
    let _ = write!(prompt, "\nCurrent source:\n```\n{}\n```\n", source.trim_end());
    let _ = write!(prompt, "\nFailure evidence:\n{}\n", diagnostic.trim_end());

    if !history.is_empty() {
        prompt.push_str("\nEarlier rounds:\n");
        for entry in history {
            let _ = writeln!(
                prompt,
                "- round {}: {}",
                entry.round,
                truncate_string(first_line(&entry.diagnostic).to_string(), 300)
            );
        }
    }

    if !structural_context.is_empty() {
        let _ = write!(
            prompt,
            "\nRelated signatures:\n- {}\n",
            structural_context.join("\n- ")
        );
    }

    prompt.push_str("\nReturn the complete fixed source.\n");
    prompt
}

fn first_line(text: &str) -> &str {
    text.lines().find(|l| !l.trim().is_empty()).unwrap_or("")
}
