//! LLM-backed code synthesis and repair.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::prompts::{
    repair_prompt, synthesis_prompt, PromptShape, REPAIR_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT,
};
use crate::config::EngineConfig;
use crate::error::SynthesisError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::pipeline::{FunctionSpec, TaskContext};
use crate::repair::DebugHistoryEntry;
use crate::utils::json_extraction::parse_llm_json;

/// Model parameters for one kind of request.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Model name. Empty uses the provider default.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion limit.
    pub max_tokens: u32,
}

impl GenerationSettings {
    /// Settings for synthesis requests.
    pub fn synthesis(config: &EngineConfig) -> Self {
        Self {
            model: config.synth_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Settings for repair requests.
    pub fn repair(config: &EngineConfig) -> Self {
        Self {
            model: config.repair_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Parsed model output. Always carries code.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    /// Generated source.
    pub code: String,
    /// Every other field the model returned.
    pub extra: Map<String, Value>,
}

impl Synthesis {
    /// Builds a synthesis from a merged JSON object.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::MissingCode` when there is no non-empty
    /// string `code` field.
    pub fn from_object(mut object: Map<String, Value>) -> Result<Self, SynthesisError> {
        match object.remove("code") {
            Some(Value::String(code)) if !code.trim().is_empty() => Ok(Self {
                code: strip_code_fence(&code),
                extra: object,
            }),
            _ => Err(SynthesisError::MissingCode {
                keys: object.keys().cloned().collect::<Vec<_>>().join(", "),
            }),
        }
    }

    /// Returns a string field from the extra data.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Parses a raw model reply into a [`Synthesis`].
pub fn parse_synthesis(content: &str) -> Result<Synthesis, SynthesisError> {
    if content.trim().is_empty() {
        return Err(SynthesisError::EmptyResponse);
    }
    Synthesis::from_object(parse_llm_json(content)?)
}

/// Removes a surrounding markdown fence from generated code.
fn strip_code_fence(code: &str) -> String {
    let trimmed = code.trim();
    if !trimmed.starts_with("```") {
        return code.to_string();
    }
    let body = trimmed
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim_end().to_string() + "\n"
}

/// Input for one synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Function to write.
    pub function: FunctionSpec,
    /// Task context.
    pub context: TaskContext,
    /// Code from the previous round, if any.
    pub previous_code: Option<String>,
    /// Diagnostic from the previous round, if any.
    pub previous_diagnostic: Option<String>,
}

impl SynthesisRequest {
    /// Creates a first-attempt request.
    pub fn new(function: FunctionSpec, context: TaskContext) -> Self {
        Self {
            function,
            context,
            previous_code: None,
            previous_diagnostic: None,
        }
    }

    /// Attaches the previous attempt.
    pub fn with_previous(mut self, code: Option<String>, diagnostic: impl Into<String>) -> Self {
        self.previous_code = code;
        self.previous_diagnostic = Some(diagnostic.into());
        self
    }

    /// Prompt shape for this request.
    pub fn shape(&self) -> PromptShape {
        PromptShape::select(
            self.context.has_dependencies(),
            self.previous_diagnostic.is_some(),
        )
    }
}

/// Writes new functions with an LLM.
pub struct CodeSynthesizer {
    llm: Arc<dyn LlmProvider>,
    settings: GenerationSettings,
}

impl std::fmt::Debug for CodeSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeSynthesizer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CodeSynthesizer {
    /// Creates a synthesizer.
    pub fn new(llm: Arc<dyn LlmProvider>, settings: GenerationSettings) -> Self {
        Self { llm, settings }
    }

    /// Requests code for `request.function`.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Parse` / `MissingCode` for unusable replies
    /// and `SynthesisError::Llm` for transport failures.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<Synthesis, SynthesisError> {
        let shape = request.shape();
        let prompt = synthesis_prompt(
            shape,
            &request.function,
            &request.context,
            request.previous_code.as_deref(),
            request.previous_diagnostic.as_deref(),
        );
        debug!(function = %request.function.name, shape = ?shape, "Requesting synthesis");

        let content = complete(
            self.llm.as_ref(),
            &self.settings,
            SYNTHESIS_SYSTEM_PROMPT,
            prompt,
        )
        .await?;
        let synthesis = parse_synthesis(&content)?;

        info!(
            function = %request.function.name,
            shape = ?shape,
            code_bytes = synthesis.code.len(),
            "Synthesized function"
        );
        Ok(synthesis)
    }
}

/// Input for one repair request.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    /// Display name of the artifact being fixed.
    pub target: String,
    /// Language of the artifact, e.g. `Rhai` or `POSIX shell`.
    pub language: String,
    /// Current source.
    pub source: String,
    /// Failure evidence from the latest round.
    pub diagnostic: String,
    /// Earlier rounds for the same function.
    pub history: Vec<DebugHistoryEntry>,
    /// Signatures of related functions or operators.
    pub structural_context: Vec<String>,
}

/// Patches failed artifacts with a second LLM request.
pub struct CodeRepairer {
    llm: Arc<dyn LlmProvider>,
    settings: GenerationSettings,
}

impl std::fmt::Debug for CodeRepairer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeRepairer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CodeRepairer {
    /// Creates a repairer.
    pub fn new(llm: Arc<dyn LlmProvider>, settings: GenerationSettings) -> Self {
        Self { llm, settings }
    }

    /// Requests a patched version of `request.source`.
    pub async fn repair(&self, request: &RepairRequest) -> Result<Synthesis, SynthesisError> {
        let prompt = repair_prompt(
            &request.target,
            &request.language,
            &request.source,
            &request.diagnostic,
            &request.history,
            &request.structural_context,
        );
        debug!(artifact = %request.target, history = request.history.len(), "Requesting repair");

        let content = complete(self.llm.as_ref(), &self.settings, REPAIR_SYSTEM_PROMPT, prompt).await?;
        let patch = parse_synthesis(&content)?;

        info!(
            artifact = %request.target,
            explanation = patch.field("explanation").unwrap_or("-"),
            "Received repair patch"
        );
        Ok(patch)
    }
}

async fn complete(
    llm: &dyn LlmProvider,
    settings: &GenerationSettings,
    system: &str,
    prompt: String,
) -> Result<String, SynthesisError> {
    let request = GenerationRequest::new(
        settings.model.clone(),
        vec![Message::system(system), Message::user(prompt)],
    )
    .with_temperature(settings.temperature)
    .with_max_tokens(settings.max_tokens);

    let response = llm.generate(request).await?;
    response
        .first_content()
        .map(str::to_string)
        .ok_or(SynthesisError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::GenerationResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockLlmProvider {
        response: String,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl MockLlmProvider {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().expect("lock poisoned").push(request);
            Ok(GenerationResponse::from_text("test-model", self.response.clone()))
        }
    }

    fn settings() -> GenerationSettings {
        GenerationSettings::synthesis(&EngineConfig::default().with_models("synth", "repair"))
    }

    #[tokio::test]
    async fn test_synthesize_parses_code() {
        let mock = Arc::new(MockLlmProvider::new(
            r#"Sure! {"code": "fn add(a, b) { a + b }", "description": "adds",}"#,
        ));
        let synth = CodeSynthesizer::new(mock.clone(), settings());
        let request = SynthesisRequest::new(FunctionSpec::new("add", "add numbers"), TaskContext::default());

        let out = synth.synthesize(&request).await.unwrap();
        assert_eq!(out.code, "fn add(a, b) { a + b }");
        assert_eq!(out.field("description"), Some("adds"));

        let requests = mock.requests.lock().unwrap();
        assert_eq!(requests[0].model, "synth");
        assert_eq!(requests[0].messages[0].role, "system");
    }

    #[tokio::test]
    async fn test_synthesize_without_json_is_parse_error() {
        let mock = Arc::new(MockLlmProvider::new("I cannot help with that."));
        let synth = CodeSynthesizer::new(mock, settings());
        let request = SynthesisRequest::new(FunctionSpec::new("f", ""), TaskContext::default());
        let err = synth.synthesize(&request).await.unwrap_err();
        assert!(err.is_parse_error());
    }

    #[tokio::test]
    async fn test_repair_uses_repair_prompt() {
        let mock = Arc::new(MockLlmProvider::new(
            r#"{"code": "fn f() { 1 }", "explanation": "removed throw"}"#,
        ));
        let repairer = CodeRepairer::new(mock.clone(), settings());
        let patch = repairer
            .repair(&RepairRequest {
                target: "f.rhai".into(),
                language: "Rhai".into(),
                source: "fn f() { throw \"x\"; }".into(),
                diagnostic: "Exception: x".into(),
                history: vec![],
                structural_context: vec![],
            })
            .await
            .unwrap();

        assert_eq!(patch.code, "fn f() { 1 }");
        let requests = mock.requests.lock().unwrap();
        assert!(requests[0].messages[0].content.contains("fix programs"));
    }

    #[test]
    fn test_missing_code_field() {
        let err = Synthesis::from_object(json!({"description": "x"}).as_object().unwrap().clone())
            .unwrap_err();
        assert!(matches!(err, SynthesisError::MissingCode { .. }));
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let object = json!({"code": "```rhai\nfn f() { 1 }\n```"});
        let synthesis = Synthesis::from_object(object.as_object().unwrap().clone()).unwrap();
        assert_eq!(synthesis.code, "fn f() { 1 }\n");
    }

    #[test]
    fn test_empty_reply() {
        assert!(matches!(parse_synthesis("  "), Err(SynthesisError::EmptyResponse)));
    }

    #[test]
    fn test_request_shape() {
        let request = SynthesisRequest::new(FunctionSpec::new("f", ""), TaskContext::default());
        assert_eq!(request.shape(), PromptShape::Standalone);
        let retry = request.with_previous(Some("fn f() {}".into()), "boom");
        assert_eq!(retry.shape(), PromptShape::WithDiagnostic);
    }
}
