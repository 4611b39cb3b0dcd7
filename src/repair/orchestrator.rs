//! The repair loop.
//!
//! Per (task, function) the loop moves through
//! `GENERATING -> EXECUTING -> SUCCESS`, or on failure
//! `EXECUTING -> DIAGNOSING -> REPAIRING -> EXECUTING`, until the round
//! budget runs out. Two entry points share it:
//!
//! - [`RepairOrchestrator::run_batch`] resolves every function placeholder of
//!   a set of tasks. Exhaustion halts the whole batch.
//! - [`RepairOrchestrator::safe_call_tool`] runs one tool under the loop and
//!   hands back the last result when the budget is spent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::artifacts::ArtifactStore;
use super::detection::FailureDetector;
use super::history::{DebugHistoryEntry, DebugLedger};
use super::pool::FunctionPool;
use super::validate::{check_syntax, language_for};
use crate::config::EngineConfig;
use crate::error::RepairError;
use crate::llm::LlmProvider;
use crate::loader::DynamicModuleLoader;
use crate::pipeline::{
    output_key, topological_order, FunctionSpec, InMemorySessionStore, SessionStore,
    StoreContextProvider, Task, TaskContext, TaskContextProvider,
};
use crate::sandbox::{SandboxConfig, SandboxResult, SandboxRunner, WorkUnit};
use crate::synthesis::{
    CodeRepairer, CodeSynthesizer, GenerationSettings, RepairRequest, SynthesisRequest,
};

/// Extension of synthesized function artifacts.
pub const ARTIFACT_EXTENSION: &str = "rhai";

/// Outcome for one requested function in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionReport {
    /// Requesting task.
    pub task: String,
    /// Function name.
    pub function: String,
    /// Rounds used (0 when an existing function was reused).
    pub rounds: u32,
    /// Whether the function executed successfully.
    pub success: bool,
    /// Whether a previously generated function was reused.
    pub reused: bool,
    /// Whether the callable was bound into the task.
    pub bound: bool,
    /// Live artifact.
    pub artifact: Option<PathBuf>,
}

/// Result of [`RepairOrchestrator::run_batch`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Run identifier.
    pub run_id: String,
    /// Artifact directory of the run.
    pub run_dir: PathBuf,
    /// Task names in the order they were processed.
    pub task_order: Vec<String>,
    /// One entry per requested function.
    pub functions: Vec<FunctionReport>,
}

impl BatchReport {
    /// Total rounds across the batch.
    pub fn total_rounds(&self) -> u32 {
        self.functions.iter().map(|f| f.rounds).sum()
    }
}

/// A tool invocation run under the targeted repair loop.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Task the call belongs to.
    pub task: String,
    /// Tool name, used for logs and the debug ledger.
    pub tool_name: String,
    /// What to execute. Its `source()` is the tool's own code.
    pub unit: WorkUnit,
    /// Script the tool generates and launches, if any. Once it exists on
    /// disk, repairs target it instead of the tool.
    pub launched_artifact: Option<PathBuf>,
    /// Extra signatures given to the repair model.
    pub structural_context: Vec<String>,
}

impl ToolCall {
    /// Creates a call with no launched artifact.
    pub fn new(task: impl Into<String>, tool_name: impl Into<String>, unit: WorkUnit) -> Self {
        Self {
            task: task.into(),
            tool_name: tool_name.into(),
            unit,
            launched_artifact: None,
            structural_context: Vec::new(),
        }
    }

    /// Sets the launched artifact.
    pub fn launching(mut self, path: impl Into<PathBuf>) -> Self {
        self.launched_artifact = Some(path.into());
        self
    }

    /// Sets the structural context.
    pub fn with_context(mut self, signatures: Vec<String>) -> Self {
        self.structural_context = signatures;
        self
    }
}

struct FunctionOutcome {
    rounds: u32,
    artifact: PathBuf,
    value: Value,
}

/// Owns the function pool, the debug ledger and every collaborator of the
/// repair loop.
pub struct RepairOrchestrator {
    config: EngineConfig,
    synthesizer: CodeSynthesizer,
    repairer: CodeRepairer,
    runner: SandboxRunner,
    loader: DynamicModuleLoader,
    detector: FailureDetector,
    artifacts: ArtifactStore,
    store: Arc<dyn SessionStore>,
    session_id: String,
    context_provider: Option<Arc<dyn TaskContextProvider>>,
    pool: FunctionPool,
    ledger: DebugLedger,
}

impl RepairOrchestrator {
    /// Creates an orchestrator with an in-memory session store.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the run directory cannot
    /// be created.
    pub fn new(config: EngineConfig, llm: Arc<dyn LlmProvider>) -> Result<Self, RepairError> {
        config.validate()?;

        let artifacts = ArtifactStore::create(&config.work_dir)?;
        let runner = SandboxRunner::new(
            SandboxConfig::from_engine(&config).with_scratch_dir(artifacts.run_dir().join(".attempts")),
        );
        let session_id = artifacts.run_id().to_string();

        info!(run_id = %session_id, run_dir = %artifacts.run_dir().display(), "Created repair run");

        Ok(Self {
            synthesizer: CodeSynthesizer::new(llm.clone(), GenerationSettings::synthesis(&config)),
            repairer: CodeRepairer::new(llm, GenerationSettings::repair(&config)),
            runner,
            loader: DynamicModuleLoader::new(),
            detector: FailureDetector::new(&config.error_markers),
            artifacts,
            store: Arc::new(InMemorySessionStore::new()),
            session_id,
            context_provider: None,
            pool: FunctionPool::new(),
            ledger: DebugLedger::new(),
            config,
        })
    }

    /// Uses `store` for dependency outputs under `session_id`.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>, session_id: impl Into<String>) -> Self {
        self.store = store;
        self.session_id = session_id.into();
        self
    }

    /// Replaces the default store-backed context provider.
    pub fn with_context_provider(mut self, provider: Arc<dyn TaskContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        self.artifacts.run_id()
    }

    /// Artifact directory of this run.
    pub fn run_dir(&self) -> &Path {
        self.artifacts.run_dir()
    }

    /// The function pool.
    pub fn pool(&self) -> &FunctionPool {
        &self.pool
    }

    /// The debug ledger.
    pub fn ledger(&self) -> &DebugLedger {
        &self.ledger
    }

    /// The session store.
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Session id used for dependency outputs.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn provider(&self) -> Arc<dyn TaskContextProvider> {
        match self.context_provider {
            Some(ref provider) => provider.clone(),
            None => Arc::new(StoreContextProvider::new(self.store.clone(), self.session_id.clone())),
        }
    }

    /// Generates, executes and binds every function placeholder in `tasks`.
    ///
    /// Tasks are processed in dependency order. A function that already
    /// succeeded for an earlier task is reused without synthesis.
    ///
    /// # Errors
    ///
    /// - `RepairError::Sequencing` when task dependencies are cyclic or name
    ///   unknown tasks (checked before any LLM call)
    /// - `RepairError::UndeclaredFunction` for a placeholder without a
    ///   matching declaration
    /// - `RepairError::Exhausted` when a function never succeeds; the batch
    ///   stops there
    pub async fn run_batch(&mut self, tasks: &mut [Task]) -> Result<BatchReport, RepairError> {
        let order = order_tasks(tasks)?;
        let provider = self.provider();
        let mut functions = Vec::new();

        info!(
            run_id = %self.artifacts.run_id(),
            tasks = tasks.len(),
            "Starting batch"
        );

        for &idx in &order {
            let task_name = tasks[idx].name.clone();

            for function in tasks[idx].unresolved_functions() {
                let spec = tasks[idx]
                    .function(&function)
                    .cloned()
                    .ok_or_else(|| RepairError::UndeclaredFunction {
                        task: task_name.clone(),
                        function: function.clone(),
                    })?;

                if let Some((artifact, value)) = self.reusable_artifact(&task_name, &spec.name) {
                    info!(task = %task_name, function = %spec.name, "Reusing generated function");
                    self.store
                        .set(&self.session_id, &output_key(&task_name, &spec.name), &value)
                        .await?;
                    let bound = self.loader.bind(&mut tasks[idx], &spec.name, &artifact);
                    tasks[idx].last_result = Some(value);
                    functions.push(FunctionReport {
                        task: task_name.clone(),
                        function: spec.name.clone(),
                        rounds: 0,
                        success: true,
                        reused: true,
                        bound,
                        artifact: Some(artifact),
                    });
                    continue;
                }

                let context = {
                    let task = &tasks[idx];
                    let deps: Vec<&Task> = tasks
                        .iter()
                        .filter(|t| task.depends_on.contains(&t.name))
                        .collect();
                    provider.provide(task, &spec, &deps).await?
                };

                let outcome = self.repair_function(&task_name, &spec, context).await?;

                self.store
                    .set(&self.session_id, &output_key(&task_name, &spec.name), &outcome.value)
                    .await?;
                let bound = self.loader.bind(&mut tasks[idx], &spec.name, &outcome.artifact);
                tasks[idx].last_result = Some(outcome.value);

                functions.push(FunctionReport {
                    task: task_name.clone(),
                    function: spec.name.clone(),
                    rounds: outcome.rounds,
                    success: true,
                    reused: false,
                    bound,
                    artifact: Some(outcome.artifact),
                });
            }
        }

        let report = BatchReport {
            run_id: self.artifacts.run_id().to_string(),
            run_dir: self.artifacts.run_dir().to_path_buf(),
            task_order: order.iter().map(|&i| tasks[i].name.clone()).collect(),
            functions,
        };
        info!(
            functions = report.functions.len(),
            total_rounds = report.total_rounds(),
            "Batch complete"
        );
        Ok(report)
    }

    /// Artifact and last output of an already successful function, recording
    /// `task` as a consumer.
    fn reusable_artifact(&mut self, task: &str, function: &str) -> Option<(PathBuf, Value)> {
        if !self.pool.is_ready(function) {
            return None;
        }
        let entry = self.pool.get_mut(function)?;
        entry.consumers.insert(task.to_string());
        let value = entry
            .last_result
            .as_ref()
            .map(|r| r.value.clone())
            .unwrap_or(Value::Null);
        entry.current_artifact().cloned().map(|artifact| (artifact, value))
    }

    /// Runs the bounded loop for one function.
    async fn repair_function(
        &mut self,
        task: &str,
        spec: &FunctionSpec,
        context: TaskContext,
    ) -> Result<FunctionOutcome, RepairError> {
        let path = self
            .artifacts
            .source_path(task, &spec.name, ARTIFACT_EXTENSION);
        let max_rounds = self.config.max_rounds;

        {
            let entry = self.pool.entry(spec);
            entry.consumers.insert(task.to_string());
            if !entry.artifact_paths.contains(&path) {
                entry.artifact_paths.push(path.clone());
            }
        }

        let mut code: Option<String> = None;
        let mut live_round = 0;
        let mut pending_diagnostic: Option<String> = None;
        let mut needs_synthesis = true;

        for round in 1..=max_rounds {
            // GENERATING
            if needs_synthesis {
                let mut request = SynthesisRequest::new(spec.clone(), context.clone());
                if let Some(diag) = pending_diagnostic.take() {
                    request = request.with_previous(code.clone(), diag);
                }
                info!(task, function = %spec.name, round, shape = ?request.shape(), "Generating");

                match self.synthesizer.synthesize(&request).await {
                    Ok(synthesis) => {
                        self.artifacts.commit(&path, &synthesis.code, live_round)?;
                        live_round = round;
                        if let Some(entry) = self.pool.get_mut(&spec.name) {
                            entry.code = synthesis.code.clone();
                        }
                        code = Some(synthesis.code);
                        needs_synthesis = false;
                    }
                    Err(e) => {
                        let diagnostic = format!("SynthesisFailed: {}", e);
                        warn!(task, function = %spec.name, round, error = %e, "Synthesis failed");
                        self.artifacts
                            .write_log(task, &spec.name, round, &diagnostic)?;
                        self.ledger
                            .record(task, DebugHistoryEntry::new(&spec.name, round, &diagnostic));
                        pending_diagnostic = Some(diagnostic);
                        continue;
                    }
                }
            }

            // EXECUTING
            let unit = WorkUnit::script(&path, &spec.name, spec.sample_args.clone());
            let result = self.runner.run(&unit).await;
            self.artifacts
                .write_log(task, &spec.name, round, &result.output_log())?;

            let failure = self.detector.failure_reason(&result);
            if let Some(entry) = self.pool.get_mut(&spec.name) {
                entry.success = failure.is_none();
                entry.last_result = Some(result.clone());
            }

            let Some(reason) = failure else {
                info!(task, function = %spec.name, round, "Function succeeded");
                return Ok(FunctionOutcome {
                    rounds: round,
                    artifact: path,
                    value: result.value,
                });
            };

            // DIAGNOSING
            let diagnostic = failure_diagnostic(&reason, &result);
            log_failed_round(task, &spec.name, round, &reason, &result);
            self.ledger
                .record(task, DebugHistoryEntry::new(&spec.name, round, &diagnostic));

            if round == max_rounds {
                break;
            }

            // REPAIRING
            let request = RepairRequest {
                target: spec.signature(),
                language: language_for(&path).to_string(),
                source: code.clone().unwrap_or_default(),
                diagnostic: diagnostic.clone(),
                history: self.ledger.history(task, &spec.name).to_vec(),
                structural_context: context.sibling_signatures.clone(),
            };
            match self.repairer.repair(&request).await {
                Ok(patch) => match check_syntax(&path, &patch.code).await {
                    Ok(()) => {
                        self.artifacts.commit(&path, &patch.code, live_round)?;
                        live_round = round + 1;
                        if let Some(entry) = self.pool.get_mut(&spec.name) {
                            entry.code = patch.code.clone();
                        }
                        code = Some(patch.code);
                    }
                    Err(message) => {
                        warn!(task, function = %spec.name, round, error = %message, "Repair patch rejected by syntax check");
                        pending_diagnostic =
                            Some(format!("{}\nRejected patch syntax error: {}", diagnostic, message));
                        needs_synthesis = true;
                    }
                },
                Err(e) => {
                    warn!(task, function = %spec.name, round, error = %e, "Repair request failed, falling back to synthesis");
                    pending_diagnostic = Some(format!("{}\nRepair failed: {}", diagnostic, e));
                    needs_synthesis = true;
                }
            }
        }

        let history = self.ledger.history(task, &spec.name).to_vec();
        warn!(task, function = %spec.name, rounds = max_rounds, "Repair budget exhausted");
        Err(RepairError::Exhausted {
            task: task.to_string(),
            function: spec.name.clone(),
            rounds: max_rounds,
            history,
        })
    }

    /// Runs a tool under the repair loop and returns the last result.
    ///
    /// Repairs target the tool's own source until `launched_artifact`
    /// appears on disk; from then on they target the launched artifact.
    /// Both share one round budget. The final round is never repaired.
    pub async fn safe_call_tool(&mut self, call: &ToolCall) -> Result<SandboxResult, RepairError> {
        let max_rounds = self.config.max_rounds;
        let mut handed_off = false;
        let mut last = None;

        for round in 1..=max_rounds {
            let result = self.runner.run(&call.unit).await;
            self.artifacts
                .write_log(&call.task, &call.tool_name, round, &result.output_log())?;

            let Some(reason) = self.detector.failure_reason(&result) else {
                info!(task = %call.task, tool = %call.tool_name, round, "Tool call succeeded");
                return Ok(result);
            };

            let target = match call.launched_artifact {
                Some(ref launched) if launched.exists() => {
                    if !handed_off {
                        info!(
                            task = %call.task,
                            tool = %call.tool_name,
                            artifact = %launched.display(),
                            "Launched artifact exists, redirecting repairs to it"
                        );
                        handed_off = true;
                    }
                    Some(launched.clone())
                }
                _ => call.unit.source().map(Path::to_path_buf),
            };
            let scope = match target {
                Some(ref path) if handed_off => path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| call.tool_name.clone()),
                _ => call.tool_name.clone(),
            };

            let diagnostic = failure_diagnostic(&reason, &result);
            log_failed_round(&call.task, &scope, round, &reason, &result);
            self.ledger
                .record(&call.task, DebugHistoryEntry::new(&scope, round, &diagnostic));

            if round == max_rounds {
                last = Some(result);
                break;
            }

            let Some(target) = target else {
                warn!(task = %call.task, tool = %call.tool_name, "No source to repair, returning failure");
                return Ok(result);
            };

            self.repair_file(&call.task, &scope, &target, round, &diagnostic, &call.structural_context)
                .await?;
            last = Some(result);
        }

        warn!(task = %call.task, tool = %call.tool_name, rounds = max_rounds, "Tool call still failing after round budget");
        Ok(last.unwrap_or_else(|| SandboxResult::failure("RepairExhausted: no rounds executed", String::new())))
    }

    /// Asks for a patch of `target` and writes it back when it passes the
    /// syntax check. Patch problems are logged, never raised.
    async fn repair_file(
        &mut self,
        task: &str,
        scope: &str,
        target: &Path,
        round: u32,
        diagnostic: &str,
        structural_context: &[String],
    ) -> Result<(), RepairError> {
        let source = match std::fs::read_to_string(target) {
            Ok(source) => source,
            Err(e) => {
                warn!(task, artifact = %target.display(), error = %e, "Cannot read repair target");
                return Ok(());
            }
        };

        let request = RepairRequest {
            target: target.display().to_string(),
            language: language_for(target).to_string(),
            source,
            diagnostic: diagnostic.to_string(),
            history: self.ledger.history(task, scope).to_vec(),
            structural_context: structural_context.to_vec(),
        };

        match self.repairer.repair(&request).await {
            Ok(patch) => match check_syntax(target, &patch.code).await {
                Ok(()) => {
                    self.artifacts.commit(target, &patch.code, round)?;
                    info!(task, artifact = %target.display(), round, "Applied repair patch");
                }
                Err(message) => {
                    warn!(task, artifact = %target.display(), round, error = %message, "Repair patch rejected by syntax check");
                }
            },
            Err(e) => {
                warn!(task, artifact = %target.display(), round, error = %e, "Repair request failed");
            }
        }
        Ok(())
    }
}

/// Orders tasks by their `depends_on` names.
fn order_tasks(tasks: &[Task]) -> Result<Vec<usize>, RepairError> {
    let ids: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
    let edges: Vec<(&str, &str)> = tasks
        .iter()
        .flat_map(|t| t.depends_on.iter().map(move |d| (d.as_str(), t.name.as_str())))
        .collect();
    Ok(topological_order(&ids, &edges)?)
}

fn failure_diagnostic(reason: &str, result: &SandboxResult) -> String {
    let evidence = result.diagnostic();
    if evidence.contains(reason) {
        evidence
    } else {
        format!("Failure: {}\n{}", reason, evidence)
    }
}

fn log_failed_round(task: &str, function: &str, round: u32, reason: &str, result: &SandboxResult) {
    warn!(
        task,
        function,
        round,
        reason,
        stdout = %result.stdout,
        stderr = %result.stderr,
        traceback = %result.traceback,
        "Round failed"
    );
}
