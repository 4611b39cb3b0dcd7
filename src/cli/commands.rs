//! CLI command definitions for codeforge.
//!
//! `run` resolves the generated functions of a pipeline file, `sequence`
//! turns an operator graph into an executable script and `call` runs one
//! tool under the repair loop. `sandbox-child` is the entry point the
//! sandbox re-executes and is not meant to be called by hand.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::RepairError;
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{
    DependencyGraphSequencer, InMemoryOperatorRegistry, PipelineDef, PipelineGraph,
    RedisSessionStore, ScriptGenerator,
};
use crate::repair::{RepairOrchestrator, ToolCall};
use crate::sandbox::{child, WorkUnit, CHILD_SUBCOMMAND};

/// Key prefix for sessions stored in Redis.
const REDIS_KEY_PREFIX: &str = "codeforge";

/// Self-healing code generation and execution engine.
#[derive(Parser)]
#[command(name = "codeforge")]
#[command(about = "Generate, execute and repair code with an LLM in a bounded loop")]
#[command(version)]
#[command(
    long_about = "codeforge synthesizes the functions a pipeline asks for, runs them in an isolated child process and repairs them from the captured failure evidence until they succeed or the round budget runs out.\n\nExample usage:\n  codeforge run --pipeline ./pipeline.yaml\n  codeforge sequence --graph ./graph.yaml --operators ./operators.yaml --output ./pipeline.rhai"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

impl Cli {
    /// Whether this invocation is a sandbox child.
    pub fn is_sandbox_child(&self) -> bool {
        matches!(self.command, Commands::SandboxChild(_))
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Resolve every function placeholder of a pipeline file.
    Run(RunArgs),

    /// Order an operator graph and write it out as a script.
    #[command(alias = "seq")]
    Sequence(SequenceArgs),

    /// Run one tool under the repair loop.
    Call(CallArgs),

    /// Execute a sandbox task descriptor.
    #[command(name = CHILD_SUBCOMMAND, hide = true)]
    SandboxChild(SandboxChildArgs),
}

/// Arguments for `codeforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pipeline file (YAML or JSON) declaring tasks and their functions.
    #[arg(short, long)]
    pub pipeline: PathBuf,

    /// Directory for run artifacts (overrides CODEFORGE_WORK_DIR).
    #[arg(short = 'w', long)]
    pub work_dir: Option<PathBuf>,

    /// Round budget per function (overrides CODEFORGE_MAX_ROUNDS).
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Redis URL for the session store. In-memory when absent.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Expire Redis sessions this many seconds after their last write.
    #[arg(long)]
    pub session_ttl: Option<u64>,

    /// Do not echo child output to the terminal.
    #[arg(short, long)]
    pub quiet: bool,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `codeforge sequence`.
#[derive(Parser, Debug)]
pub struct SequenceArgs {
    /// Graph file (YAML or JSON) with `nodes` and `edges`.
    #[arg(short, long)]
    pub graph: PathBuf,

    /// Operator signature file (YAML or JSON list).
    #[arg(long)]
    pub operators: Option<PathBuf>,

    /// Output script. `.sh` writes a shell script, anything else Rhai.
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Arguments for `codeforge call`.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Task the call belongs to.
    #[arg(short, long, default_value = "adhoc")]
    pub task: String,

    /// Tool name used in logs and the debug ledger.
    #[arg(long)]
    pub name: Option<String>,

    /// Source file of the tool. Repairs are written back to it.
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Script the tool generates and launches. Repairs move to it once it exists.
    #[arg(long)]
    pub launches: Option<PathBuf>,

    /// Working directory of the tool.
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Directory for run artifacts (overrides CODEFORGE_WORK_DIR).
    #[arg(short = 'w', long)]
    pub work_dir: Option<PathBuf>,

    /// Output JSON result.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Program and arguments to run.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the hidden `sandbox-child` subcommand.
#[derive(Parser, Debug)]
pub struct SandboxChildArgs {
    /// Task descriptor written by the parent.
    pub descriptor: PathBuf,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows access to CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await?,
        Commands::Sequence(args) => run_sequence_command(args)?,
        Commands::Call(args) => run_call_command(args).await?,
        Commands::SandboxChild(args) => {
            let code = child::run_descriptor(&args.descriptor);
            std::process::exit(code);
        }
    }
    Ok(())
}

// ============================================================================
// Run Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct FunctionSummary {
    task: String,
    function: String,
    rounds: u32,
    reused: bool,
    bound: bool,
    artifact: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    status: String,
    run_id: String,
    run_dir: PathBuf,
    task_order: Vec<String>,
    total_rounds: u32,
    functions: Vec<FunctionSummary>,
    error: Option<String>,
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    if !args.pipeline.exists() {
        return Err(anyhow::anyhow!(
            "Pipeline file does not exist: {}",
            args.pipeline.display()
        ));
    }

    let mut def = PipelineDef::from_file(&args.pipeline)?;
    let mut config = engine_config(args.work_dir, args.max_rounds)?;
    if args.quiet {
        config = config.with_echo_output(false);
    }

    let llm = build_llm_client()?;
    let mut orchestrator = RepairOrchestrator::new(config, llm)?;

    if let Some(ref url) = args.redis_url {
        let mut store = RedisSessionStore::connect(url, REDIS_KEY_PREFIX).await?;
        if let Some(ttl) = args.session_ttl {
            store = store.with_ttl(Duration::from_secs(ttl));
        }
        let session_id = def
            .session_id
            .clone()
            .unwrap_or_else(|| orchestrator.run_id().to_string());
        info!(session_id = %session_id, "Using Redis session store");
        orchestrator = orchestrator.with_session_store(Arc::new(store), session_id);
    }

    info!(
        pipeline = %args.pipeline.display(),
        tasks = def.tasks.len(),
        "Running pipeline"
    );

    let outcome = orchestrator.run_batch(&mut def.tasks).await;
    let output = match outcome {
        Ok(report) => RunOutput {
            status: "success".to_string(),
            total_rounds: report.total_rounds(),
            run_id: report.run_id,
            run_dir: report.run_dir,
            task_order: report.task_order,
            functions: report
                .functions
                .into_iter()
                .map(|f| FunctionSummary {
                    task: f.task,
                    function: f.function,
                    rounds: f.rounds,
                    reused: f.reused,
                    bound: f.bound,
                    artifact: f.artifact,
                })
                .collect(),
            error: None,
        },
        Err(e) => {
            if let RepairError::Exhausted { ref history, .. } = e {
                for entry in history {
                    warn!(function = %entry.function, round = entry.round, "{}", entry.diagnostic);
                }
            }
            failed_output(&orchestrator, &e)
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_run_summary(&output);
    }

    match output.error {
        Some(error) => Err(anyhow::anyhow!(error)),
        None => Ok(()),
    }
}

fn failed_output(orchestrator: &RepairOrchestrator, error: &RepairError) -> RunOutput {
    RunOutput {
        status: "failed".to_string(),
        run_id: orchestrator.run_id().to_string(),
        run_dir: orchestrator.run_dir().to_path_buf(),
        task_order: Vec::new(),
        total_rounds: 0,
        functions: Vec::new(),
        error: Some(error.to_string()),
    }
}

fn print_run_summary(output: &RunOutput) {
    println!("\n=== codeforge run {} ===", output.run_id);
    println!("Status:       {}", output.status);
    println!("Artifacts:    {}", output.run_dir.display());
    if !output.task_order.is_empty() {
        println!("Task order:   {}", output.task_order.join(" -> "));
    }
    println!("Total rounds: {}", output.total_rounds);
    for f in &output.functions {
        println!(
            "  {}::{} rounds={} reused={} bound={}",
            f.task, f.function, f.rounds, f.reused, f.bound
        );
    }
    if let Some(ref error) = output.error {
        println!("Error: {}", error);
    }
}

// ============================================================================
// Sequence Command Implementation
// ============================================================================

fn run_sequence_command(args: SequenceArgs) -> anyhow::Result<()> {
    let graph = PipelineGraph::from_file(&args.graph)?;
    let registry = match args.operators {
        Some(ref path) => InMemoryOperatorRegistry::from_file(path)?,
        None => InMemoryOperatorRegistry::new(),
    };

    let ordered = DependencyGraphSequencer::new().sequence_graph(&graph)?;
    let format = ScriptGenerator::new(&registry).write(&ordered, &args.output)?;

    info!(
        nodes = ordered.len(),
        output = %args.output.display(),
        format = ?format,
        "Wrote pipeline script"
    );
    for (i, node) in ordered.iter().enumerate() {
        println!("{:>3}. {} ({})", i + 1, node.id, node.name);
    }
    Ok(())
}

// ============================================================================
// Call Command Implementation
// ============================================================================

async fn run_call_command(args: CallArgs) -> anyhow::Result<()> {
    let Some((program, rest)) = args.command.split_first() else {
        return Err(anyhow::anyhow!("No program given"));
    };

    let mut unit = WorkUnit::command(program.clone(), rest.to_vec());
    if let Some(ref cwd) = args.cwd {
        unit = unit.in_dir(cwd);
    }
    if let Some(ref source) = args.source {
        unit = unit.with_source(source);
    }

    let tool_name = args.name.clone().unwrap_or_else(|| tool_name_for(program, args.source.as_deref()));
    let mut call = ToolCall::new(&args.task, tool_name, unit);
    if let Some(ref launched) = args.launches {
        call = call.launching(launched);
    }

    let config = engine_config(args.work_dir, None)?;
    let llm = build_llm_client()?;
    let mut orchestrator = RepairOrchestrator::new(config, llm)?;
    let result = orchestrator.safe_call_tool(&call).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.success {
        println!("✓ {} succeeded", call.tool_name);
    } else {
        println!("✗ {} failed", call.tool_name);
        println!("{}", result.diagnostic());
    }

    if result.success {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{}",
            result.exception.unwrap_or_else(|| "tool call failed".to_string())
        ))
    }
}

fn tool_name_for(program: &str, source: Option<&Path>) -> String {
    source
        .and_then(|p| p.file_name())
        .or_else(|| Path::new(program).file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string())
}

// ============================================================================
// Shared helpers
// ============================================================================

fn engine_config(work_dir: Option<PathBuf>, max_rounds: Option<u32>) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = work_dir {
        config = config.with_work_dir(dir);
    }
    if let Some(rounds) = max_rounds {
        config = config.with_max_rounds(rounds);
    }
    config.validate()?;
    Ok(config)
}

fn build_llm_client() -> anyhow::Result<Arc<dyn LlmProvider>> {
    let client = LiteLlmClient::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to initialize LLM client: {}. Set LITELLM_API_BASE and LITELLM_API_KEY.",
            e
        )
    })?;
    info!(api_base = %client.api_base(), "Using LiteLLM client from environment");
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "codeforge",
            "run",
            "--pipeline",
            "p.yaml",
            "--max-rounds",
            "3",
            "-j",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.pipeline, PathBuf::from("p.yaml"));
                assert_eq!(args.max_rounds, Some(3));
                assert!(args.json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_call_command_with_trailing_program() {
        let cli = Cli::try_parse_from([
            "codeforge",
            "call",
            "--source",
            "tool.sh",
            "--",
            "sh",
            "tool.sh",
            "--flag",
        ])
        .unwrap();
        match cli.command {
            Commands::Call(args) => {
                assert_eq!(args.command, vec!["sh", "tool.sh", "--flag"]);
                assert_eq!(args.task, "adhoc");
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_sandbox_child_is_detected() {
        let cli = Cli::try_parse_from(["codeforge", CHILD_SUBCOMMAND, "/tmp/task.json"]).unwrap();
        assert!(cli.is_sandbox_child());
    }

    #[test]
    fn test_tool_name_prefers_source() {
        assert_eq!(tool_name_for("sh", Some(Path::new("/x/gen.sh"))), "gen.sh");
        assert_eq!(tool_name_for("/usr/bin/python3", None), "python3");
    }
}
