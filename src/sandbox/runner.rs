//! Process-isolated execution of work units.
//!
//! Every call spawns exactly one child in its own process group and turns
//! whatever happens to it into a [`SandboxResult`]. The parent only talks to
//! the child through piped output and a single-slot result file.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::process_tree;
use super::result::SandboxResult;
use super::work::{TaskDescriptor, WorkUnit};
use crate::config::EngineConfig;
use crate::error::SandboxError;

/// Environment variable naming the result slot for the child.
pub const RESULT_PATH_ENV: &str = "CODEFORGE_RESULT_PATH";

/// Subcommand the crate binary exposes for interpreting script units.
pub const CHILD_SUBCOMMAND: &str = "sandbox-child";

/// Maximum bytes retained per captured stream.
pub const MAX_CAPTURE_BYTES: usize = 100_000;

const RESULT_FILE: &str = "result.json";
const DESCRIPTOR_FILE: &str = "task.json";

/// Configuration for the sandbox runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock limit for one execution.
    pub timeout: Duration,
    /// How long to wait for a killed child and its output pipes.
    pub kill_grace: Duration,
    /// Forward child output to this process's stdout/stderr as well.
    pub echo_output: bool,
    /// Interpreter for script units. `None` uses the current executable.
    pub child_program: Option<PathBuf>,
    /// Where per-attempt directories are created. `None` uses the system
    /// temp directory.
    pub scratch_dir: Option<PathBuf>,
    /// Extra environment variables for the child.
    pub env_vars: Vec<(String, String)>,
}

impl SandboxConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            kill_grace: Duration::from_secs(2),
            echo_output: true,
            child_program: None,
            scratch_dir: None,
            env_vars: Vec::new(),
        }
    }

    /// Derives the sandbox settings from the engine configuration.
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            timeout: config.sandbox_timeout,
            kill_grace: config.kill_grace,
            echo_output: config.echo_output,
            child_program: config.child_program.clone(),
            scratch_dir: None,
            env_vars: Vec::new(),
        }
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the kill grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Toggles output forwarding.
    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    /// Sets the script interpreter binary.
    pub fn with_child_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.child_program = Some(program.into());
        self
    }

    /// Sets the directory for per-attempt scratch space.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs work units in isolated child processes.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    /// Creates a runner.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Returns the runner configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Executes `unit` and reports the outcome.
    ///
    /// Never fails: spawn errors, crashes, timeouts and setup problems all
    /// come back as an unsuccessful [`SandboxResult`].
    pub async fn run(&self, unit: &WorkUnit) -> SandboxResult {
        let start = Instant::now();
        info!(unit = %unit.label(), timeout_secs = self.config.timeout.as_secs_f64(), "Starting sandboxed execution");

        let result = match self.execute(unit).await {
            Ok(result) => result,
            Err(e) => {
                warn!(unit = %unit.label(), error = %e, "Sandbox setup failed");
                SandboxResult::failure(format!("SandboxSetupError: {}", e), String::new())
            }
        };
        let result = result.with_duration(start.elapsed());

        if result.success {
            info!(unit = %unit.label(), duration_ms = result.duration.as_millis() as u64, "Sandboxed execution succeeded");
        } else {
            warn!(
                unit = %unit.label(),
                exception = result.exception.as_deref().unwrap_or("-"),
                duration_ms = result.duration.as_millis() as u64,
                "Sandboxed execution failed"
            );
        }
        result
    }

    async fn execute(&self, unit: &WorkUnit) -> Result<SandboxResult, SandboxError> {
        let attempt_dir = self.attempt_dir()?;
        let result_path = attempt_dir.path().join(RESULT_FILE);
        let mut cmd = self.build_command(unit, attempt_dir.path(), &result_path)?;

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let program = cmd.as_std().get_program().to_string_lossy().to_string();
                return Ok(SandboxResult::failure(
                    format!("SpawnError: failed to start '{}': {}", program, e),
                    String::new(),
                ));
            }
        };
        let pid = child.id();
        debug!(pid = ?pid, dir = %attempt_dir.path().display(), "Spawned sandbox child");

        let stdout_buf = Arc::new(Mutex::new(CaptureBuffer::default()));
        let stderr_buf = Arc::new(Mutex::new(CaptureBuffer::default()));
        let mut pumps = Vec::new();
        if let Some(out) = child.stdout.take() {
            pumps.push(pump(out, Echo::Stdout, self.config.echo_output, stdout_buf.clone()));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(pump(err, Echo::Stderr, self.config.echo_output, stderr_buf.clone()));
        }

        let waited = tokio::time::timeout(self.config.timeout, child.wait()).await;

        let outcome = match waited {
            Ok(Ok(status)) => {
                if !self.join_pumps(&mut pumps).await {
                    // Something in the group still holds the pipes open.
                    if let Some(pid) = pid {
                        process_tree::kill_group(pid).await;
                    }
                    abort_pumps(&mut pumps);
                }
                Exited::Status(status)
            }
            Ok(Err(e)) => {
                self.terminate(&mut child, pid).await;
                abort_pumps(&mut pumps);
                Exited::WaitFailed(e.to_string())
            }
            Err(_) => {
                warn!(pid = ?pid, timeout_secs = self.config.timeout.as_secs_f64(), "Sandbox timeout, killing process tree");
                self.terminate(&mut child, pid).await;
                if !self.join_pumps(&mut pumps).await {
                    abort_pumps(&mut pumps);
                }
                Exited::TimedOut
            }
        };

        let stdout = take_capture(&stdout_buf);
        let stderr = take_capture(&stderr_buf);

        let result = match outcome {
            Exited::TimedOut => SandboxResult::timeout(self.config.timeout),
            Exited::WaitFailed(reason) => SandboxResult::failure(
                format!("{}: wait failed: {}", super::result::ABNORMAL_EXIT_EXCEPTION, reason),
                String::new(),
            ),
            Exited::Status(status) => interpret_exit(unit, status, &result_path),
        };

        Ok(result.with_output(stdout, stderr))
    }

    fn attempt_dir(&self) -> Result<tempfile::TempDir, SandboxError> {
        let root = self
            .config
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&root)?;
        tempfile::Builder::new()
            .prefix("codeforge-attempt-")
            .tempdir_in(&root)
            .map_err(|e| SandboxError::Setup(format!("cannot create attempt directory: {}", e)))
    }

    fn build_command(
        &self,
        unit: &WorkUnit,
        attempt_dir: &Path,
        result_path: &Path,
    ) -> Result<Command, SandboxError> {
        let mut cmd = match unit {
            WorkUnit::Script { .. } => {
                let descriptor = TaskDescriptor {
                    unit: unit.clone(),
                    result_path: result_path.to_path_buf(),
                };
                let descriptor_path = attempt_dir.join(DESCRIPTOR_FILE);
                std::fs::write(&descriptor_path, serde_json::to_vec_pretty(&descriptor)?)?;

                let program = match self.config.child_program {
                    Some(ref program) => program.clone(),
                    None => std::env::current_exe().map_err(|e| {
                        SandboxError::Setup(format!("cannot locate interpreter binary: {}", e))
                    })?,
                };
                let mut cmd = Command::new(program);
                cmd.arg(CHILD_SUBCOMMAND).arg(&descriptor_path);
                cmd
            }
            WorkUnit::Command {
                program, args, cwd, ..
            } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }
                cmd
            }
        };

        cmd.env(RESULT_PATH_ENV, result_path);
        for (key, value) in &self.config.env_vars {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        Ok(cmd)
    }

    /// Kills the child's process group and every descendant, then reaps it.
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        if let Some(pid) = pid {
            let tree = process_tree::descendants(pid);
            debug!(pid, descendants = tree.len(), "Killing sandbox process tree");
            process_tree::kill_group(pid).await;
            process_tree::kill_pids(&tree).await;
        }
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "start_kill on sandbox child failed");
        }
        if tokio::time::timeout(self.config.kill_grace, child.wait())
            .await
            .is_err()
        {
            warn!(pid = ?pid, "Sandbox child not reaped within grace period");
        }
    }

    /// Waits for the output pumps to drain. Returns false on grace expiry.
    async fn join_pumps(&self, pumps: &mut [JoinHandle<()>]) -> bool {
        let deadline = Instant::now() + self.config.kill_grace;
        for handle in pumps.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                return false;
            }
        }
        true
    }
}

enum Exited {
    Status(ExitStatus),
    WaitFailed(String),
    TimedOut,
}

/// Converts a finished child into a result, reading the result slot.
fn interpret_exit(unit: &WorkUnit, status: ExitStatus, result_path: &Path) -> SandboxResult {
    let posted = read_slot(result_path);

    match unit {
        WorkUnit::Script { .. } => match posted {
            Some(Ok(value)) => match serde_json::from_value::<SandboxResult>(value) {
                Ok(result) => result,
                Err(e) => SandboxResult::abnormal_exit(format!(
                    "{}, posted result is malformed: {}",
                    describe_status(status),
                    e
                )),
            },
            Some(Err(e)) => SandboxResult::abnormal_exit(format!(
                "{}, result slot unreadable: {}",
                describe_status(status),
                e
            )),
            None => SandboxResult::abnormal_exit(describe_status(status)),
        },
        WorkUnit::Command { program, .. } => {
            if status.success() {
                match posted {
                    Some(Ok(value)) => SandboxResult::success(value),
                    Some(Err(e)) => {
                        warn!(error = %e, "Ignoring unreadable result slot from command");
                        SandboxResult::success(Value::Null)
                    }
                    None => SandboxResult::success(Value::Null),
                }
            } else {
                SandboxResult::failure(
                    format!("NonZeroExit: '{}' {}", program, describe_status(status)),
                    String::new(),
                )
            }
        }
    }
}

fn read_slot(path: &Path) -> Option<Result<Value, String>> {
    if !path.exists() {
        return None;
    }
    Some(
        std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string())),
    )
}

fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with code {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        _ => "exited with unknown status".to_string(),
    }
}

#[derive(Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

/// Bounded capture that keeps the most recent bytes.
#[derive(Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    dropped: usize,
}

impl CaptureBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > MAX_CAPTURE_BYTES {
            let excess = self.bytes.len() - MAX_CAPTURE_BYTES;
            self.bytes.drain(..excess);
            self.dropped += excess;
        }
    }

    fn render(&self) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        if self.dropped > 0 {
            format!("[... {} earlier bytes dropped]\n{}", self.dropped, text)
        } else {
            text.into_owned()
        }
    }
}

fn take_capture(buffer: &Arc<Mutex<CaptureBuffer>>) -> String {
    match buffer.lock() {
        Ok(guard) => guard.render(),
        Err(poisoned) => poisoned.into_inner().render(),
    }
}

/// Copies one child stream into the capture buffer, optionally echoing it.
fn pump<R>(
    mut reader: R,
    echo: Echo,
    forward: bool,
    buffer: Arc<Mutex<CaptureBuffer>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            if forward {
                let _ = match echo {
                    Echo::Stdout => tokio::io::stdout().write_all(&chunk[..n]).await,
                    Echo::Stderr => tokio::io::stderr().write_all(&chunk[..n]).await,
                };
            }
            match buffer.lock() {
                Ok(mut guard) => guard.push(&chunk[..n]),
                Err(poisoned) => poisoned.into_inner().push(&chunk[..n]),
            }
        }
    })
}

fn abort_pumps(pumps: &mut [JoinHandle<()>]) {
    for handle in pumps.iter() {
        handle.abort();
    }
}
