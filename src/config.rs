//! Engine configuration.
//!
//! Collects the knobs shared by the synthesizer, the sandbox runner and the
//! repair orchestrator: round budget, execution timeout, model selection,
//! artifact location and failure markers.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Output fragments that mark a round as failed even when the program exits
/// cleanly. Generated code regularly catches its own errors and prints them.
pub const DEFAULT_ERROR_MARKERS: &[&str] = &[
    "Traceback (most recent call last)",
    "ErrorInFunctionCall",
    "ErrorRuntime",
    "panicked at",
    "Error:",
    "Exception:",
];

/// Configuration for the code-generation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Artifact settings
    /// Root directory under which every run gets its own subdirectory.
    pub work_dir: PathBuf,

    // Repair settings
    /// Maximum number of execute rounds per (task, function).
    pub max_rounds: u32,
    /// Case-sensitive substrings that mark captured output as failed.
    pub error_markers: Vec<String>,

    // Sandbox settings
    /// Wall-clock limit for one sandboxed execution.
    pub sandbox_timeout: Duration,
    /// How long to wait for a killed child to be reaped.
    pub kill_grace: Duration,
    /// Whether child stdout/stderr is also forwarded to this process.
    pub echo_output: bool,
    /// Program used to interpret script work units. `None` means the
    /// current executable.
    pub child_program: Option<PathBuf>,

    // LLM settings
    /// Model used for initial synthesis.
    pub synth_model: String,
    /// Model used for repair requests.
    pub repair_model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./codeforge-runs"),

            max_rounds: 5,
            error_markers: DEFAULT_ERROR_MARKERS.iter().map(|s| s.to_string()).collect(),

            sandbox_timeout: Duration::from_secs(60),
            kill_grace: Duration::from_secs(2),
            echo_output: true,
            child_program: None,

            // Empty means "use the client's default model".
            synth_model: String::new(),
            repair_model: String::new(),
            temperature: 0.2,
            max_tokens: 8000,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CODEFORGE_WORK_DIR`: Artifact root (default: ./codeforge-runs)
    /// - `CODEFORGE_MAX_ROUNDS`: Round budget per function (default: 5)
    /// - `CODEFORGE_ERROR_MARKERS`: `|`-separated failure markers
    /// - `CODEFORGE_SANDBOX_TIMEOUT_SECS`: Execution timeout (default: 60)
    /// - `CODEFORGE_KILL_GRACE_MS`: Reap grace after kill (default: 2000)
    /// - `CODEFORGE_ECHO_OUTPUT`: Forward child output (default: true)
    /// - `CODEFORGE_CHILD_PROGRAM`: Script interpreter binary
    /// - `CODEFORGE_SYNTH_MODEL`: Synthesis model
    /// - `CODEFORGE_REPAIR_MODEL`: Repair model
    /// - `CODEFORGE_TEMPERATURE`: Sampling temperature (default: 0.2)
    /// - `CODEFORGE_MAX_TOKENS`: Completion limit (default: 8000)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CODEFORGE_WORK_DIR") {
            config.work_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CODEFORGE_MAX_ROUNDS") {
            config.max_rounds = parse_env_value(&val, "CODEFORGE_MAX_ROUNDS")?;
        }

        if let Ok(val) = std::env::var("CODEFORGE_ERROR_MARKERS") {
            config.error_markers = val
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(val) = std::env::var("CODEFORGE_SANDBOX_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CODEFORGE_SANDBOX_TIMEOUT_SECS")?;
            config.sandbox_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("CODEFORGE_KILL_GRACE_MS") {
            let ms: u64 = parse_env_value(&val, "CODEFORGE_KILL_GRACE_MS")?;
            config.kill_grace = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("CODEFORGE_ECHO_OUTPUT") {
            config.echo_output = parse_env_bool(&val, "CODEFORGE_ECHO_OUTPUT")?;
        }

        if let Ok(val) = std::env::var("CODEFORGE_CHILD_PROGRAM") {
            config.child_program = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("CODEFORGE_SYNTH_MODEL") {
            config.synth_model = val;
        }

        if let Ok(val) = std::env::var("CODEFORGE_REPAIR_MODEL") {
            config.repair_model = val;
        }

        if let Ok(val) = std::env::var("CODEFORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "CODEFORGE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("CODEFORGE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "CODEFORGE_MAX_TOKENS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_rounds must be greater than 0".to_string(),
            ));
        }

        if self.sandbox_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sandbox_timeout must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "work_dir cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the artifact root.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Builder method to set the round budget.
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Builder method to set the sandbox timeout.
    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    /// Builder method to set the kill grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Builder method to toggle output forwarding.
    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    /// Builder method to set the script interpreter binary.
    pub fn with_child_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.child_program = Some(program.into());
        self
    }

    /// Builder method to set both synthesis and repair models.
    pub fn with_models(mut self, synth: impl Into<String>, repair: impl Into<String>) -> Self {
        self.synth_model = synth.into();
        self.repair_model = repair.into();
        self
    }

    /// Builder method to replace the failure markers.
    pub fn with_error_markers(mut self, markers: Vec<String>) -> Self {
        self.error_markers = markers;
        self
    }
}

/// Parses a value from an environment variable string.
fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parses a boolean from an environment variable string.
fn parse_env_bool(val: &str, key: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", val),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.sandbox_timeout, Duration::from_secs(60));
        assert!(!config.error_markers.is_empty());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let config = EngineConfig::new().with_max_rounds(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_rounds"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig::new().with_sandbox_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temperature_range() {
        let mut config = EngineConfig::new();
        config.temperature = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_work_dir("/tmp/forge")
            .with_max_rounds(3)
            .with_kill_grace(Duration::from_millis(250))
            .with_echo_output(false)
            .with_models("synth-model", "repair-model");

        assert_eq!(config.work_dir, PathBuf::from("/tmp/forge"));
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.kill_grace, Duration::from_millis(250));
        assert!(!config.echo_output);
        assert_eq!(config.synth_model, "synth-model");
        assert_eq!(config.repair_model, "repair-model");
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("yes", "K").unwrap());
        assert!(!parse_env_bool("0", "K").unwrap());
        assert!(parse_env_bool("maybe", "K").is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let rounds: u32 = parse_env_value(" 7 ", "K").unwrap();
        assert_eq!(rounds, 7);
        let err = parse_env_value::<u32>("seven", "CODEFORGE_MAX_ROUNDS").unwrap_err();
        assert!(err.to_string().contains("CODEFORGE_MAX_ROUNDS"));
    }
}
