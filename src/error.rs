// Error handling framework for Qualgate
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QualgateError>;

/// Main error type for Qualgate with its error hierarchy
#[derive(Debug, Error)]
pub enum QualgateError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<ConfigError>),

    #[error("Hook execution failed: {0}")]
    HookExecution(#[from] Box<HookExecutionError>),

    #[error("Output parsing failed: {0}")]
    Parse(#[from] Box<ParseError>),

    #[error("Autofix convergence failed: {0}")]
    Convergence(#[from] Box<ConvergenceError>),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors. All of these are fatal and raised before any hook runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cyclic hook dependency between: {}", hooks.join(", "))]
    CyclicDependency {
        hooks: Vec<String>,
        cycles: Vec<Vec<String>>,
    },

    #[error("Unknown tool: {name}")]
    UnknownTool {
        name: String,
        available: Vec<String>,
    },

    #[error("Hook '{hook}' depends on unregistered hook '{dependency}'")]
    MissingDependency { hook: String, dependency: String },

    #[error("Hook '{hook}' is registered more than once")]
    DuplicateHook { hook: String },

    #[error(
        "Hook '{hook}' ({hook_stage}) depends on '{dependency}' ({dependency_stage}) in another stage"
    )]
    CrossStageDependency {
        hook: String,
        hook_stage: String,
        dependency: String,
        dependency_stage: String,
    },

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    #[error("Invalid YAML syntax: {message}")]
    InvalidYaml {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
    },
}

/// Hook execution errors. These are isolated to the hook that raised them.
#[derive(Debug, Error)]
pub enum HookExecutionError {
    #[error("Command not found: {command}")]
    CommandNotFound {
        hook: String,
        command: String,
        suggestion: Option<String>,
    },

    #[error("Process spawn failed for {hook}: {error}")]
    SpawnFailed {
        hook: String,
        command: String,
        error: String,
    },

    #[error("Hook execution timeout after {timeout:?}: {hook}")]
    Timeout { hook: String, timeout: Duration },

    #[error("Hook {hook} terminated without an exit code")]
    Crashed { hook: String, stderr: String },

    #[error("Hook {hook} exited with code {exit_code} without producing output")]
    NoOutput { hook: String, exit_code: i32 },

    #[error("Hook {hook} exited with code {exit_code} without a recognizable diagnostic")]
    UnrecognizedFailure {
        hook: String,
        exit_code: i32,
        sample: String,
    },

    #[error("Waiting on hook {hook} failed: {error}")]
    WaitFailed { hook: String, error: String },

    #[error("Process termination failed for pid {pid}: {error}")]
    TerminationFailed { pid: u32, error: String },
}

/// Raised when a failing hook's output has a shape no parser recognizes.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unrecognized output from {tool}; issue count unknown, needs manual inspection")]
    UnrecognizedOutput { tool: String, sample: String },

    #[error("Malformed JSON output from {tool}: {message}")]
    InvalidJson { tool: String, message: String },
}

/// Errors raised while driving the collect/fix/verify loop.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    #[error("Issue collection failed during {phase} of iteration {iteration}: {message}")]
    CollectFailed {
        phase: String,
        iteration: u32,
        message: String,
    },

    #[error("Issue count unknown for {}: output could not be parsed", hooks.join(", "))]
    UnknownIssueCount { hooks: Vec<String> },

    #[error("Fix agent {agent} failed: {message}")]
    AgentFailed { agent: String, message: String },

    #[error("Working directory does not exist: {}", path.display())]
    MissingWorkingDirectory { path: PathBuf },
}

/// Format errors with colors and context
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Format an error with context and colors
    pub fn format_error(&self, error: &QualgateError) -> String {
        use tracing::error;

        match error {
            QualgateError::Config(_) => {
                error!(error_type = "config", error = %error, "Configuration error occurred");
            }
            QualgateError::HookExecution(_) => {
                error!(error_type = "hook_execution", error = %error, "Hook execution failed");
            }
            QualgateError::Parse(_) => {
                error!(error_type = "parse", error = %error, "Output parsing failed");
            }
            QualgateError::Convergence(_) => {
                error!(error_type = "convergence", error = %error, "Autofix convergence failed");
            }
            QualgateError::Io(_) => {
                error!(error_type = "io", error = %error, "IO operation failed");
            }
            QualgateError::Json(_) => {
                error!(error_type = "json", error = %error, "JSON serialization failed");
            }
        }

        let mut output = String::new();

        if self.use_colors {
            output.push_str("\x1b[31m");
        }
        output.push_str("Error: ");
        if self.use_colors {
            output.push_str("\x1b[0m");
        }

        output.push_str(&error.to_string());

        match error {
            QualgateError::Config(config_err) => {
                self.add_config_context(&mut output, config_err.as_ref());
            }
            QualgateError::HookExecution(hook_err) => {
                self.add_hook_context(&mut output, hook_err.as_ref());
            }
            QualgateError::Parse(parse_err) => {
                if let ParseError::UnrecognizedOutput { sample, .. } = parse_err.as_ref() {
                    output.push_str(&format!("\n  Output begins: {sample}"));
                }
            }
            _ => {}
        }

        output
    }

    fn add_config_context(&self, output: &mut String, error: &ConfigError) {
        match error {
            ConfigError::CyclicDependency { cycles, .. } => {
                for (i, cycle) in cycles.iter().enumerate() {
                    output.push_str(&format!("\n    cycle {}: {}", i + 1, cycle.join(" -> ")));
                }
                output.push_str("\n  Help: Remove one of the dependencies to break the cycle");
            }
            ConfigError::UnknownTool { available, .. } if !available.is_empty() => {
                output.push_str(&format!("\n  Known tools: {}", available.join(", ")));
            }
            ConfigError::CrossStageDependency { .. } => {
                output.push_str(
                    "\n  Help: Stages run concurrently; move both hooks into the same stage",
                );
            }
            ConfigError::InvalidYaml {
                line: Some(line),
                column,
                ..
            } => {
                output.push_str(&format!("\n  --> line {line}"));
                if let Some(column) = column {
                    output.push_str(&format!(", column {column}"));
                }
            }
            _ => {}
        }
    }

    fn add_hook_context(&self, output: &mut String, error: &HookExecutionError) {
        match error {
            HookExecutionError::CommandNotFound {
                suggestion: Some(suggestion),
                ..
            } => {
                output.push_str(&format!("\n  Help: {suggestion}"));
            }
            HookExecutionError::Crashed { stderr, .. } if !stderr.is_empty() => {
                output.push_str(&format!("\n  Hook output: {stderr}"));
            }
            HookExecutionError::UnrecognizedFailure { sample, .. } => {
                output.push_str(&format!("\n  Hook output: {sample}"));
            }
            HookExecutionError::Timeout { timeout, .. } => {
                output.push_str(&format!("\n  Timeout: {timeout:?}"));
            }
            _ => {}
        }
    }
}

/// Exit codes for callers embedding the orchestrator in a CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const HOOK_FAILURE: i32 = 4;
    pub const TIMEOUT_ERROR: i32 = 6;
    pub const PARSE_ERROR: i32 = 11;
    pub const CONVERGENCE_FAILURE: i32 = 12;
}

impl QualgateError {
    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            QualgateError::Config(_) => exit_codes::CONFIG_ERROR,
            QualgateError::HookExecution(hook_err) => match hook_err.as_ref() {
                HookExecutionError::Timeout { .. } => exit_codes::TIMEOUT_ERROR,
                _ => exit_codes::HOOK_FAILURE,
            },
            QualgateError::Parse(_) => exit_codes::PARSE_ERROR,
            QualgateError::Convergence(_) => exit_codes::CONVERGENCE_FAILURE,
            QualgateError::Io(_) | QualgateError::Json(_) => exit_codes::GENERAL_ERROR,
        }
    }

    /// Create a user-friendly error message with context
    pub fn user_message(&self, use_colors: bool) -> String {
        ErrorFormatter::new(use_colors).format_error(self)
    }

    /// Whether this error must abort a run before any hook executes
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, QualgateError::Config(_))
    }
}

impl From<ConfigError> for QualgateError {
    fn from(error: ConfigError) -> Self {
        QualgateError::Config(Box::new(error))
    }
}

impl From<HookExecutionError> for QualgateError {
    fn from(error: HookExecutionError) -> Self {
        QualgateError::HookExecution(Box::new(error))
    }
}

impl From<ParseError> for QualgateError {
    fn from(error: ParseError) -> Self {
        QualgateError::Parse(Box::new(error))
    }
}

impl From<ConvergenceError> for QualgateError {
    fn from(error: ConvergenceError) -> Self {
        QualgateError::Convergence(Box::new(error))
    }
}

// Conversion from serde_yaml::Error to ConfigError
impl From<serde_yaml::Error> for Box<ConfigError> {
    fn from(error: serde_yaml::Error) -> Self {
        let location = error.location();
        Box::new(ConfigError::InvalidYaml {
            message: error.to_string(),
            line: location.as_ref().map(|l| l.line() as u32),
            column: location.as_ref().map(|l| l.column() as u32),
        })
    }
}

impl From<serde_yaml::Error> for QualgateError {
    fn from(error: serde_yaml::Error) -> Self {
        QualgateError::Config(Box::<ConfigError>::from(error))
    }
}
