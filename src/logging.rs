// Structured logging for Qualgate
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format (pretty for terminals, json for programmatic use)
    pub format: LogFormat,
    /// Color output configuration
    pub color: ColorConfig,
    /// Whether to show targets (module names)
    pub show_targets: bool,
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    Pretty,
    /// One JSON object per event, for log shippers
    Json,
    Compact,
}

/// Color output configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorConfig {
    /// Automatically detect if colors should be used
    Auto,
    Always,
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            color: ColorConfig::Auto,
            show_targets: false,
        }
    }
}

impl LogConfig {
    /// Build a configuration from the usual verbosity switches of a front end
    pub fn from_flags(verbose: bool, quiet: bool, color: Option<&str>) -> Self {
        let level = if quiet {
            Level::ERROR
        } else if verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };

        let color = match color {
            Some("always") => ColorConfig::Always,
            Some("never") => ColorConfig::Never,
            _ => ColorConfig::Auto,
        };

        Self {
            level,
            color,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Check if colors should be used based on configuration and terminal
    pub fn should_use_colors(&self) -> bool {
        match self.color {
            ColorConfig::Always => true,
            ColorConfig::Never => false,
            ColorConfig::Auto => {
                io::stderr().is_terminal()
                    && std::env::var("TERM").map_or(true, |term| term != "dumb")
                    && std::env::var("NO_COLOR").is_err()
            }
        }
    }

    /// Filter applied when `RUST_LOG` is not set
    pub fn default_directive(&self) -> String {
        format!("qualgate={}", self.level)
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));
    let ansi = config.should_use_colors();

    let installed = match config.format {
        LogFormat::Pretty => fmt()
            .with_env_filter(env_filter)
            .with_target(config.show_targets)
            .with_ansi(ansi)
            .with_writer(io::stderr)
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(env_filter)
            .json()
            .with_writer(io::stderr)
            .try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(env_filter)
            .compact()
            .with_target(config.show_targets)
            .with_ansi(ansi)
            .with_writer(io::stderr)
            .try_init(),
    };

    installed.map_err(|e| {
        ConfigError::InvalidValue {
            field: "logging".to_string(),
            value: format!("{:?}", config.format),
            message: e.to_string(),
        }
        .into()
    })
}

/// Span and event helpers shared by the orchestrator and the fix loop
pub mod utils {
    use crate::hook::{HookResult, HookStage, HookStatus};
    use tracing::{error, info, span, warn, Level, Span};

    pub fn run_span(run_id: &str) -> Span {
        span!(Level::INFO, "orchestration", run_id = %run_id)
    }

    pub fn stage_span(stage: HookStage) -> Span {
        span!(Level::INFO, "stage", stage = %stage)
    }

    pub fn wave_span(stage: HookStage, wave: usize, size: usize) -> Span {
        span!(Level::DEBUG, "wave", stage = %stage, wave = wave, size = size)
    }

    pub fn hook_execution_span(hook: &str, stage: HookStage) -> Span {
        span!(Level::INFO, "hook_execution", hook = %hook, stage = %stage)
    }

    pub fn fix_iteration_span(iteration: u32) -> Span {
        span!(Level::INFO, "fix_iteration", iteration = iteration)
    }

    /// Log hook execution completion at a level matching its status
    pub fn log_hook_completion(result: &HookResult) {
        let duration_ms = result.duration.as_millis() as u64;
        match result.status {
            HookStatus::Passed => info!(
                hook = %result.hook,
                duration_ms,
                attempts = result.attempts,
                "Hook passed"
            ),
            HookStatus::Failed => warn!(
                hook = %result.hook,
                duration_ms,
                exit_code = ?result.exit_code,
                "Hook reported findings"
            ),
            HookStatus::Skipped => info!(
                hook = %result.hook,
                reason = ?result.skip_reason,
                "Hook skipped"
            ),
            status => error!(
                hook = %result.hook,
                duration_ms,
                status = %status,
                error = ?result.error,
                "Hook did not complete"
            ),
        }
    }
}
