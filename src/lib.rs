// Qualgate - Library module
// Dependency-aware quality hook orchestration and autofix convergence

pub mod autofix;
pub mod config;
pub mod error;
pub mod executor;
pub mod hook;
pub mod issues;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod scheduler;

// Re-export main types for easier access
pub use autofix::{
    AgentContribution, AutofixConfig, AutofixCoordinator, ContributionStatus, ConvergenceOutcome,
    ConvergenceReport, FixAgent, FixIteration, FixRequest, FixResult, HookIssueSource, IssueSource,
};
pub use config::{HookEntry, QualgateConfig};
pub use error::{
    exit_codes, ConfigError, ConvergenceError, HookExecutionError, ParseError, QualgateError,
    Result,
};
pub use executor::{classify_exit, HookExecutor, HookRunner, RunContext};
pub use hook::{HookDefinition, HookResult, HookSet, HookStage, HookStatus};
pub use issues::{
    deduplicate, normalize_message, ComplexityParser, Issue, IssueCategory, IssueCollector,
    IssueKey, IssueSnapshot, JsonParser, LineParser, OutputParser, RustcBlockParser, Severity,
    ToolAdapter,
};
pub use logging::{init_logging, ColorConfig, LogConfig, LogFormat};
pub use monitor::{
    LogStallHandler, MetricsSampler, MonitorConfig, ProcessMetrics, ProcessMonitor, SampleVerdict,
    StallEvent, StallHandler, SysinfoSampler,
};
pub use orchestrator::{ExecutionReport, HookOrchestrator, OrchestratorConfig, StageReport};
pub use registry::ToolCommandRegistry;
pub use report::{QualityReport, StatusSummary};
pub use scheduler::{
    critical_path, critical_path_len, dependency_map, DependencyMap, DependencyWaveScheduler,
    ExecutionWave,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get formatted version string
pub fn version_info() -> String {
    format!("{NAME} {VERSION}")
}
