// Hook definitions and per-run hook results

use crate::error::{ConfigError, Result};
use crate::registry::ToolCommandRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(300);

/// Pipeline stage a hook belongs to. The two stages run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    Fast,
    Comprehensive,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::Fast => "fast",
            HookStage::Comprehensive => "comprehensive",
        }
    }

    pub fn all() -> [HookStage; 2] {
        [HookStage::Fast, HookStage::Comprehensive]
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative metadata for one hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDefinition {
    pub name: String,
    /// Registry entry providing the base argv. Defaults to `name`.
    pub tool: String,
    /// Extra arguments appended to the registry argv.
    pub args: Vec<String>,
    pub stage: HookStage,
    pub depends_on: BTreeSet<String>,
    pub timeout: Duration,
    /// The hook rewrites files under test.
    pub is_formatting: bool,
    /// Retry once when the run ends ERRORED.
    pub retry_on_failure: bool,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl HookDefinition {
    pub fn new(name: impl Into<String>, stage: HookStage) -> Self {
        let name = name.into();
        Self {
            tool: name.clone(),
            name,
            args: Vec::new(),
            stage,
            depends_on: BTreeSet::new(),
            timeout: DEFAULT_HOOK_TIMEOUT,
            is_formatting: false,
            retry_on_failure: false,
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    pub fn with_args(mut self, args: Vec<impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn formatting(mut self, is_formatting: bool) -> Self {
        self.is_formatting = is_formatting;
        self
    }

    pub fn with_retry_on_failure(mut self, retry: bool) -> Self {
        self.retry_on_failure = retry;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Full argv: the registry command followed by the hook's own args.
    pub fn argv(&self, registry: &ToolCommandRegistry) -> Result<Vec<String>> {
        let mut argv = registry.get_command(&self.tool)?.to_vec();
        argv.extend(self.args.iter().cloned());
        Ok(argv)
    }
}

/// Frozen, validated set of hook definitions.
///
/// Registration happens once; afterwards the set is only read, and clones
/// share the same definitions.
#[derive(Debug, Clone)]
pub struct HookSet {
    hooks: Arc<Vec<HookDefinition>>,
    index: Arc<HashMap<String, usize>>,
}

impl HookSet {
    /// Validate and freeze `hooks`.
    ///
    /// Rejects duplicate names, dependencies on unregistered hooks, dependencies
    /// that cross stages, and tools missing from `registry`. Cycles are left to
    /// the wave scheduler, which reports the hooks involved.
    pub fn new(hooks: Vec<HookDefinition>, registry: &ToolCommandRegistry) -> Result<Self> {
        let mut index = HashMap::with_capacity(hooks.len());
        for (i, hook) in hooks.iter().enumerate() {
            if index.insert(hook.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateHook {
                    hook: hook.name.clone(),
                }
                .into());
            }
        }

        for hook in &hooks {
            registry.get_command(&hook.tool)?;
            if hook.timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("hooks.{}.timeout", hook.name),
                    value: "0".to_string(),
                    message: "timeout must be greater than zero".to_string(),
                }
                .into());
            }

            for dependency in &hook.depends_on {
                let Some(&dep_idx) = index.get(dependency) else {
                    return Err(ConfigError::MissingDependency {
                        hook: hook.name.clone(),
                        dependency: dependency.clone(),
                    }
                    .into());
                };
                let dep = &hooks[dep_idx];
                if dep.stage != hook.stage {
                    return Err(ConfigError::CrossStageDependency {
                        hook: hook.name.clone(),
                        hook_stage: hook.stage.to_string(),
                        dependency: dep.name.clone(),
                        dependency_stage: dep.stage.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(Self {
            hooks: Arc::new(hooks),
            index: Arc::new(index),
        })
    }

    pub fn get(&self, name: &str) -> Option<&HookDefinition> {
        self.index.get(name).map(|&i| &self.hooks[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &HookDefinition> {
        self.hooks.iter()
    }

    pub fn for_stage(&self, stage: HookStage) -> Vec<&HookDefinition> {
        self.hooks.iter().filter(|h| h.stage == stage).collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Lifecycle of one hook within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Pending,
    Running,
    Passed,
    /// The tool ran and reported findings.
    Failed,
    TimedOut,
    /// The tool could not run properly: spawn failure or crash.
    Errored,
    /// Never started because an earlier blocking hook did not pass.
    Skipped,
}

impl HookStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HookStatus::Pending | HookStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HookStatus::Passed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookStatus::Pending => "pending",
            HookStatus::Running => "running",
            HookStatus::Passed => "passed",
            HookStatus::Failed => "failed",
            HookStatus::TimedOut => "timed_out",
            HookStatus::Errored => "errored",
            HookStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for HookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running (or skipping) one hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookResult {
    pub hook: String,
    pub stage: HookStage,
    pub status: HookStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// `None` until parsed, and stays `None` when the output is unrecognized.
    pub issue_count: Option<usize>,
    pub attempts: u32,
    pub stall_warnings: u32,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
}

impl HookResult {
    pub fn new(hook: impl Into<String>, stage: HookStage) -> Self {
        Self {
            hook: hook.into(),
            stage,
            status: HookStatus::Pending,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            issue_count: None,
            attempts: 0,
            stall_warnings: 0,
            error: None,
            skip_reason: None,
        }
    }

    pub fn skipped(hook: impl Into<String>, stage: HookStage, reason: impl Into<String>) -> Self {
        let mut result = Self::new(hook, stage);
        result.status = HookStatus::Skipped;
        result.skip_reason = Some(reason.into());
        result
    }

    pub fn with_status(mut self, status: HookStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.status.is_success()
    }

    /// Combined stdout and stderr, the text issue parsers read.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}
