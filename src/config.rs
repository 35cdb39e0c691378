// Configuration handling for Qualgate
// Loading from disk belongs to the caller; this module parses and validates YAML text.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::autofix::AutofixConfig;
use crate::error::{ConfigError, QualgateError, Result};
use crate::hook::{HookDefinition, HookSet, HookStage};
use crate::monitor::MonitorConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::registry::ToolCommandRegistry;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QualgateConfig {
    pub monitor: MonitorConfig,
    pub orchestrator: OrchestratorConfig,
    pub autofix: AutofixConfig,
    /// Extra or overriding tool commands, merged over the built-in registry.
    pub tools: BTreeMap<String, Vec<String>>,
    pub hooks: Vec<HookEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookEntry {
    pub name: String,
    pub tool: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub stage: HookStage,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub formatting: bool,
    #[serde(default)]
    pub retry_on_failure: bool,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl HookEntry {
    pub fn to_definition(&self, default_timeout: Duration) -> Result<HookDefinition> {
        let timeout = match self.timeout_secs {
            Some(secs) => positive_duration(&format!("hooks.{}.timeout_secs", self.name), secs)?,
            None => default_timeout,
        };

        let mut hook = HookDefinition::new(&self.name, self.stage)
            .with_args(self.args.clone())
            .with_dependencies(self.depends_on.iter().cloned())
            .with_timeout(timeout)
            .formatting(self.formatting)
            .with_retry_on_failure(self.retry_on_failure);
        if let Some(ref tool) = self.tool {
            hook = hook.with_tool(tool);
        }
        if let Some(ref dir) = self.working_dir {
            hook = hook.with_working_dir(dir);
        }
        hook.env = self.env.clone();
        Ok(hook)
    }
}

impl QualgateConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QualgateConfig = serde_yaml::from_str(yaml).map_err(QualgateError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let monitor = &self.monitor;
        if monitor.sample_interval.is_zero() {
            return Err(invalid(
                "monitor.sample_interval",
                "0",
                "sample interval must be greater than zero",
            ));
        }
        if !(0.0..=100.0).contains(&monitor.cpu_threshold) {
            return Err(invalid(
                "monitor.cpu_threshold",
                &monitor.cpu_threshold.to_string(),
                "CPU threshold must be a percentage between 0 and 100",
            ));
        }
        if monitor.stall_timeout < monitor.sample_interval {
            tracing::warn!(
                stall_timeout = ?monitor.stall_timeout,
                sample_interval = ?monitor.sample_interval,
                "Stall timeout is shorter than one sample interval"
            );
        }

        if self.orchestrator.max_concurrency == 0 {
            return Err(invalid(
                "orchestrator.max_concurrency",
                "0",
                "concurrency ceiling must be at least 1",
            ));
        }
        if self.orchestrator.default_hook_timeout.is_zero() {
            return Err(invalid(
                "orchestrator.default_hook_timeout",
                "0",
                "default hook timeout must be greater than zero",
            ));
        }

        let autofix = &self.autofix;
        if autofix.max_iterations == 0 {
            return Err(invalid(
                "autofix.max_iterations",
                "0",
                "at least one iteration is required",
            ));
        }
        if !(0.0..=1.0).contains(&autofix.min_confidence) {
            return Err(invalid(
                "autofix.min_confidence",
                &autofix.min_confidence.to_string(),
                "confidence must lie in [0, 1]",
            ));
        }

        for (name, argv) in &self.tools {
            if argv.is_empty() {
                return Err(invalid(
                    &format!("tools.{name}"),
                    "[]",
                    "command argv must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// Built-in tool registry with this config's `tools` merged over it.
    pub fn tool_registry(&self) -> ToolCommandRegistry {
        let mut registry = ToolCommandRegistry::with_builtin_tools();
        for (name, argv) in &self.tools {
            registry.register(name.clone(), argv.clone());
        }
        registry
    }

    /// Convert the hook entries into a validated, frozen hook set.
    pub fn hook_set(&self, registry: &ToolCommandRegistry) -> Result<HookSet> {
        let hooks = self
            .hooks
            .iter()
            .map(|entry| entry.to_definition(self.orchestrator.default_hook_timeout))
            .collect::<Result<Vec<_>>>()?;
        HookSet::new(hooks, registry)
    }
}

fn invalid(field: &str, value: &str, message: &str) -> QualgateError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn positive_duration(field: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid(
            field,
            &secs.to_string(),
            "duration must be a positive number of seconds",
        ));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| invalid(field, &secs.to_string(), &format!("duration out of range: {e}")))
}

/// Serde adapter storing a `Duration` as fractional seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "expected a non-negative number of seconds, got {secs}"
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(|e| {
            serde::de::Error::custom(format!("{secs} seconds is out of range: {e}"))
        })
    }
}
