// Multi-tier hook orchestration
// Tier 1 runs the two stages concurrently, tier 2 runs a stage's waves in
// order, tier 3 runs the hooks of one wave concurrently (sub-batched by the
// concurrency ceiling).

use crate::config::{duration_secs, QualgateConfig};
use crate::error::{ConfigError, Result};
use crate::executor::{HookExecutor, HookRunner, RunContext, DEFAULT_TERMINATION_GRACE};
use crate::hook::{HookResult, HookSet, HookStage, HookStatus, DEFAULT_HOOK_TIMEOUT};
use crate::logging::utils::{run_span, stage_span, wave_span};
use crate::monitor::{
    LogStallHandler, MetricsSampler, MonitorConfig, ProcessMonitor, StallHandler, SysinfoSampler,
};
use crate::scheduler::{DependencyMap, DependencyWaveScheduler, ExecutionWave};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Most hooks of one wave that run at the same time.
    pub max_concurrency: usize,
    #[serde(with = "duration_secs")]
    pub default_hook_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub termination_grace: Duration,
    pub working_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: num_cpus::get().max(1),
            default_hook_timeout: DEFAULT_HOOK_TIMEOUT,
            termination_grace: DEFAULT_TERMINATION_GRACE,
            working_dir: None,
        }
    }
}

/// Results of one stage, in wave order.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: HookStage,
    pub waves: Vec<ExecutionWave>,
    pub results: Vec<HookResult>,
    /// Formatting hook whose failure skipped the remaining waves.
    pub blocked_by: Option<String>,
    pub duration: Duration,
}

/// Merged results of every stage of one run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub stages: Vec<StageReport>,
    pub duration: Duration,
}

impl ExecutionReport {
    pub fn results(&self) -> impl Iterator<Item = &HookResult> {
        self.stages.iter().flat_map(|s| s.results.iter())
    }

    pub fn get(&self, hook: &str) -> Option<&HookResult> {
        self.results().find(|r| r.hook == hook)
    }

    pub fn stage(&self, stage: HookStage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn all_passed(&self) -> bool {
        self.results().all(HookResult::passed)
    }

    pub fn count(&self, status: HookStatus) -> usize {
        self.results().filter(|r| r.status == status).count()
    }

    /// Hooks that ran and did not pass, in report order.
    pub fn unsuccessful(&self) -> Vec<&str> {
        self.results()
            .filter(|r| !r.passed() && r.status != HookStatus::Skipped)
            .map(|r| r.hook.as_str())
            .collect()
    }

    /// Record parsed issue counts; `None` marks an unknown count.
    pub fn apply_issue_counts(&mut self, counts: &BTreeMap<String, Option<usize>>) {
        for stage in &mut self.stages {
            for result in &mut stage.results {
                if let Some(count) = counts.get(&result.hook) {
                    result.issue_count = *count;
                }
            }
        }
    }
}

pub struct HookOrchestrator {
    hooks: HookSet,
    runner: Arc<dyn HookRunner>,
    config: OrchestratorConfig,
    monitor_config: MonitorConfig,
    sampler: Arc<dyn MetricsSampler>,
    stall_handler: Arc<dyn StallHandler>,
    scheduler: DependencyWaveScheduler,
}

impl HookOrchestrator {
    pub fn new(hooks: HookSet, runner: Arc<dyn HookRunner>, config: OrchestratorConfig) -> Self {
        Self {
            hooks,
            runner,
            config,
            monitor_config: MonitorConfig::default(),
            sampler: Arc::new(SysinfoSampler::new()),
            stall_handler: Arc::new(LogStallHandler),
            scheduler: DependencyWaveScheduler::new(),
        }
    }

    /// Build the production pipeline from a validated configuration.
    pub fn from_config(config: &QualgateConfig) -> Result<Self> {
        let registry = config.tool_registry();
        let hooks = config.hook_set(&registry)?;
        let runner = Arc::new(HookExecutor::new(Arc::new(registry)));
        let orchestrator = Self::new(hooks, runner, config.orchestrator.clone())
            .with_monitor_config(config.monitor.clone());
        orchestrator.plan()?;
        Ok(orchestrator)
    }

    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn MetricsSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_stall_handler(mut self, handler: Arc<dyn StallHandler>) -> Self {
        self.stall_handler = handler;
        self
    }

    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Waves for every stage. Fails on cycles before anything runs.
    pub fn plan(&self) -> Result<BTreeMap<HookStage, Vec<ExecutionWave>>> {
        HookStage::all()
            .into_iter()
            .map(|stage| -> Result<(HookStage, Vec<ExecutionWave>)> {
                let waves = self.scheduler.schedule_map(&self.stage_graph(stage, None))?;
                Ok((stage, waves))
            })
            .collect()
    }

    /// Run both stages concurrently and merge their results.
    pub async fn run(&self) -> Result<ExecutionReport> {
        self.execute(&HookStage::all(), None).await
    }

    pub async fn run_stage(&self, stage: HookStage) -> Result<ExecutionReport> {
        self.execute(&[stage], None).await
    }

    /// Run only the named hooks. Dependencies on hooks outside the selection
    /// are treated as satisfied.
    pub async fn run_hooks<S: AsRef<str>>(&self, names: &[S]) -> Result<ExecutionReport> {
        let mut selection = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            if self.hooks.get(name).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "hooks".to_string(),
                    value: name.to_string(),
                    message: "no hook is registered under this name".to_string(),
                }
                .into());
            }
            selection.insert(name.to_string());
        }
        self.execute(&HookStage::all(), Some(&selection)).await
    }

    fn stage_graph(&self, stage: HookStage, selection: Option<&BTreeSet<String>>) -> DependencyMap {
        let selected = |name: &String| selection.map_or(true, |s| s.contains(name));
        self.hooks
            .for_stage(stage)
            .into_iter()
            .filter(|hook| selected(&hook.name))
            .map(|hook| {
                let deps = hook.depends_on.iter().filter(|d| selected(*d)).cloned().collect();
                (hook.name.clone(), deps)
            })
            .collect()
    }

    /// Fresh per-run context; monitor counters never outlive the run.
    fn context(&self) -> RunContext {
        let monitor = ProcessMonitor::new(
            self.monitor_config.clone(),
            Arc::clone(&self.sampler),
            Arc::clone(&self.stall_handler),
        );
        let mut ctx = RunContext::new(Arc::new(monitor))
            .with_termination_grace(self.config.termination_grace);
        if let Some(ref dir) = self.config.working_dir {
            ctx = ctx.with_working_dir(dir);
        }
        ctx
    }

    async fn execute(
        &self,
        stages: &[HookStage],
        selection: Option<&BTreeSet<String>>,
    ) -> Result<ExecutionReport> {
        let mut plans = Vec::with_capacity(stages.len());
        for &stage in stages {
            let waves = self
                .scheduler
                .schedule_map(&self.stage_graph(stage, selection))?;
            plans.push((stage, waves));
        }

        let ctx = self.context();
        let span = run_span(&ctx.run_id);
        let started = Instant::now();

        let stage_reports = join_all(
            plans
                .into_iter()
                .map(|(stage, waves)| self.run_waves(stage, waves, &ctx)),
        )
        .instrument(span)
        .await;

        let report = ExecutionReport {
            run_id: ctx.run_id.clone(),
            stages: stage_reports,
            duration: started.elapsed(),
        };
        tracing::info!(
            run_id = %report.run_id,
            passed = report.count(HookStatus::Passed),
            failed = report.count(HookStatus::Failed),
            timed_out = report.count(HookStatus::TimedOut),
            errored = report.count(HookStatus::Errored),
            skipped = report.count(HookStatus::Skipped),
            duration_ms = report.duration.as_millis() as u64,
            "Hook run finished"
        );
        Ok(report)
    }

    async fn run_waves(
        &self,
        stage: HookStage,
        waves: Vec<ExecutionWave>,
        ctx: &RunContext,
    ) -> StageReport {
        let started = Instant::now();
        let mut results = Vec::new();
        let mut blocked_by: Option<String> = None;

        async {
            for wave in &waves {
                if let Some(ref blocker) = blocked_by {
                    let reason = format!("formatting hook '{blocker}' did not pass");
                    results.extend(
                        wave.hooks
                            .iter()
                            .map(|hook| HookResult::skipped(hook, stage, reason.clone())),
                    );
                    continue;
                }

                let wave_results = self
                    .run_wave(wave, ctx)
                    .instrument(wave_span(stage, wave.index, wave.len()))
                    .await;

                blocked_by = wave_results
                    .iter()
                    .find(|r| {
                        !r.passed() && self.hooks.get(&r.hook).is_some_and(|h| h.is_formatting)
                    })
                    .map(|r| r.hook.clone());
                if let Some(ref blocker) = blocked_by {
                    tracing::warn!(
                        stage = %stage,
                        hook = %blocker,
                        "Formatting hook did not pass; skipping remaining waves"
                    );
                }
                results.extend(wave_results);
            }
        }
        .instrument(stage_span(stage))
        .await;

        StageReport {
            stage,
            waves,
            results,
            blocked_by,
            duration: started.elapsed(),
        }
    }

    async fn run_wave(&self, wave: &ExecutionWave, ctx: &RunContext) -> Vec<HookResult> {
        let mut results = Vec::with_capacity(wave.len());
        for batch in wave.sub_batches(self.config.max_concurrency) {
            let runs = batch
                .iter()
                .filter_map(|name| self.hooks.get(name))
                .map(|hook| self.runner.run(hook, ctx));
            results.extend(join_all(runs).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookDefinition;
    use crate::registry::ToolCommandRegistry;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runner that reports a scripted status after a short delay and tracks
    /// how many hooks are in flight.
    #[derive(Default)]
    struct ScriptedRunner {
        outcomes: HashMap<String, HookStatus>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(outcomes: &[(&str, HookStatus)], delay: Duration) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(name, status)| (name.to_string(), *status))
                    .collect(),
                delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl HookRunner for ScriptedRunner {
        async fn run(&self, hook: &HookDefinition, _ctx: &RunContext) -> HookResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.order.lock().push(hook.name.clone());
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let status = self
                .outcomes
                .get(&hook.name)
                .copied()
                .unwrap_or(HookStatus::Passed);
            let mut result = HookResult::new(&hook.name, hook.stage).with_status(status);
            result.attempts = 1;
            result
        }
    }

    fn hook_set(hooks: Vec<HookDefinition>) -> HookSet {
        let mut registry = ToolCommandRegistry::new();
        for hook in &hooks {
            registry.register(hook.tool.clone(), vec!["true".to_string()]);
        }
        HookSet::new(hooks, &registry).unwrap()
    }

    fn orchestrator(
        hooks: Vec<HookDefinition>,
        runner: Arc<ScriptedRunner>,
        ceiling: usize,
    ) -> HookOrchestrator {
        let config = OrchestratorConfig {
            max_concurrency: ceiling,
            ..OrchestratorConfig::default()
        };
        HookOrchestrator::new(hook_set(hooks), runner, config)
    }

    #[tokio::test]
    async fn test_independent_hooks_pass_in_one_wave() {
        let runner = Arc::new(ScriptedRunner::new(&[], Duration::from_millis(5)));
        let orch = orchestrator(
            vec![
                HookDefinition::new("a", HookStage::Fast),
                HookDefinition::new("b", HookStage::Fast),
                HookDefinition::new("c", HookStage::Fast),
            ],
            runner.clone(),
            8,
        );

        let report = orch.run().await.unwrap();
        let fast = report.stage(HookStage::Fast).unwrap();
        assert_eq!(fast.waves.len(), 1);
        assert_eq!(report.count(HookStatus::Passed), 3);
        assert!(report.all_passed());
        assert_eq!(runner.peak.load(Ordering::SeqCst), 3);
    }

    async fn assert_formatter_blocks(outcome: HookStatus) {
        let runner = Arc::new(ScriptedRunner::new(&[("a", outcome)], Duration::from_millis(1)));
        let orch = orchestrator(
            vec![
                HookDefinition::new("a", HookStage::Fast).formatting(true),
                HookDefinition::new("b", HookStage::Fast).with_dependencies(["a"]),
                HookDefinition::new("c", HookStage::Fast).with_dependencies(["a"]),
            ],
            runner.clone(),
            8,
        );

        let report = orch.run().await.unwrap();
        let fast = report.stage(HookStage::Fast).unwrap();
        let waves: Vec<Vec<String>> = fast.waves.iter().map(|w| w.hooks.clone()).collect();
        assert_eq!(waves, vec![vec!["a"], vec!["b", "c"]]);
        assert_eq!(report.get("a").unwrap().status, outcome);
        assert_eq!(fast.blocked_by.as_deref(), Some("a"), "{outcome} formatter");
        assert_eq!(report.get("b").unwrap().status, HookStatus::Skipped);
        assert_eq!(report.get("c").unwrap().status, HookStatus::Skipped);
        assert_eq!(*runner.order.lock(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_formatting_hook_skips_later_waves() {
        assert_formatter_blocks(HookStatus::Failed).await;
    }

    #[tokio::test]
    async fn test_timed_out_formatting_hook_skips_later_waves() {
        assert_formatter_blocks(HookStatus::TimedOut).await;
    }

    #[tokio::test]
    async fn test_errored_formatting_hook_skips_later_waves() {
        assert_formatter_blocks(HookStatus::Errored).await;
    }

    #[tokio::test]
    async fn test_failed_non_formatting_hook_does_not_block() {
        let runner = Arc::new(ScriptedRunner::new(
            &[("a", HookStatus::TimedOut)],
            Duration::from_millis(1),
        ));
        let orch = orchestrator(
            vec![
                HookDefinition::new("a", HookStage::Fast),
                HookDefinition::new("b", HookStage::Fast).with_dependencies(["a"]),
            ],
            runner,
            8,
        );

        let report = orch.run().await.unwrap();
        assert_eq!(report.get("a").unwrap().status, HookStatus::TimedOut);
        assert_eq!(report.get("b").unwrap().status, HookStatus::Passed);
        assert_eq!(report.unsuccessful(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_ceiling_sub_batches_large_waves() {
        let runner = Arc::new(ScriptedRunner::new(&[], Duration::from_millis(10)));
        let hooks = (0..5)
            .map(|i| HookDefinition::new(format!("h{i}"), HookStage::Comprehensive))
            .collect();
        let orch = orchestrator(hooks, runner.clone(), 2);

        let report = orch.run_stage(HookStage::Comprehensive).await.unwrap();
        assert_eq!(report.count(HookStatus::Passed), 5);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stages_run_concurrently() {
        let runner = Arc::new(ScriptedRunner::new(&[], Duration::from_millis(50)));
        let orch = orchestrator(
            vec![
                HookDefinition::new("fast", HookStage::Fast),
                HookDefinition::new("slow", HookStage::Comprehensive),
            ],
            runner.clone(),
            1,
        );

        let report = orch.run().await.unwrap();
        assert_eq!(report.stages.len(), 2);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_hooks_selects_subset() {
        let runner = Arc::new(ScriptedRunner::new(&[], Duration::from_millis(1)));
        let orch = orchestrator(
            vec![
                HookDefinition::new("fmt", HookStage::Fast).formatting(true),
                HookDefinition::new("lint", HookStage::Fast).with_dependencies(["fmt"]),
                HookDefinition::new("types", HookStage::Comprehensive),
            ],
            runner.clone(),
            4,
        );

        let report = orch.run_hooks(&["lint", "types"]).await.unwrap();
        assert_eq!(report.results().count(), 2);
        assert!(report.get("fmt").is_none());
        assert!(orch.run_hooks(&["ghost"]).await.is_err());
    }

    #[tokio::test]
    async fn test_cycle_is_fatal_before_execution() {
        let runner = Arc::new(ScriptedRunner::new(&[], Duration::from_millis(1)));
        let orch = orchestrator(
            vec![
                HookDefinition::new("a", HookStage::Fast).with_dependencies(["b"]),
                HookDefinition::new("b", HookStage::Fast).with_dependencies(["a"]),
                HookDefinition::new("c", HookStage::Comprehensive),
            ],
            runner.clone(),
            4,
        );

        let err = orch.run().await.unwrap_err();
        assert!(err.is_fatal_configuration());
        assert!(runner.order.lock().is_empty());
    }

    #[test]
    fn test_apply_issue_counts() {
        let mut report = ExecutionReport {
            run_id: "run".to_string(),
            stages: vec![StageReport {
                stage: HookStage::Fast,
                waves: Vec::new(),
                results: vec![
                    HookResult::new("lint", HookStage::Fast),
                    HookResult::new("odd", HookStage::Fast),
                ],
                blocked_by: None,
                duration: Duration::ZERO,
            }],
            duration: Duration::ZERO,
        };
        let counts = BTreeMap::from([("lint".to_string(), Some(4)), ("odd".to_string(), None)]);
        report.apply_issue_counts(&counts);
        assert_eq!(report.get("lint").unwrap().issue_count, Some(4));
        assert_eq!(report.get("odd").unwrap().issue_count, None);
    }
}
