// Collect, fix, verify loop
// The coordinator gathers the canonical issue list, hands it to capability-tagged
// fix agents, and re-collects from scratch to decide whether the codebase
// converged. Agent self-reports never decide success; only a freshly verified
// count of zero does.

use crate::error::{ConvergenceError, Result};
use crate::issues::{Issue, IssueCategory, IssueCollector, IssueSnapshot};
use crate::logging::utils::fix_iteration_span;
use crate::orchestrator::{ExecutionReport, HookOrchestrator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Bounded loop policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofixConfig {
    pub max_iterations: u32,
    /// Contributions below this confidence are recorded but not counted.
    pub min_confidence: f64,
    /// Unverified success claims tolerated per agent before it is excluded
    /// for the rest of the run. `None` never excludes.
    pub max_anomalies_per_agent: Option<u32>,
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            min_confidence: 0.0,
            max_anomalies_per_agent: None,
        }
    }
}

/// What an agent is asked to fix.
#[derive(Debug, Clone, Serialize)]
pub struct FixRequest {
    pub iteration: u32,
    pub issues: Vec<Issue>,
    pub working_dir: Option<PathBuf>,
    pub affected_files: BTreeSet<String>,
}

/// An agent's self-report. `files_modified` is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub success: bool,
    pub confidence: f64,
    pub fixes_applied: u32,
    pub files_modified: Vec<PathBuf>,
}

impl FixResult {
    pub fn new(success: bool, confidence: f64) -> Self {
        Self {
            success,
            confidence,
            fixes_applied: 0,
            files_modified: Vec::new(),
        }
    }

    pub fn with_fixes(mut self, fixes_applied: u32) -> Self {
        self.fixes_applied = fixes_applied;
        self
    }

    pub fn with_files_modified<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files_modified = files.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
pub trait FixAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Issue categories this agent is dispatched for.
    fn capabilities(&self) -> &[IssueCategory];

    /// Whether a successful fix must show up in `files_modified`.
    fn modifies_files(&self) -> bool {
        true
    }

    async fn fix(&self, request: &FixRequest) -> Result<FixResult>;
}

/// Produces a fresh issue snapshot on every call.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn collect(&self) -> Result<IssueSnapshot>;
}

/// Runs hooks through the orchestrator and parses their results.
pub struct HookIssueSource {
    orchestrator: Arc<HookOrchestrator>,
    collector: IssueCollector,
    hooks: Vec<String>,
    last_report: Mutex<Option<ExecutionReport>>,
}

impl HookIssueSource {
    /// Collect from every non-formatting hook.
    pub fn new(orchestrator: Arc<HookOrchestrator>, collector: IssueCollector) -> Self {
        let hooks = orchestrator
            .hooks()
            .iter()
            .filter(|h| !h.is_formatting)
            .map(|h| h.name.clone())
            .collect();
        Self {
            orchestrator,
            collector,
            hooks,
            last_report: Mutex::new(None),
        }
    }

    pub fn with_hooks<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hooks = hooks.into_iter().map(Into::into).collect();
        self
    }

    pub fn hooks(&self) -> &[String] {
        &self.hooks
    }

    /// Hook results of the most recent collection, with issue counts filled in.
    pub fn last_report(&self) -> Option<ExecutionReport> {
        self.last_report.lock().clone()
    }
}

#[async_trait]
impl IssueSource for HookIssueSource {
    async fn collect(&self) -> Result<IssueSnapshot> {
        let mut report = self.orchestrator.run_hooks(self.hooks.as_slice()).await?;
        let snapshot = self.collector.collect(report.results());
        report.apply_issue_counts(&snapshot.per_hook);
        *self.last_report.lock() = Some(report);
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    /// Fixes count toward the iteration total.
    Counted,
    /// Claimed success without any modified file.
    Unverified,
    LowConfidence,
    /// The agent reported that it did not succeed.
    Unsuccessful,
    /// The agent returned an error.
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContribution {
    pub agent: String,
    pub status: ContributionStatus,
    pub issues_assigned: usize,
    pub result: Option<FixResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixIteration {
    pub iteration: u32,
    pub issues_before: usize,
    pub issues_after: usize,
    /// Fixes from counted contributions only.
    pub fixes_applied: u32,
    /// True only when the fresh verification found zero issues.
    pub success: bool,
    pub contributions: Vec<AgentContribution>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl FixIteration {
    /// Agents whose success claims could not be verified.
    pub fn unverified_agents(&self) -> Vec<&str> {
        self.contributions
            .iter()
            .filter(|c| c.status == ContributionStatus::Unverified)
            .map(|c| c.agent.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceOutcome {
    Done,
    FailedBudget,
    FailedNoProgress,
}

impl ConvergenceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceOutcome::Done => "done",
            ConvergenceOutcome::FailedBudget => "failed_budget",
            ConvergenceOutcome::FailedNoProgress => "failed_no_progress",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    pub run_id: String,
    pub outcome: ConvergenceOutcome,
    pub initial_issue_count: usize,
    pub iterations: Vec<FixIteration>,
    pub final_issues: Vec<Issue>,
    pub manual_review: Vec<Issue>,
    pub excluded_agents: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.outcome == ConvergenceOutcome::Done
    }

    pub fn iterations_used(&self) -> u32 {
        self.iterations.len() as u32
    }
}

/// Drives fix agents until a verified zero, no progress, or the budget.
pub struct AutofixCoordinator {
    source: Arc<dyn IssueSource>,
    agents: Vec<Arc<dyn FixAgent>>,
    config: AutofixConfig,
    working_dir: Option<PathBuf>,
}

impl AutofixCoordinator {
    pub fn new(source: Arc<dyn IssueSource>, config: AutofixConfig) -> Self {
        Self {
            source,
            agents: Vec::new(),
            config,
            working_dir: None,
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn FixAgent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub async fn run(&self) -> Result<ConvergenceReport> {
        if let Some(ref dir) = self.working_dir {
            if !dir.is_dir() {
                return Err(ConvergenceError::MissingWorkingDirectory { path: dir.clone() }.into());
            }
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let mut anomalies: HashMap<String, u32> = HashMap::new();
        let mut excluded: BTreeSet<String> = BTreeSet::new();
        let mut iterations = Vec::new();

        let mut snapshot = self.collect_checked("collect", 0).await?;
        let initial_issue_count = snapshot.count();
        tracing::info!(run_id = %run_id, issues = initial_issue_count, "Initial issue collection");

        let outcome = if snapshot.issues.is_empty() {
            ConvergenceOutcome::Done
        } else {
            let mut outcome = ConvergenceOutcome::FailedBudget;
            for iteration in 1..=self.config.max_iterations {
                let started_at = Utc::now();
                let started = Instant::now();
                let before = snapshot.count();

                let contributions = self
                    .dispatch(iteration, &snapshot, &mut anomalies, &mut excluded)
                    .instrument(fix_iteration_span(iteration))
                    .await;
                let verified = self.collect_checked("verify", iteration).await?;
                let after = verified.count();

                let record = FixIteration {
                    iteration,
                    issues_before: before,
                    issues_after: after,
                    fixes_applied: contributions
                        .iter()
                        .filter(|c| c.status == ContributionStatus::Counted)
                        .filter_map(|c| c.result.as_ref().map(|r| r.fixes_applied))
                        .sum(),
                    success: after == 0,
                    contributions,
                    started_at,
                    duration: started.elapsed(),
                };
                tracing::info!(
                    iteration,
                    before,
                    after,
                    fixes_applied = record.fixes_applied,
                    unverified = ?record.unverified_agents(),
                    "Fix iteration verified"
                );
                let success = record.success;
                iterations.push(record);
                snapshot = verified;

                if success {
                    outcome = ConvergenceOutcome::Done;
                    break;
                }
                if after >= before {
                    outcome = ConvergenceOutcome::FailedNoProgress;
                    break;
                }
            }
            outcome
        };

        if outcome != ConvergenceOutcome::Done {
            tracing::warn!(
                run_id = %run_id,
                outcome = outcome.as_str(),
                remaining = snapshot.count(),
                iterations = iterations.len(),
                "Autofix did not converge"
            );
        }

        Ok(ConvergenceReport {
            run_id,
            outcome,
            initial_issue_count,
            iterations,
            final_issues: snapshot.issues,
            manual_review: snapshot.manual_review,
            excluded_agents: excluded.into_iter().collect(),
            finished_at: Utc::now(),
        })
    }

    /// A failed or incomplete collection is an error, never an empty list.
    async fn collect_checked(&self, phase: &str, iteration: u32) -> Result<IssueSnapshot> {
        let snapshot = self.source.collect().await.map_err(|e| {
            tracing::error!(phase, iteration, error = %e, "Issue collection failed");
            ConvergenceError::CollectFailed {
                phase: phase.to_string(),
                iteration,
                message: e.to_string(),
            }
        })?;
        if !snapshot.is_count_known() {
            return Err(ConvergenceError::UnknownIssueCount {
                hooks: snapshot.unknown_hooks(),
            }
            .into());
        }
        Ok(snapshot)
    }

    async fn dispatch(
        &self,
        iteration: u32,
        snapshot: &IssueSnapshot,
        anomalies: &mut HashMap<String, u32>,
        excluded: &mut BTreeSet<String>,
    ) -> Vec<AgentContribution> {
        let mut contributions = Vec::new();

        for agent in &self.agents {
            let name = agent.name().to_string();
            if excluded.contains(&name) {
                continue;
            }
            let issues: Vec<Issue> = snapshot
                .issues
                .iter()
                .filter(|issue| agent.capabilities().contains(&issue.category))
                .cloned()
                .collect();
            if issues.is_empty() {
                continue;
            }

            let request = FixRequest {
                iteration,
                affected_files: issues.iter().map(|i| i.file_path.clone()).collect(),
                issues,
                working_dir: self.working_dir.clone(),
            };
            let assigned = request.issues.len();

            let contribution = match agent.fix(&request).await {
                Err(e) => {
                    let err = ConvergenceError::AgentFailed {
                        agent: name.clone(),
                        message: e.to_string(),
                    };
                    tracing::warn!(agent = %name, error = %err, "Fix agent failed");
                    AgentContribution {
                        agent: name,
                        status: ContributionStatus::Errored,
                        issues_assigned: assigned,
                        result: None,
                        error: Some(err.to_string()),
                    }
                }
                Ok(result) => {
                    let status = self.judge(agent.as_ref(), &request, &result);
                    if status == ContributionStatus::Unverified {
                        let count = anomalies.entry(name.clone()).or_insert(0);
                        *count += 1;
                        tracing::warn!(
                            agent = %name,
                            claimed_fixes = result.fixes_applied,
                            anomalies = *count,
                            "Fix agent claimed success without modifying files"
                        );
                        if self
                            .config
                            .max_anomalies_per_agent
                            .is_some_and(|limit| *count >= limit)
                        {
                            tracing::warn!(agent = %name, "Excluding fix agent for the rest of the run");
                            excluded.insert(name.clone());
                        }
                    }
                    let error = (!(0.0..=1.0).contains(&result.confidence)).then(|| {
                        format!("confidence {} is outside [0, 1]", result.confidence)
                    });
                    if let Some(ref error) = error {
                        tracing::warn!(agent = %name, error = %error, "Fix agent reported invalid confidence");
                    }
                    AgentContribution {
                        agent: name,
                        status,
                        issues_assigned: assigned,
                        result: Some(result),
                        error,
                    }
                }
            };
            contributions.push(contribution);
        }

        contributions
    }

    /// A success claim on file-rewriting issues must name the files it touched.
    /// Confidence outside [0, 1] is never counted.
    fn judge(
        &self,
        agent: &dyn FixAgent,
        request: &FixRequest,
        result: &FixResult,
    ) -> ContributionStatus {
        let rewrites_files =
            agent.modifies_files() && request.issues.iter().any(|i| i.category.modifies_files());
        if !result.success {
            ContributionStatus::Unsuccessful
        } else if rewrites_files && result.files_modified.is_empty() {
            ContributionStatus::Unverified
        } else if !(0.0..=1.0).contains(&result.confidence)
            || result.confidence < self.config.min_confidence
        {
            ContributionStatus::LowConfidence
        } else {
            ContributionStatus::Counted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QualgateError;
    use std::collections::VecDeque;

    fn snapshot(count: usize, category: IssueCategory) -> IssueSnapshot {
        IssueSnapshot {
            issues: (0..count)
                .map(|i| {
                    Issue::new(format!("src/f{i}.py"), Some(1), "problem", "lint")
                        .with_category(category)
                })
                .collect(),
            ..IssueSnapshot::default()
        }
    }

    struct ScriptedSource {
        snapshots: Mutex<VecDeque<Result<IssueSnapshot>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn counts(counts: &[usize]) -> Arc<Self> {
            Self::results(
                counts
                    .iter()
                    .map(|&n| Ok(snapshot(n, IssueCategory::Lint)))
                    .collect(),
            )
        }

        fn results(results: Vec<Result<IssueSnapshot>>) -> Arc<Self> {
            Arc::new(Self {
                snapshots: Mutex::new(results.into()),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl IssueSource for ScriptedSource {
        async fn collect(&self) -> Result<IssueSnapshot> {
            *self.calls.lock() += 1;
            self.snapshots
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(IssueSnapshot::default()))
        }
    }

    struct ScriptedAgent {
        name: &'static str,
        capabilities: Vec<IssueCategory>,
        result: FixResult,
        requests: Mutex<Vec<FixRequest>>,
    }

    impl ScriptedAgent {
        fn new(name: &'static str, result: FixResult) -> Arc<Self> {
            Arc::new(Self {
                name,
                capabilities: vec![IssueCategory::Lint],
                result,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FixAgent for ScriptedAgent {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> &[IssueCategory] {
            &self.capabilities
        }

        async fn fix(&self, request: &FixRequest) -> Result<FixResult> {
            self.requests.lock().push(request.clone());
            Ok(self.result.clone())
        }
    }

    fn verified_fix(fixes: u32) -> FixResult {
        FixResult::new(true, 0.9)
            .with_fixes(fixes)
            .with_files_modified(["src/f0.py"])
    }

    #[tokio::test]
    async fn test_clean_codebase_is_done_without_iterations() {
        let source = ScriptedSource::counts(&[0]);
        let coordinator = AutofixCoordinator::new(source.clone(), AutofixConfig::default())
            .with_agent(ScriptedAgent::new("lint-fixer", verified_fix(1)));

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.outcome, ConvergenceOutcome::Done);
        assert_eq!(report.iterations_used(), 0);
        assert_eq!(*source.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_unverified_claim_with_no_progress_fails_after_one_iteration() {
        let source = ScriptedSource::counts(&[12, 12]);
        let agent = ScriptedAgent::new("lint-fixer", FixResult::new(true, 0.95).with_fixes(3));
        let coordinator = AutofixCoordinator::new(source, AutofixConfig::default())
            .with_agent(agent.clone());

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.outcome, ConvergenceOutcome::FailedNoProgress);
        assert_eq!(report.iterations.len(), 1);
        let iteration = &report.iterations[0];
        assert!(!iteration.success);
        assert_eq!(iteration.issues_before, 12);
        assert_eq!(iteration.issues_after, 12);
        assert_eq!(iteration.fixes_applied, 0);
        assert_eq!(iteration.unverified_agents(), vec!["lint-fixer"]);
        assert_eq!(report.final_issues.len(), 12);
        assert_eq!(agent.requests.lock()[0].issues.len(), 12);
    }

    #[tokio::test]
    async fn test_converges_when_verification_reaches_zero() {
        let source = ScriptedSource::counts(&[5, 2, 0]);
        let coordinator = AutofixCoordinator::new(source, AutofixConfig::default())
            .with_agent(ScriptedAgent::new("lint-fixer", verified_fix(3)));

        let report = coordinator.run().await.unwrap();
        assert!(report.converged());
        assert_eq!(report.iterations_used(), 2);
        assert!(!report.iterations[0].success);
        assert!(report.iterations[1].success);
        assert_eq!(report.iterations[0].fixes_applied, 3);
        assert!(report.final_issues.is_empty());
    }

    #[tokio::test]
    async fn test_agent_success_with_remaining_issues_is_not_success() {
        let source = ScriptedSource::counts(&[4, 1, 1]);
        let coordinator = AutofixCoordinator::new(source, AutofixConfig::default())
            .with_agent(ScriptedAgent::new("lint-fixer", verified_fix(3)));

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.outcome, ConvergenceOutcome::FailedNoProgress);
        assert!(report.iterations.iter().all(|i| !i.success));
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let source = ScriptedSource::counts(&[9, 6, 3]);
        let config = AutofixConfig {
            max_iterations: 2,
            ..AutofixConfig::default()
        };
        let coordinator = AutofixCoordinator::new(source, config)
            .with_agent(ScriptedAgent::new("lint-fixer", verified_fix(3)));

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.outcome, ConvergenceOutcome::FailedBudget);
        assert_eq!(report.iterations_used(), 2);
        assert_eq!(report.final_issues.len(), 3);
    }

    #[tokio::test]
    async fn test_verify_failure_is_an_error_not_success() {
        let source = ScriptedSource::results(vec![
            Ok(snapshot(3, IssueCategory::Lint)),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "runner crashed").into()),
        ]);
        let coordinator = AutofixCoordinator::new(source, AutofixConfig::default())
            .with_agent(ScriptedAgent::new("lint-fixer", verified_fix(3)));

        let err = coordinator.run().await.unwrap_err();
        match err {
            QualgateError::Convergence(e) => match *e {
                ConvergenceError::CollectFailed { phase, iteration, .. } => {
                    assert_eq!(phase, "verify");
                    assert_eq!(iteration, 1);
                }
                other => panic!("unexpected convergence error: {other:?}"),
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_count_is_an_error() {
        let mut unknown = IssueSnapshot::default();
        unknown
            .unknown
            .insert("pyright".to_string(), "unrecognized output".to_string());
        let source =
            ScriptedSource::results(vec![Ok(snapshot(2, IssueCategory::Lint)), Ok(unknown)]);
        let coordinator = AutofixCoordinator::new(source, AutofixConfig::default())
            .with_agent(ScriptedAgent::new("lint-fixer", verified_fix(2)));

        let err = coordinator.run().await.unwrap_err();
        assert!(err.to_string().contains("pyright"));
    }

    #[tokio::test]
    async fn test_low_confidence_fixes_are_recorded_not_counted() {
        let source = ScriptedSource::counts(&[4, 2, 0]);
        let config = AutofixConfig {
            min_confidence: 0.8,
            ..AutofixConfig::default()
        };
        let unsure = FixResult::new(true, 0.4)
            .with_fixes(2)
            .with_files_modified(["src/f1.py"]);
        let coordinator = AutofixCoordinator::new(source, config)
            .with_agent(ScriptedAgent::new("guesser", unsure));

        let report = coordinator.run().await.unwrap();
        assert!(report.converged());
        let first = &report.iterations[0];
        assert_eq!(first.contributions[0].status, ContributionStatus::LowConfidence);
        assert_eq!(first.fixes_applied, 0);
    }

    #[tokio::test]
    async fn test_repeat_offender_is_excluded() {
        let source = ScriptedSource::counts(&[6, 4, 2, 0]);
        let config = AutofixConfig {
            max_anomalies_per_agent: Some(1),
            ..AutofixConfig::default()
        };
        let liar = ScriptedAgent::new("liar", FixResult::new(true, 1.0).with_fixes(5));
        let honest = ScriptedAgent::new("honest", verified_fix(2));
        let coordinator = AutofixCoordinator::new(source, config)
            .with_agent(liar.clone())
            .with_agent(honest.clone());

        let report = coordinator.run().await.unwrap();
        assert!(report.converged());
        assert_eq!(liar.requests.lock().len(), 1);
        assert_eq!(honest.requests.lock().len(), 3);
        assert_eq!(report.excluded_agents, vec!["liar"]);
    }

    #[tokio::test]
    async fn test_dispatch_matches_capabilities() {
        let mut mixed = snapshot(2, IssueCategory::Lint);
        mixed.issues.push(
            Issue::new("src/s.py", Some(9), "assert used", "bandit")
                .with_category(IssueCategory::Security),
        );
        let source = ScriptedSource::results(vec![Ok(mixed), Ok(IssueSnapshot::default())]);
        let lint = ScriptedAgent::new("lint-fixer", verified_fix(2));
        let coordinator =
            AutofixCoordinator::new(source, AutofixConfig::default()).with_agent(lint.clone());

        let report = coordinator.run().await.unwrap();
        assert!(report.converged());
        let requests = lint.requests.lock();
        assert_eq!(requests[0].issues.len(), 2);
        assert!(!requests[0].affected_files.contains("src/s.py"));
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_not_counted() {
        let source = ScriptedSource::counts(&[3, 1, 0]);
        let overconfident = FixResult::new(true, 1.5)
            .with_fixes(2)
            .with_files_modified(["src/f0.py"]);
        let coordinator = AutofixCoordinator::new(source, AutofixConfig::default())
            .with_agent(ScriptedAgent::new("boaster", overconfident));

        let report = coordinator.run().await.unwrap();
        let first = &report.iterations[0];
        assert_eq!(first.contributions[0].status, ContributionStatus::LowConfidence);
        assert!(first.contributions[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("outside [0, 1]")));
        assert_eq!(first.fixes_applied, 0);
    }

    #[tokio::test]
    async fn test_no_file_evidence_needed_for_non_rewriting_issues() {
        let source = ScriptedSource::results(vec![
            Ok(snapshot(2, IssueCategory::Other)),
            Ok(IssueSnapshot::default()),
        ]);
        let triage = Arc::new(ScriptedAgent {
            name: "triage",
            capabilities: vec![IssueCategory::Other],
            result: FixResult::new(true, 0.9).with_fixes(2),
            requests: Mutex::new(Vec::new()),
        });
        let coordinator =
            AutofixCoordinator::new(source, AutofixConfig::default()).with_agent(triage);

        let report = coordinator.run().await.unwrap();
        let first = &report.iterations[0];
        assert_eq!(first.contributions[0].status, ContributionStatus::Counted);
        assert_eq!(first.fixes_applied, 2);
        assert!(first.unverified_agents().is_empty());
    }

    #[tokio::test]
    async fn test_missing_working_directory() {
        let coordinator =
            AutofixCoordinator::new(ScriptedSource::counts(&[1]), AutofixConfig::default())
                .with_working_dir("/definitely/not/here");
        assert!(coordinator.run().await.is_err());
    }
}
