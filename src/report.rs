// Machine-readable run report for external formatters

use crate::autofix::{ConvergenceOutcome, ConvergenceReport, FixIteration};
use crate::error::Result;
use crate::hook::{HookResult, HookStatus};
use crate::issues::{Issue, IssueSnapshot};
use crate::orchestrator::ExecutionReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSummary {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub skipped: usize,
}

impl StatusSummary {
    fn from_results<'a>(results: impl Iterator<Item = &'a HookResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                HookStatus::Passed => summary.passed += 1,
                HookStatus::Failed => summary.failed += 1,
                HookStatus::TimedOut => summary.timed_out += 1,
                HookStatus::Errored => summary.errored += 1,
                HookStatus::Skipped => summary.skipped += 1,
                HookStatus::Pending | HookStatus::Running => {}
            }
        }
        summary
    }
}

/// Hook results, final issues and fix history of one run.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub tool_version: &'static str,
    pub summary: StatusSummary,
    pub hooks: Vec<HookResult>,
    pub issues: Vec<Issue>,
    pub manual_review: Vec<Issue>,
    /// Hooks whose issue count is unknown and needs manual inspection.
    pub unknown_counts: BTreeMap<String, String>,
    pub convergence: Option<ConvergenceOutcome>,
    pub iterations: Vec<FixIteration>,
}

impl QualityReport {
    /// Report for a plain hook run.
    pub fn from_execution(execution: &ExecutionReport, snapshot: &IssueSnapshot) -> Self {
        let mut hooks: Vec<HookResult> = execution.results().cloned().collect();
        for hook in &mut hooks {
            if let Some(count) = snapshot.per_hook.get(&hook.hook) {
                hook.issue_count = *count;
            }
        }

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            tool_version: crate::VERSION,
            summary: StatusSummary::from_results(hooks.iter()),
            hooks,
            issues: snapshot.issues.clone(),
            manual_review: snapshot.manual_review.clone(),
            unknown_counts: snapshot.unknown.clone(),
            convergence: None,
            iterations: Vec::new(),
        }
    }

    /// Attach the outcome of an autofix run; its final issues replace the
    /// hook run's.
    pub fn with_convergence(mut self, convergence: &ConvergenceReport) -> Self {
        self.convergence = Some(convergence.outcome);
        self.iterations = convergence.iterations.clone();
        self.issues = convergence.final_issues.clone();
        self.manual_review = convergence.manual_review.clone();
        self
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    /// Clean only when every hook passed, every count is known and no issue
    /// remains.
    pub fn is_clean(&self) -> bool {
        self.unknown_counts.is_empty()
            && self.issues.is_empty()
            && self.hooks.iter().all(HookResult::passed)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookStage;
    use crate::orchestrator::StageReport;
    use std::time::Duration;

    fn execution(results: Vec<HookResult>) -> ExecutionReport {
        ExecutionReport {
            run_id: "run-1".to_string(),
            stages: vec![StageReport {
                stage: HookStage::Fast,
                waves: Vec::new(),
                results,
                blocked_by: None,
                duration: Duration::from_millis(5),
            }],
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_report_summarizes_and_serializes() {
        let exec = execution(vec![
            HookResult::new("fmt", HookStage::Fast).with_status(HookStatus::Passed),
            HookResult::new("lint", HookStage::Fast).with_status(HookStatus::Failed),
            HookResult::skipped("types", HookStage::Fast, "blocked"),
        ]);
        let mut snapshot = IssueSnapshot::default();
        snapshot.issues.push(Issue::new("a.py", Some(2), "unused import", "lint"));
        snapshot.per_hook.insert("lint".to_string(), Some(1));

        let report = QualityReport::from_execution(&exec, &snapshot);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.issue_count(), 1);
        assert!(!report.is_clean());

        let value = report.to_json_value().unwrap();
        assert_eq!(value["hooks"][1]["issue_count"], 1);
        assert_eq!(value["hooks"][2]["status"], "skipped");
        assert_eq!(value["issues"][0]["file_path"], "a.py");
        assert!(report.to_json().unwrap().contains("\"tool_version\""));
    }

    #[test]
    fn test_unknown_counts_prevent_clean() {
        let exec = execution(vec![
            HookResult::new("lint", HookStage::Fast).with_status(HookStatus::Passed)
        ]);
        let mut snapshot = IssueSnapshot::default();
        snapshot
            .unknown
            .insert("lint".to_string(), "unrecognized".to_string());
        let report = QualityReport::from_execution(&exec, &snapshot);
        assert!(!report.is_clean());
    }
}
