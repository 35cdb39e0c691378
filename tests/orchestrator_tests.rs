// End-to-end orchestration tests: YAML config through real hook processes
#![cfg(unix)]

use qualgate::{
    ConfigError, HookOrchestrator, HookStage, HookStatus, IssueCollector, QualgateConfig,
    QualgateError, QualityReport,
};
use std::time::Duration;
use tempfile::TempDir;

fn orchestrator(yaml: &str) -> HookOrchestrator {
    let config = QualgateConfig::from_yaml(yaml).expect("config should parse");
    HookOrchestrator::from_config(&config).expect("config should build an orchestrator")
}

#[tokio::test]
async fn test_independent_hooks_run_in_one_wave_and_pass() {
    let orchestrator = orchestrator(
        r#"
tools:
  ok: ["true"]
hooks:
  - { name: a, tool: ok, stage: fast }
  - { name: b, tool: ok, stage: fast }
  - { name: c, tool: ok, stage: fast }
"#,
    );

    let plan = orchestrator.plan().unwrap();
    assert_eq!(plan[&HookStage::Fast].len(), 1);
    assert!(plan[&HookStage::Comprehensive].is_empty());

    let report = orchestrator.run().await.unwrap();
    assert!(report.all_passed());
    assert_eq!(report.count(HookStatus::Passed), 3);

    let snapshot = IssueCollector::new().collect(report.results());
    assert_eq!(snapshot.count(), 0);
    assert!(snapshot.is_clean());
}

#[tokio::test]
async fn test_failed_formatter_skips_dependent_waves() {
    let orchestrator = orchestrator(
        r#"
tools:
  fmt: ["sh", "-c", "echo 'a.py:1:1: would reformat'; exit 1"]
  ok: ["true"]
hooks:
  - { name: format, tool: fmt, stage: comprehensive, formatting: true }
  - { name: lint, tool: ok, stage: comprehensive, depends_on: [format] }
  - { name: types, tool: ok, stage: comprehensive, depends_on: [format] }
  - { name: spelling, tool: ok, stage: fast }
"#,
    );

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.get("format").unwrap().status, HookStatus::Failed);
    assert_eq!(report.get("lint").unwrap().status, HookStatus::Skipped);
    assert_eq!(report.get("types").unwrap().status, HookStatus::Skipped);
    assert!(report.get("lint").unwrap().skip_reason.is_some());

    let comprehensive = report.stage(HookStage::Comprehensive).unwrap();
    assert_eq!(comprehensive.blocked_by.as_deref(), Some("format"));
    assert_eq!(comprehensive.waves.len(), 2);

    // The other stage is unaffected by the block.
    assert_eq!(report.get("spelling").unwrap().status, HookStatus::Passed);
    assert!(report.stage(HookStage::Fast).unwrap().blocked_by.is_none());
}

#[tokio::test]
async fn test_hung_or_crashing_formatter_also_blocks() {
    let report = orchestrator(
        r#"
orchestrator:
  termination_grace: 0.1
tools:
  hang: ["sleep", "10"]
  crash: ["sh", "-c", "echo 'Traceback (most recent call last):' >&2; exit 2"]
  ok: ["true"]
hooks:
  - { name: format, tool: hang, stage: fast, formatting: true, timeout_secs: 0.3 }
  - { name: lint, tool: ok, stage: fast, depends_on: [format] }
  - { name: imports, tool: crash, stage: comprehensive, formatting: true }
  - { name: types, tool: ok, stage: comprehensive, depends_on: [imports] }
"#,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.get("format").unwrap().status, HookStatus::TimedOut);
    assert_eq!(report.get("lint").unwrap().status, HookStatus::Skipped);
    assert_eq!(report.get("imports").unwrap().status, HookStatus::Errored);
    assert_eq!(report.get("types").unwrap().status, HookStatus::Skipped);
    assert_eq!(
        report.stage(HookStage::Fast).unwrap().blocked_by.as_deref(),
        Some("format")
    );
    assert_eq!(
        report.stage(HookStage::Comprehensive).unwrap().blocked_by.as_deref(),
        Some("imports")
    );
}

#[tokio::test]
async fn test_formatter_output_is_visible_to_later_waves() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("src.txt"), "unformatted\n").unwrap();
    let yaml = format!(
        r#"
orchestrator:
  working_dir: "{}"
tools:
  fmt: ["sh", "-c", "echo formatted > src.txt"]
  check: ["sh", "-c", "grep -q '^formatted$' src.txt || {{ echo 'src.txt:1:1: not formatted'; exit 1; }}"]
hooks:
  - {{ name: format, tool: fmt, stage: comprehensive, formatting: true }}
  - {{ name: check, tool: check, stage: comprehensive, depends_on: [format] }}
"#,
        dir.path().display()
    );

    let report = orchestrator(&yaml).run().await.unwrap();
    assert!(report.all_passed(), "unsuccessful: {:?}", report.unsuccessful());
    let contents = std::fs::read_to_string(dir.path().join("src.txt")).unwrap();
    assert_eq!(contents.trim(), "formatted");
}

#[tokio::test]
async fn test_failing_hooks_produce_a_report_with_issue_counts() {
    let mut report = orchestrator(
        r#"
tools:
  lint: ["sh", "-c", "printf 'app.py:1:1: F401 unused import\napp.py:9:5: E501 line too long\n'; exit 1"]
  silent: ["false"]
hooks:
  - { name: lint, tool: lint, stage: fast }
  - { name: broken, tool: silent, stage: comprehensive }
"#,
    )
    .run()
    .await
    .unwrap();

    let snapshot = IssueCollector::new().collect(report.results());
    assert_eq!(snapshot.count(), 2);
    assert_eq!(snapshot.per_hook["lint"], Some(2));
    assert_eq!(snapshot.per_hook["broken"], None);
    assert!(!snapshot.is_count_known());

    report.apply_issue_counts(&snapshot.per_hook);
    assert_eq!(report.get("lint").unwrap().issue_count, Some(2));
    assert_eq!(report.get("broken").unwrap().status, HookStatus::Errored);
    assert_eq!(report.get("broken").unwrap().issue_count, None);

    let quality = QualityReport::from_execution(&report, &snapshot);
    assert!(!quality.is_clean());
    assert_eq!(quality.summary.failed, 1);
    assert_eq!(quality.summary.errored, 1);
    let json = quality.to_json_value().unwrap();
    assert_eq!(json["issues"][0]["code"], "F401");
}

#[tokio::test]
async fn test_slow_hook_times_out_without_holding_up_others() {
    let report = orchestrator(
        r#"
orchestrator:
  termination_grace: 0.1
tools:
  slow: ["sleep", "10"]
  ok: ["true"]
hooks:
  - { name: slow, tool: slow, stage: comprehensive, timeout_secs: 0.3 }
  - { name: quick, tool: ok, stage: fast }
"#,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.get("slow").unwrap().status, HookStatus::TimedOut);
    assert_eq!(report.get("quick").unwrap().status, HookStatus::Passed);
    assert!(report.duration < Duration::from_secs(5));
}

#[tokio::test]
async fn test_cyclic_config_is_rejected_before_anything_runs() {
    let config = QualgateConfig::from_yaml(
        r#"
tools:
  ok: ["true"]
hooks:
  - { name: a, tool: ok, stage: fast, depends_on: [b] }
  - { name: b, tool: ok, stage: fast, depends_on: [a] }
"#,
    )
    .unwrap();

    match HookOrchestrator::from_config(&config) {
        Err(QualgateError::Config(err)) => {
            assert!(matches!(*err, ConfigError::CyclicDependency { .. }));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("cyclic config must be rejected"),
    }
}

#[tokio::test]
async fn test_run_hooks_selects_a_subset() {
    let orchestrator = orchestrator(
        r#"
tools:
  ok: ["true"]
  bad: ["sh", "-c", "echo 'x.py:1:1: broken'; exit 1"]
hooks:
  - { name: format, tool: ok, stage: fast, formatting: true }
  - { name: lint, tool: ok, stage: fast, depends_on: [format] }
  - { name: broken, tool: bad, stage: comprehensive }
"#,
    );

    let report = orchestrator.run_hooks(&["lint"]).await.unwrap();
    assert_eq!(report.results().count(), 1);
    assert!(report.all_passed());

    assert!(orchestrator.run_hooks(&["nope"]).await.is_err());
}
