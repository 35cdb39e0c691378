// Process health monitoring
// Samples running hook processes and flags suspected stalls from sustained low CPU.
// The monitor is advisory: it never terminates a process.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::sync::oneshot;

/// Sampling and stall-detection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "crate::config::duration_secs")]
    pub sample_interval: Duration,
    /// CPU percentage at or above which a process counts as working.
    pub cpu_threshold: f32,
    /// Length of the low-CPU span that is reported as a stall.
    #[serde(with = "crate::config::duration_secs")]
    pub stall_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(30),
            cpu_threshold: 0.1,
            stall_timeout: Duration::from_secs(180),
        }
    }
}

impl MonitorConfig {
    pub fn new(sample_interval: Duration, cpu_threshold: f32, stall_timeout: Duration) -> Self {
        Self {
            sample_interval,
            cpu_threshold,
            stall_timeout,
        }
    }
}

/// One resource sample of a monitored process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessMetrics {
    pub pid: u32,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub elapsed: Duration,
}

/// Source of fresh process metrics.
pub trait MetricsSampler: Send + Sync {
    /// Called once before the first sample; CPU usage needs a baseline.
    fn prime(&self, _pid: u32) {}

    /// Leading samples that only establish a baseline and carry no real
    /// CPU reading. They are taken but never judged.
    fn baseline_samples(&self) -> u32 {
        0
    }

    /// Take a fresh reading. `None` means the process is gone.
    fn sample(&self, pid: u32, elapsed: Duration) -> Option<ProcessMetrics>;
}

/// Metrics sampler backed by `sysinfo`.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSampler for SysinfoSampler {
    fn prime(&self, pid: u32) {
        self.system.lock().refresh_process(Pid::from_u32(pid));
    }

    // sysinfo reports 0% until it has two refreshes after the first one.
    fn baseline_samples(&self) -> u32 {
        1
    }

    fn sample(&self, pid: u32, elapsed: Duration) -> Option<ProcessMetrics> {
        let pid_handle = Pid::from_u32(pid);
        let mut system = self.system.lock();
        if !system.refresh_process(pid_handle) {
            return None;
        }
        system.process(pid_handle).map(|process| ProcessMetrics {
            pid,
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
            elapsed,
        })
    }
}

/// Raised once per stall episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StallEvent {
    pub hook: String,
    pub metrics: ProcessMetrics,
    pub low_cpu_for: Duration,
}

pub trait StallHandler: Send + Sync {
    fn on_stall(&self, event: &StallEvent);
}

impl<F> StallHandler for F
where
    F: Fn(&StallEvent) + Send + Sync,
{
    fn on_stall(&self, event: &StallEvent) {
        self(event)
    }
}

/// Default handler: a structured warning and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStallHandler;

impl StallHandler for LogStallHandler {
    fn on_stall(&self, event: &StallEvent) {
        tracing::warn!(
            hook = %event.hook,
            pid = event.metrics.pid,
            cpu_percent = event.metrics.cpu_percent,
            memory_bytes = event.metrics.memory_bytes,
            elapsed_secs = event.metrics.elapsed.as_secs(),
            low_cpu_secs = event.low_cpu_for.as_secs(),
            "Hook process appears stalled"
        );
    }
}

/// Classification of a single sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleVerdict {
    Active,
    Idle { consecutive_low: u32 },
    Stalled(StallEvent),
}

/// Per-run stall detector.
///
/// Holds one consecutive-low-CPU counter per pid. An instance belongs to a
/// single orchestration run and is dropped with it.
pub struct ProcessMonitor {
    config: MonitorConfig,
    sampler: Arc<dyn MetricsSampler>,
    handler: Arc<dyn StallHandler>,
    low_cpu_counts: Mutex<HashMap<u32, u32>>,
}

impl ProcessMonitor {
    pub fn new(
        config: MonitorConfig,
        sampler: Arc<dyn MetricsSampler>,
        handler: Arc<dyn StallHandler>,
    ) -> Self {
        Self {
            config,
            sampler,
            handler,
            low_cpu_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Apply the stall rule to a fresh sample.
    ///
    /// A sample at or above the threshold clears all low-CPU history. Otherwise
    /// the counter grows; the first low sample opens the span, and once the span
    /// covers `stall_timeout` the handler fires with this sample and the counter
    /// starts over.
    pub fn observe(&self, hook: &str, metrics: ProcessMetrics) -> SampleVerdict {
        let mut counts = self.low_cpu_counts.lock();

        if metrics.cpu_percent >= self.config.cpu_threshold {
            counts.insert(metrics.pid, 0);
            return SampleVerdict::Active;
        }

        let count = counts.entry(metrics.pid).or_insert(0);
        *count += 1;
        let low_cpu_for = self.config.sample_interval.saturating_mul(*count - 1);

        if low_cpu_for < self.config.stall_timeout {
            return SampleVerdict::Idle {
                consecutive_low: *count,
            };
        }

        *count = 0;
        drop(counts);

        let event = StallEvent {
            hook: hook.to_string(),
            metrics,
            low_cpu_for,
        };
        self.handler.on_stall(&event);
        SampleVerdict::Stalled(event)
    }

    pub fn consecutive_low(&self, pid: u32) -> u32 {
        self.low_cpu_counts.lock().get(&pid).copied().unwrap_or(0)
    }

    pub fn forget(&self, pid: u32) {
        self.low_cpu_counts.lock().remove(&pid);
    }

    /// Sample `pid` every interval until `stop` fires or the process is gone.
    ///
    /// Returns the number of stall warnings raised.
    pub async fn watch(&self, hook: &str, pid: u32, mut stop: oneshot::Receiver<()>) -> u32 {
        let started = tokio::time::Instant::now();
        let interval = self.config.sample_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(started + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut stalls = 0;
        let mut baseline = self.sampler.baseline_samples();

        self.sampler.prime(pid);
        tracing::trace!(hook = %hook, pid, ?interval, "Monitoring hook process");

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    let Some(metrics) = self.sampler.sample(pid, started.elapsed()) else {
                        break;
                    };
                    if baseline > 0 {
                        baseline -= 1;
                        continue;
                    }
                    if let SampleVerdict::Stalled(_) = self.observe(hook, metrics) {
                        stalls += 1;
                    }
                }
            }
        }

        self.forget(pid);
        stalls
    }
}
