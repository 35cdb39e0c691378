// Hook execution: spawn one tool process, watch it, capture its output and
// classify how it ended.

use crate::error::HookExecutionError;
use crate::hook::{HookDefinition, HookResult, HookStatus};
use crate::issues::IssueCollector;
use crate::logging::utils::{hook_execution_span, log_hook_completion};
use crate::monitor::{LogStallHandler, MonitorConfig, ProcessMonitor, SysinfoSampler};
use crate::registry::ToolCommandRegistry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on how long output readers may keep draining after the
/// process has exited or been killed.
const CAPTURE_DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// State shared by every hook of one orchestration run.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub monitor: Arc<ProcessMonitor>,
    /// Default working directory for hooks without their own.
    pub working_dir: Option<PathBuf>,
    /// Time between SIGTERM and SIGKILL when a hook times out.
    pub termination_grace: Duration,
}

impl RunContext {
    pub fn new(monitor: Arc<ProcessMonitor>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            monitor,
            working_dir: None,
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }

    /// Context with a fresh `sysinfo`-backed monitor that logs stalls.
    pub fn with_monitor_config(config: MonitorConfig) -> Self {
        Self::new(Arc::new(ProcessMonitor::new(
            config,
            Arc::new(SysinfoSampler::new()),
            Arc::new(LogStallHandler),
        )))
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }
}

/// Runs a single hook to a terminal status. Never fails: every problem is
/// folded into the returned result.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, hook: &HookDefinition, ctx: &RunContext) -> HookResult;
}

/// Subprocess-backed hook runner.
///
/// A nonzero exit only counts as FAILED when the hook's output parser
/// recognizes at least one finding in it; anything else (a traceback, a usage
/// message) means the tool crashed and the hook is ERRORED.
pub struct HookExecutor {
    registry: Arc<ToolCommandRegistry>,
    collector: Arc<IssueCollector>,
}

impl HookExecutor {
    pub fn new(registry: Arc<ToolCommandRegistry>) -> Self {
        Self {
            registry,
            collector: Arc::new(IssueCollector::with_builtin_adapters()),
        }
    }

    /// Use `collector`'s adapters to tell diagnostics from crashes.
    pub fn with_collector(mut self, collector: Arc<IssueCollector>) -> Self {
        self.collector = collector;
        self
    }

    /// Keep a FAILED result only if its output parses into findings.
    fn confirm_failure(
        &self,
        hook: &HookDefinition,
        exit_code: i32,
        result: HookResult,
    ) -> HookResult {
        let Err(e) = self.collector.parse_result(&result) else {
            return result;
        };
        tracing::warn!(
            hook = %hook.name,
            exit_code,
            error = %e,
            "Nonzero exit without a recognizable diagnostic"
        );
        let sample = result
            .combined_output()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(5)
            .collect::<Vec<_>>()
            .join("\n");
        let err = HookExecutionError::UnrecognizedFailure {
            hook: hook.name.clone(),
            exit_code,
            sample,
        };
        result
            .with_status(HookStatus::Errored)
            .with_error(err.to_string())
    }

    async fn run_once(&self, hook: &HookDefinition, ctx: &RunContext) -> HookResult {
        let started = Instant::now();
        let result = HookResult::new(&hook.name, hook.stage).with_status(HookStatus::Running);

        let argv = match hook.argv(&self.registry) {
            Ok(argv) => argv,
            Err(e) => {
                return result
                    .with_status(HookStatus::Errored)
                    .with_error(e.to_string())
            }
        };
        let program = &argv[0];

        let working_dir = hook.working_dir.as_ref().or(ctx.working_dir.as_ref());
        if let Some(dir) = working_dir {
            if !dir.is_dir() {
                let err = HookExecutionError::SpawnFailed {
                    hook: hook.name.clone(),
                    command: program.clone(),
                    error: format!("working directory {} does not exist", dir.display()),
                };
                return result
                    .with_status(HookStatus::Errored)
                    .with_error(err.to_string());
            }
        }

        let mut cmd = Command::new(program);
        cmd.args(&argv[1..])
            .envs(&hook.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = if e.kind() == std::io::ErrorKind::NotFound {
                    HookExecutionError::CommandNotFound {
                        hook: hook.name.clone(),
                        command: program.clone(),
                        suggestion: not_found_hint(program),
                    }
                } else {
                    HookExecutionError::SpawnFailed {
                        hook: hook.name.clone(),
                        command: program.clone(),
                        error: e.to_string(),
                    }
                };
                tracing::error!(hook = %hook.name, command = %program, error = %err, "Failed to spawn hook");
                return result
                    .with_status(HookStatus::Errored)
                    .with_error(err.to_string())
                    .with_duration(started.elapsed());
            }
        };

        let stdout = OutputCapture::spawn(child.stdout.take());
        let stderr = OutputCapture::spawn(child.stderr.take());

        let (stop_tx, stop_rx) = oneshot::channel();
        let watcher = child.id().map(|pid| {
            tracing::debug!(hook = %hook.name, pid, "Hook process started");
            let monitor = Arc::clone(&ctx.monitor);
            let name = hook.name.clone();
            tokio::spawn(async move { monitor.watch(&name, pid, stop_rx).await })
        });

        let waited = tokio::time::timeout(hook.timeout, child.wait()).await;
        let timed_out = waited.is_err();
        if timed_out {
            tracing::warn!(hook = %hook.name, timeout = ?hook.timeout, "Hook exceeded its timeout");
            terminate(&mut child, ctx.termination_grace, &hook.name).await;
        }

        let _ = stop_tx.send(());
        let stall_warnings = match watcher {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        };

        let stdout = stdout.finish().await;
        let stderr = stderr.finish().await;
        let mut result = result
            .with_output(stdout, stderr)
            .with_duration(started.elapsed());
        result.stall_warnings = stall_warnings;

        match waited {
            Err(_) => {
                let err = HookExecutionError::Timeout {
                    hook: hook.name.clone(),
                    timeout: hook.timeout,
                };
                result.with_status(HookStatus::TimedOut).with_error(err.to_string())
            }
            Ok(Err(e)) => {
                let err = HookExecutionError::WaitFailed {
                    hook: hook.name.clone(),
                    error: e.to_string(),
                };
                result.with_status(HookStatus::Errored).with_error(err.to_string())
            }
            Ok(Ok(status)) => {
                let exit_code = status.code();
                let classified = classify_exit(exit_code, &result.stdout, &result.stderr);
                let result = result.with_exit_code(exit_code).with_status(classified);
                match (classified, exit_code) {
                    (HookStatus::Failed, Some(code)) => self.confirm_failure(hook, code, result),
                    (HookStatus::Errored, Some(code)) => {
                        let err = HookExecutionError::NoOutput {
                            hook: hook.name.clone(),
                            exit_code: code,
                        };
                        result.with_error(err.to_string())
                    }
                    (HookStatus::Errored, None) => {
                        let err = HookExecutionError::Crashed {
                            hook: hook.name.clone(),
                            stderr: result.stderr.clone(),
                        };
                        result.with_error(err.to_string())
                    }
                    _ => result,
                }
            }
        }
    }
}

#[async_trait]
impl HookRunner for HookExecutor {
    async fn run(&self, hook: &HookDefinition, ctx: &RunContext) -> HookResult {
        let span = hook_execution_span(&hook.name, hook.stage);
        async {
            let started = Instant::now();
            let mut attempts = 0;
            let mut result = loop {
                attempts += 1;
                let result = self.run_once(hook, ctx).await;
                if result.status == HookStatus::Errored && hook.retry_on_failure && attempts == 1 {
                    tracing::warn!(
                        hook = %hook.name,
                        error = ?result.error,
                        "Hook errored, retrying once"
                    );
                    continue;
                }
                break result;
            };
            result.attempts = attempts;
            result.duration = started.elapsed();
            log_hook_completion(&result);
            result
        }
        .instrument(span)
        .await
    }
}

/// Map a finished process to a terminal status.
///
/// A signal death (no exit code) or a nonzero exit with no output at all means
/// the tool never got to report anything, so it is ERRORED rather than FAILED.
pub fn classify_exit(exit_code: Option<i32>, stdout: &str, stderr: &str) -> HookStatus {
    match exit_code {
        Some(0) => HookStatus::Passed,
        None => HookStatus::Errored,
        Some(_) if stdout.trim().is_empty() && stderr.trim().is_empty() => HookStatus::Errored,
        Some(_) => HookStatus::Failed,
    }
}

/// Hint for an executable the OS could not find.
pub fn not_found_hint(program: &str) -> Option<String> {
    if Path::new(program).components().count() > 1 {
        return Some(format!("'{program}' does not exist or is not executable"));
    }
    match which::which(program) {
        Ok(_) => None,
        Err(_) => Some(format!(
            "'{program}' is not on PATH; install it or register a different command for this tool"
        )),
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration, hook: &str) {
    if let Some(pid) = child.id() {
        if send_sigterm(pid, hook) {
            if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
                tracing::debug!(hook = %hook, pid, "Hook exited after SIGTERM");
                return;
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::warn!(hook = %hook, error = %e, "Failed to kill hook process");
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32, hook: &str) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            let err = HookExecutionError::TerminationFailed {
                pid,
                error: e.to_string(),
            };
            tracing::warn!(hook = %hook, error = %err, "SIGTERM failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32, _hook: &str) -> bool {
    false
}

/// Incrementally buffered pipe reader. Whatever has been read is kept even if
/// the reader never reaches EOF.
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    async fn finish(self) -> String {
        if let Some(mut reader) = self.reader {
            if tokio::time::timeout(CAPTURE_DRAIN_LIMIT, &mut reader).await.is_err() {
                reader.abort();
            }
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
