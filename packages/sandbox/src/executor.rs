// ABOUTME: Sandbox executor orchestrating one command per fresh container
// ABOUTME: Validates input, races the container wait against a deadline, audits, and always cleans up

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::error::{Result, SandboxError};
use crate::policy;
use crate::runtime::{self, Container, ContainerRuntime, WaitOutcome};
use crate::types::{
    ExecutionContext, ExecutionResult, SandboxAuditEntry, SandboxConfig, SandboxStatus,
    SandboxStatusInfo,
};

/// Exit code reported for a container terminated with SIGKILL (128 + 9)
pub const KILLED_EXIT_CODE: i64 = 137;

const CONTAINER_NAME_PREFIX: &str = "bastion-sandbox";

/// First-writer-wins flag shared by both sides of the wait/deadline race
#[derive(Debug, Default)]
struct ResolutionGuard(AtomicBool);

impl ResolutionGuard {
    /// Returns true for exactly one caller
    fn try_resolve(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug)]
enum RaceOutcome {
    Exited(WaitOutcome),
    DeadlineElapsed,
    KillRequested,
}

type WaitReceiver = oneshot::Receiver<runtime::Result<WaitOutcome>>;

/// Removes the container if the execution future is dropped before cleanup ran
#[derive(Default)]
struct RemovalGuard(Option<Container>);

impl RemovalGuard {
    fn arm(&mut self, container: Container) {
        self.0 = Some(container);
    }

    fn container_id(&self) -> Option<String> {
        self.0.as_ref().map(|c| c.id().to_string())
    }

    fn take(&mut self) -> Option<Container> {
        self.0.take()
    }
}

impl Drop for RemovalGuard {
    fn drop(&mut self) {
        let Some(container) = self.0.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Execution abandoned mid-run, removing container {} in background",
                    container.id()
                );
                handle.spawn(async move {
                    if let Err(e) = container.remove().await {
                        warn!("Background removal of {} failed: {}", container.id(), e);
                    }
                });
            }
            Err(_) => error!(
                "Execution abandoned outside a runtime, container {} was not removed",
                container.id()
            ),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs shell commands in isolated, resource-bounded containers
///
/// Each [`execute`](Self::execute) call creates a fresh container and removes
/// it before returning. One instance handles one execution at a time; use
/// separate executors for concurrent runs. The runtime may be shared.
pub struct SandboxExecutor {
    config: SandboxConfig,
    runtime: Arc<dyn ContainerRuntime>,
    audit: Arc<dyn AuditSink>,
    status: Arc<RwLock<SandboxStatusInfo>>,
    /// Container created by a run and not yet confirmed removed
    tracked: Mutex<Option<String>>,
    kill_requested: AtomicBool,
    kill_signal: Notify,
}

impl SandboxExecutor {
    /// Create an executor; fails if `config` is invalid
    pub fn new(
        config: SandboxConfig,
        runtime: Arc<dyn ContainerRuntime>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            runtime,
            audit,
            status: Arc::new(RwLock::new(SandboxStatusInfo::default())),
            tracked: Mutex::new(None),
            kill_requested: AtomicBool::new(false),
            kill_signal: Notify::new(),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Snapshot of the live status
    pub async fn status(&self) -> SandboxStatusInfo {
        self.status.read().await.clone()
    }

    /// Run `command` with no caller identity attached
    pub async fn execute(&self, command: &str) -> ExecutionResult {
        self.execute_with_context(command, &ExecutionContext::default())
            .await
    }

    /// Run `command` inside a fresh container
    ///
    /// Never returns an error: every failure is reported through the result's
    /// status and `error` field. Exactly one audit entry is emitted per call.
    pub async fn execute_with_context(
        &self,
        command: &str,
        ctx: &ExecutionContext,
    ) -> ExecutionResult {
        let started = Instant::now();

        if let Err(e) = self.preflight(command).await {
            warn!("Rejected sandbox command before container creation: {}", e);
            let result = ExecutionResult::failed(e.to_string(), None, elapsed_ms(started));
            self.emit_audit(command, &result, ctx);
            return result;
        }

        self.kill_requested.store(false, Ordering::SeqCst);
        *self.status.write().await = SandboxStatusInfo {
            container_id: None,
            status: SandboxStatus::Running,
            command: Some(command.to_string()),
            started_at: Some(Utc::now()),
            ended_at: None,
            duration_ms: None,
        };

        info!(
            "Executing sandboxed command in {} (timeout: {} ms)",
            self.config.image, self.config.timeout_ms
        );
        debug!("Sandbox command: {}", command);

        let mut guard = RemovalGuard::default();
        let outcome = self.run(command, ctx, started, &mut guard).await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("Sandbox execution failed: {}", e);
                ExecutionResult::failed(e.to_string(), guard.container_id(), elapsed_ms(started))
            }
        };

        {
            let mut status = self.status.write().await;
            status.status = result.status;
            status.ended_at = Some(Utc::now());
            status.duration_ms = Some(result.duration_ms);
        }

        info!(
            "Sandboxed command finished: status={} exit_code={:?} duration={}ms",
            result.status, result.exit_code, result.duration_ms
        );

        self.emit_audit(command, &result, ctx);

        if let Some(container) = guard.take() {
            self.remove_container(&container).await;
        }

        result
    }

    /// Request termination of the in-flight run
    ///
    /// The run resolves as [`SandboxStatus::Killed`] unless it already finished.
    /// Returns false when nothing is running.
    pub async fn kill(&self) -> bool {
        if self.status.read().await.status != SandboxStatus::Running {
            return false;
        }

        info!("Kill requested for running sandbox");
        self.kill_requested.store(true, Ordering::SeqCst);
        self.kill_signal.notify_waiters();
        true
    }

    /// Remove any tracked container and reset the status to idle
    ///
    /// Safe to call at any time, including when nothing was ever executed.
    pub async fn cleanup(&self) {
        let tracked = self.tracked.lock().await.take();

        if let Some(container_id) = tracked {
            debug!("Cleaning up container {}", container_id);
            let container = Container::from_id(self.runtime.clone(), container_id);
            if let Err(e) = container.remove().await {
                warn!("Failed to remove container {} during cleanup: {}", container.id(), e);
            }
        }

        *self.status.write().await = SandboxStatusInfo::default();
    }

    // ==================== Private Helper Methods ====================

    async fn preflight(&self, command: &str) -> Result<()> {
        if command.trim().is_empty() {
            return Err(SandboxError::InvalidCommand(
                "Command cannot be empty".to_string(),
            ));
        }

        if !self.runtime.is_available().await {
            return Err(SandboxError::RuntimeUnavailable(
                "the container runtime did not respond".to_string(),
            ));
        }

        Ok(())
    }

    async fn run(
        &self,
        command: &str,
        ctx: &ExecutionContext,
        started: Instant,
        guard: &mut RemovalGuard,
    ) -> Result<ExecutionResult> {
        let mut spec = policy::translate(&self.config, command, ctx);
        spec.name = Some(format!(
            "{}-{}",
            CONTAINER_NAME_PREFIX,
            Uuid::new_v4().simple()
        ));

        self.runtime.pull_image(&spec.image).await?;

        let container = Container::create(self.runtime.clone(), &spec).await?;
        guard.arm(container.clone());
        *self.tracked.lock().await = Some(container.id().to_string());
        self.status.write().await.container_id = Some(container.id().to_string());

        container.start().await?;

        let container_id = Some(container.id().to_string());

        match self.race(&container).await? {
            RaceOutcome::Exited(outcome) => {
                let logs = container.logs().await?;
                let (status, error) = if outcome.exit_code == 0 {
                    (SandboxStatus::Completed, None)
                } else {
                    (
                        SandboxStatus::Failed,
                        Some(self.describe_exit(&container, outcome.exit_code).await),
                    )
                };

                Ok(ExecutionResult {
                    status,
                    exit_code: Some(outcome.exit_code),
                    stdout: logs.stdout,
                    stderr: logs.stderr,
                    duration_ms: elapsed_ms(started),
                    container_id,
                    error,
                })
            }
            RaceOutcome::DeadlineElapsed => {
                warn!(
                    "Container {} exceeded {} ms timeout, killing",
                    container.id(),
                    self.config.timeout_ms
                );
                Ok(self
                    .terminated(
                        &container,
                        SandboxStatus::Timeout,
                        SandboxError::Timeout {
                            timeout_ms: self.config.timeout_ms,
                        },
                        started,
                    )
                    .await)
            }
            RaceOutcome::KillRequested => {
                warn!("Killing container {} on request", container.id());
                Ok(self
                    .terminated(&container, SandboxStatus::Killed, SandboxError::Killed, started)
                    .await)
            }
        }
    }

    /// Race the container's exit against the deadline and kill requests
    async fn race(&self, container: &Container) -> Result<RaceOutcome> {
        let guard = Arc::new(ResolutionGuard::default());
        let (tx, mut rx) = oneshot::channel();

        let waiter = {
            let container = container.clone();
            let guard = guard.clone();
            tokio::spawn(async move {
                let waited = container.wait().await;
                if guard.try_resolve() {
                    let _ = tx.send(waited);
                } else {
                    debug!("Discarding late exit of container {}", container.id());
                }
            })
        };

        let deadline = tokio::time::sleep(self.config.timeout());
        tokio::pin!(deadline);
        // Registered before the flag check so a concurrent kill() cannot slip between them
        let kill_signal = self.kill_signal.notified();
        tokio::pin!(kill_signal);

        if self.kill_requested.load(Ordering::SeqCst) {
            return settle(&guard, &mut rx, &waiter, RaceOutcome::KillRequested).await;
        }

        tokio::select! {
            waited = &mut rx => match waited {
                Ok(result) => Ok(RaceOutcome::Exited(result?)),
                Err(_) => Err(SandboxError::WaitInterrupted(
                    "wait task stopped without a result".to_string(),
                )),
            },
            _ = &mut deadline => {
                settle(&guard, &mut rx, &waiter, RaceOutcome::DeadlineElapsed).await
            }
            _ = &mut kill_signal => {
                settle(&guard, &mut rx, &waiter, RaceOutcome::KillRequested).await
            }
        }
    }

    /// Kill the container and build the result for a forced termination
    async fn terminated(
        &self,
        container: &Container,
        status: SandboxStatus,
        reason: SandboxError,
        started: Instant,
    ) -> ExecutionResult {
        if let Err(e) = container.kill().await {
            warn!("Failed to kill container {}: {}", container.id(), e);
        }

        let logs = match container.logs().await {
            Ok(logs) => logs,
            Err(e) => {
                debug!("No logs for terminated container {}: {}", container.id(), e);
                Default::default()
            }
        };

        ExecutionResult {
            status,
            exit_code: Some(KILLED_EXIT_CODE),
            stdout: logs.stdout,
            stderr: logs.stderr,
            duration_ms: elapsed_ms(started),
            container_id: Some(container.id().to_string()),
            error: Some(reason.to_string()),
        }
    }

    async fn describe_exit(&self, container: &Container, exit_code: i64) -> String {
        if exit_code == KILLED_EXIT_CODE {
            if let Ok(state) = container.inspect().await {
                if state.oom_killed {
                    return format!(
                        "Command was killed by the out-of-memory killer (exit code {})",
                        exit_code
                    );
                }
            }
        }
        format!("Command exited with code {}", exit_code)
    }

    async fn remove_container(&self, container: &Container) {
        match container.remove().await {
            Ok(()) => {
                let mut tracked = self.tracked.lock().await;
                if tracked.as_deref() == Some(container.id()) {
                    *tracked = None;
                }
            }
            Err(e) => warn!("Failed to remove container {}: {}", container.id(), e),
        }
    }

    fn emit_audit(&self, command: &str, result: &ExecutionResult, ctx: &ExecutionContext) {
        let entry = SandboxAuditEntry::from_result(command, result, ctx);

        match catch_unwind(AssertUnwindSafe(|| self.audit.record(&entry))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Audit sink rejected entry: {}", e),
            Err(_) => error!("Audit sink panicked while recording entry"),
        }
    }
}

/// Claim the race for an early outcome, or collect the exit that claimed it first
async fn settle(
    guard: &ResolutionGuard,
    rx: &mut WaitReceiver,
    waiter: &JoinHandle<()>,
    early: RaceOutcome,
) -> Result<RaceOutcome> {
    if guard.try_resolve() {
        waiter.abort();
        return Ok(early);
    }

    match rx.await {
        Ok(result) => Ok(RaceOutcome::Exited(result?)),
        Err(_) => Err(SandboxError::WaitInterrupted(
            "wait task stopped without a result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_guard_single_winner() {
        let guard = ResolutionGuard::default();
        assert!(guard.try_resolve());
        assert!(!guard.try_resolve());
        assert!(!guard.try_resolve());
    }

    #[tokio::test]
    async fn test_resolution_guard_under_contention() {
        let guard = Arc::new(ResolutionGuard::default());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move { guard.try_resolve() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_killed_exit_code() {
        assert_eq!(KILLED_EXIT_CODE, 128 + 9);
    }
}
