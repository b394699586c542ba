// ABOUTME: Shared test fixtures for executor integration tests
// ABOUTME: Scripted in-memory container runtime and a recording audit sink

#![allow(dead_code)]

use async_trait::async_trait;
use bastion_sandbox::frames::encode_frame;
use bastion_sandbox::{
    AuditSink, ContainerLogs, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError,
    SandboxAuditEntry, StreamKind, WaitOutcome,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// How the fake container's process ends
#[derive(Debug, Clone)]
pub enum WaitScript {
    /// Exit with `code` after `after`
    Exit { code: i64, after: Duration },
    /// Never exits on its own
    Hang,
    /// The runtime fails while waiting
    Fail(RuntimeError),
}

/// Calls observed by the fake, in order per operation
#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub availability_checks: usize,
    pub pulled: Vec<String>,
    pub created: Vec<ContainerSpec>,
    pub started: Vec<String>,
    pub waited: Vec<String>,
    pub logs: Vec<String>,
    pub inspected: Vec<String>,
    pub killed: Vec<String>,
    pub removed: Vec<String>,
}

/// In-memory runtime driven by a script
///
/// Logs are stored as the raw multiplexed byte stream the Docker Engine
/// returns and decoded on every `container_logs` call.
pub struct FakeRuntime {
    available: bool,
    wait: WaitScript,
    log_stream: Vec<u8>,
    create_error: Option<RuntimeError>,
    start_error: Option<RuntimeError>,
    logs_error: Option<RuntimeError>,
    remove_error: Option<RuntimeError>,
    oom_killed: bool,
    next_id: AtomicUsize,
    calls: Mutex<Calls>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            available: true,
            wait: WaitScript::Exit {
                code: 0,
                after: Duration::ZERO,
            },
            log_stream: Vec::new(),
            create_error: None,
            start_error: None,
            logs_error: None,
            remove_error: None,
            oom_killed: false,
            next_id: AtomicUsize::new(1),
            calls: Mutex::new(Calls::default()),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn exits_with(mut self, code: i64, after: Duration) -> Self {
        self.wait = WaitScript::Exit { code, after };
        self
    }

    pub fn hangs(mut self) -> Self {
        self.wait = WaitScript::Hang;
        self
    }

    pub fn wait_fails(mut self, err: RuntimeError) -> Self {
        self.wait = WaitScript::Fail(err);
        self
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.log_stream
            .extend(encode_frame(StreamKind::Stdout, text.as_bytes()));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.log_stream
            .extend(encode_frame(StreamKind::Stderr, text.as_bytes()));
        self
    }

    pub fn raw_log_stream(mut self, bytes: &[u8]) -> Self {
        self.log_stream.extend_from_slice(bytes);
        self
    }

    pub fn create_fails(mut self, err: RuntimeError) -> Self {
        self.create_error = Some(err);
        self
    }

    pub fn start_fails(mut self, err: RuntimeError) -> Self {
        self.start_error = Some(err);
        self
    }

    pub fn logs_fail(mut self, err: RuntimeError) -> Self {
        self.logs_error = Some(err);
        self
    }

    pub fn remove_fails(mut self, err: RuntimeError) -> Self {
        self.remove_error = Some(err);
        self
    }

    pub fn oom_killed(mut self) -> Self {
        self.oom_killed = true;
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    fn record<F: FnOnce(&mut Calls)>(&self, f: F) {
        f(&mut self.calls.lock().unwrap());
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn is_available(&self) -> bool {
        self.record(|c| c.availability_checks += 1);
        self.available
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        self.record(|c| c.pulled.push(image.to_string()));
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        self.record(|c| c.created.push(spec.clone()));
        if let Some(err) = &self.create_error {
            return Err(err.clone());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake-{}", n))
    }

    async fn start_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.record(|c| c.started.push(container_id.to_string()));
        match &self.start_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn wait_container(&self, container_id: &str) -> RuntimeResult<WaitOutcome> {
        self.record(|c| c.waited.push(container_id.to_string()));
        match &self.wait {
            WaitScript::Exit { code, after } => {
                tokio::time::sleep(*after).await;
                Ok(WaitOutcome { exit_code: *code })
            }
            WaitScript::Hang => std::future::pending().await,
            WaitScript::Fail(err) => Err(err.clone()),
        }
    }

    async fn container_logs(&self, container_id: &str) -> RuntimeResult<ContainerLogs> {
        self.record(|c| c.logs.push(container_id.to_string()));
        match &self.logs_error {
            Some(err) => Err(err.clone()),
            None => Ok(ContainerLogs::from_multiplexed(&self.log_stream)),
        }
    }

    async fn inspect_container(&self, container_id: &str) -> RuntimeResult<ContainerState> {
        self.record(|c| c.inspected.push(container_id.to_string()));
        Ok(ContainerState {
            status: "exited".to_string(),
            running: false,
            exit_code: None,
            oom_killed: self.oom_killed,
        })
    }

    async fn kill_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.record(|c| c.killed.push(container_id.to_string()));
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.record(|c| c.removed.push(container_id.to_string()));
        match &self.remove_error {
            Some(err) if !err.is_not_found() => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

/// Audit sink that keeps every entry in memory
#[derive(Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<SandboxAuditEntry>>,
}

impl RecordingAuditSink {
    pub fn entries(&self) -> Vec<SandboxAuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, entry: &SandboxAuditEntry) -> anyhow::Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Opt-in log output: `RUST_LOG=bastion_sandbox=debug cargo test`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .with_test_writer()
        .try_init();
}
