// ABOUTME: Container runtime trait and the runtime-facing container specification
// ABOUTME: Defines the narrow lifecycle interface the executor drives, plus a per-container handle

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RuntimeError;
pub use crate::frames::ContainerLogs;

pub mod docker;

pub use docker::DockerRuntime;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Fully-resolved container definition handed to the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Optional container name; the runtime generates one when unset
    pub name: Option<String>,
    pub image: String,
    /// Argument vector, e.g. `["/bin/sh", "-c", "echo hi"]`
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries; `None` when there is nothing to set
    pub env: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub host_config: HostConfigSpec,
}

/// Isolation and resource settings applied by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfigSpec {
    pub network_mode: String,
    pub memory: Option<i64>,
    pub memory_swap: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub cpu_period: Option<i64>,
    pub pids_limit: Option<i64>,
    /// `host:container:ro|rw`
    pub binds: Vec<String>,
    pub readonly_rootfs: bool,
    /// Writable scratch mounts (path -> mount options) on top of the read-only root
    pub tmpfs: BTreeMap<String, String>,
    pub cap_drop: Vec<String>,
    pub privileged: bool,
    pub security_opt: Vec<String>,
}

/// Result of waiting for a container's main process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub exit_code: i64,
}

/// Snapshot of a container's state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub oom_killed: bool,
}

/// Container runtime backend
///
/// Implementations must be safe to share between executors; they hold no
/// per-container state beyond their connection handle.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ping the runtime. Connection failures yield `false`.
    async fn is_available(&self) -> bool;

    /// Pull an image unless it already exists locally
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Block until the container's process exits
    async fn wait_container(&self, container_id: &str) -> Result<WaitOutcome>;

    /// Collect everything the container wrote to stdout and stderr
    async fn container_logs(&self, container_id: &str) -> Result<ContainerLogs>;

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState>;

    /// Send SIGKILL. A container that no longer exists is not an error.
    async fn kill_container(&self, container_id: &str) -> Result<()>;

    /// Force-remove the container. A container that no longer exists is not an error.
    async fn remove_container(&self, container_id: &str) -> Result<()>;
}

/// Handle to one created container
#[derive(Clone)]
pub struct Container {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").field("id", &self.id).finish()
    }
}

impl Container {
    /// Create a container from `spec` on `runtime`
    pub async fn create(runtime: Arc<dyn ContainerRuntime>, spec: &ContainerSpec) -> Result<Self> {
        let id = runtime.create_container(spec).await?;
        Ok(Self { runtime, id })
    }

    /// Wrap an existing container id
    pub fn from_id(runtime: Arc<dyn ContainerRuntime>, id: impl Into<String>) -> Self {
        Self {
            runtime,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn start(&self) -> Result<()> {
        self.runtime.start_container(&self.id).await
    }

    pub async fn wait(&self) -> Result<WaitOutcome> {
        self.runtime.wait_container(&self.id).await
    }

    pub async fn logs(&self) -> Result<ContainerLogs> {
        self.runtime.container_logs(&self.id).await
    }

    pub async fn inspect(&self) -> Result<ContainerState> {
        self.runtime.inspect_container(&self.id).await
    }

    pub async fn kill(&self) -> Result<()> {
        self.runtime.kill_container(&self.id).await
    }

    pub async fn remove(&self) -> Result<()> {
        self.runtime.remove_container(&self.id).await
    }
}
