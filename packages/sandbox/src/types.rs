// ABOUTME: Core type definitions for sandboxed execution
// ABOUTME: Sandbox configuration and validation, execution results, live status, and audit entries

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bastion_config::{constants, parse_env, parse_env_in_range};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// Network access granted to a sandboxed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    /// No network interfaces besides loopback
    #[default]
    None,
    /// Internal services only
    Internal,
    /// Allow-listed egress
    Limited,
    /// Unrestricted bridge networking
    Full,
}

impl fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkPolicy::None => "none",
            NetworkPolicy::Internal => "internal",
            NetworkPolicy::Limited => "limited",
            NetworkPolicy::Full => "full",
        };
        f.write_str(name)
    }
}

impl FromStr for NetworkPolicy {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(NetworkPolicy::None),
            "internal" => Ok(NetworkPolicy::Internal),
            "limited" => Ok(NetworkPolicy::Limited),
            "full" => Ok(NetworkPolicy::Full),
            other => Err(SandboxError::InvalidConfiguration(format!(
                "unknown network policy '{}'",
                other
            ))),
        }
    }
}

/// Resource ceilings enforced by the runtime. Unset fields keep the runtime default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    /// Memory plus swap, in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_swap_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_quota_us: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_period_us: Option<u64>,
    /// Maximum number of processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<u64>,
}

impl ResourceLimits {
    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_bytes = Some(mb.saturating_mul(1024 * 1024));
        self
    }

    pub fn with_memory_swap_mb(mut self, mb: u64) -> Self {
        self.memory_swap_bytes = Some(mb.saturating_mul(1024 * 1024));
        self
    }

    pub fn with_cpu(mut self, quota_us: u64, period_us: u64) -> Self {
        self.cpu_quota_us = Some(quota_us);
        self.cpu_period_us = Some(period_us);
        self
    }

    pub fn with_pids_limit(mut self, pids: u64) -> Self {
        self.pids_limit = Some(pids);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("memory_bytes", self.memory_bytes),
            ("memory_swap_bytes", self.memory_swap_bytes),
            ("cpu_quota_us", self.cpu_quota_us),
            ("cpu_period_us", self.cpu_period_us),
            ("pids_limit", self.pids_limit),
        ];

        for (name, value) in fields {
            match value {
                Some(0) => {
                    return Err(SandboxError::InvalidConfiguration(format!(
                        "{} must be greater than 0",
                        name
                    )))
                }
                Some(v) if v > i64::MAX as u64 => {
                    return Err(SandboxError::InvalidConfiguration(format!(
                        "{} is too large: {}",
                        name, v
                    )))
                }
                _ => {}
            }
        }

        if let (Some(memory), Some(swap)) = (self.memory_bytes, self.memory_swap_bytes) {
            if swap < memory {
                return Err(SandboxError::InvalidConfiguration(
                    "memory_swap_bytes must be at least memory_bytes".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Host directory exposed inside the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

impl MountSpec {
    pub fn read_only(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    pub fn read_write(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Bind string in `host:container:mode` form
    pub fn to_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path,
            self.container_path,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

fn default_timeout_ms() -> u64 {
    constants::DEFAULT_SANDBOX_TIMEOUT_MS
}

fn default_working_dir() -> String {
    constants::DEFAULT_SANDBOX_WORKDIR.to_string()
}

/// Immutable per-executor sandbox policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image reference (e.g., "alpine:3.19")
    pub image: String,
    #[serde(default)]
    pub network_policy: NetworkPolicy,
    /// Wall-clock limit for one command
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountSpec>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new(constants::DEFAULT_SANDBOX_IMAGE)
    }
}

impl SandboxConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            network_policy: NetworkPolicy::default(),
            timeout_ms: default_timeout_ms(),
            working_dir: default_working_dir(),
            resource_limits: None,
            env: HashMap::new(),
            mounts: Vec::new(),
        }
    }

    /// Build a config from `BASTION_SANDBOX_*` variables
    ///
    /// Unset or unparsable values fall back to the defaults; the result still
    /// goes through [`SandboxConfig::validate`] when an executor is built.
    pub fn from_env() -> Self {
        let image = std::env::var(constants::BASTION_SANDBOX_IMAGE)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| constants::DEFAULT_SANDBOX_IMAGE.to_string());

        let network_policy = std::env::var(constants::BASTION_SANDBOX_NETWORK)
            .ok()
            .and_then(|v| v.parse::<NetworkPolicy>().ok())
            .unwrap_or_default();

        let timeout_ms = parse_env_in_range(
            constants::BASTION_SANDBOX_TIMEOUT_MS,
            1..=constants::MAX_SANDBOX_TIMEOUT_MS,
            constants::DEFAULT_SANDBOX_TIMEOUT_MS,
        );

        let working_dir = std::env::var(constants::BASTION_SANDBOX_WORKDIR)
            .ok()
            .filter(|v| v.starts_with('/'))
            .unwrap_or_else(default_working_dir);

        let positive = |key: &str| parse_env::<u64>(key).filter(|&v| v > 0);
        let limits = ResourceLimits {
            memory_bytes: positive(constants::BASTION_SANDBOX_MEMORY_MB)
                .map(|mb| mb.saturating_mul(1024 * 1024)),
            memory_swap_bytes: positive(constants::BASTION_SANDBOX_MEMORY_SWAP_MB)
                .map(|mb| mb.saturating_mul(1024 * 1024)),
            cpu_quota_us: positive(constants::BASTION_SANDBOX_CPU_QUOTA_US),
            cpu_period_us: positive(constants::BASTION_SANDBOX_CPU_PERIOD_US),
            pids_limit: positive(constants::BASTION_SANDBOX_PIDS_LIMIT),
        };

        Self {
            image,
            network_policy,
            timeout_ms,
            working_dir,
            resource_limits: (!limits.is_empty()).then_some(limits),
            env: HashMap::new(),
            mounts: Vec::new(),
        }
    }

    pub fn with_network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_policy = policy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<String>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = Some(limits);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_mount(mut self, mount: MountSpec) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject configurations that can never produce a runnable container
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::InvalidConfiguration(
                "image cannot be empty".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(SandboxError::InvalidConfiguration(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !self.working_dir.starts_with('/') {
            return Err(SandboxError::InvalidConfiguration(format!(
                "working_dir must be an absolute path: {}",
                self.working_dir
            )));
        }

        if let Some(limits) = &self.resource_limits {
            limits.validate()?;
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(SandboxError::InvalidConfiguration(format!(
                    "invalid environment variable name: {:?}",
                    key
                )));
            }
        }

        for mount in &self.mounts {
            if mount.host_path.is_empty() {
                return Err(SandboxError::InvalidConfiguration(
                    "mount host_path cannot be empty".to_string(),
                ));
            }
            if !mount.container_path.starts_with('/') {
                return Err(SandboxError::InvalidConfiguration(format!(
                    "mount container_path must be absolute: {}",
                    mount.container_path
                )));
            }
        }

        Ok(())
    }
}

/// Executor lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Timeout,
    Killed,
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxStatus::Idle => "idle",
            SandboxStatus::Running => "running",
            SandboxStatus::Completed => "completed",
            SandboxStatus::Failed => "failed",
            SandboxStatus::Timeout => "timeout",
            SandboxStatus::Killed => "killed",
        };
        f.write_str(name)
    }
}

/// Live view of an executor, overwritten at each phase transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStatusInfo {
    pub container_id: Option<String>,
    pub status: SandboxStatus,
    pub command: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Outcome of one `execute` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: SandboxStatus,
    /// `None` when the process never reported one (e.g. creation failure)
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub container_id: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Failed result carrying only an error message
    pub fn failed(error: impl Into<String>, container_id: Option<String>, duration_ms: u64) -> Self {
        Self {
            status: SandboxStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms,
            container_id,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SandboxStatus::Completed
    }
}

/// Caller identity attached to an execution for auditing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// One record per `execute` call, handed to the audit sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub container_id: Option<String>,
    pub command: String,
    pub status: SandboxStatus,
    pub exit_code: Option<i64>,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl SandboxAuditEntry {
    pub fn from_result(command: &str, result: &ExecutionResult, ctx: &ExecutionContext) -> Self {
        Self {
            timestamp: Utc::now(),
            container_id: result.container_id.clone(),
            command: command.to_string(),
            status: result.status,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            error: result.error.clone(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
