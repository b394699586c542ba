// ABOUTME: Translation of a declarative sandbox policy into a runtime container spec
// ABOUTME: Pure mapping of network policy, resource limits, mounts, and environment

use std::collections::BTreeMap;

use crate::runtime::{ContainerSpec, HostConfigSpec};
use crate::types::{ExecutionContext, NetworkPolicy, ResourceLimits, SandboxConfig};

/// Shell used to interpret the raw command string
pub const SHELL: &str = "/bin/sh";

pub const NETWORK_MODE_NONE: &str = "none";
pub const NETWORK_MODE_BRIDGE: &str = "bridge";

/// Labels applied to all Bastion containers for tracking
pub const MANAGED_LABEL: &str = "bastion.managed";
pub const USER_LABEL: &str = "bastion.user_id";
pub const SESSION_LABEL: &str = "bastion.session_id";

/// Scratch space so shells and tools still have a writable /tmp
const TMPFS_PATH: &str = "/tmp";
const TMPFS_OPTIONS: &str = "rw,noexec,nosuid,size=64m";

/// Runtime network mode for a policy
///
/// `Internal` and `Limited` share the bridge network; any finer-grained
/// egress filtering has to be applied outside the container runtime.
pub fn network_mode(policy: NetworkPolicy) -> &'static str {
    match policy {
        NetworkPolicy::None => NETWORK_MODE_NONE,
        NetworkPolicy::Internal | NetworkPolicy::Limited => NETWORK_MODE_BRIDGE,
        NetworkPolicy::Full => NETWORK_MODE_BRIDGE,
    }
}

/// Wrap the raw command for the container's shell; the string is never split here
pub fn shell_command(command: &str) -> Vec<String> {
    vec![SHELL.to_string(), "-c".to_string(), command.to_string()]
}

/// `KEY=VALUE` list sorted by key, or `None` when there is nothing to pass
pub fn env_list(config: &SandboxConfig) -> Option<Vec<String>> {
    if config.env.is_empty() {
        return None;
    }

    let sorted: BTreeMap<&String, &String> = config.env.iter().collect();
    Some(
        sorted
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect(),
    )
}

fn to_i64(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

fn host_config(config: &SandboxConfig) -> HostConfigSpec {
    let limits = config.resource_limits.clone().unwrap_or_default();
    let ResourceLimits {
        memory_bytes,
        memory_swap_bytes,
        cpu_quota_us,
        cpu_period_us,
        pids_limit,
    } = limits;

    HostConfigSpec {
        network_mode: network_mode(config.network_policy).to_string(),
        memory: to_i64(memory_bytes),
        memory_swap: to_i64(memory_swap_bytes),
        cpu_quota: to_i64(cpu_quota_us),
        cpu_period: to_i64(cpu_period_us),
        pids_limit: to_i64(pids_limit),
        binds: config.mounts.iter().map(|m| m.to_bind()).collect(),
        // Always read-only, independent of policy
        readonly_rootfs: true,
        tmpfs: BTreeMap::from([(TMPFS_PATH.to_string(), TMPFS_OPTIONS.to_string())]),
        cap_drop: vec!["ALL".to_string()],
        privileged: false,
        security_opt: vec!["no-new-privileges".to_string()],
    }
}

fn labels(ctx: &ExecutionContext) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

    if let Some(user_id) = &ctx.user_id {
        labels.insert(USER_LABEL.to_string(), user_id.clone());
    }
    if let Some(session_id) = &ctx.session_id {
        labels.insert(SESSION_LABEL.to_string(), session_id.clone());
    }

    labels
}

/// Build the container spec for running `command` under `config`
///
/// Deterministic: the same inputs always produce an equal spec. The container
/// name is left unset for the caller to assign.
pub fn translate(config: &SandboxConfig, command: &str, ctx: &ExecutionContext) -> ContainerSpec {
    ContainerSpec {
        name: None,
        image: config.image.clone(),
        cmd: shell_command(command),
        env: env_list(config),
        working_dir: Some(config.working_dir.clone()),
        labels: labels(ctx),
        host_config: host_config(config),
    }
}
