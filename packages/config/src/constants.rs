// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Bastion

// Sandbox Image & Policy
pub const BASTION_SANDBOX_IMAGE: &str = "BASTION_SANDBOX_IMAGE";
pub const BASTION_SANDBOX_NETWORK: &str = "BASTION_SANDBOX_NETWORK";
pub const BASTION_SANDBOX_WORKDIR: &str = "BASTION_SANDBOX_WORKDIR";

// Sandbox Timeouts
pub const BASTION_SANDBOX_TIMEOUT_MS: &str = "BASTION_SANDBOX_TIMEOUT_MS";
pub const BASTION_SANDBOX_PULL_TIMEOUT_SECS: &str = "BASTION_SANDBOX_PULL_TIMEOUT_SECS";

// Sandbox Resource Limits
pub const BASTION_SANDBOX_MEMORY_MB: &str = "BASTION_SANDBOX_MEMORY_MB";
pub const BASTION_SANDBOX_MEMORY_SWAP_MB: &str = "BASTION_SANDBOX_MEMORY_SWAP_MB";
pub const BASTION_SANDBOX_CPU_QUOTA_US: &str = "BASTION_SANDBOX_CPU_QUOTA_US";
pub const BASTION_SANDBOX_CPU_PERIOD_US: &str = "BASTION_SANDBOX_CPU_PERIOD_US";
pub const BASTION_SANDBOX_PIDS_LIMIT: &str = "BASTION_SANDBOX_PIDS_LIMIT";

// Defaults
pub const DEFAULT_SANDBOX_IMAGE: &str = "alpine:3.19";
pub const DEFAULT_SANDBOX_WORKDIR: &str = "/workspace";
pub const DEFAULT_SANDBOX_TIMEOUT_MS: u64 = 30_000;

/// Upper bound accepted from the environment for the sandbox timeout (1 hour)
pub const MAX_SANDBOX_TIMEOUT_MS: u64 = 3_600_000;

pub const DEFAULT_SANDBOX_PULL_TIMEOUT_SECS: u64 = 600;

/// Upper bound accepted from the environment for an image pull (1 hour)
pub const MAX_SANDBOX_PULL_TIMEOUT_SECS: u64 = 3_600;
