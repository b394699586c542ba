// ABOUTME: Sandboxed command executor for running shell commands in isolated containers
// ABOUTME: Runtime abstraction, log frame decoding, policy translation, timeouts, and audit emission

pub mod audit;
pub mod error;
pub mod executor;
pub mod frames;
pub mod policy;
pub mod runtime;
pub mod types;

pub use audit::{AuditSink, ChannelAuditSink, TracingAuditSink};
pub use error::{Result, RuntimeError, RuntimeErrorKind, SandboxError};
pub use executor::{SandboxExecutor, KILLED_EXIT_CODE};
pub use frames::{ContainerLogs, LogDemuxer, StreamKind};
pub use runtime::{
    Container, ContainerRuntime, ContainerSpec, ContainerState, DockerRuntime, HostConfigSpec,
    WaitOutcome,
};
pub use types::{
    ExecutionContext, ExecutionResult, MountSpec, NetworkPolicy, ResourceLimits,
    SandboxAuditEntry, SandboxConfig, SandboxStatus, SandboxStatusInfo,
};
