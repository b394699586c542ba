// ABOUTME: Error types for sandboxed execution
// ABOUTME: Tagged container runtime errors plus the crate-level SandboxError

use std::fmt;
use thiserror::Error;

/// Category of a container runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeErrorKind {
    /// Could not reach the runtime at all
    Connection,
    /// The referenced container or image does not exist
    NotFound,
    /// The runtime refused the operation in the current state (e.g. not running)
    Conflict,
    /// The pull request itself was rejected
    ImagePull,
    /// The pull started but the progress stream reported a failure
    PullProgress,
    Create,
    Start,
    Wait,
    Logs,
    Kill,
    Remove,
    Inspect,
    Other,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeErrorKind::Connection => "connection",
            RuntimeErrorKind::NotFound => "not found",
            RuntimeErrorKind::Conflict => "conflict",
            RuntimeErrorKind::ImagePull => "image pull",
            RuntimeErrorKind::PullProgress => "pull progress",
            RuntimeErrorKind::Create => "create",
            RuntimeErrorKind::Start => "start",
            RuntimeErrorKind::Wait => "wait",
            RuntimeErrorKind::Logs => "logs",
            RuntimeErrorKind::Kill => "kill",
            RuntimeErrorKind::Remove => "remove",
            RuntimeErrorKind::Inspect => "inspect",
            RuntimeErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Error reported by a [`ContainerRuntime`](crate::runtime::ContainerRuntime)
///
/// Carries the kind and, when the runtime answered over HTTP, the status code,
/// so callers can tell "already gone" apart from real failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Container runtime {kind} error: {message}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::NotFound, message).with_status(404)
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// True when the target no longer exists (removal/kill treat this as success)
    ///
    /// Decided by kind alone: a 404 from an image pull keeps its `ImagePull` kind
    /// and must never read as an idempotent "already gone".
    pub fn is_not_found(&self) -> bool {
        self.kind == RuntimeErrorKind::NotFound
    }
}

/// Main error type for sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Invalid executor configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Command rejected before any container was created
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Runtime did not answer the availability probe
    #[error("Container runtime is not available: {0}")]
    RuntimeUnavailable(String),

    /// Lifecycle failure reported by the runtime
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Deadline elapsed and the container was killed
    #[error("Command timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Run was cancelled through `SandboxExecutor::kill`
    #[error("Command was killed")]
    Killed,

    /// The wait task ended without reporting an outcome
    #[error("Wait task ended unexpectedly: {0}")]
    WaitInterrupted(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
