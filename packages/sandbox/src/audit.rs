// ABOUTME: Audit sink capability receiving one entry per sandboxed execution
// ABOUTME: Provides closure, channel (message passing), and tracing-backed sinks

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::{SandboxAuditEntry, SandboxStatus};

/// Receiver of audit entries
///
/// Advisory output only: the executor logs and otherwise ignores any error a
/// sink returns. Persisting entries is the sink owner's job.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &SandboxAuditEntry) -> anyhow::Result<()>;
}

impl<F> AuditSink for F
where
    F: Fn(&SandboxAuditEntry) -> anyhow::Result<()> + Send + Sync,
{
    fn record(&self, entry: &SandboxAuditEntry) -> anyhow::Result<()> {
        self(entry)
    }
}

/// Forwards entries over an unbounded channel to a separate consumer task
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<SandboxAuditEntry>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SandboxAuditEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, entry: &SandboxAuditEntry) -> anyhow::Result<()> {
        self.tx
            .send(entry.clone())
            .map_err(|_| anyhow::anyhow!("audit receiver dropped"))
    }
}

/// Writes each entry as a structured log event on the `bastion::audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &SandboxAuditEntry) -> anyhow::Result<()> {
        let container_id = entry.container_id.as_deref().unwrap_or("-");
        let user_id = entry.user_id.as_deref().unwrap_or("-");

        if entry.status == SandboxStatus::Completed {
            info!(
                target: "bastion::audit",
                container_id,
                user_id,
                status = %entry.status,
                exit_code = ?entry.exit_code,
                duration_ms = entry.duration_ms,
                "sandbox command: {}",
                entry.command
            );
        } else {
            warn!(
                target: "bastion::audit",
                container_id,
                user_id,
                status = %entry.status,
                exit_code = ?entry.exit_code,
                duration_ms = entry.duration_ms,
                error = entry.error.as_deref().unwrap_or(""),
                "sandbox command: {}",
                entry.command
            );
        }

        debug!(target: "bastion::audit", "{}", entry.to_json()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionContext, ExecutionResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn entry() -> SandboxAuditEntry {
        let result = ExecutionResult::failed("boom", None, 3);
        SandboxAuditEntry::from_result("false", &result, &ExecutionContext::default())
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelAuditSink::new();
        sink.record(&entry()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.command, "false");
        assert_eq!(received.status, SandboxStatus::Failed);
    }

    #[test]
    fn test_channel_sink_errors_when_receiver_dropped() {
        let (sink, rx) = ChannelAuditSink::new();
        drop(rx);
        assert!(sink.record(&entry()).is_err());
    }

    #[test]
    fn test_closure_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let sink = move |_: &SandboxAuditEntry| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        sink.record(&entry()).unwrap();
        sink.record(&entry()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        assert!(TracingAuditSink.record(&entry()).is_ok());
    }
}
