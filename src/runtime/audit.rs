use serde_json::Value;
use tracing::info;

/// Best-effort record of data changes made through the runtime.
///
/// Implementations must not fail the caller; anything that goes wrong is
/// theirs to log and drop.
pub trait AuditSink: Send + Sync {
    fn record(&self, workspace_id: &str, action: &str, target: &str, metadata: Value);
}

/// Writes audit events as structured `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, workspace_id: &str, action: &str, target: &str, metadata: Value) {
        info!(
            target: "tenant_runtime::audit",
            workspace_id,
            action,
            target_name = target,
            metadata = %metadata,
            "audit"
        );
    }
}
