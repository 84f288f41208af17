//! Audit trail of catalog mutations.
//!
//! One entry per committed mutation. Entries are emitted after commit, so a rolled-back
//! unit of work never shows up here.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use catalogerp_core::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Rename,
    /// Product identity regenerated because an ancestor was renamed.
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    /// `"product"` or an entity kind such as `"pack_size"`.
    pub resource_type: String,
    pub resource_id: Uuid,
    pub actor: UserId,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<Uuid>,
        actor: UserId,
    ) -> Self {
        Self {
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            actor,
            metadata: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Destination of audit entries. Recording is infallible from the caller's side.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Emits each entry as a structured `info` event on the `catalogerp::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "catalogerp::audit",
            action = ?entry.action,
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            actor = %entry.actor,
            metadata = %entry.metadata,
            "catalog mutation"
        );
    }
}

/// Keeps entries in memory (tests).
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalogerp_core::ProductId;

    #[test]
    fn in_memory_sink_keeps_order() {
        let sink = InMemoryAuditSink::new();
        let actor = UserId::new();
        let id = ProductId::new();
        sink.record(AuditEntry::new(AuditAction::Create, "product", id, actor));
        sink.record(
            AuditEntry::new(AuditAction::Cascade, "product", id, actor)
                .with_metadata(serde_json::json!({ "old_sku": "A-B-C-D" })),
        );

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Create);
        assert_eq!(entries[1].metadata["old_sku"], "A-B-C-D");
        assert_eq!(entries[1].resource_id, *id.as_uuid());
    }
}
