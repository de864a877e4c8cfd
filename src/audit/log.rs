use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::external::{AuditQuery, AuditQueryResult, AuditRecordData, Store, StoreError};

use super::record::{event_kind_label, sanitize_details, AuditEntry};

/// Append-only audit trail. Every write goes through `Store` for durability
/// and also emits a sanitized single-line `tracing` event, so audit activity
/// shows up in the same log stream as everything else without anyone having
/// to query the store to follow along live.
pub struct AuditLog {
    store: Arc<dyn Store>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn log(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let created_at = Utc::now();
        let sanitized_details = sanitize_details(&entry.details);

        info!(
            instance_id = %entry.instance_id,
            instance_name = %entry.instance_name,
            event_kind = event_kind_label(entry.event_kind),
            username = entry.username.as_deref().unwrap_or(""),
            source_ip = entry.source_ip.as_deref().unwrap_or(""),
            details = %sanitized_details,
            duration_millis = entry.duration_millis.unwrap_or(0),
            "audit"
        );

        self.store
            .append_audit(AuditRecordData {
                id: 0,
                instance_id: entry.instance_id,
                instance_name: entry.instance_name,
                event_kind: entry.event_kind,
                username: entry.username,
                source_ip: entry.source_ip,
                details: sanitized_details,
                duration_millis: entry.duration_millis,
                created_at,
            })
            .await
    }

    pub async fn query(&self, query: AuditQuery) -> Result<AuditQueryResult, StoreError> {
        self.store.query_audit(&query).await
    }

    /// Deletes entries older than `days`. Purge never touches entries
    /// younger than the cutoff, whatever else is passed.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64, StoreError> {
        self.store.purge_audit_older_than(days).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{AuditEventKind, InMemoryStore};

    #[tokio::test]
    async fn log_then_query_returns_entry_newest_first() {
        let store = Arc::new(InMemoryStore::new());
        let audit = AuditLog::new(store);

        audit
            .log(AuditEntry::new("i1", "bot-1", AuditEventKind::ConnectionEstablished))
            .await
            .unwrap();
        audit
            .log(AuditEntry::new("i1", "bot-1", AuditEventKind::ConnectionTerminated))
            .await
            .unwrap();

        let result = audit.query(AuditQuery::with_defaults()).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.entries[0].event_kind, AuditEventKind::ConnectionTerminated);
    }

    #[tokio::test]
    async fn details_are_sanitized_of_control_characters() {
        let store = Arc::new(InMemoryStore::new());
        let audit = AuditLog::new(store);

        audit
            .log(
                AuditEntry::new("i1", "bot-1", AuditEventKind::CommandExecution)
                    .with_details("line one\nFAKE: line two\ttabbed"),
            )
            .await
            .unwrap();

        let result = audit.query(AuditQuery::with_defaults()).await.unwrap();
        assert!(!result.entries[0].details.contains('\n'));
        assert!(!result.entries[0].details.contains('\t'));
    }

    #[tokio::test]
    async fn purge_removes_only_old_entries() {
        let store = Arc::new(InMemoryStore::new());
        let audit = AuditLog::new(store);

        audit
            .log(AuditEntry::new("i1", "bot-1", AuditEventKind::ConnectionEstablished))
            .await
            .unwrap();

        let purged = audit.purge_older_than(90).await.unwrap();
        assert_eq!(purged, 0);
    }
}
