use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub ssh_port: u16,
    pub ssh_public_key: Option<String>,
    pub ssh_private_key_path: Option<PathBuf>,
    pub ssh_fingerprint: Option<String>,
    pub last_key_rotation: Option<DateTime<Utc>>,
    pub key_rotation_policy_days: u32,
    pub allowed_source_ips: Option<Vec<String>>,
    pub log_paths: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventKind {
    ConnectionEstablished,
    ConnectionTerminated,
    ConnectionFailed,
    CommandExecution,
    FileOperation,
    TerminalSessionStart,
    TerminalSessionEnd,
    KeyRotation,
    FingerprintMismatch,
    ReconnectAttempt,
}

#[derive(Debug, Clone)]
pub struct AuditRecordData {
    pub id: u64,
    pub instance_id: String,
    pub instance_name: String,
    pub event_kind: AuditEventKind,
    pub username: Option<String>,
    pub source_ip: Option<String>,
    pub details: String,
    pub duration_millis: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub instance_id: Option<String>,
    pub instance_name: Option<String>,
    pub event_kind: Option<AuditEventKind>,
    pub username: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl AuditQuery {
    pub fn with_defaults() -> Self {
        Self {
            limit: 50,
            offset: 0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditQueryResult {
    pub entries: Vec<AuditRecordData>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance {0} not found")]
    InstanceNotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// The persistent store, deliberately out of scope: relational tables for
/// instances, users, and audit records. This crate only reads/writes the
/// slices of it that bear on SSH connectivity.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_instance(&self, name: &str) -> Result<InstanceRecord, StoreError>;
    async fn list_instances(&self) -> Result<Vec<InstanceRecord>, StoreError>;

    /// Persists a completed key rotation: new public key, new key path, new
    /// fingerprint, and the rotation timestamp.
    async fn record_key_rotation(
        &self,
        name: &str,
        public_key_openssh: &str,
        private_key_path: &PathBuf,
        fingerprint: &str,
        rotated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Records `fingerprint` as the instance's known-good fingerprint if it
    /// doesn't have one yet. Returns `true` if this call just set it
    /// (trust-on-first-use), `false` if one was already on file.
    async fn record_fingerprint_if_unset(&self, name: &str, fingerprint: &str) -> Result<bool, StoreError>;

    async fn append_audit(&self, record: AuditRecordData) -> Result<(), StoreError>;
    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditQueryResult, StoreError>;
    async fn purge_audit_older_than(&self, days: u32) -> Result<u64, StoreError>;
}

/// A `Store` backed by in-process maps. Useful for tests and local
/// development; not a production persistence layer (no durability across
/// restarts, no transactional guarantees).
pub struct InMemoryStore {
    instances: RwLock<HashMap<String, InstanceRecord>>,
    audit: RwLock<Vec<AuditRecordData>>,
    next_audit_id: RwLock<u64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            audit: RwLock::new(Vec::new()),
            next_audit_id: RwLock::new(1),
        }
    }

    pub fn insert_instance(&self, record: InstanceRecord) {
        self.instances.write().insert(record.name.clone(), record);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_instance(&self, name: &str) -> Result<InstanceRecord, StoreError> {
        self.instances
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::InstanceNotFound(name.to_string()))
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        Ok(self.instances.read().values().cloned().collect())
    }

    async fn record_key_rotation(
        &self,
        name: &str,
        public_key_openssh: &str,
        private_key_path: &PathBuf,
        fingerprint: &str,
        rotated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let record = instances
            .get_mut(name)
            .ok_or_else(|| StoreError::InstanceNotFound(name.to_string()))?;
        record.ssh_public_key = Some(public_key_openssh.to_string());
        record.ssh_private_key_path = Some(private_key_path.clone());
        record.ssh_fingerprint = Some(fingerprint.to_string());
        record.last_key_rotation = Some(rotated_at);
        Ok(())
    }

    async fn record_fingerprint_if_unset(&self, name: &str, fingerprint: &str) -> Result<bool, StoreError> {
        let mut instances = self.instances.write();
        let record = instances
            .get_mut(name)
            .ok_or_else(|| StoreError::InstanceNotFound(name.to_string()))?;
        if record.ssh_fingerprint.is_none() {
            record.ssh_fingerprint = Some(fingerprint.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn append_audit(&self, mut record: AuditRecordData) -> Result<(), StoreError> {
        let mut next_id = self.next_audit_id.write();
        record.id = *next_id;
        *next_id += 1;
        self.audit.write().push(record);
        Ok(())
    }

    async fn query_audit(&self, query: &AuditQuery) -> Result<AuditQueryResult, StoreError> {
        let audit = self.audit.read();
        let mut matched: Vec<&AuditRecordData> = audit
            .iter()
            .filter(|r| match query.instance_id.as_deref() {
                Some(v) => v == r.instance_id,
                None => true,
            })
            .filter(|r| match query.instance_name.as_deref() {
                Some(v) => v == r.instance_name,
                None => true,
            })
            .filter(|r| match query.event_kind {
                Some(k) => k == r.event_kind,
                None => true,
            })
            .filter(|r| match query.username.as_deref() {
                Some(v) => Some(v) == r.username.as_deref(),
                None => true,
            })
            .filter(|r| match query.since {
                Some(since) => r.created_at >= since,
                None => true,
            })
            .filter(|r| match query.until {
                Some(until) => r.created_at <= until,
                None => true,
            })
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len();

        let entries = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();

        Ok(AuditQueryResult {
            entries,
            total,
            limit: query.limit,
            offset: query.offset,
        })
    }

    async fn purge_audit_older_than(&self, days: u32) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut audit = self.audit.write();
        let before = audit.len();
        audit.retain(|r| r.created_at >= cutoff);
        Ok((before - audit.len()) as u64)
    }
}
