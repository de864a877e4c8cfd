use crate::external::AuditEventKind;

/// Maximum length of a `details` field, per the data model's `≤ 4 KiB`
/// bound. Longer input is truncated, not rejected.
pub const MAX_DETAILS_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub instance_id: String,
    pub instance_name: String,
    pub event_kind: AuditEventKind,
    pub username: Option<String>,
    pub source_ip: Option<String>,
    pub details: String,
    pub duration_millis: Option<u64>,
}

impl AuditEntry {
    pub fn new(instance_id: impl Into<String>, instance_name: impl Into<String>, event_kind: AuditEventKind) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_name: instance_name.into(),
            event_kind,
            username: None,
            source_ip: None,
            details: String::new(),
            duration_millis: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = truncate_bytes(&details.into(), MAX_DETAILS_BYTES);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn with_duration_millis(mut self, millis: u64) -> Self {
        self.duration_millis = Some(millis);
        self
    }
}

fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Strips newlines and other control bytes so a single audit event can never
/// span or forge multiple lines in the text log.
pub fn sanitize_details(details: &str) -> String {
    details
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

pub(crate) fn event_kind_label(kind: AuditEventKind) -> &'static str {
    match kind {
        AuditEventKind::ConnectionEstablished => "connection_established",
        AuditEventKind::ConnectionTerminated => "connection_terminated",
        AuditEventKind::ConnectionFailed => "connection_failed",
        AuditEventKind::CommandExecution => "command_execution",
        AuditEventKind::FileOperation => "file_operation",
        AuditEventKind::TerminalSessionStart => "terminal_session_start",
        AuditEventKind::TerminalSessionEnd => "terminal_session_end",
        AuditEventKind::KeyRotation => "key_rotation",
        AuditEventKind::FingerprintMismatch => "fingerprint_mismatch",
        AuditEventKind::ReconnectAttempt => "reconnect_attempt",
    }
}
