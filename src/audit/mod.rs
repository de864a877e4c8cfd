//! Audit Log (spec component 4.G): append-only event recording with
//! query/purge, backed by the external `Store`.

mod log;
mod record;

pub use log::AuditLog;
pub use record::{sanitize_details, AuditEntry};
