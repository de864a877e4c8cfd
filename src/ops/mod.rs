//! File & Log Clients (spec component 4.E): stateless helpers that run shell
//! commands over an instance's SSH session with safe argument quoting.

mod errors;
mod file;
mod log;
mod quote;

pub use errors::{classify_failure, OpsError};
pub use file::{EntryKind, FileClient, FileEntry};
pub use log::LogClient;
pub use quote::shell_quote;
