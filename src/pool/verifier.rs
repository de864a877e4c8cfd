use std::sync::Arc;

use async_trait::async_trait;

use crate::external::Store;
use crate::ssh::{FingerprintVerdict, FingerprintVerifier};

/// Ties host-key verification to the instance record's `sshFingerprint`
/// field rather than a local `known_hosts` file: first connection records
/// whatever fingerprint it sees, every later connection must match it.
pub struct StoreFingerprintVerifier {
    store: Arc<dyn Store>,
}

impl StoreFingerprintVerifier {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FingerprintVerifier for StoreFingerprintVerifier {
    async fn check(&self, instance: &str, fingerprint: &str) -> FingerprintVerdict {
        let record = match self.store.get_instance(instance).await {
            Ok(record) => record,
            Err(_) => return FingerprintVerdict::FirstSeen,
        };

        match record.ssh_fingerprint {
            Some(expected) if expected == fingerprint => FingerprintVerdict::Verified,
            Some(expected) => FingerprintVerdict::Mismatch { expected },
            None => {
                let _ = self.store.record_fingerprint_if_unset(instance, fingerprint).await;
                FingerprintVerdict::FirstSeen
            }
        }
    }
}
