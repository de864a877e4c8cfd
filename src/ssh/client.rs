//! Dialing and host-key verification for outgoing SSH connections.

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelId};
use tracing::{info, warn};

use super::error::ConnectError;

/// Outcome of checking an observed host-key fingerprint against the one on
/// file for an instance. Trust-on-first-use: the first fingerprint seen for
/// an instance is accepted and recorded; any later mismatch is rejected
/// outright (never auto-updated), since a change there is either server
/// reprovisioning (expected to go through key rotation, which updates the
/// record explicitly) or a spoofed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintVerdict {
    Verified,
    FirstSeen,
    Mismatch { expected: String },
}

/// Seam the Connection Pool wires to the Store's `sshFingerprint` field.
/// Unlike the teacher's file-backed `known_hosts.rs`, verification here is
/// keyed off the instance record rather than a local `~/.ssh/known_hosts`.
#[async_trait]
pub trait FingerprintVerifier: Send + Sync {
    async fn check(&self, instance: &str, fingerprint: &str) -> FingerprintVerdict;
}

/// A verifier that accepts anything and records nothing — only for tests.
pub struct AlwaysTrust;

#[async_trait]
impl FingerprintVerifier for AlwaysTrust {
    async fn check(&self, _instance: &str, _fingerprint: &str) -> FingerprintVerdict {
        FingerprintVerdict::FirstSeen
    }
}

pub struct ClientHandler {
    instance: String,
    verifier: Arc<dyn FingerprintVerifier>,
    observed_fingerprint: Arc<std::sync::Mutex<Option<String>>>,
}

impl ClientHandler {
    pub fn new(instance: String, verifier: Arc<dyn FingerprintVerifier>) -> Self {
        Self {
            instance,
            verifier,
            observed_fingerprint: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Fingerprint of the server key seen during the handshake, once
    /// `check_server_key` has run.
    pub fn observed_fingerprint(&self) -> Option<String> {
        self.observed_fingerprint.lock().unwrap().clone()
    }
}

impl client::Handler for ClientHandler {
    type Error = ConnectError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        *self.observed_fingerprint.lock().unwrap() = Some(fingerprint.clone());

        match self.verifier.check(&self.instance, &fingerprint).await {
            FingerprintVerdict::Verified => {
                info!(instance = %self.instance, %fingerprint, "host key verified");
                Ok(true)
            }
            FingerprintVerdict::FirstSeen => {
                info!(instance = %self.instance, %fingerprint, "host key seen for the first time");
                Ok(true)
            }
            FingerprintVerdict::Mismatch { expected } => {
                warn!(
                    instance = %self.instance,
                    expected = %expected,
                    actual = %fingerprint,
                    "host key fingerprint mismatch"
                );
                Err(ConnectError::FingerprintMismatch {
                    instance: self.instance.clone(),
                    expected,
                    actual: fingerprint,
                })
            }
        }
    }

    /// Agent-side remote forwards are out of scope; we never call
    /// `tcpip_forward`, so this should not fire, but declining explicitly
    /// keeps an unexpected forward from silently hanging open.
    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        warn!(
            instance = %self.instance,
            connected_address,
            connected_port,
            originator_address,
            originator_port,
            "unexpected forwarded-tcpip channel; closing"
        );
        drop(channel);
        Ok(())
    }

    async fn channel_close(&mut self, _channel: ChannelId, _session: &mut client::Session) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Dial, handshake, and authenticate against `host:port`, returning the
/// authenticated russh handle. Callers are expected to immediately hand the
/// handle to `spawn_handle_owner_task` so exactly one task ever touches it.
pub async fn dial(
    instance: String,
    host: &str,
    port: u16,
    username: &str,
    signer: Arc<PrivateKey>,
    connect_timeout: Duration,
    keepalive_interval: Duration,
    verifier: Arc<dyn FingerprintVerifier>,
) -> Result<client::Handle<ClientHandler>, ConnectError> {
    let addr = format!("{host}:{port}");

    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|source| ConnectError::Dial {
            addr: addr.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| ConnectError::Dial {
            addr: addr.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
        })?;

    let ssh_config = client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(keepalive_interval),
        keepalive_max: 3,
        ..Default::default()
    };

    let handler = ClientHandler::new(instance.clone(), verifier);

    let mut handle = tokio::time::timeout(
        connect_timeout,
        client::connect(Arc::new(ssh_config), socket_addr, handler),
    )
    .await
    .map_err(|_| ConnectError::Timeout {
        addr: addr.clone(),
        timeout_secs: connect_timeout.as_secs(),
    })?
    .map_err(|e| ConnectError::Handshake {
        addr: addr.clone(),
        reason: e.to_string(),
    })?;

    info!(%instance, %addr, "SSH handshake complete");

    let key_with_hash = PrivateKeyWithHashAlg::new(signer, None);
    let authenticated = handle
        .authenticate_publickey(username, key_with_hash)
        .await
        .map_err(|e| ConnectError::Auth {
            addr: addr.clone(),
            user: username.to_string(),
            reason: e.to_string(),
        })?;

    if !authenticated.success() {
        return Err(ConnectError::Auth {
            addr,
            user: username.to_string(),
            reason: "rejected by server".to_string(),
        });
    }

    info!(%instance, %addr, "SSH authentication succeeded");
    Ok(handle)
}
