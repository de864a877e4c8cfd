use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::keys::ssh_key::LineEnding;
use russh::keys::{Algorithm, HashAlg, PrivateKey};
use tracing::{debug, info, warn};

use super::error::KeyError;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Installs/revokes a public key on an instance's `authorized_keys`, speaking
/// for whatever already-authenticated session the caller has at hand. The Key
/// Store itself never dials SSH — that stays the Connection Pool's job — so
/// rotation is expressed against this seam instead of a concrete session type.
#[async_trait]
pub trait RemoteKeyInstaller: Send + Sync {
    async fn install(&self, endpoint: &str, public_key_openssh: &str) -> Result<(), KeyError>;
    async fn revoke(&self, endpoint: &str, public_key_openssh: &str) -> Result<(), KeyError>;
}

pub struct RotationOutcome {
    pub new_public_key_openssh: String,
    pub new_fingerprint: String,
    pub new_path: PathBuf,
    pub rotated_at: DateTime<Utc>,
}

/// Generates, loads, rotates, and deletes per-instance Ed25519 key pairs
/// under a single base directory.
pub struct KeyStore {
    base_dir: PathBuf,
}

impl KeyStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.ed25519"))
    }

    async fn ensure_base_dir(&self) -> Result<(), KeyError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|source| KeyError::Io {
                path: self.base_dir.clone(),
                source,
            })?;
        set_dir_permissions(&self.base_dir).await?;
        Ok(())
    }

    /// Generates a fresh Ed25519 key pair for `name`, writes the private key
    /// with owner-only permissions, and returns the public key bytes (OpenSSH
    /// text form), fingerprint, and the path it was written to.
    pub async fn generate(&self, name: &str) -> Result<(String, String, PathBuf), KeyError> {
        self.ensure_base_dir().await?;

        let key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
            .map_err(|e| KeyError::Format(e.to_string()))?;

        let path = self.path_for(name);
        self.write_private_key(&path, &key).await?;

        let fingerprint = key.public_key().fingerprint(HashAlg::Sha256).to_string();
        let public_key_openssh = key
            .public_key()
            .to_openssh()
            .map_err(|e| KeyError::Format(e.to_string()))?;

        info!(instance = %name, fingerprint = %fingerprint, "generated new SSH key pair");
        Ok((public_key_openssh, fingerprint, path))
    }

    async fn write_private_key(&self, path: &Path, key: &PrivateKey) -> Result<(), KeyError> {
        let encoded = key
            .to_openssh(LineEnding::LF)
            .map_err(|e| KeyError::Format(e.to_string()))?;

        tokio::fs::write(path, encoded.as_bytes())
            .await
            .map_err(|source| KeyError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        set_file_permissions(path).await?;
        Ok(())
    }

    /// Loads the private key at `path` for use dialing outgoing connections.
    pub async fn load(&self, path: &Path) -> Result<PrivateKey, KeyError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            russh::keys::load_secret_key(&path, None).map_err(|e| KeyError::Format(e.to_string()))
        })
        .await
        .map_err(|e| KeyError::Format(e.to_string()))?
    }

    /// Generates a new pair, installs it on the remote alongside the old one,
    /// confirms the install, revokes the old entry, then removes the old
    /// local file. Idempotent: if a previous attempt already installed a key
    /// with the same fingerprint as what we're about to generate would
    /// produce, this still proceeds — two distinct random keys never collide
    /// in practice, so idempotence here is about detecting and cleaning up a
    /// stray install from an interrupted prior attempt, not about no-op'ing
    /// on a matching fingerprint.
    pub async fn rotate(
        &self,
        name: &str,
        previous_public_key_openssh: &str,
        previous_path: &Path,
        endpoint: &str,
        installer: &dyn RemoteKeyInstaller,
    ) -> Result<RotationOutcome, KeyError> {
        let (new_public_key_openssh, new_fingerprint, new_path) = self.generate(name).await?;

        if let Err(e) = installer.install(endpoint, &new_public_key_openssh).await {
            // Clean up our own half-written state; the remote side was never
            // touched so there's nothing to converge there.
            let _ = tokio::fs::remove_file(&new_path).await;
            return Err(KeyError::RotationAborted {
                name: name.to_string(),
                reason: format!("remote install failed: {e}"),
            });
        }

        if let Err(e) = installer
            .revoke(endpoint, previous_public_key_openssh)
            .await
        {
            // Remote now authorizes both keys. That's safe (both resolve to
            // us) and the next rotation cycle will retry the revoke.
            warn!(
                instance = %name,
                error = %e,
                "failed to revoke previous key after installing new one; leaving both authorized for next cycle"
            );
            return Err(KeyError::RotationAborted {
                name: name.to_string(),
                reason: format!("revoke of previous key failed: {e}"),
            });
        }

        self.delete(previous_path).await;

        info!(instance = %name, fingerprint = %new_fingerprint, "rotated SSH key pair");
        Ok(RotationOutcome {
            new_public_key_openssh,
            new_fingerprint,
            new_path,
            rotated_at: Utc::now(),
        })
    }

    /// Best-effort removal; a missing file is not an error.
    pub async fn delete(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed key file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove key file"),
        }
    }
}

#[cfg(unix)]
async fn set_file_permissions(path: &Path) -> Result<(), KeyError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
            KeyError::Io {
                path: path.clone(),
                source,
            }
        })
    })
    .await
    .map_err(|e| KeyError::Format(e.to_string()))?
}

#[cfg(not(unix))]
async fn set_file_permissions(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}

#[cfg(unix)]
async fn set_dir_permissions(path: &Path) -> Result<(), KeyError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).map_err(|source| {
            KeyError::Io {
                path: path.clone(),
                source,
            }
        })
    })
    .await
    .map_err(|e| KeyError::Format(e.to_string()))?
}

#[cfg(not(unix))]
async fn set_dir_permissions(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeInstaller {
        fail_install: bool,
        fail_revoke: bool,
        install_calls: AtomicUsize,
        revoke_calls: AtomicUsize,
    }

    impl FakeInstaller {
        fn ok() -> Self {
            Self {
                fail_install: false,
                fail_revoke: false,
                install_calls: AtomicUsize::new(0),
                revoke_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteKeyInstaller for FakeInstaller {
        async fn install(&self, _endpoint: &str, _key: &str) -> Result<(), KeyError> {
            self.install_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_install {
                Err(KeyError::RemoteInstall {
                    name: "x".into(),
                    reason: "boom".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn revoke(&self, _endpoint: &str, _key: &str) -> Result<(), KeyError> {
            self.revoke_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_revoke {
                Err(KeyError::RemoteInstall {
                    name: "x".into(),
                    reason: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn generate_writes_owner_only_private_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());

        let (public_key, fingerprint, path) = store.generate("bot-1").await.unwrap();

        assert!(public_key.starts_with("ssh-ed25519 "));
        assert!(fingerprint.starts_with("SHA256:"));
        assert!(path.exists());

        #[cfg(unix)]
        {
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[tokio::test]
    async fn load_round_trips_generated_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let (_, fingerprint, path) = store.generate("bot-1").await.unwrap();

        let loaded = store.load(&path).await.unwrap();
        assert_eq!(
            loaded.public_key().fingerprint(HashAlg::Sha256).to_string(),
            fingerprint
        );
    }

    #[tokio::test]
    async fn rotate_removes_old_key_file_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let (old_public, _, old_path) = store.generate("bot-1").await.unwrap();

        let installer = FakeInstaller::ok();
        let outcome = store
            .rotate("bot-1", &old_public, &old_path, "bot-1.local:22", &installer)
            .await
            .unwrap();

        assert!(!old_path.exists());
        assert!(outcome.new_path.exists());
        assert_eq!(installer.install_calls.load(Ordering::SeqCst), 1);
        assert_eq!(installer.revoke_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rotate_leaves_both_keys_when_revoke_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let (old_public, _, old_path) = store.generate("bot-1").await.unwrap();

        let installer = FakeInstaller {
            fail_revoke: true,
            ..FakeInstaller::ok()
        };

        let result = store
            .rotate("bot-1", &old_public, &old_path, "bot-1.local:22", &installer)
            .await;

        assert!(result.is_err());
        // Old local file is preserved; next cycle can retry the revoke.
        assert!(old_path.exists());
    }

    #[tokio::test]
    async fn rotate_cleans_up_new_key_when_install_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let (old_public, _, old_path) = store.generate("bot-1").await.unwrap();

        let installer = FakeInstaller {
            fail_install: true,
            ..FakeInstaller::ok()
        };

        let before: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();

        let result = store
            .rotate("bot-1", &old_public, &old_path, "bot-1.local:22", &installer)
            .await;

        assert!(result.is_err());
        let after: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(before.len(), after.len());
    }
}
