use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};

pub(crate) const SERVICE_NAME: &str = "agenda-notify";

/// Secret-store key under which a server's password is kept.
pub fn password_key(server_id: &Uuid) -> String {
    format!("server-password:{}", server_id)
}

/// Key/value storage for secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Secrets in the desktop keyring via Secret Service.
#[derive(Debug, Default)]
pub struct KeyringStore;

impl KeyringStore {
    async fn keyring() -> Result<oo7::Keyring> {
        oo7::Keyring::new()
            .await
            .map_err(|e| Error::Credentials(format!("Failed to connect to keyring: {}", e)))
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let keyring = Self::keyring().await?;

        let mut attrs = HashMap::new();
        attrs.insert("service", SERVICE_NAME);
        attrs.insert("key", key);

        let items = keyring
            .search_items(&attrs)
            .await
            .map_err(|e| Error::Credentials(format!("Failed to search keyring: {}", e)))?;

        let Some(item) = items.first() else {
            return Ok(None);
        };
        let secret_bytes = item
            .secret()
            .await
            .map_err(|e| Error::Credentials(format!("Failed to read secret: {}", e)))?;
        let secret = String::from_utf8(secret_bytes.to_vec())
            .map_err(|e| Error::Credentials(format!("Invalid UTF-8 in secret: {}", e)))?;
        Ok(Some(secret))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let keyring = Self::keyring().await?;

        let mut attrs = HashMap::new();
        attrs.insert("service", SERVICE_NAME);
        attrs.insert("key", key);

        keyring
            .create_item(
                &format!("Agenda notify ({})", key),
                &attrs,
                value.as_bytes(),
                true, // replace existing
            )
            .await
            .map_err(|e| Error::Credentials(format!("Failed to store secret: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let keyring = Self::keyring().await?;

        let mut attrs = HashMap::new();
        attrs.insert("service", SERVICE_NAME);
        attrs.insert("key", key);

        let items = keyring
            .search_items(&attrs)
            .await
            .map_err(|e| Error::Credentials(format!("Failed to search keyring: {}", e)))?;

        for item in items {
            item.delete()
                .await
                .map_err(|e| Error::Credentials(format!("Failed to delete secret: {}", e)))?;
        }
        Ok(())
    }
}

/// Secrets in a JSON file readable only by the owner.
///
/// Fallback for hosts without a Secret Service provider.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(secrets)?)?;
        restrict_file_permissions(&self.path);
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.read_all()?;
        secrets.insert(key.to_string(), value.to_string());
        self.write_all(&secrets)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.read_all()?;
        if secrets.remove(key).is_some() {
            self.write_all(&secrets)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt as _;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        log::warn!("Failed to restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}

/// Try `primary`; when its backend fails, use `fallback` instead.
///
/// Reads consult the fallback too when the primary has no entry, so secrets
/// written while the keyring was down stay reachable.
pub struct FallbackStore<P, F> {
    primary: P,
    fallback: F,
}

impl<P: SecretStore, F: SecretStore> FallbackStore<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: SecretStore, F: SecretStore> SecretStore for FallbackStore<P, F> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.primary.get(key).await {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => self.fallback.get(key).await,
            Err(e) => {
                log::debug!("Primary secret store unavailable ({}), using fallback", e);
                self.fallback.get(key).await
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        match self.primary.set(key, value).await {
            Ok(()) => {
                // Drop any stale copy left behind by an earlier outage
                if let Err(e) = self.fallback.delete(key).await {
                    log::debug!("Failed to clear fallback copy of {}: {}", key, e);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("Primary secret store unavailable ({}), writing to fallback", e);
                self.fallback.set(key, value).await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let primary = self.primary.delete(key).await;
        self.fallback.delete(key).await?;
        if let Err(e) = primary {
            log::debug!("Primary secret store delete failed: {}", e);
        }
        Ok(())
    }
}

/// The store used by the binaries: keyring first, owner-only file second.
pub fn default_store(secrets_path: &Path) -> FallbackStore<KeyringStore, FileSecretStore> {
    FallbackStore::new(KeyringStore, FileSecretStore::new(secrets_path))
}

/// Process-local store, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.secrets.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.secrets.lock().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.secrets.lock().await.remove(key);
        Ok(())
    }
}
