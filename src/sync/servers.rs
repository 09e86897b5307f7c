use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::api::ApiClient;
use super::credentials::{SecretStore, password_key};
use crate::error::{Error, Result};

/// A server profile the user has logged into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedServer {
    pub id: Uuid,
    pub api_url: String,
    pub username: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub has_password: bool,
    /// Plaintext password written by older versions. Cleared once it is in
    /// the secret store; kept on disk until then.
    #[serde(default, rename = "password", skip_serializing_if = "Option::is_none")]
    legacy_password: Option<String>,
}

impl SavedServer {
    pub fn new(api_url: String, username: String, nickname: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_url,
            username,
            nickname,
            has_password: false,
            legacy_password: None,
        }
    }

    pub fn display_name(&self) -> String {
        match self.nickname.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(nick) => nick.to_string(),
            None => format!("{}@{}", self.username, self.api_url),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    active: Option<Uuid>,
    #[serde(default)]
    servers: Vec<SavedServer>,
}

/// Saved servers plus the active selection, persisted as JSON.
#[derive(Debug)]
pub struct ServerRegistry {
    path: PathBuf,
    active: Option<Uuid>,
    servers: Vec<SavedServer>,
}

/// Validate and canonicalize a server URL.
pub fn normalize_api_url(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("Server URL is required".to_string()));
    }
    let url = reqwest::Url::parse(trimmed).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(Error::InvalidUrl(format!(
            "unsupported scheme '{}', use http:// or https://",
            other
        ))),
    }
}

impl ServerRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let file: RegistryFile = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                RegistryFile::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            RegistryFile::default()
        };

        let mut registry = Self {
            path: path.to_path_buf(),
            active: file.active,
            servers: file.servers,
        };
        if registry.active.is_some_and(|id| registry.get(&id).is_none()) {
            log::warn!("Active server no longer exists, clearing selection");
            registry.active = None;
        }
        Ok(registry)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = RegistryFile {
            active: self.active,
            servers: self.servers.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn list(&self) -> &[SavedServer] {
        &self.servers
    }

    pub fn get(&self, id: &Uuid) -> Option<&SavedServer> {
        self.servers.iter().find(|s| s.id == *id)
    }

    pub fn active(&self) -> Option<&SavedServer> {
        self.active.and_then(|id| self.get(&id))
    }

    pub fn set_active(&mut self, id: &Uuid) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::UnknownServer(*id));
        }
        self.active = Some(*id);
        self.save()
    }

    /// Add a server (or refresh an existing entry with the same URL and user)
    /// and make it active. The password goes to the secret store only.
    pub async fn add(
        &mut self,
        api_url: &str,
        username: &str,
        nickname: Option<String>,
        password: &str,
        store: &dyn SecretStore,
    ) -> Result<Uuid> {
        let api_url = normalize_api_url(api_url)?;
        let username = username.trim().to_string();

        let existing = self
            .servers
            .iter()
            .position(|s| s.api_url == api_url && s.username == username);
        let id = match existing {
            Some(idx) => {
                let server = &mut self.servers[idx];
                if nickname.is_some() {
                    server.nickname = nickname;
                }
                server.id
            }
            None => {
                let server = SavedServer::new(api_url, username, nickname);
                let id = server.id;
                self.servers.push(server);
                id
            }
        };

        self.update_password(&id, password, store).await?;
        self.active = Some(id);
        self.save()?;
        log::info!("Saved server {}", id);
        Ok(id)
    }

    pub async fn update_password(
        &mut self,
        id: &Uuid,
        password: &str,
        store: &dyn SecretStore,
    ) -> Result<()> {
        let server = self
            .servers
            .iter_mut()
            .find(|s| s.id == *id)
            .ok_or(Error::UnknownServer(*id))?;
        store.set(&password_key(id), password).await?;
        server.has_password = true;
        server.legacy_password = None;
        Ok(())
    }

    /// Remove a server and its stored password.
    pub async fn remove(&mut self, id: &Uuid, store: &dyn SecretStore) -> Result<SavedServer> {
        let idx = self
            .servers
            .iter()
            .position(|s| s.id == *id)
            .ok_or(Error::UnknownServer(*id))?;
        if let Err(e) = store.delete(&password_key(id)).await {
            log::warn!("Failed to delete password for server {}: {}", id, e);
        }
        let removed = self.servers.remove(idx);
        if self.active == Some(*id) {
            self.active = self.servers.first().map(|s| s.id);
        }
        self.save()?;
        Ok(removed)
    }

    /// Move plaintext passwords from older registry files into the secret store.
    /// Returns how many entries were migrated.
    pub async fn migrate_legacy_passwords(&mut self, store: &dyn SecretStore) -> Result<usize> {
        let mut migrated = 0;
        for server in &mut self.servers {
            let Some(password) = server.legacy_password.take() else {
                continue;
            };
            if password.is_empty() {
                continue;
            }
            match store.set(&password_key(&server.id), &password).await {
                Ok(()) => {
                    server.has_password = true;
                    migrated += 1;
                }
                Err(e) => {
                    // Stays in the file until a later run can move it
                    server.legacy_password = Some(password);
                    log::warn!("Password migration failed for {}: {}", server.id, e);
                }
            }
        }
        if migrated > 0 {
            self.save()?;
            log::info!("Migrated {} legacy passwords into the secret store", migrated);
        }
        Ok(migrated)
    }

    /// Resolve the stored credentials for a server: (url, username, password).
    pub async fn credentials(
        &self,
        id: &Uuid,
        store: &dyn SecretStore,
    ) -> Result<(String, String, String)> {
        let server = self.get(id).ok_or(Error::UnknownServer(*id))?;
        let password = match store.get(&password_key(id)).await? {
            Some(p) => p,
            None => server
                .legacy_password
                .clone()
                .ok_or(Error::MissingPassword(*id))?,
        };
        Ok((server.api_url.clone(), server.username.clone(), password))
    }

    /// Build an API client for the active server.
    pub async fn active_client(&self, store: &dyn SecretStore) -> Result<ApiClient> {
        let server = self.active().ok_or(Error::NoActiveServer)?;
        let (url, username, password) = self.credentials(&server.id, store).await?;
        ApiClient::new(&url, &username, &password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::credentials::MemoryStore;

    #[test]
    fn url_normalization() {
        assert_eq!(
            normalize_api_url("  https://org.example.com/api/ ").unwrap(),
            "https://org.example.com/api"
        );
        assert!(matches!(normalize_api_url(""), Err(Error::InvalidUrl(_))));
        assert!(matches!(normalize_api_url("ftp://x"), Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn add_stores_password_outside_registry_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        let store = MemoryStore::default();

        let mut registry = ServerRegistry::load(&path).unwrap();
        let id = registry
            .add("https://org.example.com/", "me", None, "hunter2", &store)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("hunter2"));

        let reloaded = ServerRegistry::load(&path).unwrap();
        assert_eq!(reloaded.active().unwrap().id, id);
        assert!(reloaded.active().unwrap().has_password);
        let (url, user, pw) = reloaded.credentials(&id, &store).await.unwrap();
        assert_eq!((url.as_str(), user.as_str(), pw.as_str()), ("https://org.example.com", "me", "hunter2"));
    }

    #[tokio::test]
    async fn re_adding_same_server_keeps_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut registry = ServerRegistry::load(&dir.path().join("servers.json")).unwrap();
        let first = registry.add("https://a.example", "me", None, "one", &store).await.unwrap();
        let second = registry
            .add("https://a.example/", "me", Some("Home".into()), "two", &store)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.list()[0].display_name(), "Home");
        assert_eq!(store.get(&password_key(&first)).await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn remove_clears_secret_and_moves_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::default();
        let mut registry = ServerRegistry::load(&dir.path().join("servers.json")).unwrap();
        let a = registry.add("https://a.example", "me", None, "pa", &store).await.unwrap();
        let b = registry.add("https://b.example", "me", None, "pb", &store).await.unwrap();
        assert_eq!(registry.active().unwrap().id, b);

        registry.remove(&b, &store).await.unwrap();
        assert_eq!(registry.active().unwrap().id, a);
        assert_eq!(store.get(&password_key(&b)).await.unwrap(), None);
        assert!(matches!(
            registry.set_active(&b),
            Err(Error::UnknownServer(_))
        ));
    }

    #[tokio::test]
    async fn legacy_plaintext_passwords_are_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        let id = Uuid::new_v4();
        let legacy = serde_json::json!({
            "active": id,
            "servers": [{
                "id": id,
                "apiUrl": "https://old.example",
                "username": "me",
                "password": "plaintext"
            }]
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let store = MemoryStore::default();
        let mut registry = ServerRegistry::load(&path).unwrap();
        assert_eq!(registry.migrate_legacy_passwords(&store).await.unwrap(), 1);
        assert_eq!(store.get(&password_key(&id)).await.unwrap().as_deref(), Some("plaintext"));
        assert!(registry.active().unwrap().has_password);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("plaintext"));

        // Second run is a no-op
        assert_eq!(registry.migrate_legacy_passwords(&store).await.unwrap(), 0);
    }

    /// Rejects writes for one key, accepts everything else.
    struct RejectingStore {
        inner: MemoryStore,
        reject: String,
    }

    #[async_trait::async_trait]
    impl SecretStore for RejectingStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == self.reject {
                return Err(Error::Credentials("keyring locked".into()));
            }
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn failed_migration_keeps_password_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let legacy = serde_json::json!({
            "active": a,
            "servers": [
                {"id": a, "apiUrl": "https://a.example", "username": "me", "password": "pa"},
                {"id": b, "apiUrl": "https://b.example", "username": "me", "password": "pb"}
            ]
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let store = RejectingStore {
            inner: MemoryStore::default(),
            reject: password_key(&b),
        };
        let mut registry = ServerRegistry::load(&path).unwrap();
        assert_eq!(registry.migrate_legacy_passwords(&store).await.unwrap(), 1);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("\"pa\""));
        assert!(raw.contains("\"pb\""));

        let reloaded = ServerRegistry::load(&path).unwrap();
        let (_, _, pw) = reloaded.credentials(&b, &store).await.unwrap();
        assert_eq!(pw, "pb");
        let (_, _, pw) = reloaded.credentials(&a, &store).await.unwrap();
        assert_eq!(pw, "pa");

        // Once the store accepts it, the plaintext leaves the file
        let mut reloaded = reloaded;
        assert_eq!(reloaded.migrate_legacy_passwords(&store.inner).await.unwrap(), 1);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("\"pb\""));
    }

    #[tokio::test]
    async fn missing_active_client_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ServerRegistry::load(&dir.path().join("servers.json")).unwrap();
        let store = MemoryStore::default();
        assert!(matches!(
            registry.active_client(&store).await,
            Err(Error::NoActiveServer)
        ));
    }
}
