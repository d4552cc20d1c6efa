//! On-disk persistence for the registry and the API key store.
//!
//! Two JSON documents live in the config directory:
//!
//! - `ai-config.json`: models, templates and defaults. Safe to share.
//! - `ai-credentials.json`: credential_ref -> API key, mode 0600. Never
//!   leaves the machine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::registry::ModelRegistry;
use crate::storage::Storage;

pub const CONFIG_FILE: &str = "ai-config.json";
pub const CREDENTIALS_FILE: &str = "ai-credentials.json";
/// Settings key the shared configuration is stored under.
pub const REMOTE_KEY: &str = "ai_config";

/// API keys by credential reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    keys: BTreeMap<String, String>,
}

pub type SharedCredentials = Arc<RwLock<Credentials>>;

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored key for `credential_ref`, else the `<REF>_API_KEY` environment
    /// variable (e.g. `GEMINI_API_KEY`).
    pub fn resolve(&self, credential_ref: &str) -> Option<String> {
        self.resolve_with(credential_ref, |var| std::env::var(var).ok())
    }

    fn resolve_with(
        &self,
        credential_ref: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        if let Some(key) = self.keys.get(credential_ref).filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let var = format!(
            "{}_API_KEY",
            credential_ref.to_ascii_uppercase().replace('-', "_")
        );
        env(&var).filter(|k| !k.is_empty())
    }

    pub fn set(&mut self, credential_ref: impl Into<String>, key: impl Into<String>) {
        self.keys.insert(credential_ref.into(), key.into());
    }

    pub fn remove(&mut self, credential_ref: &str) -> bool {
        self.keys.remove(credential_ref).is_some()
    }

    /// Stored credential refs, without their secrets.
    pub fn refs(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn into_shared(self) -> SharedCredentials {
        Arc::new(RwLock::new(self))
    }
}

/// The shape stored under [`REMOTE_KEY`].
#[derive(Debug, Serialize, Deserialize)]
struct RemoteConfig {
    saved_at: DateTime<Utc>,
    registry: ModelRegistry,
}

/// Reads and writes the registry and credential files in one directory.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    dir: PathBuf,
}

impl RegistryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE)
    }

    /// Load the registry, or the built-in defaults when no file exists yet.
    pub fn load_registry(&self) -> Result<ModelRegistry> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(ModelRegistry::with_builtin_defaults());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save_registry(&self, registry: &ModelRegistry) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(registry).context("failed to serialize registry")?;
        self.write(&self.config_path(), &contents, false)
    }

    pub fn load_credentials(&self) -> Result<Credentials> {
        let path = self.credentials_path();
        if !path.exists() {
            return Ok(Credentials::new());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Write the credential file with owner-only permissions on Unix.
    pub fn save_credentials(&self, credentials: &Credentials) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(credentials).context("failed to serialize credentials")?;
        self.write(&self.credentials_path(), &contents, true)
    }

    fn write(&self, path: &Path, contents: &str, private: bool) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;

        #[cfg(unix)]
        if private {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)
                .with_context(|| format!("failed to set permissions on {}", path.display()))?;
        }
        #[cfg(not(unix))]
        let _ = private;

        Ok(())
    }

    /// Publish the registry (not the credentials) to shared storage.
    pub async fn sync_to_remote(&self, registry: &ModelRegistry, storage: &dyn Storage) -> Result<()> {
        let value = serde_json::to_value(RemoteConfig {
            saved_at: Utc::now(),
            registry: registry.clone(),
        })
        .context("failed to serialize registry for sync")?;
        storage.put_setting(REMOTE_KEY, &value).await?;
        tracing::info!(key = REMOTE_KEY, "synced AI configuration to storage");
        Ok(())
    }

    /// Replace the local registry with the shared one, if any. The remote
    /// copy wins unconditionally.
    pub async fn pull_remote(&self, storage: &dyn Storage) -> Result<Option<ModelRegistry>> {
        let Some(value) = storage.get_setting(REMOTE_KEY).await? else {
            return Ok(None);
        };
        let remote: RemoteConfig =
            serde_json::from_value(value).context("stored AI configuration is malformed")?;
        self.save_registry(&remote.registry)?;
        tracing::info!(saved_at = %remote.saved_at, "pulled AI configuration from storage");
        Ok(Some(remote.registry))
    }
}
