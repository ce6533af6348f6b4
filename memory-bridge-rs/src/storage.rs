//! Persistent key-value storage scoped to a browser profile
//!
//! The store is the single source of truth for the credential and the memory
//! toggle. `ProfileSettings` wraps a store with typed accessors for those two
//! keys and is what the realms hold.

use crate::errors::{BridgeError, Result};
use crate::types::{CREDENTIAL_KEY, MEMORY_ENABLED_KEY};
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Async key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<JsonValue>>;

    /// Write a value
    async fn set(&self, key: &str, value: JsonValue) -> Result<()>;

    /// Delete a value
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store, the equivalent of extension local storage within one process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// JSON-file store; every read goes to disk so other processes' writes are seen
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Store backed by the given file (created on first write)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Default location under the user's config directory
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("memory-bridge").join("storage.json"))
            .ok_or_else(|| BridgeError::Storage("no config directory for this user".into()))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, JsonValue>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => match serde_json::from_str::<JsonValue>(&text)? {
                JsonValue::Object(map) => Ok(map),
                other => Err(BridgeError::Storage(format!(
                    "{} does not hold a JSON object: {}",
                    self.path.display(),
                    other
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, map: Map<String, JsonValue>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(&JsonValue::Object(map))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Persisted storage to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value);
        self.persist(map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        if map.remove(key).is_some() {
            self.persist(map).await?;
        }
        Ok(())
    }
}

/// Typed view of the two persisted profile settings
#[derive(Clone)]
pub struct ProfileSettings {
    store: Arc<dyn KeyValueStore>,
}

impl ProfileSettings {
    /// Wrap a store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// In-memory settings, handy for tests and embedding
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Stored credential; blank values count as absent
    pub async fn api_key(&self) -> Result<Option<String>> {
        let value = self.store.get(CREDENTIAL_KEY).await?;
        Ok(value
            .as_ref()
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string))
    }

    /// Save a new credential
    pub async fn set_api_key(&self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(BridgeError::Config("Please enter an API key!".into()));
        }
        self.store
            .set(CREDENTIAL_KEY, JsonValue::String(api_key.to_string()))
            .await
    }

    /// Forget the credential
    pub async fn clear_api_key(&self) -> Result<()> {
        self.store.remove(CREDENTIAL_KEY).await
    }

    /// Memory toggle; anything but an explicit true is off
    pub async fn memory_enabled(&self) -> Result<bool> {
        Ok(match self.store.get(MEMORY_ENABLED_KEY).await? {
            Some(JsonValue::Bool(enabled)) => enabled,
            Some(JsonValue::String(s)) => s == "true",
            _ => false,
        })
    }

    /// Flip the memory toggle
    pub async fn set_memory_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .set(MEMORY_ENABLED_KEY, JsonValue::Bool(enabled))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_profile_settings_defaults() {
        let settings = ProfileSettings::in_memory();
        assert_eq!(settings.api_key().await.unwrap(), None);
        assert!(!settings.memory_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_api_key_is_trimmed_and_blank_rejected() {
        let settings = ProfileSettings::in_memory();
        assert!(matches!(
            settings.set_api_key("   ").await,
            Err(BridgeError::Config(_))
        ));
        settings.set_api_key("  sk-123 ").await.unwrap();
        assert_eq!(settings.api_key().await.unwrap().as_deref(), Some("sk-123"));
        settings.clear_api_key().await.unwrap();
        assert_eq!(settings.api_key().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_toggle_accepts_legacy_string() {
        let store = Arc::new(MemoryStore::new());
        store.set(MEMORY_ENABLED_KEY, json!("true")).await.unwrap();
        let settings = ProfileSettings::new(store.clone());
        assert!(settings.memory_enabled().await.unwrap());

        store.set(MEMORY_ENABLED_KEY, json!("yes")).await.unwrap();
        assert!(!settings.memory_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        let first = ProfileSettings::new(Arc::new(FileStore::new(&path)));
        first.set_api_key("sk-file").await.unwrap();
        first.set_memory_enabled(true).await.unwrap();

        let second = ProfileSettings::new(Arc::new(FileStore::new(&path)));
        assert_eq!(second.api_key().await.unwrap().as_deref(), Some("sk-file"));
        assert!(second.memory_enabled().await.unwrap());

        second.clear_api_key().await.unwrap();
        assert_eq!(first.api_key().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        tokio::fs::write(&path, "[1, 2]").await.unwrap();
        let store = FileStore::new(&path);
        assert!(matches!(store.get("x").await, Err(BridgeError::Storage(_))));
    }
}
