//! # Session Store
//!
//! Key-value blob store holding the persisted session.
//!
//! Two fixed keys are used: one serialized [`Credentials`] record and one
//! serialized [`ProfileSummary`]. No schema versioning; the Session Manager
//! treats a record it cannot parse as absent.
//!
//! [`Credentials`]: skygate_core::Credentials
//! [`ProfileSummary`]: skygate_core::ProfileSummary

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::GatewayResult;

/// Key of the serialized credentials record.
pub const CREDENTIALS_KEY: &str = "session.credentials";

/// Key of the serialized profile summary record.
pub const PROFILE_KEY: &str = "session.profile";

/// Persisted blob store. Writers are last-writer-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &str) -> GatewayResult<Option<String>>;

    async fn save(&self, key: &str, value: &str) -> GatewayResult<()>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> GatewayResult<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Store kept in process memory. Used by tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &str) -> GatewayResult<Option<String>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> GatewayResult<()> {
        self.records
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> GatewayResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Store with one file per key inside a directory.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSessionStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, key: &str) -> GatewayResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: &str) -> GatewayResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(key);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(?path, "Session record saved");
        Ok(())
    }

    async fn remove(&self, key: &str) -> GatewayResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        assert_eq!(store.load(CREDENTIALS_KEY).await.unwrap(), None);

        store.save(CREDENTIALS_KEY, "{}").await.unwrap();
        assert_eq!(store.load(CREDENTIALS_KEY).await.unwrap().as_deref(), Some("{}"));

        store.remove(CREDENTIALS_KEY).await.unwrap();
        store.remove(CREDENTIALS_KEY).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session"));

        assert_eq!(store.load(PROFILE_KEY).await.unwrap(), None);

        store.save(PROFILE_KEY, r#"{"did":"did:plc:abc"}"#).await.unwrap();
        store.save(PROFILE_KEY, r#"{"did":"did:plc:xyz"}"#).await.unwrap();
        assert_eq!(
            store.load(PROFILE_KEY).await.unwrap().as_deref(),
            Some(r#"{"did":"did:plc:xyz"}"#)
        );

        // Only the record itself remains; temp files were renamed away.
        let entries = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(entries, 1);

        store.remove(PROFILE_KEY).await.unwrap();
        store.remove(PROFILE_KEY).await.unwrap();
        assert_eq!(store.load(PROFILE_KEY).await.unwrap(), None);
    }
}
