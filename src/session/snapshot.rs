//! Persisted auth snapshot
//!
//! A short-lived local copy of "who is signed in", used to avoid showing a
//! signed-out UI while the identity provider initializes.

use crate::{error::SnapshotError, types::AuthUser};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Cached auth state with the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub user: Option<AuthUser>,
    pub cached_at: DateTime<Utc>,
}

impl AuthSnapshot {
    pub fn now(user: Option<AuthUser>) -> Self {
        Self {
            user,
            cached_at: Utc::now(),
        }
    }

    /// True once the snapshot is older than `ttl`
    ///
    /// A timestamp in the future (clock skew, tampered file) also counts as
    /// expired.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.cached_at);
        if age < chrono::Duration::zero() {
            return true;
        }
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            Err(_) => false,
        }
    }
}

/// Where the snapshot lives between runs
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns `Ok(None)` when nothing was stored
    async fn load(&self) -> Result<Option<AuthSnapshot>, SnapshotError>;

    async fn save(&self, snapshot: &AuthSnapshot) -> Result<(), SnapshotError>;

    async fn clear(&self) -> Result<(), SnapshotError>;
}

/// Snapshot kept in process memory, stored as JSON text
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    raw: Mutex<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the stored text as-is
    pub fn set_raw(&self, raw: impl Into<String>) {
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw.into());
    }

    pub fn raw(&self) -> Option<String> {
        self.raw.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<AuthSnapshot>, SnapshotError> {
        match self.raw() {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &AuthSnapshot) -> Result<(), SnapshotError> {
        self.set_raw(serde_json::to_string(snapshot)?);
        Ok(())
    }

    async fn clear(&self) -> Result<(), SnapshotError> {
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Snapshot persisted as a JSON file
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<AuthSnapshot>, SnapshotError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshot: &AuthSnapshot) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec(snapshot)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SnapshotError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
