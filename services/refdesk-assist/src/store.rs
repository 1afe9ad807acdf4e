//! Session store: the only shared mutable state in the service.

use crate::error::AssistError;
use crate::gateway::ResourceKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Provider resources owned by one client-visible session.
///
/// Bundles are only stored once every resource exists, and are never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBundle {
    pub session_id: String,
    pub file_id: String,
    pub index_id: String,
    pub created_at: DateTime<Utc>,
    /// Original filename or path, for diagnostics.
    pub source_ref: String,
}

impl ResourceBundle {
    pub fn new(
        session_id: impl Into<String>,
        file_id: impl Into<String>,
        index_id: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            file_id: file_id.into(),
            index_id: index_id.into(),
            created_at: Utc::now(),
            source_ref: source_ref.into(),
        }
    }

    /// Override the creation time (restores, tests).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }

    /// Owned provider resources in release order: session, index, file.
    pub fn owned_resources(&self) -> Vec<(ResourceKind, String)> {
        vec![
            (ResourceKind::Session, self.session_id.clone()),
            (ResourceKind::Index, self.index_id.clone()),
            (ResourceKind::File, self.file_id.clone()),
        ]
    }
}

/// Concurrency-safe map of `session_id -> ResourceBundle`.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    bundles: Arc<RwLock<HashMap<String, ResourceBundle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bundle. Fails if the session id is already present.
    pub async fn put(&self, bundle: ResourceBundle) -> Result<(), AssistError> {
        let mut bundles = self.bundles.write().await;
        if bundles.contains_key(&bundle.session_id) {
            return Err(AssistError::SessionExists(bundle.session_id));
        }
        bundles.insert(bundle.session_id.clone(), bundle);
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<ResourceBundle, AssistError> {
        self.bundles
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AssistError::SessionNotFound(session_id.to_string()))
    }

    /// Remove and return a bundle. Of several concurrent removals of the
    /// same id exactly one succeeds; the rest see `SessionNotFound`.
    pub async fn remove(&self, session_id: &str) -> Result<ResourceBundle, AssistError> {
        self.bundles
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| AssistError::SessionNotFound(session_id.to_string()))
    }

    /// Point-in-time copy of all bundles, oldest first.
    pub async fn snapshot(&self) -> Vec<ResourceBundle> {
        let mut bundles: Vec<ResourceBundle> =
            self.bundles.read().await.values().cloned().collect();
        bundles.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        bundles
    }

    pub async fn len(&self) -> usize {
        self.bundles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bundles.read().await.is_empty()
    }
}
