//! In-memory model store

use super::{Clock, Model, ModelId, ModelRepository, ModelStream, SystemClock};
use crate::error::StoreError;
use async_trait::async_trait;
use futures::stream;
use std::cmp::Reverse;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    models: Vec<Model>,
    next_id: i64,
}

/// Model store held in process memory
///
/// Records are lost on restart. Clones share the same records.
#[derive(Clone)]
pub struct InMemoryModelStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                models: Vec::new(),
                next_id: 1,
            })),
            clock,
        }
    }

    /// Snapshot of every stored model, in insertion order
    pub async fn all(&self) -> Vec<Model> {
        self.inner.read().await.models.clone()
    }

    pub async fn get(&self, id: ModelId) -> Option<Model> {
        self.inner
            .read()
            .await
            .models
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }
}

#[async_trait]
impl ModelRepository for InMemoryModelStore {
    async fn insert(&self, model: &Model) -> Result<ModelId, StoreError> {
        let mut inner = self.inner.write().await;

        if inner
            .models
            .iter()
            .any(|m| m.repo_id == model.repo_id && m.version == model.version)
        {
            return Err(StoreError::Task(format!(
                "duplicate model version {} for repository {}",
                model.version, model.repo_id
            )));
        }

        let id = ModelId::new(inner.next_id);
        inner.next_id += 1;

        let mut stored = model.clone();
        stored.id = id;
        inner.models.push(stored);

        Ok(id)
    }

    async fn find_latest(&self, repo_id: &str) -> Result<Model, StoreError> {
        self.inner
            .read()
            .await
            .models
            .iter()
            .filter(|m| m.repo_id == repo_id)
            .max_by_key(|m| m.id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_repo(&self, repo_id: &str, limit: usize) -> Result<ModelStream, StoreError> {
        let mut models: Vec<Model> = self
            .inner
            .read()
            .await
            .models
            .iter()
            .filter(|m| m.repo_id == repo_id)
            .cloned()
            .collect();

        models.sort_by_key(|m| Reverse((m.created_at, m.id)));
        models.truncate(limit);

        Ok(Box::pin(stream::iter(models.into_iter().map(Ok))))
    }

    async fn log_usage(&self, id: ModelId) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if let Some(model) = inner.models.iter_mut().find(|m| m.id == id) {
            model.last_use = now;
        }
        Ok(())
    }

    async fn set_expired(&self, id: ModelId, expired: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(model) = inner.models.iter_mut().find(|m| m.id == id) {
            model.expired = expired;
        }
        Ok(())
    }
}
