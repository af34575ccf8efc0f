//! Process-local [`RetrievalBackend`].
//!
//! Same contract as [`SqliteIndex`](super::SqliteIndex) without persistence:
//! the collection exists from the first `initialize` until the handle is
//! dropped. Useful for tests and short-lived sessions.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{rank, BackendConfig, BackendState, CollectionInfo, QueryFilter, RetrievalBackend};
use crate::embedding::Embedder;
use crate::error::{Result, SkillError};
use crate::models::{EmbeddingRecord, QueryResult};

struct Inner {
    state: BackendState,
    created: bool,
    records: HashMap<String, EmbeddingRecord>,
}

pub struct MemoryIndex {
    config: BackendConfig,
    embedder: Arc<dyn Embedder>,
    inner: RwLock<Inner>,
}

impl MemoryIndex {
    pub fn new(config: BackendConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            inner: RwLock::new(Inner {
                state: BackendState::Uninitialized,
                created: false,
                records: HashMap::new(),
            }),
        }
    }

    fn not_initialized(&self) -> SkillError {
        SkillError::NotInitialized(format!(
            "collection '{}' has not been initialized",
            self.config.collection_name
        ))
    }
}

#[async_trait]
impl RetrievalBackend for MemoryIndex {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    async fn state(&self) -> BackendState {
        self.inner.read().await.state
    }

    async fn initialize(&self, reset: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        if reset {
            inner.records.clear();
        }
        inner.created = true;
        inner.state = if inner.records.is_empty() {
            BackendState::Initialized
        } else {
            BackendState::Populated
        };
        Ok(())
    }

    async fn open_existing(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.created {
            return Err(SkillError::IndexNotFound {
                path: "<memory>".to_string(),
                collection: self.config.collection_name.clone(),
            });
        }
        if inner.state == BackendState::Uninitialized {
            inner.state = BackendState::Initialized;
        }
        Ok(())
    }

    async fn index_exists(&self) -> Result<bool> {
        Ok(self.inner.read().await.created)
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state == BackendState::Uninitialized {
            return Err(self.not_initialized());
        }
        if records.iter().any(|r| r.id.trim().is_empty()) {
            return Err(SkillError::InvalidArgument("record id is empty".into()));
        }
        for record in records {
            inner.records.insert(record.id.clone(), record.clone());
        }
        if !inner.records.is_empty() {
            inner.state = BackendState::Populated;
        }
        Ok(())
    }

    async fn nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<QueryResult>> {
        let inner = self.inner.read().await;
        if inner.state == BackendState::Uninitialized {
            return Err(self.not_initialized());
        }

        let results = inner
            .records
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.id, &r.source)))
            .filter_map(|r| {
                self.config
                    .metric
                    .distance(vector, &r.embedding)
                    .map(|distance| QueryResult {
                        id: r.id.clone(),
                        document: r.document.clone(),
                        distance,
                    })
            })
            .collect();

        Ok(rank(results, top_k))
    }

    async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        let inner = self.inner.read().await;
        if inner.state == BackendState::Uninitialized {
            return Err(self.not_initialized());
        }
        Ok(inner.records.get(id).cloned())
    }

    async fn count(&self) -> Result<usize> {
        let inner = self.inner.read().await;
        if inner.state == BackendState::Uninitialized {
            return Err(self.not_initialized());
        }
        Ok(inner.records.len())
    }

    async fn source_counts(&self) -> Result<Vec<(String, usize)>> {
        let inner = self.inner.read().await;
        if inner.state == BackendState::Uninitialized {
            return Err(self.not_initialized());
        }
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in inner.records.values() {
            *counts.entry(record.source.clone()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        if self.inner.read().await.state == BackendState::Uninitialized {
            return Err(self.not_initialized());
        }
        Ok(CollectionInfo {
            name: self.config.collection_name.clone(),
            embedding_model: self.config.embedding_model_id.clone(),
            dims: self.embedder.dims(),
            metric: self.config.metric.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;

    fn index() -> MemoryIndex {
        MemoryIndex::new(
            BackendConfig::new("unused", "functions"),
            Arc::new(HashingProvider::new(64)),
        )
    }

    #[tokio::test]
    async fn test_open_existing_requires_initialize() {
        let index = index();
        assert!(!index.index_exists().await.unwrap());
        let err = index.open_existing().await.unwrap_err();
        assert!(matches!(err, SkillError::IndexNotFound { .. }));

        index.initialize(false).await.unwrap();
        assert!(index.index_exists().await.unwrap());
        index.open_existing().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_before_initialize_fails() {
        let index = index();
        let err = index
            .query(&["anything".to_string()], 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_reset_clears_records() {
        let index = index();
        index.initialize(false).await.unwrap();
        let record = EmbeddingRecord {
            id: "a".into(),
            embedding: vec![1.0; 64],
            document: "a".into(),
            source: "skill".into(),
            hash: String::new(),
        };
        index.upsert(&[record.clone(), record]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        index.initialize(true).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
        assert_eq!(index.state().await, BackendState::Initialized);
    }
}
