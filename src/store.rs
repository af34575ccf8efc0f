//! The skill memory: a persistent, semantically searchable cache of code
//! artifacts keyed by name.
//!
//! [`SkillMemoryStore`] sits on top of any [`RetrievalBackend`]. It embeds
//! artifact source with the backend's embedder, upserts one record per id,
//! and answers thresholded nearest-neighbour queries.
//!
//! # Contract
//!
//! | Operation | Uninitialized | Initialized / Populated |
//! |-----------|---------------|-------------------------|
//! | `store` | `NotInitialized` | upsert, persisted immediately |
//! | `query` | `Ok(vec![])` | nearest `top_k`, `distance < threshold` |
//! | `get` / `count` | `NotInitialized` | lookup |
//!
//! Distances follow the collection's [`DistanceMetric`](crate::embedding::DistanceMetric);
//! lower is more similar.
//!
//! Mutations are not locked internally. Callers serialize `store`,
//! `ingest`, and `initialize(true)` per collection.

use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::{create_backend, BackendConfig, BackendState, QueryFilter, RetrievalBackend};
use crate::chunk::content_hash;
use crate::config::Config;
use crate::embedding::{create_provider, embed_one};
use crate::error::{Result, SkillError};
use crate::models::{validate_artifact_id, CodeArtifact, EmbeddingRecord, QueryResult};
use crate::parser;

/// Origin label for artifacts stored directly by an agent or the CLI.
pub const SOURCE_SKILL: &str = "skill";
/// Origin label for artifacts pulled from the remote repository.
pub const SOURCE_REMOTE: &str = "remote";

#[derive(Clone)]
pub struct SkillMemoryStore {
    backend: Arc<dyn RetrievalBackend>,
}

impl SkillMemoryStore {
    pub fn new(backend: Arc<dyn RetrievalBackend>) -> Self {
        Self { backend }
    }

    /// Build the embedder and backend described by `config`. Nothing is
    /// opened until [`initialize`](Self::initialize) or
    /// [`open_existing`](Self::open_existing).
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let backend_config = BackendConfig::from_config(config, embedder.model_name());
        let backend = create_backend(config.store.backend, backend_config, embedder);
        Ok(Self::new(backend))
    }

    pub fn backend(&self) -> &Arc<dyn RetrievalBackend> {
        &self.backend
    }

    pub fn collection(&self) -> &str {
        &self.backend.config().collection_name
    }

    /// Open or create the collection. `reset` destroys existing content.
    pub async fn initialize(&self, reset: bool) -> Result<()> {
        self.backend.initialize(reset).await?;
        info!(collection = %self.collection(), reset, "skill memory ready");
        Ok(())
    }

    pub async fn open_existing(&self) -> Result<()> {
        self.backend.open_existing().await
    }

    /// Destroy every record and recreate the collection empty.
    pub async fn reset(&self) -> Result<()> {
        self.initialize(true).await
    }

    /// Embed `source_text` and upsert it under `id`, replacing any prior
    /// record with that id.
    pub async fn store(&self, id: &str, source_text: &str) -> Result<()> {
        self.store_with_source(id, source_text, SOURCE_SKILL).await
    }

    pub async fn store_artifact(&self, artifact: &CodeArtifact) -> Result<()> {
        self.store(&artifact.id, &artifact.source_text).await
    }

    pub(crate) async fn store_with_source(
        &self,
        id: &str,
        source_text: &str,
        source: &str,
    ) -> Result<()> {
        validate_artifact_id(id)?;
        if source_text.trim().is_empty() {
            return Err(SkillError::InvalidArgument(format!(
                "source text for '{}' is empty",
                id
            )));
        }
        if self.backend.state().await == BackendState::Uninitialized {
            return Err(SkillError::NotInitialized(format!(
                "cannot store '{}': collection '{}' is not initialized",
                id,
                self.collection()
            )));
        }

        let embedding = embed_one(self.backend.embedder().as_ref(), source_text).await?;
        let record = EmbeddingRecord {
            id: id.to_string(),
            embedding,
            document: source_text.to_string(),
            source: source.to_string(),
            hash: content_hash(source_text),
        };
        self.backend.upsert(std::slice::from_ref(&record)).await?;

        debug!(id = %id, source = %source, collection = %self.collection(), "stored artifact");
        Ok(())
    }

    /// Up to `top_k` artifacts nearest to `text`, ascending by distance.
    ///
    /// Only skill and remote records are candidates; ingested document
    /// chunks sharing the collection are never returned. With a
    /// `threshold`, results at or beyond it are dropped. An uninitialized
    /// or empty store yields an empty list.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<QueryResult>> {
        if text.trim().is_empty() {
            return Err(SkillError::InvalidArgument("query text is empty".into()));
        }
        if top_k == 0 {
            return Err(SkillError::InvalidArgument("top_k must be >= 1".into()));
        }
        if let Some(t) = threshold {
            if t.is_nan() || t < 0.0 {
                return Err(SkillError::InvalidArgument(format!(
                    "threshold must be a non-negative number, got {}",
                    t
                )));
            }
        }
        if self.backend.state().await == BackendState::Uninitialized {
            return Ok(Vec::new());
        }

        let artifacts = QueryFilter::sources([SOURCE_SKILL, SOURCE_REMOTE]);
        let response = self
            .backend
            .query(&[text.to_string()], top_k, Some(&artifacts))
            .await?;
        let mut results = response.row(0);
        if let Some(t) = threshold {
            results.retain(|r| r.distance < t);
        }
        Ok(results)
    }

    /// The stored artifact with `id`, with parsed signature and docstring.
    pub async fn get(&self, id: &str) -> Result<Option<CodeArtifact>> {
        let record = self.backend.get(id).await?;
        Ok(record.map(|r| parser::parse_artifact(&r.id, &r.document)))
    }

    pub async fn count(&self) -> Result<usize> {
        self.backend.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryIndex;
    use crate::embedding::HashingProvider;

    fn memory_store() -> SkillMemoryStore {
        let backend = MemoryIndex::new(
            BackendConfig::new("unused", "functions"),
            Arc::new(HashingProvider::default()),
        );
        SkillMemoryStore::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn test_query_uninitialized_is_empty() {
        let store = memory_store();
        let results = store.query("anything", 5, Some(1.0)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_store_uninitialized_fails() {
        let store = memory_store();
        let err = store.store("f", "def f(): pass").await.unwrap_err();
        assert!(matches!(err, SkillError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_invalid_input_has_no_side_effects() {
        let store = memory_store();
        store.initialize(false).await.unwrap();
        assert!(matches!(
            store.store("", "def f(): pass").await,
            Err(SkillError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.store("f", "   ").await,
            Err(SkillError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.query("", 3, None).await,
            Err(SkillError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.query("x", 0, None).await,
            Err(SkillError::InvalidArgument(_))
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_latest_text() {
        let store = memory_store();
        store.initialize(false).await.unwrap();
        store.store("f", "def f(): return 1").await.unwrap();
        store.store("f", "def f(): return 2").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let artifact = store.get("f").await.unwrap().unwrap();
        assert_eq!(artifact.source_text, "def f(): return 2");
        assert_eq!(artifact.signature.as_deref(), Some("f()"));
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let store = memory_store();
        store.initialize(false).await.unwrap();
        let text = "def add_two(a, b): return a + b";
        store.store("add_two", text).await.unwrap();

        // Self-distance is zero, so a zero threshold excludes even an exact match.
        assert!(store.query(text, 1, Some(0.0)).await.unwrap().is_empty());
        let hits = store.query(text, 1, Some(0.01)).await.unwrap();
        assert_eq!(hits[0].id, "add_two");
    }
}
