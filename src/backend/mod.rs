//! Pluggable retrieval backends.
//!
//! The [`RetrievalBackend`] trait is the contract every vector index
//! implements. Backends provide the storage primitives (`initialize`,
//! `open_existing`, `upsert`, `nearest`, ...); directory ingestion and
//! batched text queries are provided on top of them, so every backend
//! chunks, embeds, and ranks the same way.
//!
//! Backends are chosen explicitly with [`create_backend`]:
//!
//! | [`BackendKind`] | Implementation | Persistence |
//! |-----------------|----------------|-------------|
//! | `sqlite` | [`SqliteIndex`] | file at `storage_path`, survives restarts |
//! | `memory` | [`MemoryIndex`] | process-local |
//!
//! # State machine
//!
//! ```text
//! Uninitialized ──initialize / open_existing──▶ Initialized ──upsert / ingest──▶ Populated
//! ```
//!
//! `query` fails with [`SkillError::NotInitialized`] in `Uninitialized`.
//! Backends do no internal locking across mutations: callers serialize
//! `upsert`, `ingest`, and `initialize(reset = true)` per collection.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chunk::{ChunkMode, ChunkPolicy};
use crate::config::{BackendKind, Config};
use crate::embedding::{embed_batched, DistanceMetric, Embedder};
use crate::error::{Result, SkillError};
use crate::ingest;
use crate::models::{EmbeddingRecord, QueryResponse, QueryResult};

/// Caller-supplied chunking function, replacing the built-in policy.
pub type Splitter = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Fully enumerated backend configuration.
#[derive(Clone)]
pub struct BackendConfig {
    pub storage_path: PathBuf,
    pub collection_name: String,
    pub embedding_model_id: String,
    pub max_tokens_per_chunk: usize,
    pub chunk_mode: ChunkMode,
    pub break_at_blank_line: bool,
    pub custom_splitter: Option<Splitter>,
    /// Pre-built pool to use instead of opening `storage_path`.
    pub backing_client: Option<SqlitePool>,
    pub metric: DistanceMetric,
    pub batch_size: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl BackendConfig {
    pub fn new(storage_path: impl Into<PathBuf>, collection_name: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            collection_name: collection_name.into(),
            ..Self::default()
        }
    }

    /// Derive the backend configuration from the file config.
    pub fn from_config(config: &Config, embedding_model_id: &str) -> Self {
        Self {
            storage_path: config.store.path.clone(),
            collection_name: config.store.collection.clone(),
            embedding_model_id: embedding_model_id.to_string(),
            max_tokens_per_chunk: config.chunking.max_tokens,
            chunk_mode: config.chunking.mode,
            break_at_blank_line: config.chunking.break_at_blank_line,
            custom_splitter: None,
            backing_client: None,
            metric: config.store.metric,
            batch_size: config.embedding.batch_size,
            include_globs: config.ingest.include_globs.clone(),
            exclude_globs: config.ingest.exclude_globs.clone(),
        }
    }

    pub fn with_splitter(mut self, splitter: Splitter) -> Self {
        self.custom_splitter = Some(splitter);
        self
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        ChunkPolicy {
            max_tokens: self.max_tokens_per_chunk,
            mode: self.chunk_mode,
            break_at_blank_line: self.break_at_blank_line,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        let defaults = Config::default();
        Self::from_config(&defaults, "hashing-256")
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("storage_path", &self.storage_path)
            .field("collection_name", &self.collection_name)
            .field("embedding_model_id", &self.embedding_model_id)
            .field("max_tokens_per_chunk", &self.max_tokens_per_chunk)
            .field("chunk_mode", &self.chunk_mode)
            .field("break_at_blank_line", &self.break_at_blank_line)
            .field("custom_splitter", &self.custom_splitter.is_some())
            .field("backing_client", &self.backing_client.is_some())
            .field("metric", &self.metric)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Initialized,
    Populated,
}

/// Restricts the candidate set before ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Only records with one of these origin labels (`"skill"`, `"remote"`,
    /// `"ingest"`). Empty admits every origin.
    pub sources: Vec<String>,
    /// Only records whose id starts with this prefix, e.g. one ingested document.
    pub id_prefix: Option<String>,
}

impl QueryFilter {
    pub fn source(source: impl Into<String>) -> Self {
        Self::sources([source])
    }

    pub fn sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
            id_prefix: None,
        }
    }

    pub fn matches(&self, id: &str, source: &str) -> bool {
        (self.sources.is_empty() || self.sources.iter().any(|s| s == source))
            && self.id_prefix.as_deref().map_or(true, |p| id.starts_with(p))
    }
}

/// Embedding settings a collection was created with. These may differ from
/// the current [`BackendConfig`] if the configuration changed since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub embedding_model: String,
    pub dims: usize,
    pub metric: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub documents: usize,
    pub chunks: usize,
    pub skipped: Vec<String>,
}

/// Abstract vector index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`initialize`](RetrievalBackend::initialize) | open or create the collection, optionally destroying it first |
/// | [`open_existing`](RetrievalBackend::open_existing) | attach to a collection that must already exist |
/// | [`index_exists`](RetrievalBackend::index_exists) | whether the collection exists at the configured location |
/// | [`upsert`](RetrievalBackend::upsert) | insert or replace records by id |
/// | [`nearest`](RetrievalBackend::nearest) | rank records against one vector |
/// | [`ingest`](RetrievalBackend::ingest) | chunk, embed, and load a directory |
/// | [`query`](RetrievalBackend::query) | batched text query |
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    fn config(&self) -> &BackendConfig;

    fn embedder(&self) -> &Arc<dyn Embedder>;

    async fn state(&self) -> BackendState;

    /// Open or create the collection. With `reset`, existing content is
    /// destroyed and the collection recreated empty.
    async fn initialize(&self, reset: bool) -> Result<()>;

    /// Attach to an existing collection without creating anything.
    ///
    /// Fails with [`SkillError::IndexNotFound`] if none exists.
    async fn open_existing(&self) -> Result<()>;

    /// True once the collection has been created at the configured
    /// location, whether or not this handle has opened it.
    async fn index_exists(&self) -> Result<bool>;

    /// Insert or replace records by id. Never leaves duplicate ids.
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()>;

    /// Up to `top_k` records ordered by ascending distance to `vector`.
    async fn nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<QueryResult>>;

    async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>>;

    async fn count(&self) -> Result<usize>;

    /// Record counts per origin label, sorted by label.
    async fn source_counts(&self) -> Result<Vec<(String, usize)>>;

    /// How the open collection was built, as recorded when it was created.
    async fn collection_info(&self) -> Result<CollectionInfo>;

    /// Chunk and load every matching document under `dir`.
    ///
    /// `overwrite` destroys prior content first. Chunk ids are stable, so
    /// re-ingesting an unchanged directory leaves the same record set.
    async fn ingest(&self, dir: &Path, overwrite: bool) -> Result<IngestStats> {
        if overwrite {
            self.initialize(true).await?;
        } else if self.state().await == BackendState::Uninitialized {
            self.initialize(false).await?;
        }

        let config = self.config();
        let loaded = ingest::load_chunks(dir, config)?;
        let texts: Vec<String> = loaded.chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder().as_ref(), &texts, config.batch_size).await?;

        let records: Vec<EmbeddingRecord> = loaded
            .chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddingRecord {
                id: chunk.id,
                embedding,
                document: chunk.text,
                source: ingest::SOURCE_LABEL.to_string(),
                hash: chunk.hash,
            })
            .collect();

        self.upsert(&records).await?;

        info!(
            collection = %config.collection_name,
            documents = loaded.documents,
            chunks = records.len(),
            "ingested directory {}",
            dir.display()
        );

        Ok(IngestStats {
            documents: loaded.documents,
            chunks: records.len(),
            skipped: loaded.skipped,
        })
    }

    /// Embed each text and return its nearest neighbours, one row per text.
    async fn query(
        &self,
        texts: &[String],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<QueryResponse> {
        if self.state().await == BackendState::Uninitialized {
            return Err(SkillError::NotInitialized(format!(
                "collection '{}' must be initialized or opened before querying",
                self.config().collection_name
            )));
        }
        if texts.is_empty() {
            return Err(SkillError::InvalidArgument("no query texts".into()));
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(SkillError::InvalidArgument("query text is empty".into()));
        }
        if top_k == 0 {
            return Err(SkillError::InvalidArgument("top_k must be >= 1".into()));
        }

        let vectors =
            embed_batched(self.embedder().as_ref(), texts, self.config().batch_size).await?;

        let mut rows = Vec::with_capacity(vectors.len());
        for vector in &vectors {
            rows.push(self.nearest(vector, top_k, filter).await?);
        }
        debug!(queries = rows.len(), top_k, "query complete");
        Ok(QueryResponse::from_rows(rows))
    }
}

/// Sort by ascending distance and keep the first `top_k`.
pub(crate) fn rank(mut results: Vec<QueryResult>, top_k: usize) -> Vec<QueryResult> {
    results.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(top_k);
    results
}

/// Build the backend selected by `kind`.
pub fn create_backend(
    kind: BackendKind,
    config: BackendConfig,
    embedder: Arc<dyn Embedder>,
) -> Arc<dyn RetrievalBackend> {
    match kind {
        BackendKind::Sqlite => Arc::new(SqliteIndex::new(config, embedder)),
        BackendKind::Memory => Arc::new(MemoryIndex::new(config, embedder)),
    }
}
