//! SQLite-backed [`RetrievalBackend`].
//!
//! Records live in the `records` table keyed by `(collection, id)`, with
//! embeddings stored as little-endian `f32` BLOBs. Nearest-neighbour search
//! is brute force over the collection's rows under the configured
//! [`DistanceMetric`](crate::embedding::DistanceMetric).

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{rank, BackendConfig, BackendState, CollectionInfo, QueryFilter, RetrievalBackend};
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::error::{Result, SkillError};
use crate::migrate::{run_migrations, schema_present};
use crate::models::{EmbeddingRecord, QueryResult};

struct Inner {
    pool: Option<SqlitePool>,
    state: BackendState,
}

pub struct SqliteIndex {
    config: BackendConfig,
    embedder: Arc<dyn Embedder>,
    inner: RwLock<Inner>,
}

impl SqliteIndex {
    pub fn new(config: BackendConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            inner: RwLock::new(Inner {
                pool: None,
                state: BackendState::Uninitialized,
            }),
        }
    }

    async fn pool(&self) -> Result<SqlitePool> {
        let inner = self.inner.read().await;
        inner.pool.clone().ok_or_else(|| {
            SkillError::NotInitialized(format!(
                "collection '{}' has not been initialized",
                self.config.collection_name
            ))
        })
    }

    async fn open_pool(&self, create: bool) -> Result<SqlitePool> {
        if let Some(pool) = &self.config.backing_client {
            return Ok(pool.clone());
        }
        if let Some(pool) = self.inner.read().await.pool.clone() {
            return Ok(pool);
        }
        db::connect(&self.config.storage_path, create).await
    }

    fn not_found(&self) -> SkillError {
        SkillError::IndexNotFound {
            path: self.config.storage_path.display().to_string(),
            collection: self.config.collection_name.clone(),
        }
    }

    /// Register the collection, warning if it was built with a different
    /// embedding model or metric.
    async fn ensure_collection(&self, pool: &SqlitePool) -> Result<()> {
        let existing = sqlx::query("SELECT embedding_model, metric FROM collections WHERE name = ?")
            .bind(&self.config.collection_name)
            .fetch_optional(pool)
            .await?;

        match existing {
            Some(row) => {
                let model: String = row.get("embedding_model");
                let metric: String = row.get("metric");
                if model != self.config.embedding_model_id || metric != self.config.metric.as_str()
                {
                    warn!(
                        collection = %self.config.collection_name,
                        stored_model = %model,
                        stored_metric = %metric,
                        model = %self.config.embedding_model_id,
                        metric = %self.config.metric,
                        "collection was built with a different embedding configuration; distances are not comparable"
                    );
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO collections (name, embedding_model, dims, metric, created_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&self.config.collection_name)
                .bind(&self.config.embedding_model_id)
                .bind(self.embedder.dims() as i64)
                .bind(self.config.metric.as_str())
                .bind(chrono::Utc::now().timestamp())
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn collection_exists(&self, pool: &SqlitePool) -> Result<bool> {
        if !schema_present(pool).await? {
            return Ok(false);
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections WHERE name = ?")
            .bind(&self.config.collection_name)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    async fn count_rows(&self, pool: &SqlitePool) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.config.collection_name)
            .fetch_one(pool)
            .await?;
        Ok(count as usize)
    }

    async fn attach(&self, pool: SqlitePool) -> Result<()> {
        let state = if self.count_rows(&pool).await? > 0 {
            BackendState::Populated
        } else {
            BackendState::Initialized
        };
        let mut inner = self.inner.write().await;
        inner.pool = Some(pool);
        inner.state = state;
        Ok(())
    }
}

#[async_trait]
impl RetrievalBackend for SqliteIndex {
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
        let pool = self.open_pool(true).await?;
        run_migrations(&pool).await?;

        if reset {
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM records WHERE collection = ?")
                .bind(&self.config.collection_name)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM collections WHERE name = ?")
                .bind(&self.config.collection_name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            info!(collection = %self.config.collection_name, "collection reset");
        }

        self.ensure_collection(&pool).await?;
        self.attach(pool).await?;

        debug!(
            collection = %self.config.collection_name,
            path = %self.config.storage_path.display(),
            "collection initialized"
        );
        Ok(())
    }

    async fn open_existing(&self) -> Result<()> {
        if self.config.backing_client.is_none() && !self.config.storage_path.exists() {
            return Err(self.not_found());
        }
        let pool = self.open_pool(false).await?;
        if !self.collection_exists(&pool).await? {
            return Err(self.not_found());
        }
        self.ensure_collection(&pool).await?;
        self.attach(pool).await
    }

    async fn index_exists(&self) -> Result<bool> {
        let opened = self.inner.read().await.pool.clone();
        if let Some(pool) = opened.or_else(|| self.config.backing_client.clone()) {
            return self.collection_exists(&pool).await;
        }
        if !self.config.storage_path.exists() {
            return Ok(false);
        }
        let pool = db::connect(&self.config.storage_path, false).await?;
        let exists = self.collection_exists(&pool).await;
        pool.close().await;
        exists
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let pool = self.pool().await?;
        if records.is_empty() {
            return Ok(());
        }
        if let Some(bad) = records.iter().find(|r| r.id.trim().is_empty()) {
            return Err(SkillError::InvalidArgument(format!(
                "record id is empty (document starts with {:?})",
                bad.document.chars().take(40).collect::<String>()
            )));
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO records (collection, id, source, document, embedding, hash, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    source = excluded.source,
                    document = excluded.document,
                    embedding = excluded.embedding,
                    hash = excluded.hash,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.config.collection_name)
            .bind(&record.id)
            .bind(&record.source)
            .bind(&record.document)
            .bind(vec_to_blob(&record.embedding))
            .bind(&record.hash)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.inner.write().await.state = BackendState::Populated;
        Ok(())
    }

    async fn nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<QueryResult>> {
        let pool = self.pool().await?;

        let mut sql = QueryBuilder::<Sqlite>::new(
            "SELECT id, source, document, embedding FROM records WHERE collection = ",
        );
        sql.push_bind(self.config.collection_name.clone());
        if let Some(f) = filter.filter(|f| !f.sources.is_empty()) {
            sql.push(" AND source IN (");
            let mut list = sql.separated(", ");
            for source in &f.sources {
                list.push_bind(source.clone());
            }
            list.push_unseparated(")");
        }
        let rows = sql.build().fetch_all(&pool).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let source: String = row.get("source");
            if let Some(f) = filter {
                if !f.matches(&id, &source) {
                    continue;
                }
            }
            let blob: Vec<u8> = row.get("embedding");
            match self.config.metric.distance(vector, &blob_to_vec(&blob)) {
                Some(distance) => results.push(QueryResult {
                    id,
                    document: row.get("document"),
                    distance,
                }),
                None => debug!(id = %id, "skipping record with mismatched dimensions"),
            }
        }

        Ok(rank(results, top_k))
    }

    async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT id, source, document, embedding, hash FROM records WHERE collection = ? AND id = ?",
        )
        .bind(&self.config.collection_name)
        .bind(id)
        .fetch_optional(&pool)
        .await?;

        Ok(row.map(|r| {
            let blob: Vec<u8> = r.get("embedding");
            EmbeddingRecord {
                id: r.get("id"),
                embedding: blob_to_vec(&blob),
                document: r.get("document"),
                source: r.get("source"),
                hash: r.get("hash"),
            }
        }))
    }

    async fn count(&self) -> Result<usize> {
        let pool = self.pool().await?;
        self.count_rows(&pool).await
    }

    async fn source_counts(&self) -> Result<Vec<(String, usize)>> {
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS n FROM records WHERE collection = ? GROUP BY source ORDER BY source",
        )
        .bind(&self.config.collection_name)
        .fetch_all(&pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("source"), r.get::<i64, _>("n") as usize))
            .collect())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let pool = self.pool().await?;
        let row = sqlx::query("SELECT embedding_model, dims, metric FROM collections WHERE name = ?")
            .bind(&self.config.collection_name)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| self.not_found())?;
        Ok(CollectionInfo {
            name: self.config.collection_name.clone(),
            embedding_model: row.get("embedding_model"),
            dims: row.get::<i64, _>("dims") as usize,
            metric: row.get("metric"),
        })
    }
}
