use sqlx::SqlitePool;

use crate::error::Result;

/// Create the skill-memory schema. Idempotent.
///
/// - `collections`: one row per named collection, recording the embedding
///   model and distance metric its vectors were built with.
/// - `records`: one row per `(collection, id)`; upserts replace in place.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            metric TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            source TEXT NOT NULL,
            document TEXT NOT NULL,
            embedding BLOB NOT NULL,
            hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_source ON records(collection, source)")
        .execute(pool)
        .await?;

    Ok(())
}

/// True if the schema tables exist in `pool`'s database.
pub async fn schema_present(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('collections', 'records')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count == 2)
}
