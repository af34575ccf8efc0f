//! Skill memory statistics.
//!
//! `skm stats` prints where the collection lives, how it was built, and how
//! many records came from each origin (`skill`, `remote`, `ingest`).

use anyhow::Result;

use crate::config::{BackendKind, Config};
use crate::store::SkillMemoryStore;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SkillMemoryStore::from_config(config)?;
    if !store.backend().index_exists().await? {
        println!("No skill memory at {}. Run `skm init`.", config.store.path.display());
        return Ok(());
    }
    store.open_existing().await?;

    let total = store.count().await?;
    let by_source = store.backend().source_counts().await?;
    let info = store.backend().collection_info().await?;
    let backend_config = store.backend().config();

    println!("Skill Memory Stats");
    println!("==================");
    println!();
    match config.store.backend {
        BackendKind::Sqlite => {
            let size = std::fs::metadata(&config.store.path)
                .map(|m| m.len())
                .unwrap_or(0);
            println!("  Store:       {}", config.store.path.display());
            println!("  Size:        {}", format_bytes(size));
        }
        BackendKind::Memory => println!("  Store:       (memory)"),
    }
    println!("  Collection:  {}", info.name);
    println!(
        "  Model:       {}{}",
        info.embedding_model,
        configured_note(&info.embedding_model, &backend_config.embedding_model_id)
    );
    println!("  Dimensions:  {}", info.dims);
    println!(
        "  Metric:      {}{}",
        info.metric,
        configured_note(&info.metric, backend_config.metric.as_str())
    );
    println!();
    println!("  Records:     {}", total);

    if !by_source.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<16} {:>8}", "SOURCE", "RECORDS");
        println!("  {}", "-".repeat(25));
        for (source, count) in &by_source {
            println!("  {:<16} {:>8}", source, count);
        }
    }
    println!();
    Ok(())
}

/// Flag a stored setting that no longer matches the configuration.
fn configured_note(stored: &str, configured: &str) -> String {
    if stored == configured {
        String::new()
    } else {
        format!("  (configured: {})", configured)
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
