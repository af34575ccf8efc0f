//! `skm` command implementations.
//!
//! Each `run_*` function loads what it needs from [`Config`], performs one
//! operation, and prints a human-readable result to stdout. Diagnostics go
//! through `tracing` to stderr.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::models::ChatMessage;
use crate::parser;
use crate::publish::RemoteSkillPublisher;
use crate::remote::GitHubClient;
use crate::store::SkillMemoryStore;
use crate::sync::RemoteSkillSync;

pub async fn run_init(config: &Config, reset: bool) -> Result<()> {
    let store = SkillMemoryStore::from_config(config)?;
    store.initialize(reset).await?;
    if reset {
        println!("Collection '{}' reset.", store.collection());
    } else {
        println!("Collection '{}' initialized.", store.collection());
    }
    Ok(())
}

pub async fn run_store(config: &Config, file: &Path, id: Option<String>) -> Result<()> {
    let text = read_source(file)?;
    let meta = parser::parse(&text);
    let id = match id.or_else(|| meta.name.clone()) {
        Some(id) => id,
        None => file_stem(file)?,
    };

    let store = SkillMemoryStore::from_config(config)?;
    store.initialize(false).await?;
    store
        .store(&id, &text)
        .await
        .with_context(|| format!("Failed to store {}", file.display()))?;

    match meta.signature {
        Some(sig) => println!("Stored {} as {}", sig, id),
        None => println!("Stored {}", id),
    }
    Ok(())
}

pub async fn run_query(
    config: &Config,
    text: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let store = SkillMemoryStore::from_config(config)?;
    let top_k = top_k.unwrap_or(config.recall.max_results);
    let threshold = threshold.unwrap_or(config.recall.threshold);

    // A store that was never created has nothing to recall.
    if store.backend().index_exists().await? {
        store.open_existing().await?;
    }
    let results = store.query(text, top_k, Some(threshold)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        let meta = parser::parse(&r.document);
        println!("{}. {}  (distance {:.4})", i + 1, r.id, r.distance);
        if let Some(sig) = &meta.signature {
            println!("   {}", sig);
        }
        if let Some(first) = meta.docstring.as_deref().and_then(|d| d.lines().next()) {
            println!("   {}", first);
        }
    }
    Ok(())
}

pub async fn run_ingest(config: &Config, dir: &Path, overwrite: bool) -> Result<()> {
    let store = SkillMemoryStore::from_config(config)?;
    let stats = store.backend().ingest(dir, overwrite).await?;

    println!("ingest {}", dir.display());
    println!("  documents: {}", stats.documents);
    println!("  chunks: {}", stats.chunks);
    println!("  records: {}", store.count().await?);
    for path in &stats.skipped {
        println!("  skipped: {}", path);
    }
    println!("ok");
    Ok(())
}

pub fn run_parse(file: &Path) -> Result<()> {
    let text = read_source(file)?;
    let meta = parser::parse(&text);
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

pub async fn run_publish(
    config: &Config,
    file: &Path,
    repo: Option<String>,
    base: Option<String>,
    transcript: Option<&Path>,
) -> Result<()> {
    let repo = resolve_repo(config, repo)?;
    let base = base.unwrap_or_else(|| config.remote.branch.clone());

    let text = read_source(file)?;
    let id = match parser::parse(&text).name {
        Some(name) => name,
        None => file_stem(file)?,
    };
    let artifact = parser::parse_artifact(&id, &text);

    let messages: Vec<ChatMessage> = match transcript {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read transcript: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Transcript is not a JSON message list: {}", path.display()))?
        }
        None => Vec::new(),
    };

    let remote = Arc::new(GitHubClient::from_config(&config.remote)?);
    let publisher = RemoteSkillPublisher::new(remote, config.remote.extension.clone());
    let handle = publisher.publish(&artifact, &repo, &base, &messages).await?;

    println!("Opened pull request for {} on branch {}", id, handle.branch);
    println!("  {}", handle.url);
    Ok(())
}

pub async fn run_sync(config: &Config, repo: Option<String>, branch: Option<String>) -> Result<()> {
    let repo = resolve_repo(config, repo)?;
    let branch = branch.unwrap_or_else(|| config.remote.branch.clone());

    let store = SkillMemoryStore::from_config(config)?;
    store.initialize(false).await?;
    let remote = Arc::new(GitHubClient::from_config(&config.remote)?);
    let sync = RemoteSkillSync::new(remote, store.clone(), config.remote.extension.clone());
    let report = sync.sync(&repo, &branch).await?;

    println!("sync {}@{}", repo, branch);
    println!("  stored: {}", report.stored.len());
    println!("  ignored: {}", report.ignored);
    println!("  skipped: {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("    {}: {}", skipped.path, skipped.reason);
    }
    println!("  records: {}", store.count().await?);
    println!("ok");
    Ok(())
}

fn resolve_repo(config: &Config, repo: Option<String>) -> Result<String> {
    match repo.or_else(|| config.remote.repo.clone()) {
        Some(repo) if repo.contains('/') => Ok(repo),
        Some(repo) => bail!("Repository must be owner/name, got '{}'", repo),
        None => bail!("No repository given. Pass --repo or set [remote] repo in config."),
    }
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn file_stem(file: &Path) -> Result<String> {
    file.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .with_context(|| format!("Cannot derive an id from {}", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_repo() {
        let mut config = Config::default();
        assert!(resolve_repo(&config, None).is_err());
        assert!(resolve_repo(&config, Some("noslash".into())).is_err());
        config.remote.repo = Some("acme/skills".into());
        assert_eq!(resolve_repo(&config, None).unwrap(), "acme/skills");
        assert_eq!(
            resolve_repo(&config, Some("other/repo".into())).unwrap(),
            "other/repo"
        );
    }
}
