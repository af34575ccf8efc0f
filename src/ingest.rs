//! Directory loading for [`RetrievalBackend::ingest`](crate::backend::RetrievalBackend::ingest).
//!
//! Walks a directory, applies include/exclude globs, and chunks each file
//! with the backend's chunk policy (or its custom splitter). Document ids
//! are paths relative to the ingest root, so chunk ids look like
//! `"notes/setup.md#0"`.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::backend::BackendConfig;
use crate::chunk::chunk_document;
use crate::error::{Result, SkillError};
use crate::models::Chunk;

/// Origin label for ingested records.
pub const SOURCE_LABEL: &str = "ingest";

const DEFAULT_EXCLUDES: [&str; 4] = [
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/__pycache__/**",
];

#[derive(Debug, Default)]
pub struct LoadedChunks {
    pub documents: usize,
    pub chunks: Vec<Chunk>,
    /// Relative paths of files that could not be read as UTF-8 text.
    pub skipped: Vec<String>,
}

pub fn load_chunks(dir: &Path, config: &BackendConfig) -> Result<LoadedChunks> {
    if !dir.is_dir() {
        return Err(SkillError::InvalidArgument(format!(
            "ingest path is not a directory: {}",
            dir.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let policy = config.chunk_policy();
    let mut loaded = LoadedChunks::default();

    // Sorted for deterministic chunk order.
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %rel_str, error = %e, "skipping unreadable file");
                loaded.skipped.push(rel_str);
                continue;
            }
        };

        let chunks = chunk_document(
            &rel_str,
            &text,
            &policy,
            config.custom_splitter.as_deref(),
        );
        loaded.documents += 1;
        loaded.chunks.extend(chunks);
    }

    Ok(loaded)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SkillError::InvalidArgument(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SkillError::InvalidArgument(format!("bad glob set: {}", e)))
}
