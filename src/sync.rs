//! Hydrate the skill memory from artifacts already on the remote.
//!
//! The walk starts at the repository root and keeps an explicit queue of
//! directories still to list, so depth never grows the stack. Every file
//! ending in the recognized extension is fetched and stored under its
//! file stem (`pkg/add_two.py` becomes `add_two`). Files with the same
//! stem in different directories overwrite each other; the last one
//! visited wins.
//!
//! Per-path failures (a listing or fetch error, non-UTF-8 or empty
//! content, a stem that is not a valid artifact id) are collected in
//! [`SyncReport::skipped`] and the walk continues. Failing to list the
//! root, rejected credentials, and failures of the store itself end the
//! sync with an error.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Result, SkillError};
use crate::models::EntryKind;
use crate::remote::RemoteRepository;
use crate::store::{SkillMemoryStore, SOURCE_REMOTE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Artifact ids stored, in visit order.
    pub stored: Vec<String>,
    /// Files without the recognized extension.
    pub ignored: usize,
    pub skipped: Vec<SkippedPath>,
}

pub struct RemoteSkillSync {
    remote: Arc<dyn RemoteRepository>,
    store: SkillMemoryStore,
    extension: String,
}

impl RemoteSkillSync {
    pub fn new(
        remote: Arc<dyn RemoteRepository>,
        store: SkillMemoryStore,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            store,
            extension: extension.into(),
        }
    }

    pub async fn sync(&self, repo: &str, branch: &str) -> Result<SyncReport> {
        if !self.remote.has_credentials() {
            return Err(SkillError::Auth(format!(
                "no credential configured for {}",
                repo
            )));
        }

        let suffix = format!(".{}", self.extension);
        let mut report = SyncReport::default();
        let mut pending = VecDeque::from(self.remote.list_tree(repo, "", branch).await?);

        while let Some(entry) = pending.pop_front() {
            match entry.kind {
                EntryKind::Dir => match self.remote.list_tree(repo, &entry.path, branch).await {
                    Ok(children) => pending.extend(children),
                    Err(e @ SkillError::Auth(_)) => return Err(e),
                    Err(e) => skip(&mut report, &entry.path, e.to_string()),
                },
                EntryKind::File => {
                    let Some(id) = entry.name.strip_suffix(&suffix).filter(|s| !s.is_empty())
                    else {
                        report.ignored += 1;
                        continue;
                    };
                    self.sync_file(repo, branch, &entry.path, id, &mut report)
                        .await?;
                }
            }
        }

        info!(
            repo = %repo,
            branch = %branch,
            stored = report.stored.len(),
            ignored = report.ignored,
            skipped = report.skipped.len(),
            "sync complete"
        );
        Ok(report)
    }

    async fn sync_file(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
        id: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let bytes = match self.remote.get_file_content(repo, path, branch).await {
            Ok(bytes) => bytes,
            Err(e @ SkillError::Auth(_)) => return Err(e),
            Err(e) => {
                skip(report, path, e.to_string());
                return Ok(());
            }
        };
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                skip(report, path, "content is not valid UTF-8".into());
                return Ok(());
            }
        };
        if text.trim().is_empty() {
            skip(report, path, "file is empty".into());
            return Ok(());
        }

        match self.store.store_with_source(id, &text, SOURCE_REMOTE).await {
            Ok(()) => {
                debug!(id = %id, path = %path, "synced artifact");
                report.stored.push(id.to_string());
                Ok(())
            }
            Err(SkillError::InvalidArgument(reason)) => {
                skip(report, path, reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn skip(report: &mut SyncReport, path: &str, reason: String) {
    warn!(path = %path, reason = %reason, "skipping remote path");
    report.skipped.push(SkippedPath {
        path: path.to_string(),
        reason,
    });
}
