//! Core data models used throughout the skill memory.
//!
//! These types represent the artifacts, index records, query results, and
//! remote-repository payloads that flow between the store, the parser, and
//! the publish/sync workflows.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkillError};

/// A named unit of source code held in the skill memory.
///
/// `id` is both the vector-index key and the file stem used on publish.
/// `signature` and `docstring` are derived by the parser and may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub id: String,
    pub source_text: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
}

impl CodeArtifact {
    pub fn new(id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_text: source_text.into(),
            signature: None,
            docstring: None,
        }
    }
}

/// Identity metadata extracted from source text.
///
/// All fields absent means the text contained no top-level function or
/// did not parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactMetadata {
    pub name: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
}

impl ArtifactMetadata {
    pub fn is_absent(&self) -> bool {
        self.name.is_none() && self.signature.is_none() && self.docstring.is_none()
    }
}

/// The persisted unit inside a vector index. At most one per `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    /// Origin label: `"skill"`, `"remote"`, or `"ingest"`.
    pub source: String,
    /// SHA-256 of `document`.
    pub hash: String,
}

/// A single nearest-neighbour match. Lower distance is more similar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub id: String,
    pub document: String,
    pub distance: f32,
}

/// Batched query response: one row per input text, each row ordered by
/// ascending distance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResponse {
    pub ids: Vec<Vec<String>>,
    pub documents: Vec<Vec<String>>,
    pub distances: Vec<Vec<f32>>,
}

impl QueryResponse {
    pub fn from_rows(rows: Vec<Vec<QueryResult>>) -> Self {
        let mut response = QueryResponse::default();
        for row in rows {
            response.ids.push(row.iter().map(|r| r.id.clone()).collect());
            response
                .documents
                .push(row.iter().map(|r| r.document.clone()).collect());
            response.distances.push(row.iter().map(|r| r.distance).collect());
        }
        response
    }

    /// Number of query rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Reassemble row `index` into [`QueryResult`]s.
    pub fn row(&self, index: usize) -> Vec<QueryResult> {
        let (Some(ids), Some(docs), Some(dists)) = (
            self.ids.get(index),
            self.documents.get(index),
            self.distances.get(index),
        ) else {
            return Vec::new();
        };
        ids.iter()
            .zip(docs)
            .zip(dists)
            .map(|((id, document), distance)| QueryResult {
                id: id.clone(),
                document: document.clone(),
                distance: *distance,
            })
            .collect()
    }
}

/// A chunk of an ingested document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `"{document_id}#{chunk_index}"`, stable across re-ingests.
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A branch on the remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranch {
    pub name: String,
    pub base_commit_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
}

/// What a successful publish hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestHandle {
    pub url: String,
    pub number: Option<u64>,
    /// The branch the artifact was committed to.
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub kind: EntryKind,
    pub name: String,
    pub path: String,
}

/// One turn of the conversation that produced an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
        }
    }
}

/// Reject ids that cannot serve as an index key, branch suffix, and file stem.
pub fn validate_artifact_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(SkillError::InvalidArgument("artifact id is empty".into()));
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(SkillError::InvalidArgument(format!(
            "artifact id '{}' contains unsupported character '{}'",
            id, bad
        )));
    }
    // The id ends a `refs/heads/add-{id}` ref name.
    if id.starts_with('.') || id.ends_with('.') || id.contains("..") || id.ends_with(".lock") {
        return Err(SkillError::InvalidArgument(format!(
            "artifact id '{}' is not usable in a branch name",
            id
        )));
    }
    Ok(())
}
