//! Error taxonomy for the skill memory.
//!
//! Every library operation returns [`SkillError`]. The CLI and config
//! loading layers wrap these in `anyhow` for context.
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | `NotInitialized` | an operation needs a collection that was never initialized |
//! | `IndexNotFound` | `open_existing` finds nothing at the configured path/collection |
//! | `Embedding` | the embedding provider failed |
//! | `Auth` | no remote credential is configured, or the remote rejected it |
//! | `RemoteConflict` | a branch name already exists on the remote |
//! | `RemoteUnavailable` | any other network or API failure |
//! | `InvalidArgument` | empty or malformed input; no side effects happened |
//!
//! "No function found" while parsing is not an error: the parser returns
//! [`ArtifactMetadata`](crate::models::ArtifactMetadata) with every field absent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("no index for collection '{collection}' at {path}")]
    IndexNotFound { path: String, collection: String },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("remote authentication failed: {0}")]
    Auth(String),

    #[error("remote conflict: {0}")]
    RemoteConflict(String),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SkillError> = std::result::Result<T, E>;

impl SkillError {
    /// True for the single remote condition the publisher recovers from.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SkillError::RemoteConflict(_))
    }
}
