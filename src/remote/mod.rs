//! Remote source-control repository access.
//!
//! [`RemoteRepository`] is the narrow API the publisher and the sync walk
//! consume. Two implementations ship with the crate:
//!
//! | Type | Use |
//! |------|-----|
//! | [`GitHubClient`] | GitHub REST v3 over `reqwest` |
//! | [`InMemoryRemote`] | process-local repository for offline runs and tests |
//!
//! Every method reports credential problems as [`SkillError::Auth`]. A
//! missing credential is detected before any request is sent. Only
//! `create_branch` distinguishes [`SkillError::RemoteConflict`]; every
//! other failure is [`SkillError::RemoteUnavailable`].
//!
//! [`SkillError::Auth`]: crate::error::SkillError::Auth
//! [`SkillError::RemoteConflict`]: crate::error::SkillError::RemoteConflict
//! [`SkillError::RemoteUnavailable`]: crate::error::SkillError::RemoteUnavailable

pub mod github;
pub mod memory;

pub use github::GitHubClient;
pub use memory::InMemoryRemote;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{PullRequestHandle, PullRequestRequest, RemoteBranch, TreeEntry};

/// Repositories are addressed as `owner/name`.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Whether a credential was supplied at construction.
    fn has_credentials(&self) -> bool;

    /// The branch and its head commit, or `None` if it does not exist.
    async fn get_branch(&self, repo: &str, name: &str) -> Result<Option<RemoteBranch>>;

    /// Create `name` pointing at `base_sha`. An existing branch of that
    /// name is a `RemoteConflict`.
    async fn create_branch(&self, repo: &str, name: &str, base_sha: &str)
        -> Result<RemoteBranch>;

    /// Commit a new file on `branch`.
    async fn create_file(
        &self,
        repo: &str,
        path: &str,
        message: &str,
        content: &[u8],
        branch: &str,
    ) -> Result<()>;

    async fn create_pull_request(
        &self,
        repo: &str,
        request: &PullRequestRequest,
    ) -> Result<PullRequestHandle>;

    /// Immediate children of `path` (`""` is the root) at `git_ref`.
    async fn list_tree(&self, repo: &str, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>>;

    async fn get_file_content(&self, repo: &str, path: &str, git_ref: &str) -> Result<Vec<u8>>;
}
