//! Publish a learned artifact to the remote repository as a pull request.
//!
//! # Protocol
//!
//! 1. Resolve the base branch's head commit.
//! 2. Create `add-{id}` from it. If that name is taken, create
//!    `add-{id}-{uuid}` instead. A second collision is returned as-is.
//! 3. Commit the artifact as `{id}.{ext}` with message `Add {id}`.
//! 4. Open a pull request `Add {id}` into the base branch whose body
//!    renders the originating conversation.
//!
//! The steps are not atomic. If step 3 or 4 fails, the branch from step 2
//! stays on the remote and the error is returned.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SkillError};
use crate::models::{
    validate_artifact_id, ChatMessage, CodeArtifact, PullRequestHandle, PullRequestRequest,
    RemoteBranch,
};
use crate::remote::RemoteRepository;

pub struct RemoteSkillPublisher {
    remote: Arc<dyn RemoteRepository>,
    extension: String,
}

impl RemoteSkillPublisher {
    /// `extension` is the file extension for committed artifacts, without the dot.
    pub fn new(remote: Arc<dyn RemoteRepository>, extension: impl Into<String>) -> Self {
        Self {
            remote,
            extension: extension.into(),
        }
    }

    pub async fn publish(
        &self,
        artifact: &CodeArtifact,
        repo: &str,
        base_branch: &str,
        transcript: &[ChatMessage],
    ) -> Result<PullRequestHandle> {
        validate_artifact_id(&artifact.id)?;
        if repo.trim().is_empty() || base_branch.trim().is_empty() {
            return Err(SkillError::InvalidArgument(
                "repository and base branch are required".into(),
            ));
        }
        if artifact.source_text.trim().is_empty() {
            return Err(SkillError::InvalidArgument(format!(
                "artifact '{}' has no source text",
                artifact.id
            )));
        }
        if !self.remote.has_credentials() {
            return Err(SkillError::Auth(format!(
                "no credential configured for {}",
                repo
            )));
        }

        let base = self
            .remote
            .get_branch(repo, base_branch)
            .await?
            .ok_or_else(|| {
                SkillError::RemoteUnavailable(format!(
                    "base branch '{}' not found in {}",
                    base_branch, repo
                ))
            })?;

        let branch = self.create_branch(repo, &artifact.id, &base).await?;

        let file_path = format!("{}.{}", artifact.id, self.extension);
        let message = format!("Add {}", artifact.id);
        if let Err(e) = self
            .remote
            .create_file(
                repo,
                &file_path,
                &message,
                artifact.source_text.as_bytes(),
                &branch.name,
            )
            .await
        {
            warn!(repo = %repo, branch = %branch.name, "commit failed; branch left in place");
            return Err(e);
        }

        let request = PullRequestRequest {
            title: format!("Add {}", artifact.id),
            body: format!(
                "This pull request adds the function {}.\n\n{}",
                artifact.id,
                messages_to_markdown(transcript)
            ),
            base: base_branch.to_string(),
            head: branch.name.clone(),
        };
        let handle = match self.remote.create_pull_request(repo, &request).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(repo = %repo, branch = %branch.name, "pull request failed; branch left in place");
                return Err(e);
            }
        };

        info!(repo = %repo, branch = %handle.branch, url = %handle.url, "published {}", artifact.id);
        Ok(handle)
    }

    async fn create_branch(&self, repo: &str, id: &str, base: &RemoteBranch) -> Result<RemoteBranch> {
        let name = format!("add-{}", id);
        match self
            .remote
            .create_branch(repo, &name, &base.base_commit_sha)
            .await
        {
            Err(e) if e.is_conflict() => {
                let retry = format!("add-{}-{}", id, Uuid::new_v4().simple());
                warn!(repo = %repo, taken = %name, branch = %retry, "branch exists; retrying with unique name");
                self.remote
                    .create_branch(repo, &retry, &base.base_commit_sha)
                    .await
            }
            other => other,
        }
    }
}

/// Render conversation turns as role-labelled markdown.
///
/// Each turn becomes `**role**:` on its own line followed by the content.
/// Turns without content render an empty body.
pub fn messages_to_markdown(messages: &[ChatMessage]) -> String {
    let mut markdown = String::new();
    for message in messages {
        markdown.push_str(&format!("**{}**:\n", message.role));
        markdown.push_str(message.content.as_deref().unwrap_or(""));
        markdown.push('\n');
    }
    markdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;

    #[test]
    fn test_messages_to_markdown() {
        let messages = vec![
            ChatMessage::new("user", "Add two numbers."),
            ChatMessage {
                role: "assistant".into(),
                content: None,
            },
        ];
        assert_eq!(
            messages_to_markdown(&messages),
            "**user**:\nAdd two numbers.\n**assistant**:\n\n"
        );
        assert_eq!(messages_to_markdown(&[]), "");
    }

    #[tokio::test]
    async fn test_publish_happy_path() {
        let remote = Arc::new(InMemoryRemote::new());
        let publisher = RemoteSkillPublisher::new(remote.clone(), "py");
        let artifact = CodeArtifact::new("add_two", "def add_two(a, b):\n    return a + b\n");

        let handle = publisher
            .publish(&artifact, "acme/skills", "main", &[ChatMessage::new("user", "sum")])
            .await
            .unwrap();

        assert_eq!(handle.branch, "add-add_two");
        assert_eq!(
            remote.file("add-add_two", "add_two.py").as_deref(),
            Some(artifact.source_text.as_bytes())
        );
        let pulls = remote.pull_requests();
        assert_eq!(pulls.len(), 1);
        assert_eq!(pulls[0].title, "Add add_two");
        assert_eq!(pulls[0].base, "main");
        assert!(pulls[0].body.contains("adds the function add_two"));
        assert!(pulls[0].body.contains("**user**:\nsum"));
    }

    #[tokio::test]
    async fn test_missing_base_branch() {
        let remote = Arc::new(InMemoryRemote::new());
        let publisher = RemoteSkillPublisher::new(remote, "py");
        let err = publisher
            .publish(&CodeArtifact::new("f", "def f(): pass"), "acme/skills", "trunk", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn test_id_unusable_as_branch_makes_no_calls() {
        let remote = Arc::new(InMemoryRemote::new());
        let publisher = RemoteSkillPublisher::new(remote.clone(), "py");
        let err = publisher
            .publish(&CodeArtifact::new("a..b", "def f(): pass"), "acme/skills", "main", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SkillError::InvalidArgument(_)));
        assert_eq!(remote.calls(), 0);
    }
}
