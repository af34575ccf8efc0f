//! GitHub REST client.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | `get_branch` | `GET /repos/{repo}/branches/{name}` |
//! | `create_branch` | `POST /repos/{repo}/git/refs` |
//! | `create_file` | `PUT /repos/{repo}/contents/{path}` |
//! | `create_pull_request` | `POST /repos/{repo}/pulls` |
//! | `list_tree` / `get_file_content` | `GET /repos/{repo}/contents/{path}?ref=` |
//!
//! Requests are single-shot: failures surface to the caller, which decides
//! whether to retry.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::RemoteRepository;
use crate::config::RemoteConfig;
use crate::error::{Result, SkillError};
use crate::models::{EntryKind, PullRequestHandle, PullRequestRequest, RemoteBranch, TreeEntry};

const USER_AGENT: &str = concat!("skill-memory/", env!("CARGO_PKG_VERSION"));

pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct BranchResponse {
    name: String,
    commit: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: CommitRef,
}

#[derive(Deserialize)]
struct PullResponse {
    html_url: String,
    number: u64,
}

#[derive(Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    path: String,
}

#[derive(Deserialize)]
struct FileResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SkillError::RemoteUnavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            client,
        })
    }

    /// Client for `config.api_url`, reading the token from `config.token_env`.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        Self::new(
            &config.api_url,
            config.token(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self.token.as_deref().ok_or_else(|| {
            SkillError::Auth("no GitHub token configured".to_string())
        })?;
        Ok(self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| SkillError::RemoteUnavailable(e.to_string()))
    }

    fn contents_path(repo: &str, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            format!("/repos/{}/contents", repo)
        } else {
            format!("/repos/{}/contents/{}", repo, path)
        }
    }
}

/// Map a non-success response to the error taxonomy.
async fn status_error(response: Response, what: &str) -> SkillError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SkillError::Auth(format!("{} rejected ({}): {}", what, status, body))
        }
        _ => SkillError::RemoteUnavailable(format!("{} failed ({}): {}", what, status, body)),
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn is_reference_conflict(body: &str) -> bool {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message.trim() == "Reference already exists")
        .unwrap_or(false)
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| SkillError::RemoteUnavailable(format!("{}: bad response: {}", what, e)))
}

#[async_trait]
impl RemoteRepository for GitHubClient {
    fn has_credentials(&self) -> bool {
        self.token.is_some()
    }

    async fn get_branch(&self, repo: &str, name: &str) -> Result<Option<RemoteBranch>> {
        let request = self.request(Method::GET, &format!("/repos/{}/branches/{}", repo, name))?;
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response, "get branch").await);
        }
        let branch: BranchResponse = decode(response, "get branch").await?;
        Ok(Some(RemoteBranch {
            name: branch.name,
            base_commit_sha: branch.commit.sha,
        }))
    }

    async fn create_branch(
        &self,
        repo: &str,
        name: &str,
        base_sha: &str,
    ) -> Result<RemoteBranch> {
        let request = self
            .request(Method::POST, &format!("/repos/{}/git/refs", repo))?
            .json(&json!({
                "ref": format!("refs/heads/{}", name),
                "sha": base_sha,
            }));
        let response = self.send(request).await?;

        // 422 also covers a missing base commit or a malformed ref name;
        // only "Reference already exists" means the name is taken.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            if is_reference_conflict(&body) {
                return Err(SkillError::RemoteConflict(format!(
                    "branch '{}' already exists",
                    name
                )));
            }
            return Err(SkillError::RemoteUnavailable(format!(
                "create branch failed ({}): {}",
                StatusCode::UNPROCESSABLE_ENTITY,
                body
            )));
        }
        if !response.status().is_success() {
            return Err(status_error(response, "create branch").await);
        }
        let created: RefResponse = decode(response, "create branch").await?;
        debug!(repo = %repo, branch = %name, "created branch");
        Ok(RemoteBranch {
            name: name.to_string(),
            base_commit_sha: created.object.sha,
        })
    }

    async fn create_file(
        &self,
        repo: &str,
        path: &str,
        message: &str,
        content: &[u8],
        branch: &str,
    ) -> Result<()> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let request = self
            .request(Method::PUT, &Self::contents_path(repo, path))?
            .json(&json!({
                "message": message,
                "content": encoded,
                "branch": branch,
            }));
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response, "create file").await);
        }
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        pr: &PullRequestRequest,
    ) -> Result<PullRequestHandle> {
        let request = self
            .request(Method::POST, &format!("/repos/{}/pulls", repo))?
            .json(&json!({
                "title": pr.title,
                "body": pr.body,
                "head": pr.head,
                "base": pr.base,
            }));
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response, "create pull request").await);
        }
        let created: PullResponse = decode(response, "create pull request").await?;
        Ok(PullRequestHandle {
            url: created.html_url,
            number: Some(created.number),
            branch: pr.head.clone(),
        })
    }

    async fn list_tree(&self, repo: &str, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        let request = self
            .request(Method::GET, &Self::contents_path(repo, path))?
            .query(&[("ref", git_ref)]);
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response, "list tree").await);
        }
        let entries: Vec<ContentEntry> = decode(response, "list tree").await?;

        // Symlinks and submodules have no content to sync.
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let kind = match e.kind.as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Dir,
                    _ => return None,
                };
                Some(TreeEntry {
                    kind,
                    name: e.name,
                    path: e.path,
                })
            })
            .collect())
    }

    async fn get_file_content(&self, repo: &str, path: &str, git_ref: &str) -> Result<Vec<u8>> {
        let request = self
            .request(Method::GET, &Self::contents_path(repo, path))?
            .query(&[("ref", git_ref)]);
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response, "get file").await);
        }
        let file: FileResponse = decode(response, "get file").await?;
        if file.encoding != "base64" {
            return Err(SkillError::RemoteUnavailable(format!(
                "{}: unsupported content encoding '{}'",
                path, file.encoding
            )));
        }
        // The API wraps base64 payloads at 60 columns.
        let compact: String = file.content.split_whitespace().collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| SkillError::RemoteUnavailable(format!("{}: invalid base64: {}", path, e)))
    }
}
