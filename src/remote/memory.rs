//! Process-local [`RemoteRepository`].
//!
//! Holds branches, per-branch files, and opened pull requests in memory.
//! A single repository is modelled; the `repo` argument is accepted and
//! ignored. Failures can be injected per path to exercise the publish and
//! sync error paths, and every call that would reach the network on a real
//! remote is counted.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::RemoteRepository;
use crate::error::{Result, SkillError};
use crate::models::{EntryKind, PullRequestHandle, PullRequestRequest, RemoteBranch, TreeEntry};

#[derive(Default)]
struct State {
    /// Branch name to head commit sha.
    branches: HashMap<String, String>,
    /// Branch name to `path -> content`.
    files: HashMap<String, BTreeMap<String, Vec<u8>>>,
    pulls: Vec<PullRequestRequest>,
    failing_reads: HashSet<String>,
    failing_lists: HashSet<String>,
    fail_commits: bool,
    commits: usize,
}

pub struct InMemoryRemote {
    credentials: bool,
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    /// An authenticated remote with an empty `main` branch.
    pub fn new() -> Self {
        let remote = Self {
            credentials: true,
            state: Mutex::new(State::default()),
            calls: AtomicUsize::new(0),
        };
        remote.add_branch("main");
        remote
    }

    /// A remote constructed without a credential.
    pub fn without_credentials() -> Self {
        Self {
            credentials: false,
            ..Self::new()
        }
    }

    pub fn add_branch(&self, name: &str) {
        let mut state = self.lock();
        let sha = format!("sha-{}", state.branches.len() + 1);
        state.branches.insert(name.to_string(), sha);
        state.files.entry(name.to_string()).or_default();
    }

    pub fn add_file(&self, branch: &str, path: &str, content: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        state
            .files
            .entry(branch.to_string())
            .or_default()
            .insert(path.trim_matches('/').to_string(), content.into());
    }

    /// Make `get_file_content(path)` fail.
    pub fn fail_reads_of(&self, path: &str) {
        self.lock().failing_reads.insert(path.to_string());
    }

    /// Make `list_tree(path)` fail.
    pub fn fail_listing_of(&self, path: &str) {
        self.lock().failing_lists.insert(path.to_string());
    }

    /// Make every `create_file` fail.
    pub fn fail_commits(&self) {
        self.lock().fail_commits = true;
    }

    pub fn branch_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().branches.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(branch)?.get(path).cloned()
    }

    pub fn pull_requests(&self) -> Vec<PullRequestRequest> {
        self.lock().pulls.clone()
    }

    /// Number of trait calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self) -> Result<()> {
        if !self.credentials {
            return Err(SkillError::Auth("no credential configured".into()));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RemoteRepository for InMemoryRemote {
    fn has_credentials(&self) -> bool {
        self.credentials
    }

    async fn get_branch(&self, _repo: &str, name: &str) -> Result<Option<RemoteBranch>> {
        self.enter()?;
        Ok(self.lock().branches.get(name).map(|sha| RemoteBranch {
            name: name.to_string(),
            base_commit_sha: sha.clone(),
        }))
    }

    async fn create_branch(
        &self,
        _repo: &str,
        name: &str,
        base_sha: &str,
    ) -> Result<RemoteBranch> {
        self.enter()?;
        let mut state = self.lock();
        if state.branches.contains_key(name) {
            return Err(SkillError::RemoteConflict(format!(
                "branch '{}' already exists",
                name
            )));
        }
        let source = state
            .branches
            .iter()
            .find(|(_, sha)| sha.as_str() == base_sha)
            .map(|(branch, _)| branch.clone())
            .ok_or_else(|| {
                SkillError::RemoteUnavailable(format!("unknown commit '{}'", base_sha))
            })?;
        let files = state.files.get(&source).cloned().unwrap_or_default();
        state.branches.insert(name.to_string(), base_sha.to_string());
        state.files.insert(name.to_string(), files);
        Ok(RemoteBranch {
            name: name.to_string(),
            base_commit_sha: base_sha.to_string(),
        })
    }

    async fn create_file(
        &self,
        _repo: &str,
        path: &str,
        _message: &str,
        content: &[u8],
        branch: &str,
    ) -> Result<()> {
        self.enter()?;
        let mut state = self.lock();
        if state.fail_commits {
            return Err(SkillError::RemoteUnavailable(format!(
                "commit of '{}' rejected",
                path
            )));
        }
        if !state.branches.contains_key(branch) {
            return Err(SkillError::RemoteUnavailable(format!(
                "no branch '{}'",
                branch
            )));
        }
        state.commits += 1;
        let sha = format!("commit-{}", state.commits);
        state.branches.insert(branch.to_string(), sha);
        state
            .files
            .entry(branch.to_string())
            .or_default()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        request: &PullRequestRequest,
    ) -> Result<PullRequestHandle> {
        self.enter()?;
        let mut state = self.lock();
        for branch in [&request.head, &request.base] {
            if !state.branches.contains_key(branch.as_str()) {
                return Err(SkillError::RemoteUnavailable(format!(
                    "no branch '{}'",
                    branch
                )));
            }
        }
        state.pulls.push(request.clone());
        let number = state.pulls.len() as u64;
        Ok(PullRequestHandle {
            url: format!("memory://{}/pull/{}", repo, number),
            number: Some(number),
            branch: request.head.clone(),
        })
    }

    async fn list_tree(&self, _repo: &str, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        self.enter()?;
        let state = self.lock();
        let dir = path.trim_matches('/');
        if state.failing_lists.contains(dir) {
            return Err(SkillError::RemoteUnavailable(format!(
                "listing '{}' failed",
                dir
            )));
        }
        let files = state
            .files
            .get(git_ref)
            .ok_or_else(|| SkillError::RemoteUnavailable(format!("no ref '{}'", git_ref)))?;

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir)
        };
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for file in files.keys() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    dirs.insert(child.to_string());
                }
                None => entries.push(TreeEntry {
                    kind: EntryKind::File,
                    name: rest.to_string(),
                    path: file.clone(),
                }),
            }
        }
        entries.extend(dirs.into_iter().map(|name| TreeEntry {
            kind: EntryKind::Dir,
            path: format!("{}{}", prefix, name),
            name,
        }));
        Ok(entries)
    }

    async fn get_file_content(&self, _repo: &str, path: &str, git_ref: &str) -> Result<Vec<u8>> {
        self.enter()?;
        let state = self.lock();
        if state.failing_reads.contains(path) {
            return Err(SkillError::RemoteUnavailable(format!(
                "reading '{}' failed",
                path
            )));
        }
        state
            .files
            .get(git_ref)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| SkillError::RemoteUnavailable(format!("no file '{}'", path)))
    }
}
