//! Skill recall and capture around an agent conversation.
//!
//! A [`SkillSession`] watches the turns of one conversation. Python code
//! blocks in assistant replies are kept as candidate skills. Before the
//! next reply, [`SkillSession::recall`] looks up stored skills near the
//! prompt and renders a summary (signature and docstring per match) that
//! the caller can inject into the agent's context.
//!
//! ```text
//! observe(reply) ──▶ generated code ──remember_latest──▶ SkillMemoryStore
//!                                   └──publish_latest──▶ RemoteSkillPublisher
//! prompt ──recall──▶ SkillMemoryStore::query ──▶ summary
//! ```

use tracing::info;

use crate::config::RecallConfig;
use crate::error::{Result, SkillError};
use crate::models::{ChatMessage, CodeArtifact, PullRequestHandle, QueryResult};
use crate::parser;
use crate::publish::RemoteSkillPublisher;
use crate::store::SkillMemoryStore;

/// A fenced code block from a chat reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Info-string language tag, lowercased. Empty when untagged.
    pub language: String,
    pub code: String,
}

impl CodeBlock {
    pub fn is_python(&self) -> bool {
        matches!(self.language.as_str(), "python" | "py" | "python3")
    }
}

/// Extract every closed ```` ``` ```` fenced block from `text`.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        match open.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let language = info
                        .split_whitespace()
                        .next()
                        .unwrap_or("")
                        .to_lowercase();
                    open = Some((language, Vec::new()));
                }
            }
            Some((language, body)) if trimmed == "```" => {
                blocks.push(CodeBlock {
                    language,
                    code: body.join("\n"),
                });
            }
            Some((language, mut body)) => {
                body.push(line);
                open = Some((language, body));
            }
        }
    }
    blocks
}

/// Render recalled skills for an agent prompt, or `None` when there are none.
pub fn summarize_skills(matches: &[QueryResult]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    let mut block = String::new();
    for m in matches {
        let meta = parser::parse(&m.document);
        block.push_str(meta.signature.as_deref().unwrap_or(&m.id));
        block.push('\n');
        if let Some(doc) = &meta.docstring {
            block.push_str(doc);
            block.push('\n');
        }
    }
    Some(format!(
        "You may make use of the following Python functions:\n{}\nAssume that the functions are already imported.",
        block
    ))
}

#[derive(Debug, Clone, Default)]
pub struct Recall {
    pub matches: Vec<QueryResult>,
    pub summary: Option<String>,
}

pub struct SkillSession {
    store: SkillMemoryStore,
    recall: RecallConfig,
    generated: Vec<String>,
    transcript: Vec<ChatMessage>,
}

impl SkillSession {
    pub fn new(store: SkillMemoryStore, recall: RecallConfig) -> Self {
        Self {
            store,
            recall,
            generated: Vec::new(),
            transcript: Vec::new(),
        }
    }

    /// Record a conversation turn. Python blocks in assistant turns become
    /// candidate skills.
    pub fn observe(&mut self, message: ChatMessage) {
        if message.role == "assistant" {
            if let Some(content) = &message.content {
                self.generated.extend(
                    extract_code_blocks(content)
                        .into_iter()
                        .filter(CodeBlock::is_python)
                        .map(|b| b.code),
                );
            }
        }
        self.transcript.push(message);
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn generated(&self) -> &[String] {
        &self.generated
    }

    /// Stored skills relevant to `prompt` under the session's recall limits.
    pub async fn recall(&self, prompt: &str) -> Result<Recall> {
        let matches = self
            .store
            .query(prompt, self.recall.max_results, Some(self.recall.threshold))
            .await?;
        for m in &matches {
            info!(id = %m.id, distance = m.distance, "recalled skill");
        }
        let summary = summarize_skills(&matches);
        Ok(Recall { matches, summary })
    }

    /// The most recent generated block as an artifact named after its
    /// first function.
    pub fn latest_artifact(&self) -> Result<Option<CodeArtifact>> {
        let Some(code) = self.generated.last() else {
            return Ok(None);
        };
        let meta = parser::parse(code);
        let name = meta.name.ok_or_else(|| {
            SkillError::InvalidArgument("latest generated code defines no top-level function".into())
        })?;
        Ok(Some(CodeArtifact {
            id: name,
            source_text: code.clone(),
            signature: meta.signature,
            docstring: meta.docstring,
        }))
    }

    /// Store the latest generated function under its name.
    pub async fn remember_latest(&self) -> Result<Option<CodeArtifact>> {
        let Some(artifact) = self.latest_artifact()? else {
            return Ok(None);
        };
        self.store.store_artifact(&artifact).await?;
        Ok(Some(artifact))
    }

    /// Publish the latest generated function with this session's transcript.
    pub async fn publish_latest(
        &self,
        publisher: &RemoteSkillPublisher,
        repo: &str,
        base_branch: &str,
    ) -> Result<Option<PullRequestHandle>> {
        let Some(artifact) = self.latest_artifact()? else {
            return Ok(None);
        };
        let handle = publisher
            .publish(&artifact, repo, base_branch, &self.transcript)
            .await?;
        Ok(Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, MemoryIndex};
    use crate::embedding::HashingProvider;
    use std::sync::Arc;

    fn session() -> SkillSession {
        let backend = MemoryIndex::new(
            BackendConfig::new("unused", "functions"),
            Arc::new(HashingProvider::default()),
        );
        let recall = RecallConfig {
            threshold: 0.9,
            max_results: 5,
        };
        SkillSession::new(SkillMemoryStore::new(Arc::new(backend)), recall)
    }

    #[test]
    fn test_extract_code_blocks() {
        let reply = "Plan first.\n```python\ndef f():\n    return 1\n```\nThen run:\n```sh\npython f.py\n```\n```\nunclosed";
        let blocks = extract_code_blocks(reply);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].is_python());
        assert_eq!(blocks[0].code, "def f():\n    return 1");
        assert_eq!(blocks[1].language, "sh");
    }

    #[test]
    fn test_summarize_skills() {
        let matches = vec![QueryResult {
            id: "add_two".into(),
            document: "def add_two(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n".into(),
            distance: 0.2,
        }];
        let summary = summarize_skills(&matches).unwrap();
        assert!(summary.contains("add_two(a, b)\nAdd two numbers.\n"));
        assert!(summarize_skills(&[]).is_none());
    }

    #[tokio::test]
    async fn test_remember_and_recall() {
        let mut session = session();
        session.store.initialize(false).await.unwrap();

        session.observe(ChatMessage::new("user", "Write a function that adds two numbers."));
        session.observe(ChatMessage::new(
            "assistant",
            "```python\ndef add_two(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n```",
        ));
        assert_eq!(session.generated().len(), 1);

        let artifact = session.remember_latest().await.unwrap().unwrap();
        assert_eq!(artifact.id, "add_two");

        let recall = session.recall("add two numbers").await.unwrap();
        assert_eq!(recall.matches[0].id, "add_two");
        assert!(recall.summary.unwrap().contains("add_two(a, b)"));
    }

    #[tokio::test]
    async fn test_remember_without_function() {
        let mut session = session();
        session.store.initialize(false).await.unwrap();
        assert!(session.remember_latest().await.unwrap().is_none());

        session.observe(ChatMessage::new("assistant", "```python\nprint('hi')\n```"));
        let err = session.remember_latest().await.unwrap_err();
        assert!(matches!(err, SkillError::InvalidArgument(_)));
    }
}
