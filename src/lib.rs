//! # Skill Memory
//!
//! A semantic skill memory for code-generating agents.
//!
//! Agents persist reusable code artifacts, recall the ones relevant to a
//! new task by meaning rather than exact match, and publish newly learned
//! artifacts to a version-controlled repository through a branch and pull
//! request workflow.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ agent reply  │──▶│    parser    │──▶│ SkillMemoryStore │
//! │ (code block) │   │ name/sig/doc │   │  embed + upsert  │
//! └──────────────┘   └──────────────┘   └────────┬─────────┘
//!                                                │ RetrievalBackend
//!                                   ┌────────────┴────────────┐
//!                                   ▼                         ▼
//!                             ┌──────────┐              ┌──────────┐
//!                             │  SQLite  │              │  memory  │
//!                             └──────────┘              └──────────┘
//!
//! ┌──────────────────┐  add-{id} branch, commit, PR  ┌──────────────────┐
//! │ RemoteSkill      │──────────────────────────────▶│ RemoteRepository │
//! │ Publisher / Sync │◀──────────────────────────────│  (GitHub, mem)   │
//! └──────────────────┘        tree walk, fetch       └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! skm init                              # create the collection
//! skm store add_two.py                  # remember a function
//! skm query "add two numbers"           # recall by meaning
//! skm sync --repo acme/skills           # pull published skills
//! skm publish add_two.py --repo acme/skills
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | [`SkillMemoryStore`]: upsert, thresholded query, reset |
//! | [`backend`] | [`RetrievalBackend`] trait, SQLite and in-memory indexes |
//! | [`parser`] | Function name, signature, and docstring extraction |
//! | [`publish`] | [`RemoteSkillPublisher`]: branch, commit, pull request |
//! | [`sync`] | [`RemoteSkillSync`]: remote tree walk into the store |
//! | [`remote`] | Remote repository trait and GitHub client |
//! | [`skills`] | Conversation-level recall and capture |
//! | [`embedding`] | Embedding providers and distance metrics |
//! | [`chunk`] | Document chunking for ingest |
//! | [`config`] | TOML configuration |
//! | [`error`] | [`SkillError`] taxonomy |

pub mod backend;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod publish;
pub mod remote;
pub mod skills;
pub mod stats;
pub mod store;
pub mod sync;

pub use backend::RetrievalBackend;
pub use error::SkillError;
pub use publish::RemoteSkillPublisher;
pub use store::SkillMemoryStore;
pub use sync::RemoteSkillSync;
