//! # Skill Memory CLI (`skm`)
//!
//! ## Usage
//!
//! ```bash
//! skm --config ./config/skm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `skm init [--reset]` | Create (or wipe) the skill collection |
//! | `skm store <file>` | Embed a source file and upsert it under its function name |
//! | `skm query "<text>"` | Recall stored skills by meaning |
//! | `skm ingest <dir>` | Chunk and load a directory of documents |
//! | `skm parse <file>` | Print the name, signature, and docstring of a file's first function |
//! | `skm stats` | Summarize the collection |
//! | `skm publish <file>` | Open a pull request adding the skill to the remote repository |
//! | `skm sync` | Load every skill file from the remote repository |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use skill_memory::{commands, config, logging, stats};

/// Skill Memory: a semantic skill store for code-generating agents.
#[derive(Parser)]
#[command(
    name = "skm",
    about = "Skill Memory: persist and recall reusable code skills, then publish them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/skm.toml")]
    config: PathBuf,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open or create the skill collection.
    Init {
        /// Destroy existing records first.
        #[arg(long)]
        reset: bool,
    },

    /// Store a source file as a skill.
    ///
    /// The id defaults to the name of the file's first function, then to
    /// the file stem. Storing under an existing id replaces it.
    Store {
        file: PathBuf,

        #[arg(long)]
        id: Option<String>,
    },

    /// Find stored skills nearest to a text.
    Query {
        text: String,

        /// Maximum results (default: recall.max_results).
        #[arg(long)]
        top_k: Option<usize>,

        /// Exclusive distance cutoff (default: recall.threshold).
        #[arg(long)]
        threshold: Option<f32>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Chunk, embed, and load every matching file under a directory.
    Ingest {
        dir: PathBuf,

        /// Destroy the collection's existing records first.
        #[arg(long)]
        overwrite: bool,
    },

    /// Show the metadata extracted from a source file.
    Parse { file: PathBuf },

    /// Show collection statistics.
    Stats,

    /// Publish a source file to the remote repository as a pull request.
    Publish {
        file: PathBuf,

        /// Repository as owner/name (default: remote.repo).
        #[arg(long)]
        repo: Option<String>,

        /// Base branch (default: remote.branch).
        #[arg(long)]
        base: Option<String>,

        /// JSON list of {"role", "content"} messages to include in the body.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },

    /// Store every skill file found in the remote repository.
    Sync {
        #[arg(long)]
        repo: Option<String>,

        #[arg(long)]
        branch: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level)?;

    // Parsing needs no configuration.
    if let Commands::Parse { file } = &cli.command {
        return commands::run_parse(file);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { reset } => {
            commands::run_init(&cfg, reset).await?;
        }
        Commands::Store { file, id } => {
            commands::run_store(&cfg, &file, id).await?;
        }
        Commands::Query {
            text,
            top_k,
            threshold,
            json,
        } => {
            commands::run_query(&cfg, &text, top_k, threshold, json).await?;
        }
        Commands::Ingest { dir, overwrite } => {
            commands::run_ingest(&cfg, &dir, overwrite).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Publish {
            file,
            repo,
            base,
            transcript,
        } => {
            commands::run_publish(&cfg, &file, repo, base, transcript.as_deref()).await?;
        }
        Commands::Sync { repo, branch } => {
            commands::run_sync(&cfg, repo, branch).await?;
        }
        Commands::Parse { .. } => {}
    }

    Ok(())
}
