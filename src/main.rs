//! # Semantic Index CLI (`sidx`)
//!
//! The `sidx` binary keeps an on-disk semantic index in sync with a directory
//! of text files and answers similarity queries against it.
//!
//! ## Usage
//!
//! ```bash
//! sidx --config ./config/sidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sidx index` | Scan the corpus and reconcile the index against it |
//! | `sidx search "<query>"` | Rank indexed documents by similarity |
//! | `sidx get <id>` | Print the stored record for one document |
//! | `sidx stats` | Summarize the index |
//! | `sidx verify` | Check metadata and vectors agree |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `semantic_index=info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use semantic_index::config::{self, Config};
use semantic_index::embedding::DisabledEmbedder;
use semantic_index::progress::ProgressMode;
use semantic_index::{index_cmd, search, stats, SemanticIndex};

/// Semantic Index CLI: incremental embedding index over a text corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sidx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sidx",
    about = "Semantic Index: an incremental embedding index over a text corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the corpus and bring the index up to date.
    ///
    /// Only new or changed documents are embedded. Documents no longer in
    /// the corpus are removed unless `--partial` is given.
    Index {
        /// Treat the scan as a subset: never remove documents missing from it.
        #[arg(long)]
        partial: bool,

        /// Show corpus counts without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Search indexed documents by semantic similarity.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the stored record for a document id.
    Get {
        /// Document id (path relative to the corpus root).
        id: String,
    },

    /// Summarize the index: counts, dimension, model, sizes.
    Stats {
        /// Print stats as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check that every record has a vector and every vector a record.
    Verify,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("semantic_index=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg: Config = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Index {
            partial,
            dry_run,
            progress,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            index_cmd::run_index(&cfg, partial, dry_run, mode).await?;
        }
        Commands::Search { query, limit, json } => {
            search::run_search(&cfg, &query, limit, json).await?;
        }
        Commands::Get { id } => {
            let index = SemanticIndex::open(cfg, Arc::new(DisabledEmbedder));
            let record = index
                .get_document(&id)
                .await
                .with_context(|| format!("No indexed document with id '{}'", id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Verify => {
            stats::run_verify(&cfg).await?;
        }
    }

    Ok(())
}
