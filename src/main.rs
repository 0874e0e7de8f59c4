//! # Corpus CLI (`corpus`)
//!
//! ## Usage
//!
//! ```bash
//! corpus --config ./config/corpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus init` | Create the SQLite database and run schema migrations |
//! | `corpus add <file>` | Ingest a PDF or DOCX under a new document id |
//! | `corpus reingest <doc_id>` | Re-extract a stored document and re-run change detection |
//! | `corpus extract <file>` | Print normalized text without storing anything |
//! | `corpus get <doc_id>` | Show a document and its chunks |
//! | `corpus stats` | Corpus counters and OCR tool availability |
//! | `corpus pending --model <m>` | Chunks missing an up-to-date vector for a model |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use corpus_ingest::{config, get, ingest, logging, migrate, stats};

/// Corpus: document ingestion with OCR fallback and content-addressed
/// change detection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/corpus.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "corpus",
    about = "Document ingestion with OCR fallback and content-addressed change detection",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/corpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents, chunks and
    /// embeddings tables. Safe to run repeatedly.
    Init,

    /// Ingest a document (pdf, docx).
    ///
    /// The file is copied into the upload directory under a fresh id,
    /// extracted, titled, chunked and stored.
    Add {
        /// Path to the document.
        file: PathBuf,

        /// Print the ingestion report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Re-extract a stored document and update it if its text changed.
    Reingest {
        doc_id: String,

        /// Print the ingestion report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a document's normalized text without storing it.
    ///
    /// Does not need a database; falls back to default settings when the
    /// config file is missing.
    Extract {
        /// Path to the document.
        file: PathBuf,
    },

    /// Show a stored document and its chunks.
    Get {
        doc_id: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show corpus statistics.
    Stats,

    /// List chunks that need an embedding for a model.
    Pending {
        /// Embedding model name.
        #[arg(long)]
        model: String,

        /// Maximum number of chunks to list.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Extract { file } = &cli.command {
        let cfg = config::load_config(&cli.config)
            .unwrap_or_else(|_| config::Config::minimal("./data/app.db"));
        ingest::run_extract(&cfg, file).await?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Add { file, json } => {
            ingest::run_add(&cfg, &file, json).await?;
        }
        Commands::Reingest { doc_id, json } => {
            ingest::run_reingest(&cfg, &doc_id, json).await?;
        }
        Commands::Get { doc_id, json } => {
            get::run_get(&cfg, &doc_id, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Pending { model, limit } => {
            stats::run_pending(&cfg, &model, limit).await?;
        }
        Commands::Extract { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
